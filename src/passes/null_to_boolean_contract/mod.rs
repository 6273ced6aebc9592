use anyhow::Result;
use serde_sarif::sarif::Result as SarifResult;

use crate::engine::AnalysisContext;
use crate::inference::infer_null_to_boolean_contracts;
use crate::passes::{
    Pass, PassMetadata, method_location_with_line, record_properties, result_message,
};

/// Reports methods whose result is fixed once a parameter is known to be null (or non-null).
#[derive(Default)]
pub(crate) struct NullToBooleanContractPass;

crate::register_pass!(NullToBooleanContractPass);

impl Pass for NullToBooleanContractPass {
    fn metadata(&self) -> PassMetadata {
        PassMetadata {
            id: "NULL_TO_BOOLEAN_CONTRACT",
            name: "Inferred null-to-boolean contract",
            description: "The method returns a constant whenever this parameter is null",
        }
    }

    fn run(&self, context: &AnalysisContext) -> Result<Vec<SarifResult>> {
        let records = context.with_span("inference.contracts", &[], || {
            infer_null_to_boolean_contracts(&context.classes, &context.classpath, &context.config)
        })?;

        let mut results = Vec::new();
        for record in records {
            let Some(class) = context.class(&record.method.class_name) else {
                continue;
            };
            if !context.is_analysis_target_class(class) {
                continue;
            }
            let line = class
                .methods
                .iter()
                .find(|method| {
                    method.name == record.method.name && method.descriptor == record.method.descriptor
                })
                .and_then(|method| method.first_line());
            let artifact_uri = context.class_artifact_uri(class);
            let location = method_location_with_line(
                &class.name,
                &record.method.name,
                &record.method.descriptor,
                artifact_uri.as_deref(),
                line,
            );
            let message = result_message(format!(
                "{} {}",
                record.contract, record.annotation_key_prefix
            ));
            results.push(
                SarifResult::builder()
                    .message(message)
                    .locations(vec![location])
                    .properties(record_properties(&record)?)
                    .build(),
            );
        }
        Ok(results)
    }
}
