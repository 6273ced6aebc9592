use anyhow::Result;
use opentelemetry::KeyValue;
use serde_sarif::sarif::Result as SarifResult;

use crate::engine::AnalysisContext;
use crate::inference::not_null_records;
use crate::passes::{
    Pass, PassMetadata, method_location_with_line, record_properties, result_message,
};

/// Reports parameters that every null-argument execution dereferences.
#[derive(Default)]
pub(crate) struct NotNullParameterPass;

crate::register_pass!(NotNullParameterPass);

impl Pass for NotNullParameterPass {
    fn metadata(&self) -> PassMetadata {
        PassMetadata {
            id: "NOT_NULL_PARAMETER",
            name: "Inferred non-null parameter",
            description: "Passing null to this parameter always ends in a NullPointerException",
        }
    }

    fn run(&self, context: &AnalysisContext) -> Result<Vec<SarifResult>> {
        let store = context.not_null_facts()?;
        let records = not_null_records(&context.classes, &context.classpath, store)?;
        let attributes = [KeyValue::new("nullinfer.facts", records.len() as i64)];

        context.with_span("report.not_null", &attributes, || -> Result<Vec<SarifResult>> {
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
                        method.name == record.method.name
                            && method.descriptor == record.method.descriptor
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
                let message = result_message(format!("@NotNull {}", record.annotation_key));
                results.push(
                    SarifResult::builder()
                        .message(message)
                        .locations(vec![location])
                        .properties(record_properties(&record)?)
                        .build(),
                );
            }
            Ok(results)
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::engine::{Engine, EngineOutput, build_context};
    use crate::inference::AnalysisConfig;
    use crate::speculation::fixtures::{
        classes_of, is_empty_list, require_argument, string_length,
    };
    use crate::test_harness::{JvmTestHarness, SourceFile};

    fn not_null_messages(output: &EngineOutput) -> Vec<String> {
        output
            .results
            .iter()
            .filter(|result| result.rule_id.as_deref() == Some("NOT_NULL_PARAMETER"))
            .filter_map(|result| result.message.text.clone())
            .collect()
    }

    #[test]
    fn reports_dereferenced_and_checked_parameters() {
        let (classes, index) = classes_of(vec![string_length(), require_argument(), is_empty_list()]);
        let context = build_context(classes, index, &[], AnalysisConfig::default());

        let output = Engine::new().analyze(context).expect("analysis");

        assert_eq!(
            not_null_messages(&output),
            vec![
                "@NotNull com.example.Fixtures int length(java.lang.String) 0".to_string(),
                "@NotNull com.example.Fixtures void require(java.lang.Object) 0".to_string(),
            ]
        );
    }

    #[test]
    fn records_are_attached_as_properties() {
        let (classes, index) = classes_of(vec![string_length()]);
        let context = build_context(classes, index, &[], AnalysisConfig::default());

        let output = Engine::new().analyze(context).expect("analysis");

        let properties = output
            .results
            .iter()
            .find(|result| result.rule_id.as_deref() == Some("NOT_NULL_PARAMETER"))
            .and_then(|result| result.properties.as_ref())
            .expect("properties");
        assert_eq!(
            properties.additional_properties.get("parameterIndex"),
            Some(&serde_json::json!(0))
        );
    }

    #[test]
    fn javac_compiled_callers_inherit_facts_from_callees() {
        let harness = JvmTestHarness::new().expect("JAVA_HOME must be set for harness tests");
        let sources = vec![SourceFile {
            path: "com/example/ClassA.java".to_string(),
            contents: r#"
package com.example;
public class ClassA {
    static int size(String varOne) {
        return varOne.length();
    }
    public static int twice(String varTwo) {
        return size(varTwo) * 2;
    }
    public int tolerant(String varThree) {
        return varThree == null ? 0 : varThree.length();
    }
}
"#
            .to_string(),
        }];

        let output = harness.compile_and_analyze(&sources).expect("run harness analysis");
        let messages = not_null_messages(&output);

        assert!(messages.contains(&"@NotNull com.example.ClassA int size(java.lang.String) 0".to_string()));
        assert!(messages.contains(&"@NotNull com.example.ClassA int twice(java.lang.String) 0".to_string()));
        assert!(!messages.iter().any(|message| message.contains("tolerant")));
    }
}
