use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use anyhow::Result;
use opentelemetry::KeyValue;
use serde_sarif::sarif::Artifact;
use serde_sarif::sarif::{MultiformatMessageString, ReportingDescriptor, Result as SarifResult};

use crate::callgraph::{CallGraph, build_call_graph};
use crate::classpath::ClasspathIndex;
use crate::facts::FactStore;
use crate::inference::{AnalysisConfig, infer_not_null_parameters};
use crate::ir::Class;
use crate::passes::{Pass, PassMetadata, all_passes};
use crate::telemetry::{Telemetry, with_span};

/// Inputs shared by reporting passes.
pub(crate) struct AnalysisContext {
    pub(crate) classes: Vec<Class>,
    pub(crate) classpath: ClasspathIndex,
    pub(crate) call_graph: CallGraph,
    pub(crate) config: AnalysisConfig,
    artifact_uris: BTreeMap<i64, String>,
    analysis_target_artifacts: BTreeSet<i64>,
    artifact_parents: BTreeMap<i64, i64>,
    telemetry: Option<Arc<Telemetry>>,
    not_null: OnceLock<FactStore>,
}

/// Timing breakdown for context construction.
pub(crate) struct ContextTimings {
    pub(crate) call_graph_duration_ms: u128,
    pub(crate) artifact_duration_ms: u128,
}

/// Analysis engine that executes the registered passes.
pub(crate) struct Engine {
    passes: Vec<Box<dyn Pass + Sync>>,
}

impl Engine {
    pub(crate) fn new() -> Self {
        Self {
            passes: all_passes(),
        }
    }

    pub(crate) fn analyze(&self, context: AnalysisContext) -> Result<EngineOutput> {
        let mut rules = Vec::new();
        let mut results = Vec::new();

        for pass in &self.passes {
            let metadata = pass.metadata();
            rules.push(rule_descriptor(&metadata));
            let span_attributes = [KeyValue::new("nullinfer.pass_id", metadata.id)];
            let mut pass_results = context.with_span(
                &format!("pass:{}", metadata.id),
                &span_attributes,
                || pass.run(&context),
            )?;
            for result in &mut pass_results {
                if result.rule_id.is_none() {
                    result.rule_id = Some(metadata.id.to_string());
                }
            }
            results.extend(pass_results);
        }

        results.sort_by(|left, right| {
            let left_id = left.rule_id.as_deref().unwrap_or("");
            let right_id = right.rule_id.as_deref().unwrap_or("");
            let left_msg = left.message.text.as_deref().unwrap_or("");
            let right_msg = right.message.text.as_deref().unwrap_or("");
            left_id.cmp(right_id).then(left_msg.cmp(right_msg))
        });

        Ok(EngineOutput { rules, results })
    }
}

/// Aggregated SARIF payload from pass execution.
pub(crate) struct EngineOutput {
    pub(crate) rules: Vec<ReportingDescriptor>,
    pub(crate) results: Vec<SarifResult>,
}

#[cfg(test)]
pub(crate) fn build_context(
    classes: Vec<Class>,
    classpath: ClasspathIndex,
    artifacts: &[Artifact],
    config: AnalysisConfig,
) -> AnalysisContext {
    let (context, _) = build_context_with_timings(classes, classpath, artifacts, config, None);
    context
}

pub(crate) fn build_context_with_timings(
    classes: Vec<Class>,
    classpath: ClasspathIndex,
    artifacts: &[Artifact],
    config: AnalysisConfig,
    telemetry: Option<Arc<Telemetry>>,
) -> (AnalysisContext, ContextTimings) {
    let call_graph_started_at = Instant::now();
    let call_graph = with_span(
        telemetry.as_deref(),
        "call_graph",
        &[KeyValue::new("nullinfer.phase", "call_graph")],
        || build_call_graph(&classes, &classpath),
    );
    let call_graph_duration_ms = call_graph_started_at.elapsed().as_millis();
    let artifact_started_at = Instant::now();
    let (analysis_target_artifacts, artifact_parents, artifact_uris) = analyze_artifacts(artifacts);
    let artifact_duration_ms = artifact_started_at.elapsed().as_millis();
    let timings = ContextTimings {
        call_graph_duration_ms,
        artifact_duration_ms,
    };
    let context = AnalysisContext {
        classes,
        classpath,
        call_graph,
        config,
        artifact_uris,
        analysis_target_artifacts,
        artifact_parents,
        telemetry,
        not_null: OnceLock::new(),
    };
    (context, timings)
}

fn rule_descriptor(metadata: &PassMetadata) -> ReportingDescriptor {
    ReportingDescriptor::builder()
        .id(metadata.id)
        .name(metadata.name)
        .short_description(
            MultiformatMessageString::builder()
                .text(metadata.description)
                .build(),
        )
        .build()
}

impl AnalysisContext {
    pub(crate) fn telemetry(&self) -> Option<&Telemetry> {
        self.telemetry.as_deref()
    }

    pub(crate) fn with_span<T, F>(&self, name: &str, attributes: &[KeyValue], f: F) -> T
    where
        F: FnOnce() -> T,
    {
        with_span(self.telemetry(), name, attributes, f)
    }

    /// Non-null facts for the whole classpath, inferred on first use.
    pub(crate) fn not_null_facts(&self) -> Result<&FactStore> {
        if let Some(store) = self.not_null.get() {
            return Ok(store);
        }
        let store = infer_not_null_parameters(
            &self.classes,
            &self.classpath,
            &self.call_graph,
            &self.config,
            self.telemetry(),
        )?;
        Ok(self.not_null.get_or_init(|| store))
    }

    pub(crate) fn is_analysis_target_class(&self, class: &Class) -> bool {
        if self.analysis_target_artifacts.is_empty() {
            return true;
        }
        let mut current = Some(class.artifact_index);
        while let Some(index) = current {
            if self.analysis_target_artifacts.contains(&index) {
                return true;
            }
            current = self.artifact_parents.get(&index).copied();
        }
        false
    }

    pub(crate) fn artifact_uri(&self, index: i64) -> Option<&str> {
        self.artifact_uris.get(&index).map(|value| value.as_str())
    }

    pub(crate) fn class_artifact_uri(&self, class: &Class) -> Option<String> {
        let uri = self.artifact_uri(class.artifact_index)?;
        if uri.ends_with(".class") {
            return Some(uri.to_string());
        }
        if uri.ends_with(".jar") {
            return Some(format!("jar:{}!/{}.class", uri, class.name));
        }
        None
    }

    /// Class by internal name, when it was scanned.
    pub(crate) fn class(&self, name: &str) -> Option<&Class> {
        self.classpath
            .classes
            .get(name)
            .map(|position| &self.classes[*position])
    }
}

fn analyze_artifacts(
    artifacts: &[Artifact],
) -> (BTreeSet<i64>, BTreeMap<i64, i64>, BTreeMap<i64, String>) {
    let mut analysis_targets = BTreeSet::new();
    let mut parents = BTreeMap::new();
    let mut uris = BTreeMap::new();
    for (index, artifact) in artifacts.iter().enumerate() {
        let index = index as i64;
        if let Some(uri) = artifact
            .location
            .as_ref()
            .and_then(|location| location.uri.as_ref())
        {
            uris.insert(index, uri.clone());
        }
        if let Some(parent) = artifact.parent_index {
            parents.insert(index, parent);
        }
        let is_target = artifact.roles.as_ref().is_some_and(|roles| {
            roles
                .iter()
                .any(|role| role.as_str() == Some("analysisTarget"))
        });
        if is_target {
            analysis_targets.insert(index);
        }
    }
    (analysis_targets, parents, uris)
}
