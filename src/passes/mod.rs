use std::collections::BTreeMap;

use anyhow::Result;
use serde::Serialize;
use serde_sarif::sarif::{
    ArtifactLocation, Location, LogicalLocation, Message, PhysicalLocation, PropertyBag, Region,
    Result as SarifResult,
};

use crate::engine::AnalysisContext;

// Pass modules are discovered by build.rs.
include!(concat!(env!("OUT_DIR"), "/pass_modules.rs"));

/// Metadata describing a reporting pass.
#[derive(Clone, Debug)]
pub(crate) struct PassMetadata {
    pub(crate) id: &'static str,
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
}

/// A pass turns inferred facts into SARIF results.
pub(crate) trait Pass {
    fn metadata(&self) -> PassMetadata;
    fn run(&self, context: &AnalysisContext) -> Result<Vec<SarifResult>>;
}

/// Wrapper struct for pass factory functions to enable inventory collection.
pub(crate) struct PassFactory(pub fn() -> Box<dyn Pass + Sync>);

inventory::collect!(PassFactory);

/// Register a pass implementation with inventory.
///
/// Usage: `register_pass!(PassName);`
#[macro_export]
macro_rules! register_pass {
    ($pass_type:ty) => {
        inventory::submit! {
            $crate::passes::PassFactory(|| Box::new(<$pass_type>::default()))
        }
    };
}

/// Returns all registered passes, ordered by id.
pub(crate) fn all_passes() -> Vec<Box<dyn Pass + Sync>> {
    let mut passes: Vec<Box<dyn Pass + Sync>> = inventory::iter::<PassFactory>
        .into_iter()
        .map(|factory| (factory.0)())
        .collect();
    passes.sort_by(|left, right| left.metadata().id.cmp(right.metadata().id));
    passes
}

/// Location of a method, with a physical part when the class came from a known artifact.
pub(crate) fn method_location_with_line(
    class_name: &str,
    method_name: &str,
    descriptor: &str,
    artifact_uri: Option<&str>,
    line: Option<u32>,
) -> Location {
    let logical = LogicalLocation::builder()
        .name(format!("{class_name}.{method_name}{descriptor}"))
        .kind("function")
        .build();
    let Some(uri) = artifact_uri else {
        return Location::builder().logical_locations(vec![logical]).build();
    };

    // Jar entries report the container URI without a line region.
    let container_uri = jar_container_uri(uri);
    let artifact_location = ArtifactLocation::builder()
        .uri(container_uri.as_deref().unwrap_or(uri).to_string())
        .build();
    let physical = match line {
        Some(line) if container_uri.is_none() => PhysicalLocation::builder()
            .artifact_location(artifact_location)
            .region(Region::builder().start_line(line as i64).build())
            .build(),
        _ => PhysicalLocation::builder()
            .artifact_location(artifact_location)
            .build(),
    };
    Location::builder()
        .logical_locations(vec![logical])
        .physical_location(physical)
        .build()
}

fn jar_container_uri(uri: &str) -> Option<String> {
    let rest = uri.strip_prefix("jar:")?;
    let container = rest.split("!/").next()?;
    Some(container.to_string())
}

pub(crate) fn result_message(text: impl Into<String>) -> Message {
    Message::builder().text(text.into()).build()
}

/// Serialize an inference record into SARIF result properties.
pub(crate) fn record_properties<T: Serialize>(record: &T) -> Result<PropertyBag> {
    let value = serde_json::to_value(record)?;
    let additional_properties: BTreeMap<String, serde_json::Value> = match value {
        serde_json::Value::Object(map) => map.into_iter().collect(),
        other => [("record".to_string(), other)].into_iter().collect(),
    };
    Ok(PropertyBag::builder()
        .additional_properties(additional_properties)
        .build())
}
