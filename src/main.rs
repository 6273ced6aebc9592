mod annotations;
mod callgraph;
mod cfg;
mod classpath;
mod dataflow;
mod descriptor;
mod engine;
mod facts;
mod inference;
mod ir;
mod opcodes;
mod passes;
mod scan;
mod speculation;
mod telemetry;
#[cfg(test)]
mod test_harness;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use opentelemetry::KeyValue;
use serde_json::json;
use serde_sarif::sarif::{
    Artifact, Invocation, PropertyBag, ReportingDescriptor, Result as SarifResult, Run, SCHEMA_URL,
    Sarif, Tool, ToolComponent,
};
use tracing::info;

use crate::classpath::resolve_classpath;
use crate::engine::{Engine, build_context_with_timings};
use crate::inference::AnalysisConfig;
use crate::scan::scan_inputs;
use crate::speculation::DEFAULT_STEP_LIMIT;
use crate::telemetry::{Telemetry, init_logging, with_span};

/// CLI arguments for nullinfer execution.
#[derive(Parser, Debug)]
#[command(
    name = "nullinfer",
    about = "Infer non-null parameters and null-to-boolean contracts from JVM class files and JAR files.",
    version
)]
struct Cli {
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    #[arg(long, value_name = "PATH")]
    classpath: Vec<PathBuf>,
    /// Write SARIF here instead of stdout; `-` also means stdout.
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
    /// OTLP HTTP endpoint for trace export.
    #[arg(long, value_name = "URL")]
    otel: Option<String>,
    /// Simulated steps allowed per method and parameter.
    #[arg(long, value_name = "N", default_value_t = DEFAULT_STEP_LIMIT)]
    step_limit: usize,
    /// Disable reuse of settled sub-results during speculation.
    #[arg(long)]
    no_memo: bool,
}

impl Cli {
    fn analysis_config(&self) -> AnalysisConfig {
        AnalysisConfig {
            step_limit: self.step_limit,
            memoize: !self.no_memo,
        }
    }
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let telemetry = cli.otel.clone().map(Telemetry::new).transpose()?.map(Arc::new);
    let outcome = run(cli, telemetry.clone());
    if let Some(telemetry) = telemetry {
        telemetry.shutdown()?;
    }
    outcome
}

fn run(cli: Cli, telemetry: Option<Arc<Telemetry>>) -> Result<()> {
    if !cli.input.exists() {
        anyhow::bail!("input not found: {}", cli.input.display());
    }
    for entry in &cli.classpath {
        if !entry.exists() {
            anyhow::bail!("classpath entry not found: {}", entry.display());
        }
    }
    if cli.step_limit == 0 {
        anyhow::bail!("--step-limit must be positive");
    }

    let started_at = Instant::now();
    let scan_started_at = Instant::now();
    let scan = with_span(
        telemetry.as_deref(),
        "scan",
        &[KeyValue::new("nullinfer.phase", "scan")],
        || scan_inputs(&cli.input, &cli.classpath, telemetry.as_deref()),
    )?;
    let scan_duration_ms = scan_started_at.elapsed().as_millis();
    let artifact_count = scan.artifacts.len();
    let classpath_index = resolve_classpath(&scan.classes)?;
    let classpath_class_count = classpath_index.classes.len();
    let missing_references = classpath_index.missing_references;

    let (context, context_timings) = build_context_with_timings(
        scan.classes,
        classpath_index,
        &scan.artifacts,
        cli.analysis_config(),
        telemetry.clone(),
    );
    let analysis_started_at = Instant::now();
    let output = Engine::new().analyze(context)?;
    let analysis_duration_ms = analysis_started_at.elapsed().as_millis();

    let invocation_stats = InvocationStats {
        scan_duration_ms,
        call_graph_duration_ms: context_timings.call_graph_duration_ms,
        artifact_duration_ms: context_timings.artifact_duration_ms,
        analysis_duration_ms,
        class_count: scan.class_count,
        artifact_count,
        classpath_class_count,
        missing_references,
        result_count: output.results.len(),
    };
    info!(
        classes = scan.class_count,
        results = output.results.len(),
        "analysis finished"
    );
    let invocation = build_invocation(&invocation_stats);
    let sarif = build_sarif(scan.artifacts, invocation, output.rules, output.results);

    let mut writer = output_writer(cli.output.as_deref())?;
    serde_json::to_writer_pretty(&mut writer, &sarif)
        .context("failed to serialize SARIF output")?;
    writer
        .write_all(b"\n")
        .context("failed to write SARIF output")?;

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} scan_ms={} call_graph_ms={} analysis_ms={} classes={} artifacts={}",
            started_at.elapsed().as_millis(),
            scan_duration_ms,
            invocation_stats.call_graph_duration_ms,
            analysis_duration_ms,
            scan.class_count,
            artifact_count
        );
    }

    Ok(())
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Ok(Box::new(io::stdout())),
    }
}

/// Metadata captured for SARIF invocation properties.
struct InvocationStats {
    scan_duration_ms: u128,
    call_graph_duration_ms: u128,
    artifact_duration_ms: u128,
    analysis_duration_ms: u128,
    class_count: usize,
    artifact_count: usize,
    classpath_class_count: usize,
    missing_references: usize,
    result_count: usize,
}

fn build_invocation(stats: &InvocationStats) -> Invocation {
    let arguments: Vec<String> = std::env::args().collect();
    let command_line = arguments.join(" ");
    let mut properties = BTreeMap::new();
    properties.insert("nullinfer.scan_ms".to_string(), json!(stats.scan_duration_ms));
    properties.insert(
        "nullinfer.call_graph_ms".to_string(),
        json!(stats.call_graph_duration_ms),
    );
    properties.insert(
        "nullinfer.artifact_ms".to_string(),
        json!(stats.artifact_duration_ms),
    );
    properties.insert(
        "nullinfer.analysis_ms".to_string(),
        json!(stats.analysis_duration_ms),
    );
    properties.insert("nullinfer.class_count".to_string(), json!(stats.class_count));
    properties.insert(
        "nullinfer.artifact_count".to_string(),
        json!(stats.artifact_count),
    );
    properties.insert(
        "nullinfer.classpath_class_count".to_string(),
        json!(stats.classpath_class_count),
    );
    properties.insert(
        "nullinfer.missing_references".to_string(),
        json!(stats.missing_references),
    );
    properties.insert("nullinfer.result_count".to_string(), json!(stats.result_count));

    Invocation::builder()
        .execution_successful(true)
        .arguments(arguments)
        .command_line(command_line)
        .properties(PropertyBag::builder().additional_properties(properties).build())
        .build()
}

fn build_sarif(
    artifacts: Vec<Artifact>,
    invocation: Invocation,
    rules: Vec<ReportingDescriptor>,
    results: Vec<SarifResult>,
) -> Sarif {
    let driver = if rules.is_empty() {
        ToolComponent::builder()
            .name("nullinfer")
            .version(env!("CARGO_PKG_VERSION"))
            .build()
    } else {
        ToolComponent::builder()
            .name("nullinfer")
            .version(env!("CARGO_PKG_VERSION"))
            .rules(rules)
            .build()
    };
    let tool = Tool {
        driver,
        extensions: None,
        properties: None,
    };
    let run = if artifacts.is_empty() {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .build()
    } else {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .artifacts(artifacts)
            .build()
    };

    Sarif::builder()
        .schema(SCHEMA_URL)
        .runs(vec![run])
        .version(json!("2.1.0"))
        .build()
}
