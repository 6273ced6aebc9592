use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use opentelemetry::KeyValue;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::annotations::{annotation_key_prefix, parameter_annotation_key, render_contract};
use crate::callgraph::{CallGraph, MethodId};
use crate::cfg::{ControlFlowGraph, build_cfg};
use crate::classpath::{ClasspathIndex, ResolvedMethod};
use crate::dataflow::value::{Frame, Parameter};
use crate::descriptor::{ValueKind, parameter_kinds, parameter_type_names, return_kind};
use crate::facts::{ContractFact, FactStore, ParamPath, ParameterKey};
use crate::ir::{Class, InstructionKind, Method};
use crate::speculation::contract::speculate_contract;
use crate::speculation::dereference::{DereferenceResult, speculate_dereference};
use crate::speculation::{DEFAULT_STEP_LIMIT, StepLimitExceeded};
use crate::telemetry::{Telemetry, add_current_span_event, with_span};

/// Knobs shared by both speculators.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct AnalysisConfig {
    /// Simulated steps per (method, parameter) before giving up.
    pub(crate) step_limit: usize,
    /// Reuse settled dereference sub-results within one speculation.
    pub(crate) memoize: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            step_limit: DEFAULT_STEP_LIMIT,
            memoize: true,
        }
    }
}

/// Everything a speculation needs about one analyzable method.
pub(crate) struct MethodContext<'a> {
    pub(crate) id: MethodId,
    pub(crate) class: &'a Class,
    pub(crate) method: &'a Method,
    pub(crate) cfg: ControlFlowGraph,
    /// Resolved call target per instruction index.
    pub(crate) callees: Vec<Option<ResolvedMethod>>,
    parameters: Vec<Parameter>,
    returns: ValueKind,
    /// 1 for instance methods, where position 0 is `this`.
    pub(crate) shift: usize,
}

impl<'a> MethodContext<'a> {
    /// Returns `None` for native, abstract and otherwise unanalyzable methods.
    pub(crate) fn new(
        classes: &'a [Class],
        index: &ClasspathIndex,
        class: &'a Class,
        method: &'a Method,
    ) -> Result<Option<Self>> {
        if method.access.is_native || method.access.is_abstract {
            return Ok(None);
        }
        let Some(cfg) = build_cfg(method) else {
            return Ok(None);
        };
        let kinds = parameter_kinds(&method.descriptor)?;
        let names = parameter_type_names(&method.descriptor)?;
        let parameters = kinds
            .into_iter()
            .zip(names)
            .map(|(kind, name)| Parameter {
                kind,
                type_name: Arc::from(name),
            })
            .collect();
        let returns = return_kind(&method.descriptor)?;
        let callees = method
            .instructions
            .iter()
            .map(|instruction| match &instruction.kind {
                InstructionKind::Invoke(call) => {
                    index.resolve_method(classes, &call.owner, &call.name, &call.descriptor)
                }
                _ => None,
            })
            .collect();

        Ok(Some(Self {
            id: MethodId::of(class, method),
            class,
            method,
            cfg,
            callees,
            parameters,
            returns,
            shift: usize::from(!method.access.is_static),
        }))
    }

    /// Entry frame tracking the parameter at receiver-inclusive `position`.
    pub(crate) fn entry_frame(&self, position: usize) -> Frame {
        Frame::entry(
            self.method.access.is_static,
            &self.parameters,
            self.returns,
            self.method.max_locals,
            position,
        )
    }

    /// Receiver-inclusive positions of the declared reference parameters.
    pub(crate) fn reference_positions(&self) -> Vec<usize> {
        self.parameters
            .iter()
            .enumerate()
            .filter(|(_, parameter)| parameter.kind == ValueKind::Reference)
            .map(|(index, _)| index + self.shift)
            .collect()
    }

    pub(crate) fn key(&self, position: usize) -> ParameterKey {
        ParameterKey {
            method: self.id.clone(),
            position,
        }
    }
}

/// Counters reported once inference finishes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct InferenceStats {
    pub(crate) components: usize,
    pub(crate) passes: usize,
    pub(crate) analyzed: usize,
    pub(crate) exhausted: usize,
    pub(crate) facts: usize,
}

/// Inferred non-null parameter, ready for reporting.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NotNullRecord {
    pub(crate) method: MethodId,
    /// Declared parameter index, `this` excluded.
    pub(crate) parameter_index: usize,
    pub(crate) annotation_key: String,
}

/// Inferred null-to-boolean contract, ready for reporting.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ContractRecord {
    pub(crate) method: MethodId,
    pub(crate) parameter_index: usize,
    pub(crate) path: ParamPath,
    pub(crate) result: bool,
    pub(crate) annotation_key_prefix: String,
    pub(crate) contract: String,
}

pub(crate) fn method_contexts<'a>(
    classes: &'a [Class],
    index: &ClasspathIndex,
) -> Vec<MethodContext<'a>> {
    let mut contexts = Vec::new();
    let mut skipped = 0usize;
    for class in classes {
        for method in &class.methods {
            match MethodContext::new(classes, index, class, method) {
                Ok(Some(context)) => contexts.push(context),
                Ok(None) => skipped += 1,
                Err(error) => {
                    warn!(
                        class = %class.name,
                        method = %method.name,
                        descriptor = %method.descriptor,
                        %error,
                        "skipping method with unreadable descriptor"
                    );
                    skipped += 1;
                }
            }
        }
    }
    debug!(analyzable = contexts.len(), skipped, "collected method contexts");
    contexts
}

/// Run the call-graph ordered fixed point and return every accepted non-null fact.
pub(crate) fn infer_not_null_parameters(
    classes: &[Class],
    index: &ClasspathIndex,
    call_graph: &CallGraph,
    config: &AnalysisConfig,
    telemetry: Option<&Telemetry>,
) -> Result<FactStore> {
    let contexts = method_contexts(classes, index);
    let (store, stats) = run_fixed_point(&contexts, call_graph, config, telemetry);
    info!(
        components = stats.components,
        passes = stats.passes,
        analyzed = stats.analyzed,
        exhausted = stats.exhausted,
        facts = stats.facts,
        "non-null parameter inference finished"
    );
    Ok(store)
}

fn run_fixed_point(
    contexts: &[MethodContext<'_>],
    call_graph: &CallGraph,
    config: &AnalysisConfig,
    telemetry: Option<&Telemetry>,
) -> (FactStore, InferenceStats) {
    let by_id: BTreeMap<&MethodId, usize> = contexts
        .iter()
        .enumerate()
        .map(|(position, context)| (&context.id, position))
        .collect();
    let mut store = FactStore::new();
    let mut stats = InferenceStats::default();

    for component in call_graph.components() {
        let members: Vec<usize> = component
            .iter()
            .filter_map(|id| by_id.get(id).copied())
            .collect();
        if members.is_empty() {
            continue;
        }
        stats.components += 1;
        let attributes = [KeyValue::new("nullinfer.component_size", members.len() as i64)];
        with_span(telemetry, "inference.component", &attributes, || {
            let mut passes = 0usize;
            loop {
                let outcome = component_pass(contexts, &members, &store, config);
                passes += 1;
                stats.analyzed += outcome.analyzed;
                stats.exhausted += outcome.exhausted;
                let added = store.insert_not_null(outcome.accepted);
                add_current_span_event(
                    "inference.pass",
                    &[KeyValue::new("nullinfer.added", added as i64)],
                );
                if added == 0 {
                    break;
                }
            }
            debug!(members = members.len(), passes, "component settled");
            stats.passes += passes;
        });
    }
    stats.facts = store.not_null_len();
    (store, stats)
}

/// Facts accepted by one pass over a component, plus counters.
struct PassOutcome {
    accepted: Vec<ParameterKey>,
    analyzed: usize,
    exhausted: usize,
}

/// Analyze every not-yet-known parameter of `members` against the `store` snapshot.
fn component_pass(
    contexts: &[MethodContext<'_>],
    members: &[usize],
    store: &FactStore,
    config: &AnalysisConfig,
) -> PassOutcome {
    let candidates: Vec<(&MethodContext<'_>, usize)> = members
        .iter()
        .map(|member| &contexts[*member])
        .flat_map(|context| {
            context
                .reference_positions()
                .into_iter()
                .map(move |position| (context, position))
        })
        .filter(|(context, position)| !store.is_not_null(&context.key(*position)))
        .collect();

    let verdicts: Vec<(ParameterKey, Result<DereferenceResult, StepLimitExceeded>)> = candidates
        .par_iter()
        .map(|(context, position)| {
            let verdict = speculate_dereference(context, store, *position, config);
            (context.key(*position), verdict)
        })
        .collect();

    let mut outcome = PassOutcome {
        accepted: Vec::new(),
        analyzed: verdicts.len(),
        exhausted: 0,
    };
    for (key, verdict) in verdicts {
        match verdict {
            Ok(DereferenceResult::Npe) => outcome.accepted.push(key),
            Ok(_) => {}
            Err(error) => {
                debug!(
                    method = %key.method,
                    position = key.position,
                    %error,
                    "dereference speculation abandoned"
                );
                outcome.exhausted += 1;
            }
        }
    }
    outcome
}

/// Infer null-to-boolean contracts for every analyzable method and reference parameter.
pub(crate) fn infer_null_to_boolean_contracts(
    classes: &[Class],
    index: &ClasspathIndex,
    config: &AnalysisConfig,
) -> Result<Vec<ContractRecord>> {
    let contexts = method_contexts(classes, index);
    let empty = FactStore::new();
    let candidates: Vec<(&MethodContext<'_>, usize)> = contexts
        .iter()
        .flat_map(|context| {
            context
                .reference_positions()
                .into_iter()
                .map(move |position| (context, position))
        })
        .collect();

    let inferred: Vec<(&MethodContext<'_>, usize, Option<ContractFact>)> = candidates
        .par_iter()
        .map(|(context, position)| {
            let contract = match speculate_contract(context, &empty, *position, config) {
                Ok(contract) => contract.accepted(),
                Err(error) => {
                    debug!(
                        method = %context.id,
                        position,
                        %error,
                        "contract speculation abandoned"
                    );
                    None
                }
            };
            (*context, *position, contract)
        })
        .collect();

    let mut contracts = FactStore::new();
    for (context, position, contract) in inferred {
        if let Some(contract) = contract {
            contracts.insert_contract(
                ParameterKey {
                    method: context.id.clone(),
                    position,
                },
                contract,
            );
        }
    }

    let by_id: BTreeMap<&MethodId, &MethodContext<'_>> =
        contexts.iter().map(|context| (&context.id, context)).collect();
    let mut records = Vec::new();
    for (key, contract) in contracts.contracts() {
        let Some(context) = by_id.get(&key.method) else {
            continue;
        };
        let parameter_index = key.position - context.shift;
        records.push(ContractRecord {
            method: key.method.clone(),
            parameter_index,
            path: contract.path,
            result: contract.result,
            annotation_key_prefix: annotation_key_prefix(context.class, context.method)?,
            contract: render_contract(
                &context.method.descriptor,
                parameter_index,
                contract.path,
                contract.result,
            )?,
        });
    }
    info!(
        analyzed = candidates.len(),
        contracts = records.len(),
        "null-to-boolean contract inference finished"
    );
    Ok(records)
}

/// Render the store's non-null facts as records, in method then parameter order.
pub(crate) fn not_null_records(
    classes: &[Class],
    index: &ClasspathIndex,
    store: &FactStore,
) -> Result<Vec<NotNullRecord>> {
    let mut records = Vec::new();
    for key in store.not_null_facts() {
        let Some(class) = index.classes.get(&key.method.class_name).map(|position| &classes[*position])
        else {
            continue;
        };
        let Some(method) = class
            .methods
            .iter()
            .find(|method| method.name == key.method.name && method.descriptor == key.method.descriptor)
        else {
            continue;
        };
        let shift = usize::from(!method.access.is_static);
        // The receiver itself never gets an annotation.
        let Some(parameter_index) = key.position.checked_sub(shift) else {
            continue;
        };
        records.push(NotNullRecord {
            annotation_key: parameter_annotation_key(class, method, parameter_index)?,
            method: key.method,
            parameter_index,
        });
    }
    Ok(records)
}
