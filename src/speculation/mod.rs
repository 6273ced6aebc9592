//! Path exploration shared by the dereference and contract speculators.
//!
//! Exploration walks the tree of configurations depth-first with an explicit stack.
//! Each node lives in an arena with its children; once every child has settled, the
//! node's outcome is combined from theirs and the settlement moves up to its parent.

pub(crate) mod contract;
pub(crate) mod dereference;
#[cfg(test)]
pub(crate) mod fixtures;

use std::fmt;

use crate::cfg::EdgeKind;
use crate::dataflow::configuration::Configuration;
use crate::dataflow::value::Frame;
use crate::inference::MethodContext;
use crate::opcodes;

/// Simulated steps allowed for one speculation unless configured otherwise.
pub(crate) const DEFAULT_STEP_LIMIT: usize = 5000;

/// A speculation visited more configurations than its budget allows.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct StepLimitExceeded {
    pub(crate) limit: usize,
}

impl fmt::Display for StepLimitExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "speculation exceeded {} steps", self.limit)
    }
}

impl std::error::Error for StepLimitExceeded {}

/// What a configuration resolves to in one step.
pub(crate) enum Step<P, O, C> {
    Resolved(O),
    /// Continue into `children`; their outcomes are merged with `combiner`, in order.
    Fork {
        children: Vec<(Configuration, P)>,
        combiner: C,
    },
}

/// Domain callbacks for [`explore`].
pub(crate) trait PathSemantics {
    /// Per-path flags carried alongside the configuration.
    type Path: Clone;
    type Outcome: Clone;
    type Combiner;

    fn step(
        &self,
        configuration: &Configuration,
        path: &Self::Path,
    ) -> Step<Self::Path, Self::Outcome, Self::Combiner>;

    /// Outcome of a configuration covered by one of its ancestors.
    fn cycle(&self) -> Self::Outcome;

    fn combine(&self, combiner: &Self::Combiner, outcomes: Vec<Self::Outcome>) -> Self::Outcome;

    fn recall(&self, _configuration: &Configuration, _path: &Self::Path) -> Option<Self::Outcome> {
        None
    }

    /// Called for every settled subtree that contained no cycle.
    fn remember(
        &mut self,
        _configuration: &Configuration,
        _path: &Self::Path,
        _outcome: &Self::Outcome,
    ) {
    }
}

struct PendingState<S: PathSemantics> {
    parent: Option<usize>,
    configuration: Configuration,
    path: S::Path,
    combiner: Option<S::Combiner>,
    children: Vec<usize>,
    unresolved: usize,
    outcome: Option<S::Outcome>,
    acyclic: bool,
}

impl<S: PathSemantics> PendingState<S> {
    fn new(parent: Option<usize>, configuration: Configuration, path: S::Path) -> Self {
        Self {
            parent,
            configuration,
            path,
            combiner: None,
            children: Vec::new(),
            unresolved: 0,
            outcome: None,
            acyclic: true,
        }
    }
}

/// Explore every path from `root` and return the combined outcome.
pub(crate) fn explore<S: PathSemantics>(
    semantics: &mut S,
    root: Configuration,
    path: S::Path,
    step_limit: usize,
) -> Result<S::Outcome, StepLimitExceeded> {
    let mut arena: Vec<PendingState<S>> = vec![PendingState::new(None, root, path)];
    let mut stack = vec![0usize];
    let mut steps = 0usize;

    while let Some(id) = stack.pop() {
        steps += 1;
        if steps > step_limit {
            return Err(StepLimitExceeded { limit: step_limit });
        }

        if has_covering_ancestor(&arena, id) {
            let outcome = semantics.cycle();
            settle(semantics, &mut arena, id, outcome, false);
            continue;
        }

        let state = &arena[id];
        if let Some(outcome) = semantics.recall(&state.configuration, &state.path) {
            settle(semantics, &mut arena, id, outcome, true);
            continue;
        }

        match semantics.step(&state.configuration, &state.path) {
            Step::Resolved(outcome) => settle(semantics, &mut arena, id, outcome, true),
            Step::Fork { children, combiner } if children.is_empty() => {
                let outcome = semantics.combine(&combiner, Vec::new());
                settle(semantics, &mut arena, id, outcome, true);
            }
            Step::Fork { children, combiner } => {
                let first_child = arena.len();
                for (configuration, child_path) in children {
                    arena.push(PendingState::new(Some(id), configuration, child_path));
                }
                let child_ids: Vec<usize> = (first_child..arena.len()).collect();
                stack.extend(child_ids.iter().rev());
                let state = &mut arena[id];
                state.unresolved = child_ids.len();
                state.children = child_ids;
                state.combiner = Some(combiner);
            }
        }
    }

    Ok(arena[0]
        .outcome
        .take()
        .unwrap_or_else(|| semantics.cycle()))
}

/// Configurations reached from `configuration` along its CFG edges.
///
/// Normal edges carry the frame after the instruction. Exception edges are only taken
/// from instructions that can fault and start from the handler frame.
pub(crate) fn successors(
    context: &MethodContext<'_>,
    configuration: &Configuration,
    after: &Frame,
) -> Vec<Configuration> {
    let may_throw = context
        .method
        .instructions
        .get(configuration.index)
        .is_some_and(|instruction| opcodes::may_throw(instruction.opcode));
    context
        .cfg
        .successors(configuration.index)
        .iter()
        .filter_map(|edge| match edge.kind {
            EdgeKind::Exception(_) if may_throw => Some(Configuration::new(
                edge.to,
                configuration.frame.handler_frame(),
            )),
            EdgeKind::Exception(_) => None,
            _ => Some(Configuration::new(edge.to, after.clone())),
        })
        .collect()
}

fn has_covering_ancestor<S: PathSemantics>(arena: &[PendingState<S>], id: usize) -> bool {
    let current = &arena[id].configuration;
    let mut ancestor = arena[id].parent;
    while let Some(parent) = ancestor {
        if current.is_covered_by(&arena[parent].configuration) {
            return true;
        }
        ancestor = arena[parent].parent;
    }
    false
}

/// Record `outcome` for `id` and fold completed parents bottom-up.
fn settle<S: PathSemantics>(
    semantics: &mut S,
    arena: &mut [PendingState<S>],
    id: usize,
    outcome: S::Outcome,
    acyclic: bool,
) {
    let mut id = id;
    let mut outcome = outcome;
    let mut acyclic = acyclic;
    loop {
        if acyclic {
            let state = &arena[id];
            semantics.remember(&state.configuration, &state.path, &outcome);
        }
        arena[id].outcome = Some(outcome);
        arena[id].acyclic = acyclic;

        let Some(parent) = arena[id].parent else {
            return;
        };
        arena[parent].unresolved -= 1;
        if arena[parent].unresolved > 0 {
            return;
        }

        let children = std::mem::take(&mut arena[parent].children);
        acyclic = children.iter().all(|child| arena[*child].acyclic);
        let outcomes: Vec<S::Outcome> = children
            .iter()
            .filter_map(|child| arena[*child].outcome.take())
            .collect();
        outcome = match arena[parent].combiner.take() {
            Some(combiner) => semantics.combine(&combiner, outcomes),
            None => semantics.cycle(),
        };
        id = parent;
    }
}
