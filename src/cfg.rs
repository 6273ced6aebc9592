use std::collections::BTreeMap;

use crate::ir::{InstructionKind, Method};
use crate::opcodes;

/// Catch type used for handlers without a declared exception class.
pub(crate) const THROWABLE: &str = "java/lang/Throwable";

/// Edge classification in the instruction-level control-flow graph.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum EdgeKind {
    FallThrough,
    Branch,
    /// Internal name of the caught exception type.
    Exception(String),
}

/// Directed edge towards an instruction index.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct FlowEdge {
    pub(crate) to: usize,
    pub(crate) kind: EdgeKind,
}

/// Successor lists for every reachable instruction index.
#[derive(Clone, Debug, Default)]
pub(crate) struct ControlFlowGraph {
    nodes: BTreeMap<usize, Vec<FlowEdge>>,
}

impl ControlFlowGraph {
    pub(crate) fn successors(&self, index: usize) -> &[FlowEdge] {
        self.nodes.get(&index).map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn contains(&self, index: usize) -> bool {
        self.nodes.contains_key(&index)
    }

    pub(crate) fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Exception edges leaving `index`.
    pub(crate) fn handlers(&self, index: usize) -> impl Iterator<Item = (usize, &str)> {
        self.successors(index)
            .iter()
            .filter_map(|edge| match &edge.kind {
                EdgeKind::Exception(catch_type) => Some((edge.to, catch_type.as_str())),
                _ => None,
            })
    }
}

/// Build the instruction-level CFG, or `None` when the method cannot be analyzed.
///
/// Methods without instructions (abstract, native) and methods using `jsr`/`ret`
/// subroutines are not analyzable.
pub(crate) fn build_cfg(method: &Method) -> Option<ControlFlowGraph> {
    if method.instructions.is_empty() {
        return None;
    }
    if method.instructions.iter().any(|instruction| {
        matches!(
            instruction.opcode,
            opcodes::JSR | opcodes::JSR_W | opcodes::RET
        )
    }) {
        return None;
    }

    let mut nodes = BTreeMap::new();
    let mut stack = vec![0usize];
    while let Some(index) = stack.pop() {
        if nodes.contains_key(&index) || index >= method.instructions.len() {
            continue;
        }
        let edges = instruction_edges(method, index);
        for edge in edges.iter().rev() {
            if !nodes.contains_key(&edge.to) {
                stack.push(edge.to);
            }
        }
        nodes.insert(index, edges);
    }
    Some(ControlFlowGraph { nodes })
}

fn instruction_edges(method: &Method, index: usize) -> Vec<FlowEdge> {
    let instruction = &method.instructions[index];
    let mut edges = Vec::new();
    let mut push = |to: usize, kind: EdgeKind| {
        let duplicate = edges
            .iter()
            .any(|edge: &FlowEdge| edge.to == to && edge.kind == kind);
        if to < method.instructions.len() && !duplicate {
            edges.push(FlowEdge { to, kind });
        }
    };

    match (&instruction.kind, instruction.opcode) {
        (InstructionKind::Jump(target), opcodes::GOTO | opcodes::GOTO_W) => {
            push(*target, EdgeKind::Branch);
        }
        (InstructionKind::Jump(target), opcode) if opcodes::is_conditional_branch(opcode) => {
            push(index + 1, EdgeKind::FallThrough);
            push(*target, EdgeKind::Branch);
        }
        (InstructionKind::Switch { default, targets }, _) => {
            push(*default, EdgeKind::Branch);
            for target in targets {
                push(*target, EdgeKind::Branch);
            }
        }
        (_, opcode) if opcodes::is_return(opcode) || opcode == opcodes::ATHROW => {}
        _ => push(index + 1, EdgeKind::FallThrough),
    }

    for handler in &method.exception_handlers {
        if (handler.start..handler.end).contains(&index) {
            let catch_type = handler.catch_type.as_deref().unwrap_or(THROWABLE);
            push(handler.handler, EdgeKind::Exception(catch_type.to_string()));
        }
    }
    edges
}
