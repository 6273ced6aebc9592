use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;

use crate::classpath::ClasspathIndex;
use crate::ir::{CallKind, Class, InstructionKind, Method};

/// Unique identifier for a method in the classpath.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MethodId {
    pub(crate) class_name: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
}

impl MethodId {
    pub(crate) fn of(class: &Class, method: &Method) -> Self {
        Self {
            class_name: class.name.clone(),
            name: method.name.clone(),
            descriptor: method.descriptor.clone(),
        }
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.class_name, self.name, self.descriptor)
    }
}

/// Directed call edge between caller and callee.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) struct CallEdge {
    pub(crate) caller: MethodId,
    pub(crate) callee: MethodId,
    pub(crate) kind: CallKind,
    pub(crate) offset: u32,
}

/// Static call graph over every method of the scanned classes.
#[derive(Clone, Debug, Default)]
pub(crate) struct CallGraph {
    pub(crate) nodes: BTreeSet<MethodId>,
    pub(crate) edges: BTreeSet<CallEdge>,
}

impl CallGraph {
    /// Strongly connected components, callees before callers; members sorted.
    pub(crate) fn components(&self) -> Vec<Vec<MethodId>> {
        let mut graph: DiGraph<&MethodId, ()> = DiGraph::new();
        let indices: BTreeMap<&MethodId, NodeIndex> = self
            .nodes
            .iter()
            .map(|id| (id, graph.add_node(id)))
            .collect();
        for edge in &self.edges {
            if let (Some(caller), Some(callee)) = (indices.get(&edge.caller), indices.get(&edge.callee))
            {
                graph.update_edge(*caller, *callee, ());
            }
        }

        tarjan_scc(&graph)
            .into_iter()
            .map(|component| {
                let mut members: Vec<MethodId> = component
                    .into_iter()
                    .map(|node| graph[node].clone())
                    .collect();
                members.sort();
                members
            })
            .collect()
    }
}

/// Build the call graph, resolving each call site through the declared hierarchy.
pub(crate) fn build_call_graph(classes: &[Class], index: &ClasspathIndex) -> CallGraph {
    let mut graph = CallGraph::default();
    for class in classes {
        for method in &class.methods {
            let caller = MethodId::of(class, method);
            graph.nodes.insert(caller.clone());
            for instruction in &method.instructions {
                let InstructionKind::Invoke(call) = &instruction.kind else {
                    continue;
                };
                let Some(resolved) =
                    index.resolve_method(classes, &call.owner, &call.name, &call.descriptor)
                else {
                    continue;
                };
                graph.edges.insert(CallEdge {
                    caller: caller.clone(),
                    callee: resolved.id,
                    kind: call.kind,
                    offset: instruction.offset,
                });
            }
        }
    }
    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classpath::resolve_classpath;
    use crate::ir::{CallSite, Instruction, MethodAccess};
    use crate::descriptor::ValueKind;
    use crate::opcodes;

    fn call(owner: &str, name: &str, kind: CallKind) -> Instruction {
        Instruction {
            offset: 0,
            opcode: match kind {
                CallKind::Static => opcodes::INVOKESTATIC,
                _ => opcodes::INVOKEVIRTUAL,
            },
            kind: InstructionKind::Invoke(CallSite {
                owner: owner.to_string(),
                name: name.to_string(),
                descriptor: "()V".to_string(),
                kind,
                offset: 0,
                arguments: 0,
                returns: ValueKind::Void,
            }),
        }
    }

    fn method(name: &str, calls: Vec<Instruction>) -> Method {
        Method {
            name: name.to_string(),
            descriptor: "()V".to_string(),
            access: MethodAccess {
                is_static: true,
                ..MethodAccess::default()
            },
            instructions: calls,
            exception_handlers: Vec::new(),
            line_numbers: Vec::new(),
            max_locals: 0,
        }
    }

    fn class(name: &str, super_name: &str, methods: Vec<Method>) -> Class {
        Class {
            name: name.to_string(),
            super_name: Some(super_name.to_string()),
            interfaces: Vec::new(),
            referenced_classes: Vec::new(),
            methods,
            artifact_index: 0,
        }
    }

    fn id(class_name: &str, name: &str) -> MethodId {
        MethodId {
            class_name: class_name.to_string(),
            name: name.to_string(),
            descriptor: "()V".to_string(),
        }
    }

    #[test]
    fn components_list_callees_first_and_group_cycles() {
        let classes = vec![class(
            "com/example/ClassA",
            "java/lang/Object",
            vec![
                method("methodX", vec![call("com/example/ClassA", "methodY", CallKind::Static)]),
                method("methodY", vec![call("com/example/ClassA", "methodZ", CallKind::Static)]),
                method("methodZ", vec![call("com/example/ClassA", "methodY", CallKind::Static)]),
            ],
        )];
        let index = resolve_classpath(&classes).expect("classpath");

        let components = build_call_graph(&classes, &index).components();

        assert_eq!(
            components,
            vec![
                vec![id("com/example/ClassA", "methodY"), id("com/example/ClassA", "methodZ")],
                vec![id("com/example/ClassA", "methodX")],
            ]
        );
    }

    #[test]
    fn virtual_calls_resolve_through_the_superclass() {
        let classes = vec![
            class("com/example/Base", "java/lang/Object", vec![method("run", Vec::new())]),
            class(
                "com/example/Derived",
                "com/example/Base",
                vec![method("start", vec![call("com/example/Derived", "run", CallKind::Virtual)])],
            ),
        ];
        let index = resolve_classpath(&classes).expect("classpath");

        let graph = build_call_graph(&classes, &index);

        assert_eq!(graph.nodes.len(), 2);
        let callees: Vec<&MethodId> = graph.edges.iter().map(|edge| &edge.callee).collect();
        assert_eq!(callees, vec![&id("com/example/Base", "run")]);
    }

    #[test]
    fn unresolved_calls_add_no_edges() {
        let classes = vec![class(
            "com/example/ClassA",
            "java/lang/Object",
            vec![method("methodX", vec![call("java/util/List", "clear", CallKind::Virtual)])],
        )];
        let index = resolve_classpath(&classes).expect("classpath");

        let graph = build_call_graph(&classes, &index);

        assert!(graph.edges.is_empty());
        assert_eq!(graph.components(), vec![vec![id("com/example/ClassA", "methodX")]]);
    }

    #[test]
    fn method_ids_render_as_owner_name_descriptor() {
        assert_eq!(id("com/example/ClassA", "methodX").to_string(), "com/example/ClassA.methodX()V");
    }
}
