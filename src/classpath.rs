use std::collections::{BTreeMap, BTreeSet, VecDeque};

use anyhow::Result;
use tracing::debug;

use crate::callgraph::MethodId;
use crate::ir::Class;

const OBJECT_CLASS: &str = "java/lang/Object";

/// Resolved classpath index keyed by class name.
pub(crate) struct ClasspathIndex {
    /// Position of each class in the scanned class list.
    pub(crate) classes: BTreeMap<String, usize>,
    pub(crate) missing_references: usize,
}

/// Call target found by walking the declared hierarchy.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ResolvedMethod {
    pub(crate) id: MethodId,
    /// Static, private, or final: facts about the target hold at every call site.
    pub(crate) is_stable: bool,
}

impl ClasspathIndex {
    /// Look up `name` + `descriptor` on `owner`, then its superclasses and interfaces breadth-first.
    pub(crate) fn resolve_method(
        &self,
        classes: &[Class],
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Option<ResolvedMethod> {
        let start = if self.classes.contains_key(owner) {
            owner
        } else {
            OBJECT_CLASS
        };
        let mut queue = VecDeque::from([start.to_string()]);
        let mut visited = BTreeSet::new();
        while let Some(class_name) = queue.pop_front() {
            if !visited.insert(class_name.clone()) {
                continue;
            }
            let Some(class) = self.classes.get(&class_name).map(|index| &classes[*index]) else {
                continue;
            };
            if let Some(method) = class
                .methods
                .iter()
                .find(|method| method.name == name && method.descriptor == descriptor)
            {
                return Some(ResolvedMethod {
                    id: MethodId {
                        class_name: class.name.clone(),
                        name: method.name.clone(),
                        descriptor: method.descriptor.clone(),
                    },
                    is_stable: method.access.is_stable(),
                });
            }
            queue.extend(class.super_name.iter().cloned());
            queue.extend(class.interfaces.iter().cloned());
        }
        None
    }
}

pub(crate) fn resolve_classpath(classes: &[Class]) -> Result<ClasspathIndex> {
    let mut class_map: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (position, class) in classes.iter().enumerate() {
        class_map
            .entry(class.name.clone())
            .or_default()
            .push(position);
    }

    let mut duplicates = Vec::new();
    for (name, positions) in &class_map {
        if positions.len() > 1 {
            let artifacts: Vec<i64> = positions
                .iter()
                .map(|position| classes[*position].artifact_index)
                .collect();
            duplicates.push(format!("{name}: {artifacts:?}"));
        }
    }
    if !duplicates.is_empty() {
        anyhow::bail!("duplicate classes found: {}", duplicates.join(", "));
    }

    let mut missing = BTreeSet::new();
    for class in classes {
        for reference in &class.referenced_classes {
            if is_platform_class(reference) {
                continue;
            }
            if !class_map.contains_key(reference) {
                missing.insert(reference.clone());
            }
        }
    }
    if !missing.is_empty() {
        debug!(count = missing.len(), "unresolved class references");
    }

    let classes = class_map
        .into_iter()
        .filter_map(|(name, positions)| positions.first().map(|position| (name, *position)))
        .collect();

    Ok(ClasspathIndex {
        classes,
        missing_references: missing.len(),
    })
}

fn is_platform_class(name: &str) -> bool {
    const PREFIXES: [&str; 5] = ["java/", "javax/", "jdk/", "sun/", "com/sun/"];
    PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}
