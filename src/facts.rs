use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::callgraph::MethodId;

/// A parameter of a method, by receiver-inclusive position.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) struct ParameterKey {
    pub(crate) method: MethodId,
    pub(crate) position: usize,
}

/// Which arm of a null test the tracked parameter went through.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum ParamPath {
    Null,
    NotNull,
}

/// Accepted null-to-boolean contract for one parameter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct ContractFact {
    pub(crate) path: ParamPath,
    pub(crate) result: bool,
}

/// Accumulated facts. Entries are only ever added.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct FactStore {
    not_null: BTreeMap<MethodId, BTreeSet<usize>>,
    contracts: BTreeMap<ParameterKey, ContractFact>,
}

impl FactStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Positions of `method` known to require a non-null argument.
    pub(crate) fn not_null_positions(&self, method: &MethodId) -> impl Iterator<Item = usize> + '_ {
        self.not_null
            .get(method)
            .into_iter()
            .flat_map(|positions| positions.iter().copied())
    }

    pub(crate) fn is_not_null(&self, key: &ParameterKey) -> bool {
        self.not_null
            .get(&key.method)
            .is_some_and(|positions| positions.contains(&key.position))
    }

    /// Merge buffered facts and return how many were new.
    pub(crate) fn insert_not_null<I>(&mut self, keys: I) -> usize
    where
        I: IntoIterator<Item = ParameterKey>,
    {
        let mut added = 0;
        for key in keys {
            if self.not_null.entry(key.method).or_default().insert(key.position) {
                added += 1;
            }
        }
        added
    }

    pub(crate) fn insert_contract(&mut self, key: ParameterKey, contract: ContractFact) {
        self.contracts.insert(key, contract);
    }

    pub(crate) fn not_null_len(&self) -> usize {
        self.not_null.values().map(BTreeSet::len).sum()
    }

    /// Non-null facts in method then position order.
    pub(crate) fn not_null_facts(&self) -> impl Iterator<Item = ParameterKey> + '_ {
        self.not_null.iter().flat_map(|(method, positions)| {
            positions.iter().map(move |position| ParameterKey {
                method: method.clone(),
                position: *position,
            })
        })
    }

    pub(crate) fn contracts(&self) -> impl Iterator<Item = (&ParameterKey, &ContractFact)> {
        self.contracts.iter()
    }
}
