use std::hash::{Hash, Hasher};

use crate::dataflow::value::Frame;

/// A point of the exploration tree: instruction index and the frame before it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Configuration {
    pub(crate) index: usize,
    pub(crate) frame: Frame,
}

impl Configuration {
    pub(crate) fn new(index: usize, frame: Frame) -> Self {
        Self { index, frame }
    }

    /// A revisit of `previous` at the same instruction with a covering frame.
    pub(crate) fn is_covered_by(&self, previous: &Configuration) -> bool {
        self.index == previous.index && previous.frame.covers(&self.frame)
    }
}

/// Memo key for settled sub-results.
///
/// Hashing looks only at value kinds per slot, so distinct frames share buckets;
/// equality still compares the full frame.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct MemoKey {
    pub(crate) index: usize,
    pub(crate) frame: Frame,
    pub(crate) null_path: bool,
}

impl Hash for MemoKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.null_path.hash(state);
        for value in self.frame.locals().iter().chain(self.frame.stack()) {
            value.kind_tag().hash(state);
        }
        self.frame.stack().len().hash(state);
    }
}
