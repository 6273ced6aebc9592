use std::sync::Arc;

use crate::descriptor::ValueKind;

/// Verifier-level type of an ordinary value.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub(crate) enum BasicType {
    Int,
    Float,
    Long,
    Double,
    Reference,
    ReturnAddress,
    Uninitialized,
}

impl BasicType {
    pub(crate) fn from_kind(kind: ValueKind) -> Option<Self> {
        match kind {
            ValueKind::Void => None,
            ValueKind::Int => Some(BasicType::Int),
            ValueKind::Float => Some(BasicType::Float),
            ValueKind::Long => Some(BasicType::Long),
            ValueKind::Double => Some(BasicType::Double),
            ValueKind::Reference => Some(BasicType::Reference),
        }
    }
}

/// Abstract value held by a local slot or stack entry.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub(crate) enum AbstractValue {
    /// Any value whose identity does not matter.
    Ordinary(BasicType),
    /// The parameter under speculation, with its current static type.
    TrackedParam(Arc<str>),
    /// Result of `instanceof` applied to the tracked parameter.
    InstanceOfResult,
    /// `iconst_0` / `iconst_1`.
    BooleanConstant(bool),
}

impl AbstractValue {
    pub(crate) const UNINITIALIZED: AbstractValue = AbstractValue::Ordinary(BasicType::Uninitialized);
    pub(crate) const REFERENCE: AbstractValue = AbstractValue::Ordinary(BasicType::Reference);
    pub(crate) const INT: AbstractValue = AbstractValue::Ordinary(BasicType::Int);

    pub(crate) fn of_kind(kind: ValueKind) -> Option<Self> {
        BasicType::from_kind(kind).map(AbstractValue::Ordinary)
    }

    pub(crate) fn is_tracked(&self) -> bool {
        matches!(self, AbstractValue::TrackedParam(_))
    }

    /// Long and double values take two slots.
    pub(crate) fn size(&self) -> usize {
        match self {
            AbstractValue::Ordinary(BasicType::Long | BasicType::Double) => 2,
            _ => 1,
        }
    }

    /// Whether an ancestor holding `self` makes `current` a revisit of the same state.
    pub(crate) fn is_covered_by(&self, current: &AbstractValue) -> bool {
        match self {
            AbstractValue::TrackedParam(_) => current.is_tracked(),
            AbstractValue::InstanceOfResult => matches!(current, AbstractValue::InstanceOfResult),
            AbstractValue::BooleanConstant(_) => self == current,
            AbstractValue::Ordinary(_) => true,
        }
    }

    /// Tag used by the coarse memo hash.
    pub(crate) fn kind_tag(&self) -> u8 {
        match self {
            AbstractValue::Ordinary(_) => 0,
            AbstractValue::TrackedParam(_) => 1,
            AbstractValue::InstanceOfResult => 2,
            AbstractValue::BooleanConstant(_) => 3,
        }
    }
}

/// Declared parameter as seen by the entry frame.
#[derive(Clone, Debug)]
pub(crate) struct Parameter {
    pub(crate) kind: ValueKind,
    pub(crate) type_name: Arc<str>,
}

/// Locals, operand stack and return placeholder at one program point.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub(crate) struct Frame {
    locals: Vec<AbstractValue>,
    stack: Vec<AbstractValue>,
    return_type: Option<BasicType>,
}

impl Frame {
    /// Build the method-entry frame with `tracked` (a receiver-inclusive position) marked.
    pub(crate) fn entry(
        is_static: bool,
        parameters: &[Parameter],
        returns: ValueKind,
        max_locals: usize,
        tracked: usize,
    ) -> Self {
        let mut locals = Vec::with_capacity(max_locals);
        let shift = usize::from(!is_static);
        if !is_static {
            locals.push(AbstractValue::REFERENCE);
        }
        for (index, parameter) in parameters.iter().enumerate() {
            let value = if index + shift == tracked {
                AbstractValue::TrackedParam(parameter.type_name.clone())
            } else {
                AbstractValue::of_kind(parameter.kind).unwrap_or(AbstractValue::UNINITIALIZED)
            };
            locals.push(value);
            if parameter.kind.slots() == 2 {
                locals.push(AbstractValue::UNINITIALIZED);
            }
        }
        while locals.len() < max_locals {
            locals.push(AbstractValue::UNINITIALIZED);
        }
        Self {
            locals,
            stack: Vec::new(),
            return_type: BasicType::from_kind(returns),
        }
    }

    /// Frame seen by an exception handler: same locals, stack holding only the exception.
    pub(crate) fn handler_frame(&self) -> Self {
        Self {
            locals: self.locals.clone(),
            stack: vec![AbstractValue::REFERENCE],
            return_type: self.return_type,
        }
    }

    pub(crate) fn push(&mut self, value: AbstractValue) {
        self.stack.push(value);
    }

    pub(crate) fn pop(&mut self) -> AbstractValue {
        self.stack.pop().unwrap_or(AbstractValue::UNINITIALIZED)
    }

    /// Value `depth` entries below the top of the stack.
    pub(crate) fn peek(&self, depth: usize) -> Option<&AbstractValue> {
        self.stack
            .len()
            .checked_sub(depth + 1)
            .and_then(|index| self.stack.get(index))
    }

    pub(crate) fn local(&self, slot: usize) -> AbstractValue {
        self.locals
            .get(slot)
            .cloned()
            .unwrap_or(AbstractValue::UNINITIALIZED)
    }

    /// Store into `slot`, invalidating halves of any two-slot value it overlaps.
    pub(crate) fn set_local(&mut self, slot: usize, value: AbstractValue) {
        let width = value.size();
        if self.locals.len() < slot + width {
            self.locals.resize(slot + width, AbstractValue::UNINITIALIZED);
        }
        if slot > 0 && self.locals[slot - 1].size() == 2 {
            self.locals[slot - 1] = AbstractValue::UNINITIALIZED;
        }
        self.locals[slot] = value;
        if width == 2 {
            self.locals[slot + 1] = AbstractValue::UNINITIALIZED;
        }
    }

    pub(crate) fn locals(&self) -> &[AbstractValue] {
        &self.locals
    }

    pub(crate) fn stack(&self) -> &[AbstractValue] {
        &self.stack
    }

    pub(crate) fn return_type(&self) -> Option<BasicType> {
        self.return_type
    }

    /// Whether an ancestor frame `self` covers `current` slot by slot.
    pub(crate) fn covers(&self, current: &Frame) -> bool {
        self.stack.len() == current.stack.len()
            && self.locals.len() == current.locals.len()
            && self
                .locals
                .iter()
                .zip(&current.locals)
                .chain(self.stack.iter().zip(&current.stack))
                .all(|(previous, now)| previous.is_covered_by(now))
    }
}
