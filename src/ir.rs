use crate::descriptor::ValueKind;

/// Intermediate representation for parsed JVM classes and methods.
#[derive(Clone, Debug)]
pub(crate) struct Class {
    pub(crate) name: String,
    pub(crate) super_name: Option<String>,
    pub(crate) interfaces: Vec<String>,
    pub(crate) referenced_classes: Vec<String>,
    pub(crate) methods: Vec<Method>,
    pub(crate) artifact_index: i64,
}

/// Intermediate representation for a method and its decoded bytecode.
#[derive(Clone, Debug)]
pub(crate) struct Method {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) access: MethodAccess,
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) exception_handlers: Vec<ExceptionHandler>,
    pub(crate) line_numbers: Vec<LineNumber>,
    pub(crate) max_locals: usize,
}

impl Method {
    /// Source line of the first instruction, when line numbers are present.
    pub(crate) fn first_line(&self) -> Option<u32> {
        self.line_numbers.first().map(|entry| entry.line)
    }
}

/// Method access flags needed for analyzability and call resolution.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct MethodAccess {
    pub(crate) is_public: bool,
    pub(crate) is_private: bool,
    pub(crate) is_static: bool,
    pub(crate) is_final: bool,
    pub(crate) is_abstract: bool,
    pub(crate) is_native: bool,
    pub(crate) is_varargs: bool,
}

impl MethodAccess {
    /// Stable methods cannot be overridden, so facts about them hold at every call site.
    pub(crate) fn is_stable(&self) -> bool {
        self.is_static || self.is_private || self.is_final
    }
}

/// Line number entry mapped to a bytecode offset.
#[derive(Clone, Debug)]
pub(crate) struct LineNumber {
    pub(crate) start_pc: u32,
    pub(crate) line: u32,
}

/// Exception handler region expressed in instruction indices.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ExceptionHandler {
    pub(crate) start: usize,
    pub(crate) end: usize,
    pub(crate) handler: usize,
    pub(crate) catch_type: Option<String>,
}

/// Decoded bytecode instruction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Instruction {
    pub(crate) offset: u32,
    pub(crate) opcode: u8,
    pub(crate) kind: InstructionKind,
}

/// Typed operands of an instruction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum InstructionKind {
    Simple,
    Local(u16),
    Increment(u16),
    Jump(usize),
    Switch {
        default: usize,
        targets: Vec<usize>,
    },
    Constant(ValueKind),
    Type(String),
    MultiArray {
        type_name: String,
        dimensions: u8,
    },
    Field(FieldRef),
    Invoke(CallSite),
    InvokeDynamic {
        descriptor: String,
        arguments: usize,
        returns: ValueKind,
    },
}

/// Field reference extracted from bytecode.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct FieldRef {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) kind: ValueKind,
}

/// Call site extracted from bytecode.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct CallSite {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) kind: CallKind,
    pub(crate) offset: u32,
    /// Declared arguments, excluding the receiver.
    pub(crate) arguments: usize,
    pub(crate) returns: ValueKind,
}

impl CallSite {
    /// Number of stack operands consumed, including the receiver.
    pub(crate) fn operand_count(&self) -> usize {
        match self.kind {
            CallKind::Static => self.arguments,
            _ => self.arguments + 1,
        }
    }
}

/// Call opcode classification.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum CallKind {
    Virtual,
    Interface,
    Special,
    Static,
}
