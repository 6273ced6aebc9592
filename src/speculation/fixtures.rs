//! Hand-assembled methods shared by the speculator tests.
//!
//! Branch operands are instruction indices, as produced by the class scanner.

use crate::classpath::{ClasspathIndex, resolve_classpath};
use crate::descriptor::{parameter_kinds, return_kind};
use crate::inference::MethodContext;
use crate::ir::{
    CallKind, CallSite, Class, ExceptionHandler, Instruction, InstructionKind, Method,
    MethodAccess,
};
use crate::opcodes;

pub(crate) fn insn(opcode: u8, kind: InstructionKind) -> Instruction {
    Instruction {
        offset: 0,
        opcode,
        kind,
    }
}

pub(crate) fn simple(opcode: u8) -> Instruction {
    insn(opcode, InstructionKind::Simple)
}

pub(crate) fn load(opcode: u8, slot: u16) -> Instruction {
    insn(opcode, InstructionKind::Local(slot))
}

pub(crate) fn jump(opcode: u8, target: usize) -> Instruction {
    insn(opcode, InstructionKind::Jump(target))
}

pub(crate) fn type_insn(opcode: u8, type_name: &str) -> Instruction {
    insn(opcode, InstructionKind::Type(type_name.to_string()))
}

pub(crate) fn invoke(opcode: u8, owner: &str, name: &str, descriptor: &str) -> Instruction {
    let kind = match opcode {
        opcodes::INVOKESTATIC => CallKind::Static,
        opcodes::INVOKESPECIAL => CallKind::Special,
        opcodes::INVOKEINTERFACE => CallKind::Interface,
        _ => CallKind::Virtual,
    };
    insn(
        opcode,
        InstructionKind::Invoke(CallSite {
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            kind,
            offset: 0,
            arguments: parameter_kinds(descriptor).expect("descriptor").len(),
            returns: return_kind(descriptor).expect("descriptor"),
        }),
    )
}

pub(crate) fn static_method(
    name: &str,
    descriptor: &str,
    max_locals: usize,
    instructions: Vec<Instruction>,
) -> Method {
    Method {
        name: name.to_string(),
        descriptor: descriptor.to_string(),
        access: MethodAccess {
            is_public: true,
            is_static: true,
            ..MethodAccess::default()
        },
        instructions,
        exception_handlers: Vec::new(),
        line_numbers: Vec::new(),
        max_locals,
    }
}

pub(crate) fn handler(start: usize, end: usize, target: usize, catch_type: Option<&str>) -> ExceptionHandler {
    ExceptionHandler {
        start,
        end,
        handler: target,
        catch_type: catch_type.map(str::to_string),
    }
}

/// One class holding `methods`.
pub(crate) fn classes_of(methods: Vec<Method>) -> (Vec<Class>, ClasspathIndex) {
    let classes = vec![Class {
        name: "com/example/Fixtures".to_string(),
        super_name: Some("java/lang/Object".to_string()),
        interfaces: Vec::new(),
        referenced_classes: Vec::new(),
        methods,
        artifact_index: 0,
    }];
    let index = resolve_classpath(&classes).expect("classpath");
    (classes, index)
}

/// Context for the first method of the first class.
pub(crate) fn context<'a>(classes: &'a [Class], index: &ClasspathIndex) -> MethodContext<'a> {
    MethodContext::new(classes, index, &classes[0], &classes[0].methods[0])
        .expect("context")
        .expect("analyzable")
}

/// `static boolean isEmptyList(List l) { return l == null || l.isEmpty(); }`
pub(crate) fn is_empty_list() -> Method {
    empty_list_check("isEmptyList", opcodes::IFNULL, 5, opcodes::IFEQ)
}

/// `static boolean isNotEmptyList(List l) { return l != null && !l.isEmpty(); }`
pub(crate) fn is_not_empty_list() -> Method {
    empty_list_check("isNotEmptyList", opcodes::IFNULL, 7, opcodes::IFNE)
}

fn empty_list_check(name: &str, null_test: u8, null_target: usize, empty_test: u8) -> Method {
    static_method(
        name,
        "(Ljava/util/List;)Z",
        1,
        vec![
            load(opcodes::ALOAD_0, 0),
            jump(null_test, null_target),
            load(opcodes::ALOAD_0, 0),
            invoke(opcodes::INVOKEINTERFACE, "java/util/List", "isEmpty", "()Z"),
            jump(empty_test, 7),
            simple(opcodes::ICONST_1),
            jump(opcodes::GOTO, 8),
            simple(opcodes::ICONST_0),
            simple(opcodes::IRETURN),
        ],
    )
}

/// `t instanceof GenericArrayType || t instanceof Class && ((Class) t).isArray()`
pub(crate) fn is_array_type() -> Method {
    static_method(
        "isArrayType",
        "(Ljava/lang/reflect/Type;)Z",
        1,
        vec![
            load(opcodes::ALOAD_0, 0),
            type_insn(opcodes::INSTANCEOF, "java/lang/reflect/GenericArrayType"),
            jump(opcodes::IFNE, 10),
            load(opcodes::ALOAD_0, 0),
            type_insn(opcodes::INSTANCEOF, "java/lang/Class"),
            jump(opcodes::IFEQ, 12),
            load(opcodes::ALOAD_0, 0),
            type_insn(opcodes::CHECKCAST, "java/lang/Class"),
            invoke(opcodes::INVOKEVIRTUAL, "java/lang/Class", "isArray", "()Z"),
            jump(opcodes::IFEQ, 12),
            simple(opcodes::ICONST_1),
            jump(opcodes::GOTO, 13),
            simple(opcodes::ICONST_0),
            simple(opcodes::IRETURN),
        ],
    )
}

/// Counts `i` up to 10, then `o == null ? false : i > 123`.
pub(crate) fn with_cycle() -> Method {
    static_method(
        "withCycle",
        "(ILjava/lang/Object;)Z",
        2,
        vec![
            load(opcodes::ILOAD_0, 0),
            simple(opcodes::BIPUSH),
            jump(opcodes::IF_ICMPGE, 5),
            insn(opcodes::IINC, InstructionKind::Increment(0)),
            jump(opcodes::GOTO, 0),
            load(opcodes::ALOAD_1, 1),
            jump(opcodes::IFNONNULL, 9),
            simple(opcodes::ICONST_0),
            simple(opcodes::IRETURN),
            load(opcodes::ILOAD_0, 0),
            simple(opcodes::BIPUSH),
            jump(opcodes::IF_ICMPLE, 14),
            simple(opcodes::ICONST_1),
            jump(opcodes::GOTO, 15),
            simple(opcodes::ICONST_0),
            simple(opcodes::IRETURN),
        ],
    )
}

/// Null-safe `endsWith(CharSequence, CharSequence, boolean)`; the result on null depends on the other argument.
pub(crate) fn ends_with() -> Method {
    let char_sequence = "java/lang/CharSequence";
    static_method(
        "endsWith",
        "(Ljava/lang/CharSequence;Ljava/lang/CharSequence;Z)Z",
        3,
        vec![
            load(opcodes::ALOAD_0, 0),
            jump(opcodes::IFNULL, 4),
            load(opcodes::ALOAD_1, 1),
            jump(opcodes::IFNONNULL, 12),
            load(opcodes::ALOAD_0, 0),
            jump(opcodes::IFNONNULL, 10),
            load(opcodes::ALOAD_1, 1),
            jump(opcodes::IFNONNULL, 10),
            simple(opcodes::ICONST_1),
            jump(opcodes::GOTO, 11),
            simple(opcodes::ICONST_0),
            simple(opcodes::IRETURN),
            load(opcodes::ALOAD_1, 1),
            invoke(opcodes::INVOKEINTERFACE, char_sequence, "length", "()I"),
            load(opcodes::ALOAD_0, 0),
            invoke(opcodes::INVOKEINTERFACE, char_sequence, "length", "()I"),
            jump(opcodes::IF_ICMPLE, 19),
            simple(opcodes::ICONST_0),
            simple(opcodes::IRETURN),
            load(opcodes::ALOAD_0, 0),
            invoke(opcodes::INVOKEVIRTUAL, "java/lang/Object", "toString", "()Ljava/lang/String;"),
            load(opcodes::ALOAD_1, 1),
            invoke(opcodes::INVOKEVIRTUAL, "java/lang/Object", "toString", "()Ljava/lang/String;"),
            invoke(
                opcodes::INVOKEVIRTUAL,
                "java/lang/String",
                "endsWith",
                "(Ljava/lang/String;)Z",
            ),
            simple(opcodes::IRETURN),
        ],
    )
}

/// `static int length(String s) { return s.length(); }`
pub(crate) fn string_length() -> Method {
    static_method(
        "length",
        "(Ljava/lang/String;)I",
        1,
        vec![
            load(opcodes::ALOAD_0, 0),
            invoke(opcodes::INVOKEVIRTUAL, "java/lang/String", "length", "()I"),
            simple(opcodes::IRETURN),
        ],
    )
}

/// `static void require(Object o) { if (o == null) throw new IllegalArgumentException(); }`
pub(crate) fn require_argument() -> Method {
    static_method(
        "require",
        "(Ljava/lang/Object;)V",
        1,
        vec![
            load(opcodes::ALOAD_0, 0),
            jump(opcodes::IFNONNULL, 6),
            type_insn(opcodes::NEW, "java/lang/IllegalArgumentException"),
            simple(opcodes::DUP),
            invoke(
                opcodes::INVOKESPECIAL,
                "java/lang/IllegalArgumentException",
                "<init>",
                "()V",
            ),
            simple(opcodes::ATHROW),
            simple(opcodes::RETURN),
        ],
    )
}

/// `try { o.hashCode(); } catch (<catch_type> e) { }`
pub(crate) fn guarded_hash_code(catch_type: Option<&str>) -> Method {
    let mut method = static_method(
        "guardedHashCode",
        "(Ljava/lang/Object;)V",
        2,
        vec![
            load(opcodes::ALOAD_0, 0),
            invoke(opcodes::INVOKEVIRTUAL, "java/lang/Object", "hashCode", "()I"),
            simple(opcodes::POP),
            simple(opcodes::RETURN),
            load(opcodes::ASTORE, 1),
            simple(opcodes::RETURN),
        ],
    );
    method.exception_handlers = vec![handler(0, 3, 4, catch_type)];
    method
}

/// `static int hashAfterLoop(int n, Object o) { while (n > 0) n--; return o.hashCode(); }`
pub(crate) fn hash_after_loop() -> Method {
    static_method(
        "hashAfterLoop",
        "(ILjava/lang/Object;)I",
        2,
        vec![
            load(opcodes::ILOAD_0, 0),
            jump(opcodes::IFLE, 4),
            insn(opcodes::IINC, InstructionKind::Increment(0)),
            jump(opcodes::GOTO, 0),
            load(opcodes::ALOAD_1, 1),
            invoke(opcodes::INVOKEVIRTUAL, "java/lang/Object", "hashCode", "()I"),
            simple(opcodes::IRETURN),
        ],
    )
}

/// `try { if (o == null) throw e; } catch (<catch_type> x) { }`
pub(crate) fn guarded_throw(catch_type: Option<&str>) -> Method {
    let mut method = static_method(
        "guardedThrow",
        "(Ljava/lang/Object;Ljava/lang/RuntimeException;)V",
        3,
        vec![
            load(opcodes::ALOAD_0, 0),
            jump(opcodes::IFNONNULL, 4),
            load(opcodes::ALOAD_1, 1),
            simple(opcodes::ATHROW),
            simple(opcodes::RETURN),
            load(opcodes::ASTORE, 2),
            simple(opcodes::RETURN),
        ],
    );
    method.exception_handlers = vec![handler(0, 4, 5, catch_type)];
    method
}

/// A null test whose fall-through arm runs past the last instruction.
pub(crate) fn falls_off_after_null_test() -> Method {
    static_method(
        "fallsOff",
        "(Ljava/lang/Object;)Z",
        1,
        vec![load(opcodes::ALOAD_0, 0), jump(opcodes::IFNONNULL, 0)],
    )
}
