//! JVM opcode constants used by the decoder and the abstract interpreter.

pub(crate) const NOP: u8 = 0x00;
pub(crate) const ACONST_NULL: u8 = 0x01;
pub(crate) const ICONST_M1: u8 = 0x02;
pub(crate) const ICONST_0: u8 = 0x03;
pub(crate) const ICONST_1: u8 = 0x04;
pub(crate) const ICONST_5: u8 = 0x08;
pub(crate) const LCONST_0: u8 = 0x09;
pub(crate) const LCONST_1: u8 = 0x0a;
pub(crate) const FCONST_0: u8 = 0x0b;
pub(crate) const FCONST_2: u8 = 0x0d;
pub(crate) const DCONST_0: u8 = 0x0e;
pub(crate) const DCONST_1: u8 = 0x0f;
pub(crate) const BIPUSH: u8 = 0x10;
pub(crate) const SIPUSH: u8 = 0x11;
pub(crate) const LDC: u8 = 0x12;
pub(crate) const LDC_W: u8 = 0x13;
pub(crate) const LDC2_W: u8 = 0x14;

pub(crate) const ILOAD: u8 = 0x15;
pub(crate) const LLOAD: u8 = 0x16;
pub(crate) const DLOAD: u8 = 0x18;
pub(crate) const ALOAD: u8 = 0x19;
pub(crate) const ILOAD_0: u8 = 0x1a;
pub(crate) const ALOAD_0: u8 = 0x2a;
pub(crate) const ALOAD_1: u8 = 0x2b;
pub(crate) const ALOAD_3: u8 = 0x2d;
pub(crate) const IALOAD: u8 = 0x2e;
pub(crate) const LALOAD: u8 = 0x2f;
pub(crate) const FALOAD: u8 = 0x30;
pub(crate) const DALOAD: u8 = 0x31;
pub(crate) const AALOAD: u8 = 0x32;
pub(crate) const SALOAD: u8 = 0x35;

pub(crate) const ISTORE: u8 = 0x36;
pub(crate) const LSTORE: u8 = 0x37;
pub(crate) const DSTORE: u8 = 0x39;
pub(crate) const ASTORE: u8 = 0x3a;
pub(crate) const ISTORE_0: u8 = 0x3b;
pub(crate) const ASTORE_3: u8 = 0x4e;
pub(crate) const IASTORE: u8 = 0x4f;
pub(crate) const SASTORE: u8 = 0x56;

pub(crate) const POP: u8 = 0x57;
pub(crate) const POP2: u8 = 0x58;
pub(crate) const DUP: u8 = 0x59;
pub(crate) const DUP_X1: u8 = 0x5a;
pub(crate) const DUP_X2: u8 = 0x5b;
pub(crate) const DUP2: u8 = 0x5c;
pub(crate) const DUP2_X1: u8 = 0x5d;
pub(crate) const DUP2_X2: u8 = 0x5e;
pub(crate) const SWAP: u8 = 0x5f;

pub(crate) const IADD: u8 = 0x60;
pub(crate) const DREM: u8 = 0x73;
pub(crate) const INEG: u8 = 0x74;
pub(crate) const DNEG: u8 = 0x77;
pub(crate) const ISHL: u8 = 0x78;
pub(crate) const LXOR: u8 = 0x83;
pub(crate) const IINC: u8 = 0x84;
pub(crate) const IDIV: u8 = 0x6c;
pub(crate) const LDIV: u8 = 0x6d;
pub(crate) const IREM: u8 = 0x70;
pub(crate) const LREM: u8 = 0x71;

pub(crate) const I2L: u8 = 0x85;
pub(crate) const I2F: u8 = 0x86;
pub(crate) const I2D: u8 = 0x87;
pub(crate) const L2I: u8 = 0x88;
pub(crate) const L2F: u8 = 0x89;
pub(crate) const L2D: u8 = 0x8a;
pub(crate) const F2I: u8 = 0x8b;
pub(crate) const F2L: u8 = 0x8c;
pub(crate) const F2D: u8 = 0x8d;
pub(crate) const D2I: u8 = 0x8e;
pub(crate) const D2L: u8 = 0x8f;
pub(crate) const D2F: u8 = 0x90;
pub(crate) const I2S: u8 = 0x93;
pub(crate) const LCMP: u8 = 0x94;
pub(crate) const DCMPG: u8 = 0x98;

pub(crate) const IFEQ: u8 = 0x99;
pub(crate) const IFNE: u8 = 0x9a;
pub(crate) const IFLE: u8 = 0x9e;
pub(crate) const IF_ICMPEQ: u8 = 0x9f;
pub(crate) const IF_ICMPGE: u8 = 0xa2;
pub(crate) const IF_ICMPLE: u8 = 0xa4;
pub(crate) const IF_ACMPNE: u8 = 0xa6;
pub(crate) const GOTO: u8 = 0xa7;
pub(crate) const JSR: u8 = 0xa8;
pub(crate) const RET: u8 = 0xa9;
pub(crate) const TABLESWITCH: u8 = 0xaa;
pub(crate) const LOOKUPSWITCH: u8 = 0xab;

pub(crate) const IRETURN: u8 = 0xac;
pub(crate) const ARETURN: u8 = 0xb0;
pub(crate) const RETURN: u8 = 0xb1;

pub(crate) const GETSTATIC: u8 = 0xb2;
pub(crate) const PUTSTATIC: u8 = 0xb3;
pub(crate) const GETFIELD: u8 = 0xb4;
pub(crate) const PUTFIELD: u8 = 0xb5;
pub(crate) const INVOKEVIRTUAL: u8 = 0xb6;
pub(crate) const INVOKESPECIAL: u8 = 0xb7;
pub(crate) const INVOKESTATIC: u8 = 0xb8;
pub(crate) const INVOKEINTERFACE: u8 = 0xb9;
pub(crate) const INVOKEDYNAMIC: u8 = 0xba;

pub(crate) const NEW: u8 = 0xbb;
pub(crate) const NEWARRAY: u8 = 0xbc;
pub(crate) const ANEWARRAY: u8 = 0xbd;
pub(crate) const ARRAYLENGTH: u8 = 0xbe;
pub(crate) const ATHROW: u8 = 0xbf;
pub(crate) const CHECKCAST: u8 = 0xc0;
pub(crate) const INSTANCEOF: u8 = 0xc1;
pub(crate) const MONITORENTER: u8 = 0xc2;
pub(crate) const MONITOREXIT: u8 = 0xc3;
pub(crate) const WIDE: u8 = 0xc4;
pub(crate) const MULTIANEWARRAY: u8 = 0xc5;
pub(crate) const IFNULL: u8 = 0xc6;
pub(crate) const IFNONNULL: u8 = 0xc7;
pub(crate) const GOTO_W: u8 = 0xc8;
pub(crate) const JSR_W: u8 = 0xc9;

/// Returns true for opcodes that leave the method normally.
pub(crate) fn is_return(opcode: u8) -> bool {
    (IRETURN..=RETURN).contains(&opcode)
}

/// Returns true for opcodes that return a value to the caller.
pub(crate) fn is_value_return(opcode: u8) -> bool {
    (IRETURN..=ARETURN).contains(&opcode)
}

/// Returns true for conditional branches with a fall-through successor.
pub(crate) fn is_conditional_branch(opcode: u8) -> bool {
    (IFEQ..=IF_ACMPNE).contains(&opcode) || opcode == IFNULL || opcode == IFNONNULL
}

/// Returns true for opcodes whose execution can raise an exception.
pub(crate) fn may_throw(opcode: u8) -> bool {
    match opcode {
        IALOAD..=SALOAD | IASTORE..=SASTORE => true,
        IDIV | LDIV | IREM | LREM => true,
        GETSTATIC..=INVOKEDYNAMIC => true,
        NEW..=MULTIANEWARRAY => opcode != WIDE,
        LDC | LDC_W => true,
        _ => false,
    }
}

/// Returns true for opcodes that load or store a two-slot value.
pub(crate) fn is_wide_local(opcode: u8) -> bool {
    match opcode {
        LLOAD | DLOAD | LSTORE | DSTORE => true,
        0x1e..=0x21 | 0x26..=0x29 => true,
        0x3f..=0x42 | 0x47..=0x4a => true,
        _ => false,
    }
}
