use crate::classpath::ResolvedMethod;
use crate::dataflow::value::{AbstractValue, BasicType, Frame};
use crate::descriptor::ValueKind;
use crate::facts::FactStore;
use crate::ir::{CallKind, CallSite, Instruction, InstructionKind};
use crate::opcodes;

/// Frame after one instruction plus whether it dereferenced the tracked parameter.
#[derive(Clone, Debug)]
pub(crate) struct Transition {
    pub(crate) frame: Frame,
    pub(crate) dereferenced: bool,
}

/// Abstract interpreter over [`AbstractValue`] frames.
///
/// Calls to stable callees consult `facts`: passing the tracked parameter where the
/// callee requires a non-null argument counts as a dereference.
pub(crate) struct Interpreter<'a> {
    facts: &'a FactStore,
    /// Resolved target per instruction index, `None` for non-calls and unresolved calls.
    callees: &'a [Option<ResolvedMethod>],
}

/// Stack effect of an opcode outside the explicitly modeled cases.
#[derive(Clone, Copy, Debug)]
enum Effect {
    Noop,
    Push(BasicType),
    Pop(usize),
    PopAndPush(usize, BasicType),
    Load(u16),
    Store(u16),
}

impl<'a> Interpreter<'a> {
    pub(crate) fn new(facts: &'a FactStore, callees: &'a [Option<ResolvedMethod>]) -> Self {
        Self { facts, callees }
    }

    pub(crate) fn execute(&self, index: usize, instruction: &Instruction, frame: &Frame) -> Transition {
        let mut frame = frame.clone();
        let dereferenced = self.apply(index, instruction, &mut frame);
        Transition {
            frame,
            dereferenced,
        }
    }

    fn apply(&self, index: usize, instruction: &Instruction, frame: &mut Frame) -> bool {
        let opcode = instruction.opcode;
        match (opcode, &instruction.kind) {
            (opcodes::ICONST_0, _) => frame.push(AbstractValue::BooleanConstant(false)),
            (opcodes::ICONST_1, _) => frame.push(AbstractValue::BooleanConstant(true)),
            (opcodes::IALOAD..=opcodes::SALOAD, _) => {
                frame.pop();
                let array = frame.pop();
                frame.push(AbstractValue::Ordinary(array_element(opcode)));
                return array.is_tracked();
            }
            (opcodes::IASTORE..=opcodes::SASTORE, _) => {
                frame.pop();
                frame.pop();
                return frame.pop().is_tracked();
            }
            (opcodes::POP..=opcodes::SWAP, _) => shuffle(opcode, frame),
            (opcodes::GETFIELD, InstructionKind::Field(field)) => {
                let object = frame.pop();
                push_kind(frame, field.kind);
                return object.is_tracked();
            }
            (opcodes::PUTFIELD, _) => {
                frame.pop();
                return frame.pop().is_tracked();
            }
            (opcodes::GETSTATIC, InstructionKind::Field(field)) => push_kind(frame, field.kind),
            (opcodes::PUTSTATIC, _) => {
                frame.pop();
            }
            (_, InstructionKind::Invoke(call)) => return self.invoke(index, call, frame),
            (_, InstructionKind::InvokeDynamic { arguments, returns, .. }) => {
                for _ in 0..*arguments {
                    frame.pop();
                }
                push_kind(frame, *returns);
            }
            (opcodes::ARRAYLENGTH, _) => {
                let array = frame.pop();
                frame.push(AbstractValue::INT);
                return array.is_tracked();
            }
            (opcodes::ATHROW | opcodes::MONITORENTER, _) => return frame.pop().is_tracked(),
            (opcodes::CHECKCAST, InstructionKind::Type(type_name)) => {
                let value = frame.pop();
                if value.is_tracked() {
                    frame.push(AbstractValue::TrackedParam(type_name.as_str().into()));
                } else {
                    frame.push(AbstractValue::REFERENCE);
                }
            }
            (opcodes::INSTANCEOF, _) => {
                let value = frame.pop();
                if value.is_tracked() {
                    frame.push(AbstractValue::InstanceOfResult);
                } else {
                    frame.push(AbstractValue::INT);
                }
            }
            (opcodes::MULTIANEWARRAY, InstructionKind::MultiArray { dimensions, .. }) => {
                for _ in 0..*dimensions {
                    frame.pop();
                }
                frame.push(AbstractValue::REFERENCE);
            }
            (opcodes::LDC | opcodes::LDC_W | opcodes::LDC2_W, InstructionKind::Constant(kind)) => {
                push_kind(frame, *kind)
            }
            (opcodes::IINC, InstructionKind::Increment(slot)) => {
                frame.set_local(*slot as usize, AbstractValue::INT)
            }
            _ => apply_effect(frame, effect(opcode, &instruction.kind)),
        }
        false
    }

    fn invoke(&self, index: usize, call: &CallSite, frame: &mut Frame) -> bool {
        let count = call.operand_count();
        let mut operands: Vec<AbstractValue> = (0..count).map(|_| frame.pop()).collect();
        operands.reverse();
        push_kind(frame, call.returns);

        let mut dereferenced =
            call.kind != CallKind::Static && operands.first().is_some_and(AbstractValue::is_tracked);
        if let Some(Some(callee)) = self.callees.get(index) {
            if callee.is_stable {
                dereferenced = dereferenced
                    || self
                        .facts
                        .not_null_positions(&callee.id)
                        .any(|position| operands.get(position).is_some_and(AbstractValue::is_tracked));
            }
        }
        dereferenced
    }
}

fn push_kind(frame: &mut Frame, kind: ValueKind) {
    if let Some(value) = AbstractValue::of_kind(kind) {
        frame.push(value);
    }
}

fn array_element(opcode: u8) -> BasicType {
    match opcode {
        opcodes::LALOAD => BasicType::Long,
        opcodes::FALOAD => BasicType::Float,
        opcodes::DALOAD => BasicType::Double,
        opcodes::AALOAD => BasicType::Reference,
        _ => BasicType::Int,
    }
}

/// Stack manipulation by computational category.
fn shuffle(opcode: u8, frame: &mut Frame) {
    match opcode {
        opcodes::POP => {
            frame.pop();
        }
        opcodes::POP2 => {
            if frame.pop().size() == 1 {
                frame.pop();
            }
        }
        opcodes::DUP => {
            let v1 = frame.pop();
            push_all(frame, [&v1, &v1]);
        }
        opcodes::DUP_X1 => {
            let v1 = frame.pop();
            let v2 = frame.pop();
            push_all(frame, [&v1, &v2, &v1]);
        }
        opcodes::DUP_X2 => {
            let v1 = frame.pop();
            let v2 = frame.pop();
            if v2.size() == 2 {
                push_all(frame, [&v1, &v2, &v1]);
            } else {
                let v3 = frame.pop();
                push_all(frame, [&v1, &v3, &v2, &v1]);
            }
        }
        opcodes::DUP2 => {
            let v1 = frame.pop();
            if v1.size() == 2 {
                push_all(frame, [&v1, &v1]);
            } else {
                let v2 = frame.pop();
                push_all(frame, [&v2, &v1, &v2, &v1]);
            }
        }
        opcodes::DUP2_X1 => {
            let v1 = frame.pop();
            if v1.size() == 2 {
                let v2 = frame.pop();
                push_all(frame, [&v1, &v2, &v1]);
            } else {
                let v2 = frame.pop();
                let v3 = frame.pop();
                push_all(frame, [&v2, &v1, &v3, &v2, &v1]);
            }
        }
        opcodes::DUP2_X2 => {
            let v1 = frame.pop();
            if v1.size() == 2 {
                let v2 = frame.pop();
                if v2.size() == 2 {
                    push_all(frame, [&v1, &v2, &v1]);
                } else {
                    let v3 = frame.pop();
                    push_all(frame, [&v1, &v3, &v2, &v1]);
                }
            } else {
                let v2 = frame.pop();
                let v3 = frame.pop();
                if v3.size() == 2 {
                    push_all(frame, [&v2, &v1, &v3, &v2, &v1]);
                } else {
                    let v4 = frame.pop();
                    push_all(frame, [&v2, &v1, &v4, &v3, &v2, &v1]);
                }
            }
        }
        _ => {
            let v1 = frame.pop();
            let v2 = frame.pop();
            push_all(frame, [&v1, &v2]);
        }
    }
}

fn push_all<const N: usize>(frame: &mut Frame, values: [&AbstractValue; N]) {
    for value in values {
        frame.push(value.clone());
    }
}

fn apply_effect(frame: &mut Frame, effect: Effect) {
    match effect {
        Effect::Noop => {}
        Effect::Push(basic) => frame.push(AbstractValue::Ordinary(basic)),
        Effect::Pop(count) => {
            for _ in 0..count {
                frame.pop();
            }
        }
        Effect::PopAndPush(count, basic) => {
            for _ in 0..count {
                frame.pop();
            }
            frame.push(AbstractValue::Ordinary(basic));
        }
        Effect::Load(slot) => frame.push(frame.local(slot as usize)),
        Effect::Store(slot) => {
            let value = frame.pop();
            frame.set_local(slot as usize, value);
        }
    }
}

const ARITHMETIC: [BasicType; 4] = [
    BasicType::Int,
    BasicType::Long,
    BasicType::Float,
    BasicType::Double,
];

fn effect(opcode: u8, kind: &InstructionKind) -> Effect {
    use BasicType::{Double, Float, Int, Long, Reference, ReturnAddress};

    let slot = match kind {
        InstructionKind::Local(slot) => *slot,
        _ => 0,
    };
    match opcode {
        opcodes::ACONST_NULL => Effect::Push(Reference),
        opcodes::ICONST_M1..=opcodes::ICONST_5 | opcodes::BIPUSH | opcodes::SIPUSH => {
            Effect::Push(Int)
        }
        opcodes::LCONST_0 | opcodes::LCONST_1 => Effect::Push(Long),
        opcodes::FCONST_0..=opcodes::FCONST_2 => Effect::Push(Float),
        opcodes::DCONST_0 | opcodes::DCONST_1 => Effect::Push(Double),
        opcodes::ILOAD..=opcodes::ALOAD_3 => Effect::Load(slot),
        opcodes::ISTORE..=opcodes::ASTORE_3 => Effect::Store(slot),
        opcodes::IADD..=opcodes::DREM => {
            Effect::PopAndPush(2, ARITHMETIC[((opcode - opcodes::IADD) % 4) as usize])
        }
        opcodes::INEG..=opcodes::DNEG => {
            Effect::PopAndPush(1, ARITHMETIC[((opcode - opcodes::INEG) % 4) as usize])
        }
        opcodes::ISHL..=opcodes::LXOR => {
            let result = if (opcode - opcodes::ISHL) % 2 == 0 { Int } else { Long };
            Effect::PopAndPush(2, result)
        }
        opcodes::I2L | opcodes::F2L | opcodes::D2L => Effect::PopAndPush(1, Long),
        opcodes::I2F | opcodes::L2F | opcodes::D2F => Effect::PopAndPush(1, Float),
        opcodes::I2D | opcodes::L2D | opcodes::F2D => Effect::PopAndPush(1, Double),
        opcodes::L2I | opcodes::F2I | opcodes::D2I | 0x91..=opcodes::I2S => {
            Effect::PopAndPush(1, Int)
        }
        opcodes::LCMP..=opcodes::DCMPG => Effect::PopAndPush(2, Int),
        opcodes::IFEQ..=opcodes::IFLE
        | opcodes::IFNULL
        | opcodes::IFNONNULL
        | opcodes::TABLESWITCH
        | opcodes::LOOKUPSWITCH => Effect::Pop(1),
        opcodes::IF_ICMPEQ..=opcodes::IF_ACMPNE => Effect::Pop(2),
        opcodes::JSR | opcodes::JSR_W => Effect::Push(ReturnAddress),
        opcodes::IRETURN..=opcodes::ARETURN | opcodes::MONITOREXIT => Effect::Pop(1),
        opcodes::NEW => Effect::Push(Reference),
        opcodes::NEWARRAY | opcodes::ANEWARRAY => Effect::PopAndPush(1, Reference),
        _ => Effect::Noop,
    }
}
