use std::collections::HashMap;

use tracing::trace;

use crate::dataflow::configuration::{Configuration, MemoKey};
use crate::dataflow::transfer::Interpreter;
use crate::dataflow::value::AbstractValue;
use crate::facts::FactStore;
use crate::inference::{AnalysisConfig, MethodContext};
use crate::ir::{Instruction, InstructionKind};
use crate::opcodes;
use crate::speculation::{PathSemantics, Step, StepLimitExceeded, explore, successors};

/// Exception types whose handlers also receive a `NullPointerException`.
const NPE_CATCHERS: [&str; 4] = [
    "java/lang/NullPointerException",
    "java/lang/RuntimeException",
    "java/lang/Exception",
    "java/lang/Throwable",
];

/// How every path of a method ends when the tracked parameter is null.
///
/// Ordered so that joining two paths keeps the weaker claim: any path that can
/// return normally defeats the inference.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) enum DereferenceResult {
    /// Only revisits of an ancestor state.
    Cycle,
    /// Throws something other than a null-caused exception.
    Error,
    /// Fails with a null-caused exception.
    Npe,
    Return,
}

impl DereferenceResult {
    pub(crate) fn join(self, other: DereferenceResult) -> DereferenceResult {
        self.max(other)
    }
}

struct DereferenceSemantics<'a> {
    context: &'a MethodContext<'a>,
    interpreter: Interpreter<'a>,
    memo: Option<HashMap<MemoKey, DereferenceResult>>,
}

impl DereferenceSemantics<'_> {
    fn memo_key(configuration: &Configuration, null_path: bool) -> MemoKey {
        MemoKey {
            index: configuration.index,
            frame: configuration.frame.clone(),
            null_path,
        }
    }

    /// Arm of a null test that the tracked parameter takes when it is null.
    fn null_arm(&self, instruction: &Instruction, configuration: &Configuration) -> Option<usize> {
        let InstructionKind::Jump(target) = &instruction.kind else {
            return None;
        };
        let target = *target;
        let next = configuration.index + 1;
        match (instruction.opcode, configuration.frame.peek(0)?) {
            (opcodes::IFNONNULL, AbstractValue::TrackedParam(_)) => Some(next),
            (opcodes::IFNULL, AbstractValue::TrackedParam(_)) => Some(target),
            (opcodes::IFEQ, AbstractValue::InstanceOfResult) => Some(target),
            (opcodes::IFNE, AbstractValue::InstanceOfResult) => Some(next),
            _ => None,
        }
    }
}

impl PathSemantics for DereferenceSemantics<'_> {
    /// Whether the path already went through a null-consistent branch or handler.
    type Path = bool;
    type Outcome = DereferenceResult;
    type Combiner = ();

    fn step(&self, configuration: &Configuration, null_path: &bool) -> Step<bool, DereferenceResult, ()> {
        let index = configuration.index;
        let Some(instruction) = self.context.method.instructions.get(index) else {
            return Step::Resolved(DereferenceResult::Return);
        };
        let transition = self
            .interpreter
            .execute(index, instruction, &configuration.frame);

        if transition.dereferenced {
            let children: Vec<(Configuration, bool)> = self
                .context
                .cfg
                .handlers(index)
                .filter(|(_, catch_type)| catches_npe(catch_type))
                .map(|(handler, _)| {
                    (
                        Configuration::new(handler, configuration.frame.handler_frame()),
                        true,
                    )
                })
                .collect();
            if children.is_empty() {
                return Step::Resolved(DereferenceResult::Npe);
            }
            return Step::Fork {
                children,
                combiner: (),
            };
        }

        if opcodes::is_return(instruction.opcode) {
            return Step::Resolved(DereferenceResult::Return);
        }
        if instruction.opcode == opcodes::ATHROW {
            // Any covering handler may receive the thrown value.
            let children: Vec<(Configuration, bool)> = self
                .context
                .cfg
                .handlers(index)
                .map(|(handler, _)| {
                    (
                        Configuration::new(handler, configuration.frame.handler_frame()),
                        *null_path,
                    )
                })
                .collect();
            if !children.is_empty() {
                return Step::Fork {
                    children,
                    combiner: (),
                };
            }
            return Step::Resolved(if *null_path {
                DereferenceResult::Npe
            } else {
                DereferenceResult::Error
            });
        }

        if let Some(arm) = self.null_arm(instruction, configuration) {
            return Step::Fork {
                children: vec![(Configuration::new(arm, transition.frame), true)],
                combiner: (),
            };
        }

        Step::Fork {
            children: successors(self.context, configuration, &transition.frame)
                .into_iter()
                .map(|next| (next, *null_path))
                .collect(),
            combiner: (),
        }
    }

    fn cycle(&self) -> DereferenceResult {
        DereferenceResult::Cycle
    }

    fn combine(&self, _combiner: &(), outcomes: Vec<DereferenceResult>) -> DereferenceResult {
        outcomes
            .into_iter()
            .fold(DereferenceResult::Cycle, DereferenceResult::join)
    }

    fn recall(&self, configuration: &Configuration, null_path: &bool) -> Option<DereferenceResult> {
        self.memo
            .as_ref()?
            .get(&Self::memo_key(configuration, *null_path))
            .copied()
    }

    fn remember(&mut self, configuration: &Configuration, null_path: &bool, outcome: &DereferenceResult) {
        if let Some(memo) = self.memo.as_mut() {
            memo.insert(Self::memo_key(configuration, *null_path), *outcome);
        }
    }
}

/// Whether a handler for `catch_type` receives a `NullPointerException`.
pub(crate) fn catches_npe(catch_type: &str) -> bool {
    NPE_CATCHERS.contains(&catch_type)
}

/// Simulate the method with the parameter at `position` null and combine every path.
///
/// The parameter is non-null iff the result is [`DereferenceResult::Npe`].
pub(crate) fn speculate_dereference(
    context: &MethodContext<'_>,
    facts: &FactStore,
    position: usize,
    config: &AnalysisConfig,
) -> Result<DereferenceResult, StepLimitExceeded> {
    let mut semantics = DereferenceSemantics {
        context,
        interpreter: Interpreter::new(facts, &context.callees),
        memo: config.memoize.then(HashMap::new),
    };
    let root = Configuration::new(0, context.entry_frame(position));
    let result = explore(&mut semantics, root, false, config.step_limit)?;
    trace!(method = %context.id, position, ?result, "dereference speculation");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callgraph::MethodId;
    use crate::facts::ParameterKey;
    use crate::speculation::fixtures::{
        classes_of, context, falls_off_after_null_test, guarded_hash_code, guarded_throw,
        hash_after_loop, invoke, is_empty_list, load, require_argument, simple, static_method,
        string_length, type_insn, with_cycle,
    };

    fn speculate(method: crate::ir::Method, facts: &FactStore, config: &AnalysisConfig) -> DereferenceResult {
        speculate_at(method, 0, facts, config)
    }

    fn speculate_at(
        method: crate::ir::Method,
        position: usize,
        facts: &FactStore,
        config: &AnalysisConfig,
    ) -> DereferenceResult {
        let (classes, index) = classes_of(vec![method]);
        let context = context(&classes, &index);
        speculate_dereference(&context, facts, position, config).expect("within budget")
    }

    fn without_memo() -> AnalysisConfig {
        AnalysisConfig {
            memoize: false,
            ..AnalysisConfig::default()
        }
    }

    fn default_speculate(method: crate::ir::Method) -> DereferenceResult {
        speculate(method, &FactStore::new(), &AnalysisConfig::default())
    }

    #[test]
    fn join_keeps_the_weakest_outcome() {
        assert_eq!(DereferenceResult::Npe.join(DereferenceResult::Return), DereferenceResult::Return);
        assert_eq!(DereferenceResult::Cycle.join(DereferenceResult::Npe), DereferenceResult::Npe);
        assert_eq!(DereferenceResult::Error.join(DereferenceResult::Npe), DereferenceResult::Npe);
        assert_eq!(DereferenceResult::Error.join(DereferenceResult::Cycle), DereferenceResult::Error);
    }

    #[test]
    fn receiver_call_on_parameter_requires_non_null() {
        assert_eq!(default_speculate(string_length()), DereferenceResult::Npe);
    }

    #[test]
    fn explicit_throw_on_null_branch_requires_non_null() {
        assert_eq!(default_speculate(require_argument()), DereferenceResult::Npe);
    }

    #[test]
    fn null_tolerant_method_returns_normally() {
        assert_eq!(default_speculate(is_empty_list()), DereferenceResult::Return);
    }

    #[test]
    fn unconditional_throw_is_an_error_not_a_null_failure() {
        let method = static_method(
            "fail",
            "(Ljava/lang/Object;)V",
            1,
            vec![
                type_insn(crate::opcodes::NEW, "java/lang/IllegalStateException"),
                simple(crate::opcodes::DUP),
                invoke(
                    crate::opcodes::INVOKESPECIAL,
                    "java/lang/IllegalStateException",
                    "<init>",
                    "()V",
                ),
                simple(crate::opcodes::ATHROW),
            ],
        );

        assert_eq!(default_speculate(method), DereferenceResult::Error);
    }

    #[test]
    fn swallowed_null_pointer_exception_defeats_inference() {
        assert_eq!(
            default_speculate(guarded_hash_code(Some("java/lang/NullPointerException"))),
            DereferenceResult::Return
        );
        assert_eq!(default_speculate(guarded_hash_code(None)), DereferenceResult::Return);
    }

    #[test]
    fn throw_inside_a_try_block_reaches_the_handler() {
        for catch_type in [Some("java/lang/RuntimeException"), None] {
            assert_eq!(default_speculate(guarded_throw(catch_type)), DereferenceResult::Return);
        }
    }

    #[test]
    fn loops_that_only_revisit_themselves_do_not_hide_a_return() {
        for config in [AnalysisConfig::default(), without_memo()] {
            assert_eq!(
                speculate_at(with_cycle(), 1, &FactStore::new(), &config),
                DereferenceResult::Return
            );
        }
    }

    #[test]
    fn dereference_after_a_loop_requires_non_null() {
        for config in [AnalysisConfig::default(), without_memo()] {
            assert_eq!(
                speculate_at(hash_after_loop(), 1, &FactStore::new(), &config),
                DereferenceResult::Npe
            );
        }
    }

    #[test]
    fn running_past_the_last_instruction_asserts_nothing() {
        assert_eq!(
            default_speculate(falls_off_after_null_test()),
            DereferenceResult::Return
        );
    }

    #[test]
    fn unrelated_handler_does_not_catch_the_dereference() {
        assert_eq!(
            default_speculate(guarded_hash_code(Some("java/io/IOException"))),
            DereferenceResult::Npe
        );
    }

    #[test]
    fn passing_to_a_known_non_null_parameter_is_a_dereference() {
        let caller = static_method(
            "caller",
            "(Ljava/lang/Object;)V",
            1,
            vec![
                load(crate::opcodes::ALOAD_0, 0),
                invoke(
                    crate::opcodes::INVOKESTATIC,
                    "com/example/Fixtures",
                    "require",
                    "(Ljava/lang/Object;)V",
                ),
                simple(crate::opcodes::RETURN),
            ],
        );
        let (classes, index) = classes_of(vec![caller, require_argument()]);
        let context = context(&classes, &index);
        let config = AnalysisConfig::default();
        let mut facts = FactStore::new();

        let before = speculate_dereference(&context, &facts, 0, &config).expect("within budget");
        facts.insert_not_null([ParameterKey {
            method: MethodId {
                class_name: "com/example/Fixtures".to_string(),
                name: "require".to_string(),
                descriptor: "(Ljava/lang/Object;)V".to_string(),
            },
            position: 0,
        }]);
        let after = speculate_dereference(&context, &facts, 0, &config).expect("within budget");

        assert_eq!(before, DereferenceResult::Return);
        assert_eq!(after, DereferenceResult::Npe);
    }

    #[test]
    fn memoization_does_not_change_results() {
        let without = without_memo();
        for method in [
            string_length(),
            require_argument(),
            is_empty_list(),
            guarded_hash_code(None),
            guarded_throw(None),
        ] {
            let memoized = speculate(method.clone(), &FactStore::new(), &AnalysisConfig::default());
            let plain = speculate(method, &FactStore::new(), &without);
            assert_eq!(memoized, plain);
        }
    }

    #[test]
    fn step_limit_aborts_speculation() {
        let (classes, index) = classes_of(vec![require_argument()]);
        let context = context(&classes, &index);
        let config = AnalysisConfig {
            step_limit: 2,
            memoize: true,
        };

        let result = speculate_dereference(&context, &FactStore::new(), 0, &config);

        assert_eq!(result, Err(StepLimitExceeded { limit: 2 }));
    }

    #[test]
    fn npe_catchers_cover_the_exception_hierarchy() {
        assert!(catches_npe("java/lang/RuntimeException"));
        assert!(catches_npe("java/lang/Throwable"));
        assert!(!catches_npe("java/lang/IllegalArgumentException"));
    }
}
