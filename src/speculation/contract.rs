use tracing::trace;

use crate::dataflow::configuration::Configuration;
use crate::dataflow::transfer::Interpreter;
use crate::dataflow::value::AbstractValue;
use crate::facts::{ContractFact, FactStore, ParamPath};
use crate::inference::{AnalysisConfig, MethodContext};
use crate::ir::{Instruction, InstructionKind};
use crate::opcodes;
use crate::speculation::{PathSemantics, Step, StepLimitExceeded, explore, successors};

/// Null tests the current path has gone through.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum PathForcing {
    Unforced,
    Forced(ParamPath),
    /// Went through both arms on the same path.
    Conflicting,
}

impl PathForcing {
    pub(crate) fn force(self, path: ParamPath) -> PathForcing {
        match self {
            PathForcing::Unforced => PathForcing::Forced(path),
            PathForcing::Forced(current) if current == path => PathForcing::Forced(path),
            _ => PathForcing::Conflicting,
        }
    }
}

/// Summary of the boolean results reachable from one configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Contract {
    Single { path: ParamPath, result: bool },
    Conflict,
    Cycled,
    Absent,
}

impl Contract {
    pub(crate) fn accepted(self) -> Option<ContractFact> {
        match self {
            Contract::Single { path, result } => Some(ContractFact { path, result }),
            _ => None,
        }
    }
}

/// How to merge child outcomes.
#[derive(Clone, Copy, Debug)]
pub(crate) enum ContractCombiner {
    /// The two arms of a null test, null arm first.
    Branch,
    /// Ordinary successors, merged under the forcing of their common parent.
    Sequential(PathForcing),
}

/// Merge the null arm `c1` with the non-null arm `c2` of a null test.
pub(crate) fn combine_at_branch(c1: Contract, c2: Contract) -> Contract {
    match (c1, c2) {
        (Contract::Cycled, _) => c2,
        (_, Contract::Cycled) => c1,
        (Contract::Single { .. }, _) => c1,
        (_, Contract::Single { .. }) => c2,
        _ if c1 == c2 => c1,
        _ => Contract::Absent,
    }
}

/// Merge two ordinary successors reached under `forcing`.
pub(crate) fn combine_sequential(c1: Contract, c2: Contract, forcing: PathForcing) -> Contract {
    if forcing == PathForcing::Unforced && (c1 == Contract::Conflict || c2 == Contract::Conflict) {
        return Contract::Conflict;
    }
    if forcing != PathForcing::Unforced {
        return if c1 == c2 { c1 } else { Contract::Conflict };
    }
    match (c1, c2) {
        (Contract::Cycled, _) => c2,
        (_, Contract::Cycled) => c1,
        _ if c1 == c2 => c1,
        _ => Contract::Absent,
    }
}

struct ContractSemantics<'a> {
    context: &'a MethodContext<'a>,
    interpreter: Interpreter<'a>,
}

impl ContractSemantics<'_> {
    /// `(null arm, non-null arm)` when the instruction tests the tracked parameter.
    fn null_test(
        &self,
        instruction: &Instruction,
        configuration: &Configuration,
    ) -> Option<(usize, usize)> {
        let InstructionKind::Jump(target) = &instruction.kind else {
            return None;
        };
        let (target, next) = (*target, configuration.index + 1);
        match (instruction.opcode, configuration.frame.peek(0)?) {
            (opcodes::IFNONNULL, AbstractValue::TrackedParam(_)) => Some((next, target)),
            (opcodes::IFNULL, AbstractValue::TrackedParam(_)) => Some((target, next)),
            (opcodes::IFEQ, AbstractValue::InstanceOfResult) => Some((target, next)),
            (opcodes::IFNE, AbstractValue::InstanceOfResult) => Some((next, target)),
            _ => None,
        }
    }
}

impl PathSemantics for ContractSemantics<'_> {
    type Path = PathForcing;
    type Outcome = Contract;
    type Combiner = ContractCombiner;

    fn step(
        &self,
        configuration: &Configuration,
        forcing: &PathForcing,
    ) -> Step<PathForcing, Contract, ContractCombiner> {
        let index = configuration.index;
        let Some(instruction) = self.context.method.instructions.get(index) else {
            return Step::Resolved(Contract::Absent);
        };
        let opcode = instruction.opcode;

        if opcodes::is_value_return(opcode) {
            let outcome = match (configuration.frame.peek(0), forcing) {
                (Some(AbstractValue::BooleanConstant(_)), PathForcing::Conflicting) => {
                    Contract::Conflict
                }
                (Some(AbstractValue::BooleanConstant(result)), PathForcing::Forced(path)) => {
                    Contract::Single {
                        path: *path,
                        result: *result,
                    }
                }
                _ => Contract::Absent,
            };
            return Step::Resolved(outcome);
        }
        if opcode == opcodes::RETURN || opcode == opcodes::ATHROW {
            return Step::Resolved(Contract::Absent);
        }

        let after = self
            .interpreter
            .execute(index, instruction, &configuration.frame)
            .frame;

        if let Some((null_arm, not_null_arm)) = self.null_test(instruction, configuration) {
            return Step::Fork {
                children: vec![
                    (
                        Configuration::new(null_arm, after.clone()),
                        forcing.force(ParamPath::Null),
                    ),
                    (
                        Configuration::new(not_null_arm, after),
                        forcing.force(ParamPath::NotNull),
                    ),
                ],
                combiner: ContractCombiner::Branch,
            };
        }

        Step::Fork {
            children: successors(self.context, configuration, &after)
                .into_iter()
                .map(|next| (next, *forcing))
                .collect(),
            combiner: ContractCombiner::Sequential(*forcing),
        }
    }

    fn cycle(&self) -> Contract {
        Contract::Cycled
    }

    fn combine(&self, combiner: &ContractCombiner, outcomes: Vec<Contract>) -> Contract {
        let mut outcomes = outcomes.into_iter();
        let Some(first) = outcomes.next() else {
            return Contract::Cycled;
        };
        outcomes.fold(first, |merged, next| match combiner {
            ContractCombiner::Branch => combine_at_branch(merged, next),
            ContractCombiner::Sequential(forcing) => combine_sequential(merged, next, *forcing),
        })
    }
}

/// Find the boolean the method returns whenever the parameter at `position` takes one arm of its null tests.
///
/// Calls are not consulted against known facts, so `facts` is normally empty.
pub(crate) fn speculate_contract(
    context: &MethodContext<'_>,
    facts: &FactStore,
    position: usize,
    config: &AnalysisConfig,
) -> Result<Contract, StepLimitExceeded> {
    let mut semantics = ContractSemantics {
        context,
        interpreter: Interpreter::new(facts, &context.callees),
    };
    let root = Configuration::new(0, context.entry_frame(position));
    let contract = explore(&mut semantics, root, PathForcing::Unforced, config.step_limit)?;
    trace!(method = %context.id, position, ?contract, "contract speculation");
    Ok(contract)
}
