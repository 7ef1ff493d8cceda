//! Artificial instructions: steps of a path that do not correspond to any
//! instruction in the code, but that the interpreter inserts to make implicit
//! control flow and the phases of a transaction explicit on the trace.

use std::rc::Rc;

use num_bigint::BigInt;
use tracing::debug;
use z3::ast::BV;

use crate::{
    constant::{exit_code, IMPLICIT_JMPREF_GAS_PRICE, IMPLICIT_RET_GAS_PRICE, INT_BITS},
    error::execution,
    opcode::control,
    orchestrator::{self, Delivery},
    solver::SymInt,
    vm::{
        entry,
        phase,
        result::TerminalResult,
        state::VMState,
        step::{Interrupt, StepContext},
        value::Continuation,
    },
};

/// An instruction inserted by the interpreter.
#[derive(Clone, Debug)]
pub enum Artificial {
    /// Entry into an iteration of a loop continuation, or out of the loop.
    LoopEntrance { continuation: Rc<Continuation> },

    /// A jump to a continuation that ends the compute phase.
    Invoke { continuation: Rc<Continuation> },

    /// The return performed on running off the end of the current code.
    ImplicitReturn,

    /// The jump into the first reference of the current code on running off
    /// the end of its data.
    ImplicitJumpRef,

    EnterActionPhase { exit_code: i32 },

    /// Parsing of the out action at `index`.
    HandleOutMessage { index: usize, exit_code: i32 },

    EnterBouncePhase { exit_code: i32 },

    /// The end of the current contract execution.
    Exit { result: TerminalResult },

    /// The start of the execution of a message delivered to another contract.
    Deliver { delivery: Delivery },
}

impl Artificial {
    /// Gets the name of the instruction, as shown on traces.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::LoopEntrance { continuation } => format!("LOOP_ENTRANCE {}", continuation.kind()),
            Self::Invoke { continuation } => match continuation.as_ref() {
                Continuation::Quit(code) => format!("INVOKE quit({code})"),
                other => format!("INVOKE {}", other.kind()),
            },
            Self::ImplicitReturn => "IMPLICIT_RET".into(),
            Self::ImplicitJumpRef => "IMPLICIT_JMPREF".into(),
            Self::EnterActionPhase { exit_code } => format!("ENTER_ACTION_PHASE {exit_code}"),
            Self::HandleOutMessage { index, .. } => format!("HANDLE_OUT_MESSAGE {index}"),
            Self::EnterBouncePhase { exit_code } => format!("ENTER_BOUNCE_PHASE {exit_code}"),
            Self::Exit { result } => format!("EXIT {result}"),
            Self::Deliver { delivery } => format!("DELIVER to {}", delivery.target),
        }
    }

    /// Gets the gas charged for the instruction.
    #[must_use]
    pub fn gas(&self) -> u64 {
        match self {
            Self::ImplicitReturn => IMPLICIT_RET_GAS_PRICE,
            Self::ImplicitJumpRef => IMPLICIT_JMPREF_GAS_PRICE,
            _ => 0,
        }
    }

    /// Executes the instruction against `state`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if execution of the instruction interrupts the normal
    /// flow of the path.
    pub fn execute(&self, ctx: &mut StepContext, state: &mut VMState) -> Result<(), Interrupt> {
        match self {
            Self::LoopEntrance { continuation } => enter_loop(ctx, state, continuation),
            Self::Invoke { continuation } => invoke(ctx, state, continuation),
            Self::ImplicitReturn => control::ret(state),
            Self::ImplicitJumpRef => {
                let next = state
                    .cc
                    .remaining_cells()
                    .first()
                    .cloned()
                    .ok_or(Interrupt::throw(exit_code::INVALID_OPCODE))?;
                state.cc = next.to_slice();
                Ok(())
            }
            Self::EnterActionPhase { exit_code } => phase::enter_action_phase(ctx, state, *exit_code),
            Self::HandleOutMessage { index, exit_code } => {
                phase::handle_out_message(ctx, state, *index, *exit_code)
            }
            Self::EnterBouncePhase { exit_code } => phase::enter_bounce_phase(ctx, state, *exit_code),
            Self::Exit { result } => orchestrator::finish_hop(ctx, state, result.clone()),
            Self::Deliver { delivery } => entry::deliver(ctx, state, delivery),
        }
    }
}

/// Ends the compute phase on reaching a quit continuation.
fn invoke(ctx: &mut StepContext, state: &mut VMState, continuation: &Continuation) -> Result<(), Interrupt> {
    let code = match continuation {
        Continuation::Quit(code) => *code,
        Continuation::ExcQuit => {
            let code = state.pop_int()?;
            code.as_concrete()
                .and_then(|c| i32::try_from(c).ok())
                .ok_or_else(|| Interrupt::unsupported("exception quit with a symbolic exit code"))?
        }
        other => {
            return Err(execution::Error::inconsistent(format!(
                "invoked a {} continuation as a quit",
                other.kind()
            ))
            .into())
        }
    };
    phase::finish_compute(&ctx.env.config, state, code);
    Ok(())
}

/// Decides whether a loop runs another iteration, and transfers control to its
/// body or past it accordingly.
///
/// The loop is entered before the decision, so that a fork on the loop
/// condition counts towards its own iteration bound.
fn enter_loop(ctx: &mut StepContext, state: &mut VMState, continuation: &Rc<Continuation>) -> Result<(), Interrupt> {
    match continuation.as_ref() {
        Continuation::Repeat {
            count,
            body,
            after,
            loop_id,
        } => {
            state.loops.enter(*loop_id);
            let iterate = SymInt::from_i64(0).less_than(count);
            if ctx.decide(state, &iterate)? {
                state.registers.c0 = Rc::new(Continuation::Repeat {
                    count:   decrement(count),
                    body:    body.clone(),
                    after:   after.clone(),
                    loop_id: *loop_id,
                });
                control::jump(state, body.clone());
            } else {
                state.loops.exit(*loop_id);
                control::jump(state, after.clone());
            }
        }
        Continuation::Until {
            body,
            after,
            loop_id,
        } => {
            let done = state.pop_bool()?;
            state.loops.enter(*loop_id);
            if ctx.decide(state, &done)? {
                state.loops.exit(*loop_id);
                control::jump(state, after.clone());
            } else {
                state.registers.c0 = continuation.clone();
                control::jump(state, body.clone());
            }
        }
        Continuation::While {
            condition,
            body,
            after,
            checking: true,
            loop_id,
        } => {
            let proceed = state.pop_bool()?;
            state.loops.enter(*loop_id);
            if ctx.decide(state, &proceed)? {
                state.registers.c0 = Rc::new(Continuation::While {
                    condition: condition.clone(),
                    body:      body.clone(),
                    after:     after.clone(),
                    checking:  false,
                    loop_id:   *loop_id,
                });
                control::jump(state, body.clone());
            } else {
                state.loops.exit(*loop_id);
                control::jump(state, after.clone());
            }
        }
        Continuation::While {
            condition,
            body,
            after,
            checking: false,
            loop_id,
        } => {
            state.registers.c0 = Rc::new(Continuation::While {
                condition: condition.clone(),
                body:      body.clone(),
                after:     after.clone(),
                checking:  true,
                loop_id:   *loop_id,
            });
            control::jump(state, condition.clone());
        }
        Continuation::Again { body, loop_id } => {
            state.loops.enter(*loop_id);
            state.registers.c0 = continuation.clone();
            control::jump(state, body.clone());
        }
        other => {
            debug!(state = state.id, kind = other.kind(), "Loop entrance into a non-loop");
            control::jump(state, continuation.clone());
        }
    }
    Ok(())
}

fn decrement(count: &SymInt) -> SymInt {
    match count {
        SymInt::Concrete(n) => SymInt::Concrete(n - BigInt::from(1)),
        SymInt::Symbolic(bv) => SymInt::Symbolic(bv.bvsub(&BV::from_u64(1, INT_BITS))),
    }
}

#[cfg(test)]
mod test {
    use std::rc::Rc;

    use crate::{
        opcode::artificial::Artificial,
        vm::value::Continuation,
    };

    #[test]
    fn charges_only_implicit_transfers() {
        assert_eq!(Artificial::ImplicitReturn.gas(), 5);
        assert_eq!(Artificial::ImplicitJumpRef.gas(), 10);
        let invoke = Artificial::Invoke {
            continuation: Rc::new(Continuation::Quit(0)),
        };
        assert_eq!(invoke.gas(), 0);
        assert_eq!(invoke.name(), "INVOKE quit(0)");
    }
}
