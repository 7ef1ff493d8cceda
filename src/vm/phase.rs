//! This module contains the phase machine of a transaction.
//!
//! A contract execution runs its compute phase first. On success a receiver
//! continues with the action phase, which parses every message the contract
//! asked to send. On failure a receiver handling a bounceable message
//! continues with the bounce phase, which sends the message back. Every path
//! ends with an exit. Each transition is an artificial instruction carrying
//! the outcome of the phase before it, so the phase history is visible on the
//! trace.

use bitvec::{order::Msb0, vec::BitVec};
use serde::Serialize;
use tracing::debug;

use crate::{
    cell::CellBuilder,
    constant::{
        exit_code,
        BOUNCED_MESSAGE_OP,
        MAX_OUT_ACTIONS,
        MESSAGE_OP_BITS,
        RECV_EXTERNAL_METHOD_ID,
        RECV_INTERNAL_METHOD_ID,
    },
    error::execution,
    opcode::{
        artificial::Artificial,
        cell::{seal, take_address, take_coins, take_int, take_ref},
    },
    orchestrator::{self, Delivery},
    solver::{SymBool, SymInt},
    vm::{
        result::{ContractId, TerminalResult},
        state::{
            heap::{CellAddr, CellBits, SymLen, SymRef},
            VMState,
        },
        step::{Interrupt, StepContext},
        value::{SymSlice, Value},
        Config,
    },
};

/// The number of bits of the original body carried by a bounced message.
const BOUNCED_BODY_BITS: u16 = 256;

/// The phases of a transaction.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Compute,
    Action,
    Bounce,
    Exit,
}

/// An action registered by `SENDRAWMSG`.
#[derive(Clone, Debug)]
pub struct OutAction {
    pub message: SymRef,
    pub mode:    SymInt,
}

/// A message sent by a contract, as parsed from its out actions.
#[derive(Clone, Debug)]
pub struct OutMessage {
    pub sender:  ContractId,
    pub cell:    CellAddr,
    pub bounce:  SymBool,
    pub bounced: SymBool,
    pub value:   SymInt,

    /// The first 32 bits of the body, or zero for a shorter body.
    pub op:   SymInt,
    pub body: SymSlice,
}

/// The message handled by a receiver.
#[derive(Clone, Debug)]
pub struct IncomingMessage {
    /// The contract that sent the message, if it came from one taking part in
    /// the analysis.
    pub sender:  Option<ContractId>,
    pub bounce:  SymBool,
    pub bounced: SymBool,
    pub value:   SymInt,
    pub body:    SymSlice,

    /// Whether the bounce phase sent the message back to its sender.
    pub returned: bool,
}

/// Ends the compute phase of `state` with `code`, scheduling the phase that
/// follows.
pub fn finish_compute(config: &Config, state: &mut VMState, code: i32) {
    let success = matches!(code, exit_code::SUCCESS | exit_code::ALTERNATIVE_SUCCESS);
    let is_receiver = matches!(state.method, RECV_INTERNAL_METHOD_ID | RECV_EXTERNAL_METHOD_ID);
    let may_bounce = state.method == RECV_INTERNAL_METHOD_ID
        && state.incoming.is_some()
        && (config.analyze_bounced_messages || !state.hops.is_empty());

    debug!(state = state.id, code, "Compute phase finished");
    let next = match (success, is_receiver) {
        (true, true) => Artificial::EnterActionPhase { exit_code: code },
        (true, false) => Artificial::Exit {
            result: TerminalResult::Success { exit_code: code },
        },
        (false, _) if may_bounce => Artificial::EnterBouncePhase { exit_code: code },
        (false, _) => Artificial::Exit {
            result: TerminalResult::Failure { exit_code: code },
        },
    };
    state.pending = Some(next);
}

/// Starts the action phase, committing the persistent data and scheduling the
/// parsing of the registered actions.
///
/// # Errors
///
/// Never fails, as the outcome of the phase is recorded on the exit it
/// schedules.
pub fn enter_action_phase(ctx: &mut StepContext, state: &mut VMState, exit_code: i32) -> Result<(), Interrupt> {
    state.phase = Phase::Action;
    if let c4 @ Value::Cell(_) = &state.registers.c4 {
        state.storage.insert(state.contract, c4.clone());
    }

    let handles_messages = ctx.env.config.analyze_out_messages || ctx.env.scheme.is_some();
    state.pending = Some(if state.actions.len() > MAX_OUT_ACTIONS {
        debug!(state = state.id, count = state.actions.len(), "Too many out actions");
        Artificial::Exit {
            result: TerminalResult::ActionFailure {
                exit_code: exit_code::TOO_MANY_ACTIONS,
            },
        }
    } else if handles_messages && !state.actions.is_empty() {
        Artificial::HandleOutMessage {
            index: 0,
            exit_code,
        }
    } else {
        Artificial::Exit {
            result: TerminalResult::Success { exit_code },
        }
    });
    Ok(())
}

/// Parses the out action at `index` and routes the message it sends.
///
/// A message that cannot be parsed fails the action phase rather than the
/// path.
///
/// # Errors
///
/// Returns [`Err`] if routing forks into an infeasible state or the action
/// does not exist.
pub fn handle_out_message(
    ctx: &mut StepContext,
    state: &mut VMState,
    index: usize,
    exit_code: i32,
) -> Result<(), Interrupt> {
    let action = state
        .actions
        .get(index)
        .cloned()
        .ok_or_else(|| execution::Error::inconsistent(format!("no out action {index}")))?;

    match parse_out_message(ctx, state, &action) {
        Ok(Some(message)) => {
            state.out_messages.push_back(message.clone());
            orchestrator::route(ctx, state, &message)?;
        }
        Ok(None) => debug!(state = state.id, index, "Skipped an external out message"),
        Err(Interrupt::Throw { code }) => {
            debug!(state = state.id, index, code, "Out message could not be parsed");
            state.pending = Some(Artificial::Exit {
                result: TerminalResult::ActionFailure {
                    exit_code: exit_code::UNSUPPORTED_ACTION,
                },
            });
            return Ok(());
        }
        Err(other) => return Err(other),
    }

    state.pending = Some(if index + 1 < state.actions.len() {
        Artificial::HandleOutMessage {
            index: index + 1,
            exit_code,
        }
    } else {
        Artificial::Exit {
            result: TerminalResult::Success { exit_code },
        }
    });
    Ok(())
}

/// Parses the message cell of `action`, or returns [`None`] for an outbound
/// external message.
///
/// ```text
/// int_msg_info$0 ihr_disabled:Bool bounce:Bool bounced:Bool
///   src:MsgAddress dest:MsgAddress value:CurrencyCollection
///   ihr_fee:Coins fwd_fee:Coins created_lt:uint64 created_at:uint32
/// message$_ info:CommonMsgInfo init:(Maybe (Either StateInit ^StateInit))
///   body:(Either X ^X)
/// ```
fn parse_out_message(
    ctx: &mut StepContext,
    state: &mut VMState,
    action: &OutAction,
) -> Result<Option<OutMessage>, Interrupt> {
    let cell = ctx.resolve(state, &action.message)?;
    let mut slice = SymSlice::new(cell);
    let external = take_flag(ctx, state, &mut slice)?;
    if ctx.decide(state, &external)? {
        return Ok(None);
    }
    let _ihr_disabled = take_flag(ctx, state, &mut slice)?;
    let bounce = take_flag(ctx, state, &mut slice)?;
    let bounced = take_flag(ctx, state, &mut slice)?;
    take_address(ctx, state, &mut slice)?;
    take_address(ctx, state, &mut slice)?;
    let value = take_coins(ctx, state, &mut slice)?;
    let has_extra = take_flag(ctx, state, &mut slice)?;
    if ctx.decide(state, &has_extra)? {
        take_ref(ctx, state, &mut slice)?;
    }
    take_coins(ctx, state, &mut slice)?;
    take_coins(ctx, state, &mut slice)?;
    take_int(ctx, state, &mut slice, 64, false)?;
    take_int(ctx, state, &mut slice, 32, false)?;

    let has_init = take_flag(ctx, state, &mut slice)?;
    if ctx.decide(state, &has_init)? {
        let init_in_ref = take_flag(ctx, state, &mut slice)?;
        if !ctx.decide(state, &init_in_ref)? {
            return Err(Interrupt::throw(exit_code::UNSUPPORTED_ACTION));
        }
        take_ref(ctx, state, &mut slice)?;
    }

    let body_in_ref = take_flag(ctx, state, &mut slice)?;
    let body = if ctx.decide(state, &body_in_ref)? {
        let reference = take_ref(ctx, state, &mut slice)?;
        SymSlice::new(ctx.resolve(state, &reference)?)
    } else {
        slice
    };
    let op = read_op(ctx, state, &body)?;

    Ok(Some(OutMessage {
        sender: state.contract,
        cell,
        bounce,
        bounced,
        value,
        op,
        body,
    }))
}

fn take_flag(ctx: &mut StepContext, state: &mut VMState, slice: &mut SymSlice) -> Result<SymBool, Interrupt> {
    Ok(take_int(ctx, state, slice, 1, false)?.is_zero().not())
}

/// Reads the op of a message body without consuming it.
fn read_op(ctx: &mut StepContext, state: &mut VMState, body: &SymSlice) -> Result<SymInt, Interrupt> {
    ctx.fixate(state, body.cell)?;
    let len = state.heap.get(body.cell)?.bits.len();
    #[allow(clippy::cast_possible_truncation)] // The op is 32 bits wide
    let width = MESSAGE_OP_BITS as u16;
    let has_op = body.data_pos.add(&SymLen::from(width)).le(&len);
    if ctx.decide(state, &has_op)? {
        let mut probe = body.clone();
        take_int(ctx, state, &mut probe, width, false)
    } else {
        Ok(SymInt::from_i64(0))
    }
}

/// Starts the bounce phase, sending the incoming message back to its sender
/// if it asked for that.
///
/// # Errors
///
/// Returns [`Err`] if the bounced message cannot be built.
pub fn enter_bounce_phase(ctx: &mut StepContext, state: &mut VMState, exit_code: i32) -> Result<(), Interrupt> {
    state.phase = Phase::Bounce;
    let failure = Artificial::Exit {
        result: TerminalResult::Failure { exit_code },
    };
    let Some(incoming) = state.incoming.clone() else {
        state.pending = Some(failure);
        return Ok(());
    };
    let bounceable = incoming.bounce.and(&incoming.bounced.not());
    if !ctx.decide(state, &bounceable)? {
        state.pending = Some(failure);
        return Ok(());
    }

    let body = bounced_body(ctx, state, &incoming.body)?;
    let body = seal(state, body, Vec::new())?;
    let header = CellBits::Concrete(bounced_header()?);
    let cell = seal(state, header, vec![SymRef::Concrete(body)])?;
    let message = OutMessage {
        sender: state.contract,
        cell,
        bounce: SymBool::Concrete(false),
        bounced: SymBool::Concrete(true),
        value: SymInt::from_i64(0),
        op: SymInt::from_i64(i64::from(BOUNCED_MESSAGE_OP)),
        body: SymSlice::new(body),
    };
    debug!(state = state.id, exit_code, sender = ?incoming.sender, "Bounced the incoming message");

    state.out_messages.push_back(message.clone());
    if let Some(sender) = incoming.sender {
        state.deliveries.push_back(Delivery {
            target: sender,
            message,
        });
        if let Some(incoming) = &mut state.incoming {
            incoming.returned = true;
        }
    }
    state.pending = Some(failure);
    Ok(())
}

/// Builds the body of a bounced message: a set op followed by the start of
/// the original body.
fn bounced_body(ctx: &mut StepContext, state: &mut VMState, original: &SymSlice) -> Result<CellBits, Interrupt> {
    ctx.fixate(state, original.cell)?;
    let bits = state.heap.get(original.cell)?.bits.clone();
    let remaining = bits.len().sub(&original.data_pos);
    let width = match remaining.as_concrete() {
        Some(n) => SymLen::Concrete(n.min(BOUNCED_BODY_BITS)),
        None => {
            let limit = SymLen::from(BOUNCED_BODY_BITS);
            let short = remaining.le(&limit).to_bool();
            SymLen::Symbolic(short.ite(&remaining.to_bv(), &limit.to_bv()))
        }
    };
    #[allow(clippy::cast_possible_truncation)] // The op is 32 bits wide
    let op = CellBits::from_int(
        &SymInt::from_i64(i64::from(BOUNCED_MESSAGE_OP)),
        MESSAGE_OP_BITS as u16,
    );
    Ok(op.append(&bits.window(&original.data_pos, &width)))
}

/// Builds the header of a bounced message, which carries no value and keeps
/// its body in a reference.
fn bounced_header() -> Result<BitVec<u8, Msb0>, Interrupt> {
    let mut builder = CellBuilder::new();
    builder
        // int_msg_info$0 ihr_disabled bounce bounced
        .store_uint(0b0101, 4)?
        // src and dest as addr_none
        .store_uint(0, 4)?
        .store_coins(&0.into())?
        .store_bit(false)?
        .store_coins(&0.into())?
        .store_coins(&0.into())?
        .store_uint(0, 64)?
        .store_uint(0, 32)?
        // no init, body in a reference
        .store_bit(false)?
        .store_bit(true)?;
    Ok(builder.data().to_bitvec())
}

#[cfg(test)]
mod test {
    use crate::{
        cell::Cell,
        constant::{exit_code, RECV_INTERNAL_METHOD_ID},
        opcode::artificial::Artificial,
        solver::{SymBool, SymInt},
        vm::{
            phase::{bounced_header, finish_compute, IncomingMessage},
            result::TerminalResult,
            state::{registers::Registers, VMState},
            value::{SymSlice, Value},
            Config,
        },
    };

    fn receiver() -> VMState {
        VMState::new(
            0,
            RECV_INTERNAL_METHOD_ID,
            Cell::empty().to_slice(),
            Registers::new(Value::Null, Value::Null),
            1000,
        )
    }

    #[test]
    fn successful_receivers_enter_the_action_phase() {
        let mut state = receiver();
        finish_compute(&Config::default(), &mut state, exit_code::SUCCESS);
        assert!(matches!(state.pending, Some(Artificial::EnterActionPhase { exit_code: 0 })));
    }

    #[test]
    fn failures_bounce_only_when_enabled() {
        let mut state = receiver();
        let body = state.heap.allocate_concrete(&Cell::empty());
        state.incoming = Some(IncomingMessage {
            sender:  None,
            bounce:  SymBool::Concrete(true),
            bounced: SymBool::Concrete(false),
            value:   SymInt::from_i64(0),
            body:    SymSlice::new(body),
            returned: false,
        });

        finish_compute(&Config::default(), &mut state, 100);
        assert!(matches!(
            &state.pending,
            Some(Artificial::Exit {
                result: TerminalResult::Failure { exit_code: 100 }
            })
        ));

        let config = Config::default().with_analyze_bounced_messages(true);
        finish_compute(&config, &mut state, 100);
        assert!(matches!(state.pending, Some(Artificial::EnterBouncePhase { exit_code: 100 })));
    }

    #[test]
    fn bounced_headers_set_only_the_bounced_flag() -> anyhow::Result<()> {
        let header = bounced_header().map_err(|e| anyhow::anyhow!("{e:?}"))?;
        let flags: Vec<bool> = header.iter().by_vals().take(4).collect();
        assert_eq!(flags, vec![false, true, false, true]);
        Ok(())
    }
}
