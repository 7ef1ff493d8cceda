//! Opcodes that interact with the blockchain outside the contract: gas
//! management, the context tuple, and sending messages.

use num_bigint::Sign;
use tracing::trace;

use crate::{
    constant::exit_code,
    vm::{
        phase::OutAction,
        state::VMState,
        step::{Interrupt, StepContext},
        value::Value,
    },
};

/// `SETGASLIMIT` sets the gas limit of the compute phase.
///
/// The new limit never exceeds the limit the analysis was configured with.
///
/// # Errors
///
/// Throws out of gas if the new limit is already exhausted, and reports a
/// symbolic limit as unsupported.
pub fn set_gas_limit(ctx: &mut StepContext, state: &mut VMState) -> Result<(), Interrupt> {
    let limit = state.pop_int()?;
    let limit = limit
        .as_concrete()
        .ok_or_else(|| Interrupt::unsupported("SETGASLIMIT with a symbolic limit"))?;
    let limit = match limit.sign() {
        Sign::Minus => 0,
        _ => u64::try_from(limit).unwrap_or(u64::MAX),
    };
    let limit = limit.min(ctx.env.config.gas_limit);
    if limit < state.gas_used {
        return Err(Interrupt::throw(exit_code::OUT_OF_GAS));
    }
    trace!(state = state.id, limit, "Gas limit set");
    state.gas_limit = limit;
    Ok(())
}

/// `GETPARAM i` pushes entry `i` of the context tuple, the first entry of
/// `c7`.
///
/// # Errors
///
/// Throws a type check error if `c7` is not shaped like a context, and a
/// range check error if the entry does not exist.
pub fn get_param(state: &mut VMState, index: u8) -> Result<(), Interrupt> {
    let Value::Tuple(outer) = &state.registers.c7 else {
        return Err(Interrupt::throw(exit_code::TYPE_CHECK));
    };
    let Some(Value::Tuple(params)) = outer.get(0) else {
        return Err(Interrupt::throw(exit_code::TYPE_CHECK));
    };
    let value = params
        .get(usize::from(index))
        .cloned()
        .ok_or(Interrupt::throw(exit_code::RANGE_CHECK))?;
    state.push(value);
    Ok(())
}

/// `SENDRAWMSG` registers an action sending the message in a cell.
///
/// # Semantics
///
/// | Stack Index | Input | Output |
/// | :---------: | :---: | :----: |
/// | 0           | `x`   |        |
/// | 1           | `c`   |        |
///
/// `x` is the send mode and `c` the message. The message is only parsed in the
/// action phase.
///
/// # Errors
///
/// Throws on a type mismatch of either operand.
pub fn send_raw_msg(state: &mut VMState) -> Result<(), Interrupt> {
    state.ensure_depth(2)?;
    let mode = state.pop_int()?;
    let message = state.pop_cell()?;
    state.actions.push_back(OutAction { message, mode });
    trace!(state = state.id, count = state.actions.len(), "Registered an out action");
    Ok(())
}

#[cfg(test)]
mod test {
    use crate::{
        cell::Cell,
        opcode::message,
        solver::SymInt,
        vm::{
            state::{heap::SymRef, registers::Registers, VMState},
            value::Value,
        },
    };

    #[test]
    fn reads_parameters_from_the_context() -> anyhow::Result<()> {
        let params = im::vector![Value::Null, Value::Int(SymInt::from_i64(42))];
        let c7 = Value::Tuple(im::vector![Value::Tuple(params)]);
        let mut state = VMState::new(0, 0, Cell::empty().to_slice(), Registers::new(Value::Null, c7), 100);

        message::get_param(&mut state, 1).map_err(|e| anyhow::anyhow!("{e:?}"))?;
        let value = state.pop_int().map_err(|e| anyhow::anyhow!("{e:?}"))?;
        assert_eq!(value.as_concrete(), Some(&42.into()));
        assert!(message::get_param(&mut state, 5).is_err());
        Ok(())
    }

    #[test]
    fn registers_actions_in_order() -> anyhow::Result<()> {
        let mut state = VMState::new(0, 0, Cell::empty().to_slice(), Registers::new(Value::Null, Value::Null), 100);
        let cell = state.heap.allocate_concrete(&Cell::empty());
        for mode in [0, 64] {
            state.push(Value::Cell(SymRef::Concrete(cell)));
            state.push(SymInt::from_i64(mode));
            message::send_raw_msg(&mut state).map_err(|e| anyhow::anyhow!("{e:?}"))?;
        }
        let modes: Vec<_> = state.actions.iter().filter_map(|a| a.mode.as_concrete().cloned()).collect();
        assert_eq!(modes, vec![0.into(), 64.into()]);
        Ok(())
    }
}
