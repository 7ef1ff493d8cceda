//! Opcodes that shuffle the stack, along with the null and tuple primitives.

use crate::{
    constant::{exit_code, TUPLE_ENTRY_GAS_PRICE},
    solver::{SymBool, SymInt},
    vm::{state::VMState, step::Interrupt, value::Value},
};

/// Gets the value at `depth`, after [`VMState::ensure_depth`] has made sure it
/// exists.
fn at(state: &VMState, depth: usize) -> Result<Value, Interrupt> {
    state
        .stack
        .get(depth)
        .cloned()
        .ok_or(Interrupt::throw(exit_code::STACK_UNDERFLOW))
}

/// `XCHG s(i),s(j)` exchanges two stack slots.
///
/// # Errors
///
/// Throws a stack underflow if the deeper slot does not exist.
pub fn xchg(state: &mut VMState, i: u8, j: u8) -> Result<(), Interrupt> {
    let (i, j) = (usize::from(i), usize::from(j));
    state.ensure_depth(i.max(j) + 1)?;
    state.stack.swap(i, j);
    Ok(())
}

/// `PUSH s(i)` pushes a copy of `s(i)`.
///
/// # Semantics
///
/// | Stack Index | Input  | Output |
/// | :---------: | :----: | :----: |
/// | 0           |        | `s(i)` |
///
/// # Errors
///
/// Throws a stack underflow if `s(i)` does not exist.
pub fn push(state: &mut VMState, i: u8) -> Result<(), Interrupt> {
    let i = usize::from(i);
    state.ensure_depth(i + 1)?;
    let value = at(state, i)?;
    state.push(value);
    Ok(())
}

/// `POP s(i)` pops the top of the stack into `s(i)`.
///
/// # Errors
///
/// Throws a stack underflow if `s(i)` does not exist.
pub fn pop(state: &mut VMState, i: u8) -> Result<(), Interrupt> {
    let i = usize::from(i);
    state.ensure_depth(i + 1)?;
    state.stack.swap(0, i);
    state.pop()?;
    Ok(())
}

/// `ROT` moves `s2` to the top.
///
/// # Semantics
///
/// | Stack Index | Input | Output |
/// | :---------: | :---: | :----: |
/// | 0           | `c`   | `a`    |
/// | 1           | `b`   | `c`    |
/// | 2           | `a`   | `b`    |
///
/// # Errors
///
/// Throws a stack underflow on fewer than three values.
pub fn rot(state: &mut VMState) -> Result<(), Interrupt> {
    state.ensure_depth(3)?;
    let value = state
        .stack
        .remove(2)
        .ok_or(Interrupt::throw(exit_code::STACK_UNDERFLOW))?;
    state.push(value);
    Ok(())
}

/// `-ROT` moves the top to `s2`, undoing [`rot`].
///
/// # Errors
///
/// Throws a stack underflow on fewer than three values.
pub fn rot_rev(state: &mut VMState) -> Result<(), Interrupt> {
    state.ensure_depth(3)?;
    let value = state.pop()?;
    state.stack.insert(2, value);
    Ok(())
}

/// `2SWAP` exchanges the top two pairs.
///
/// # Errors
///
/// Throws a stack underflow on fewer than four values.
pub fn swap2(state: &mut VMState) -> Result<(), Interrupt> {
    state.ensure_depth(4)?;
    state.stack.swap(1, 3);
    state.stack.swap(0, 2);
    Ok(())
}

/// # Errors
///
/// Throws a stack underflow on fewer than two values.
pub fn drop2(state: &mut VMState) -> Result<(), Interrupt> {
    state.ensure_depth(2)?;
    state.pop()?;
    state.pop()?;
    Ok(())
}

/// `2DUP` duplicates the top pair.
///
/// # Errors
///
/// Throws a stack underflow on fewer than two values.
pub fn dup2(state: &mut VMState) -> Result<(), Interrupt> {
    state.ensure_depth(2)?;
    let (b, a) = (at(state, 0)?, at(state, 1)?);
    state.push(a);
    state.push(b);
    Ok(())
}

/// `2OVER` copies the second pair to the top.
///
/// # Errors
///
/// Throws a stack underflow on fewer than four values.
pub fn over2(state: &mut VMState) -> Result<(), Interrupt> {
    state.ensure_depth(4)?;
    let (b, a) = (at(state, 2)?, at(state, 3)?);
    state.push(a);
    state.push(b);
    Ok(())
}

/// `PICK` pops `n` and pushes a copy of `s(n)`.
///
/// # Errors
///
/// Throws if `n` is out of range or `s(n)` does not exist.
pub fn pick(state: &mut VMState) -> Result<(), Interrupt> {
    let n = state.pop_small(255, "PICK")? as usize;
    state.ensure_depth(n + 1)?;
    let value = at(state, n)?;
    state.push(value);
    Ok(())
}

/// `ROLLX` pops `n` and moves `s(n)` to the top. `-ROLLX` moves the top down
/// to `s(n)` instead.
///
/// # Errors
///
/// Throws if `n` is out of range or `s(n)` does not exist.
pub fn roll(state: &mut VMState, reverse: bool) -> Result<(), Interrupt> {
    let mnemonic = if reverse { "-ROLLX" } else { "ROLLX" };
    let n = state.pop_small(255, mnemonic)? as usize;
    state.ensure_depth(n + 1)?;
    if reverse {
        let value = state.pop()?;
        state.stack.insert(n, value);
    } else {
        let value = state
            .stack
            .remove(n)
            .ok_or(Interrupt::throw(exit_code::STACK_UNDERFLOW))?;
        state.push(value);
    }
    Ok(())
}

/// `DEPTH` pushes the number of values on the stack.
///
/// On a lazy stack this is the number of values materialised so far.
///
/// # Errors
///
/// Never fails.
pub fn depth(state: &mut VMState) -> Result<(), Interrupt> {
    let depth = i64::try_from(state.stack.len()).unwrap_or(i64::MAX);
    state.push(SymInt::from_i64(depth));
    Ok(())
}

/// # Errors
///
/// Never fails.
pub fn push_null(state: &mut VMState) -> Result<(), Interrupt> {
    state.push(Value::Null);
    Ok(())
}

/// `ISNULL` replaces the top value with whether it is null.
///
/// # Errors
///
/// Throws a stack underflow on an empty stack.
pub fn is_null(state: &mut VMState) -> Result<(), Interrupt> {
    let value = state.pop()?;
    state.push_bool(&SymBool::Concrete(matches!(value, Value::Null)));
    Ok(())
}

/// `TUPLE n` packs the top `n` values into a tuple, `s0` becoming its last
/// entry.
///
/// # Errors
///
/// Throws a stack underflow on fewer than `n` values.
pub fn tuple(state: &mut VMState, n: u8) -> Result<(), Interrupt> {
    let n = usize::from(n);
    state.ensure_depth(n)?;
    let mut items = im::Vector::new();
    for _ in 0..n {
        items.push_front(state.pop()?);
    }
    state.charge(TUPLE_ENTRY_GAS_PRICE * n as u64);
    state.push(Value::Tuple(items));
    Ok(())
}

/// `INDEX k` replaces a tuple with its entry `k`.
///
/// # Errors
///
/// Throws a type check error for a non-tuple and a range check error for an
/// entry past its end.
pub fn index(state: &mut VMState, k: u8) -> Result<(), Interrupt> {
    let items = state.pop_tuple()?;
    let item = items
        .get(usize::from(k))
        .cloned()
        .ok_or(Interrupt::throw(exit_code::RANGE_CHECK))?;
    state.push(item);
    Ok(())
}

/// `UNTUPLE n` unpacks a tuple of exactly `n` entries.
///
/// # Errors
///
/// Throws a type check error unless the top value is a tuple of length `n`.
pub fn untuple(state: &mut VMState, n: u8) -> Result<(), Interrupt> {
    let items = state.pop_tuple()?;
    if items.len() != usize::from(n) {
        return Err(Interrupt::throw(exit_code::TYPE_CHECK));
    }
    state.charge(TUPLE_ENTRY_GAS_PRICE * u64::from(n));
    for item in items {
        state.push(item);
    }
    Ok(())
}

/// `SETINDEX k` replaces entry `k` of a tuple.
///
/// # Semantics
///
/// | Stack Index | Input | Output |
/// | :---------: | :---: | :----: |
/// | 0           | `x`   | `t'`   |
/// | 1           | `t`   |        |
///
/// # Errors
///
/// Throws a type check error for a non-tuple and a range check error for an
/// entry past its end.
pub fn set_index(state: &mut VMState, k: u8) -> Result<(), Interrupt> {
    let value = state.pop()?;
    let mut items = state.pop_tuple()?;
    let k = usize::from(k);
    if k >= items.len() {
        return Err(Interrupt::throw(exit_code::RANGE_CHECK));
    }
    items.set(k, value);
    state.charge(TUPLE_ENTRY_GAS_PRICE * items.len() as u64);
    state.push(Value::Tuple(items));
    Ok(())
}

#[cfg(test)]
mod test {
    use num_bigint::BigInt;

    use crate::{
        cell::Cell,
        opcode::stack,
        solver::SymInt,
        vm::{
            state::{registers::Registers, VMState},
            value::Value,
        },
    };

    fn state_with(values: &[i64]) -> VMState {
        let mut state = VMState::new(
            0,
            0,
            Cell::empty().to_slice(),
            Registers::new(Value::Null, Value::Null),
            1000,
        );
        for value in values {
            state.push(SymInt::from_i64(*value));
        }
        state
    }

    fn ints(state: &VMState) -> Vec<BigInt> {
        state
            .stack
            .iter()
            .filter_map(|v| match v {
                Value::Int(i) => i.as_concrete().cloned(),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn rotations_are_inverse() -> anyhow::Result<()> {
        let mut state = state_with(&[1, 2, 3]);
        stack::rot(&mut state).map_err(|e| anyhow::anyhow!("{e:?}"))?;
        assert_eq!(ints(&state), vec![2.into(), 3.into(), 1.into()]);
        stack::rot_rev(&mut state).map_err(|e| anyhow::anyhow!("{e:?}"))?;
        assert_eq!(ints(&state), vec![1.into(), 2.into(), 3.into()]);
        Ok(())
    }

    #[test]
    fn pop_stores_into_the_slot() -> anyhow::Result<()> {
        let mut state = state_with(&[1, 2, 3]);
        stack::pop(&mut state, 2).map_err(|e| anyhow::anyhow!("{e:?}"))?;
        assert_eq!(ints(&state), vec![3.into(), 2.into()]);
        Ok(())
    }

    #[test]
    fn tuples_pack_in_stack_order() -> anyhow::Result<()> {
        let mut state = state_with(&[1, 2, 3]);
        stack::tuple(&mut state, 3).map_err(|e| anyhow::anyhow!("{e:?}"))?;
        stack::index(&mut state, 2).map_err(|e| anyhow::anyhow!("{e:?}"))?;
        assert_eq!(ints(&state), vec![3.into()]);
        assert_eq!(state.gas_used, 3);
        Ok(())
    }
}
