//! Opcodes that affect the control flow of the VM: continuations, conditionals,
//! loops, method calls and exceptions.
//!
//! Loops are not executed by the instruction that starts them. Instead the
//! loop becomes a continuation of its own, and every entry into it goes through
//! an artificial loop-entrance instruction so that iterations are visible on
//! the trace and can be counted against the iteration bound.

use std::rc::Rc;

use tracing::trace;

use crate::{
    cell::{Cell, CellSlice},
    constant::{exit_code, EXCEPTION_GAS_PRICE},
    error::execution,
    opcode::{arithmetic::out_of_range, artificial::Artificial},
    solver::SymInt,
    vm::{
        phase,
        result::DeadReason,
        state::{stack::Stack, VMState},
        step::{Interrupt, StepContext},
        value::{Continuation, SaveList, Value},
        Config,
    },
};

/// Transfers control to `continuation`, replacing the current one.
pub fn jump(state: &mut VMState, continuation: Rc<Continuation>) {
    match continuation.as_ref() {
        Continuation::Ordinary {
            code,
            save,
            pops_frame,
            ..
        } => {
            state.registers.restore(save);
            if *pops_frame {
                state.calls.pop();
            }
            state.cc = code.clone();
        }
        Continuation::Quit(_) | Continuation::ExcQuit => {
            state.pending = Some(Artificial::Invoke { continuation });
        }
        Continuation::Repeat { .. }
        | Continuation::Until { .. }
        | Continuation::While { .. }
        | Continuation::Again { .. } => {
            state.pending = Some(Artificial::LoopEntrance { continuation });
        }
    }
}

/// Creates the continuation that resumes the current code, restoring the
/// current return continuation.
#[must_use]
pub fn return_here(state: &VMState, pops_frame: bool) -> Continuation {
    Continuation::Ordinary {
        code: state.cc.clone(),
        save: SaveList {
            c0: Some(state.registers.c0.clone()),
            ..SaveList::default()
        },
        pops_frame,
        stack: None,
    }
}

/// Calls `continuation`, arranging for it to return to the current code.
pub fn call(state: &mut VMState, continuation: Rc<Continuation>) {
    state.registers.c0 = Rc::new(return_here(state, false));
    jump(state, continuation);
}

/// Transfers control to `continuation` either as a call or as a jump.
fn transfer(state: &mut VMState, continuation: Rc<Continuation>, is_jump: bool) {
    if is_jump {
        jump(state, continuation);
    } else {
        call(state, continuation);
    }
}

/// Raises the VM exception `code` on `state`, transferring control to the
/// current exception handler.
///
/// Running out of gas cannot be caught and ends the compute phase at once.
pub fn raise(config: &Config, state: &mut VMState, code: i32) {
    trace!(state = state.id, code, "Exception raised");
    state.pending = None;
    if code == exit_code::OUT_OF_GAS {
        phase::finish_compute(config, state, code);
        return;
    }

    state.charge(EXCEPTION_GAS_PRICE);
    let handler = state.registers.c2.clone();
    if let Continuation::ExcQuit = handler.as_ref() {
        phase::finish_compute(config, state, code);
        return;
    }
    state.stack = match handler.as_ref() {
        Continuation::Ordinary {
            stack: Some(stack), ..
        } => stack.clone(),
        _ => Stack::new(),
    };
    state.push(SymInt::from_i64(0));
    state.push(SymInt::from_i64(i64::from(code)));
    jump(state, handler);
}

/// `PUSHCONT` and `PUSHREFCONT` push a continuation over `code`.
///
/// # Errors
///
/// Never fails.
pub fn push_cont(state: &mut VMState, code: CellSlice) -> Result<(), Interrupt> {
    state.push(Value::Continuation(Rc::new(Continuation::code(code))));
    Ok(())
}

/// `EXECUTE` calls the continuation on top of the stack.
///
/// # Errors
///
/// Throws if the top value is not a continuation.
pub fn execute(state: &mut VMState) -> Result<(), Interrupt> {
    let continuation = state.pop_cont()?;
    call(state, continuation);
    Ok(())
}

/// `JMPX` jumps to the continuation on top of the stack.
///
/// # Errors
///
/// Throws if the top value is not a continuation.
pub fn jmpx(state: &mut VMState) -> Result<(), Interrupt> {
    let continuation = state.pop_cont()?;
    jump(state, continuation);
    Ok(())
}

/// `RET` returns to `c0`.
///
/// # Errors
///
/// Never fails.
pub fn ret(state: &mut VMState) -> Result<(), Interrupt> {
    let target = std::mem::replace(
        &mut state.registers.c0,
        Rc::new(Continuation::Quit(exit_code::SUCCESS)),
    );
    jump(state, target);
    Ok(())
}

/// `RETALT` returns to `c1`.
///
/// # Errors
///
/// Never fails.
pub fn ret_alt(state: &mut VMState) -> Result<(), Interrupt> {
    let target = std::mem::replace(
        &mut state.registers.c1,
        Rc::new(Continuation::Quit(exit_code::ALTERNATIVE_SUCCESS)),
    );
    jump(state, target);
    Ok(())
}

/// Pops a condition and decides it, accounting for negation.
fn pop_condition(ctx: &mut StepContext, state: &mut VMState, negate: bool) -> Result<bool, Interrupt> {
    let flag = state.pop_bool()?;
    let condition = if negate { flag.not() } else { flag };
    ctx.decide(state, &condition)
}

/// `IFRET` and `IFNOTRET` return if the popped flag is set (or clear).
///
/// # Errors
///
/// Throws if the top value is not an integer.
pub fn if_ret(ctx: &mut StepContext, state: &mut VMState, negate: bool) -> Result<(), Interrupt> {
    if pop_condition(ctx, state, negate)? {
        ret(state)?;
    }
    Ok(())
}

/// `IF`, `IFNOT`, `IFJMP` and `IFNOTJMP` transfer control to a continuation
/// if the flag beneath it is set (or clear).
///
/// # Semantics
///
/// | Stack Index | Input | Output |
/// | :---------: | :---: | :----: |
/// | 0           | `c`   |        |
/// | 1           | `f`   |        |
///
/// # Errors
///
/// Throws on a type mismatch of either operand.
pub fn if_(ctx: &mut StepContext, state: &mut VMState, negate: bool, is_jump: bool) -> Result<(), Interrupt> {
    state.ensure_depth(2)?;
    let continuation = state.pop_cont()?;
    if pop_condition(ctx, state, negate)? {
        transfer(state, continuation, is_jump);
    }
    Ok(())
}

/// `IFELSE` calls one of two continuations depending on a flag.
///
/// # Semantics
///
/// | Stack Index | Input | Output |
/// | :---------: | :---: | :----: |
/// | 0           | `c'`  |        |
/// | 1           | `c`   |        |
/// | 2           | `f`   |        |
///
/// # Errors
///
/// Throws on a type mismatch of any operand.
pub fn if_else(ctx: &mut StepContext, state: &mut VMState) -> Result<(), Interrupt> {
    state.ensure_depth(3)?;
    let otherwise = state.pop_cont()?;
    let then = state.pop_cont()?;
    let target = if pop_condition(ctx, state, false)? {
        then
    } else {
        otherwise
    };
    call(state, target);
    Ok(())
}

/// `IFREF` and its relatives transfer control to the code in a reference of
/// the instruction.
///
/// # Errors
///
/// Throws if the top value is not an integer.
pub fn if_ref(ctx: &mut StepContext, state: &mut VMState, code: &Cell, negate: bool, is_jump: bool) -> Result<(), Interrupt> {
    if pop_condition(ctx, state, negate)? {
        transfer(state, Rc::new(Continuation::code(code.to_slice())), is_jump);
    }
    Ok(())
}

/// `REPEAT` executes a continuation `n` times.
///
/// # Semantics
///
/// | Stack Index | Input | Output |
/// | :---------: | :---: | :----: |
/// | 0           | `c`   |        |
/// | 1           | `n`   |        |
///
/// # Errors
///
/// Throws a range check error unless `n` fits 32 signed bits.
pub fn repeat(ctx: &mut StepContext, state: &mut VMState) -> Result<(), Interrupt> {
    state.ensure_depth(2)?;
    let body = state.pop_cont()?;
    let count = state.pop_int()?;
    ctx.check(state, &out_of_range(&count, 32, true), exit_code::RANGE_CHECK)?;

    let after = Rc::new(return_here(state, false));
    let loop_id = state.fresh_loop();
    jump(
        state,
        Rc::new(Continuation::Repeat {
            count,
            body,
            after,
            loop_id,
        }),
    );
    Ok(())
}

/// `UNTIL` executes a continuation until it leaves a set flag on the stack.
///
/// # Errors
///
/// Throws if the top value is not a continuation.
pub fn until(state: &mut VMState) -> Result<(), Interrupt> {
    let body = state.pop_cont()?;
    let after = Rc::new(return_here(state, false));
    let loop_id = state.fresh_loop();
    state.loops.enter(loop_id);
    state.registers.c0 = Rc::new(Continuation::Until {
        body: body.clone(),
        after,
        loop_id,
    });
    jump(state, body);
    Ok(())
}

/// `WHILE` alternates between a condition and a body for as long as the
/// condition leaves a set flag.
///
/// # Semantics
///
/// | Stack Index | Input | Output |
/// | :---------: | :---: | :----: |
/// | 0           | `c`   |        |
/// | 1           | `c'`  |        |
///
/// `c'` is the condition and `c` the body.
///
/// # Errors
///
/// Throws on a type mismatch of either operand.
pub fn while_(state: &mut VMState) -> Result<(), Interrupt> {
    state.ensure_depth(2)?;
    let body = state.pop_cont()?;
    let condition = state.pop_cont()?;
    let after = Rc::new(return_here(state, false));
    let loop_id = state.fresh_loop();
    state.registers.c0 = Rc::new(Continuation::While {
        condition: condition.clone(),
        body,
        after,
        checking: true,
        loop_id,
    });
    jump(state, condition);
    Ok(())
}

/// `AGAIN` executes a continuation forever, leaving only through an explicit
/// transfer of control out of it.
///
/// # Errors
///
/// Throws if the top value is not a continuation.
pub fn again(state: &mut VMState) -> Result<(), Interrupt> {
    let body = state.pop_cont()?;
    let loop_id = state.fresh_loop();
    jump(state, Rc::new(Continuation::Again { body, loop_id }));
    Ok(())
}

/// `CALLDICT n` calls method `n` of the executing contract.
///
/// # Errors
///
/// Throws if the method does not exist, and discards the path if the call
/// would exceed the recursion bound.
pub fn call_dict(ctx: &mut StepContext, state: &mut VMState, method: i32) -> Result<(), Interrupt> {
    if state.calls.occurrences(method) + 1 > ctx.env.config.max_recursion_depth {
        trace!(state = state.id, method, "Recursion bound reached");
        return Err(Interrupt::Dead(DeadReason::RecursionLimit));
    }
    let contract = ctx
        .env
        .contracts
        .get(&state.contract)
        .ok_or(execution::Error::MissingContract { id: state.contract })?;
    let code = contract
        .method(method)
        .cloned()
        .ok_or(Interrupt::throw(exit_code::UNKNOWN))?;

    state.registers.c0 = Rc::new(return_here(state, true));
    state.calls.push(method);
    jump(state, Rc::new(Continuation::code(code)));
    Ok(())
}

/// `THROWIF n` and `THROWIFNOT n` throw `n` if the popped flag is set (or
/// clear).
///
/// # Errors
///
/// Throws `n` on the paths where the condition holds.
pub fn throw_if(ctx: &mut StepContext, state: &mut VMState, code: i32, negate: bool) -> Result<(), Interrupt> {
    if pop_condition(ctx, state, negate)? {
        Err(Interrupt::throw(code))
    } else {
        Ok(())
    }
}

/// `TRY` calls a continuation with an exception handler installed.
///
/// # Semantics
///
/// | Stack Index | Input | Output |
/// | :---------: | :---: | :----: |
/// | 0           | `c'`  |        |
/// | 1           | `c`   |        |
///
/// `c` is the body and `c'` the handler, which receives the stack as it was
/// beneath the operands, followed by the exception argument and code.
///
/// # Errors
///
/// Throws on a type mismatch of either operand.
pub fn try_(state: &mut VMState) -> Result<(), Interrupt> {
    state.ensure_depth(2)?;
    let handler = state.pop_cont()?;
    let body = state.pop_cont()?;
    let Continuation::Ordinary { code, .. } = handler.as_ref() else {
        return Err(Interrupt::unsupported(format!("TRY with a {} handler", handler.kind())));
    };

    let old_c2 = state.registers.c2.clone();
    let mut resume = return_here(state, false);
    if let Continuation::Ordinary { save, .. } = &mut resume {
        save.c2 = Some(old_c2.clone());
    }
    let resume = Rc::new(resume);
    let handler = Continuation::Ordinary {
        code:       code.clone(),
        save:       SaveList {
            c0: Some(resume.clone()),
            c1: None,
            c2: Some(old_c2),
        },
        pops_frame: false,
        stack:      Some(state.stack.clone()),
    };

    state.registers.c0 = resume;
    state.registers.c2 = Rc::new(handler);
    jump(state, body);
    Ok(())
}

/// `PUSH c(i)` pushes the value of a control register.
///
/// # Errors
///
/// Reports registers that are not modelled as unsupported.
pub fn push_ctr(state: &mut VMState, index: u8) -> Result<(), Interrupt> {
    let value = match index {
        0..=2 => state
            .registers
            .continuation(index)
            .map(|c| Value::Continuation(c.clone()))
            .unwrap_or(Value::Null),
        4 => state.registers.c4.clone(),
        7 => state.registers.c7.clone(),
        _ => return Err(Interrupt::unsupported(format!("PUSH c{index}"))),
    };
    state.push(value);
    Ok(())
}

/// `POP c(i)` sets a control register from the stack.
///
/// Setting `c5` to an empty cell discards the actions registered so far, which
/// is how contracts reset their action list. Any other use of `c5` is
/// unsupported.
///
/// # Errors
///
/// Throws a type check error if the value does not suit the register.
pub fn pop_ctr(state: &mut VMState, index: u8) -> Result<(), Interrupt> {
    let value = state.pop()?;
    match (index, value) {
        (0..=2, Value::Continuation(c)) => {
            state.registers.set_continuation(index, c);
        }
        (4, value @ Value::Cell(_)) => state.registers.c4 = value,
        (7, value @ Value::Tuple(_)) => state.registers.c7 = value,
        (5, Value::Cell(reference)) => {
            let is_empty = reference
                .as_concrete()
                .and_then(|addr| state.heap.get(addr).ok())
                .and_then(|cell| cell.concrete())
                .is_some_and(|cell| cell.bit_len() == 0 && cell.refs().is_empty());
            if !is_empty {
                return Err(Interrupt::unsupported("POP c5 with a non-empty action list"));
            }
            state.actions.clear();
        }
        (0..=2 | 4 | 5 | 7, _) => return Err(Interrupt::throw(exit_code::TYPE_CHECK)),
        _ => return Err(Interrupt::unsupported(format!("POP c{index}"))),
    }
    Ok(())
}
