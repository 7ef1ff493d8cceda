//! Opcodes that perform arithmetic and comparisons on VM integers.
//!
//! Every result is checked against the 257-bit signed range of the VM. Concrete
//! operands are computed exactly and range-checked. Symbolic operands are
//! sign-extended into a wider bit-vector, the operation is carried out there,
//! and the path forks on whether the wide result fits back into 257 bits.

use num_bigint::BigInt;
use num_traits::{One, Signed, Zero};
use z3::ast::BV;

use crate::{
    constant::{exit_code, INT_BITS, MAX_CELL_BITS},
    solver::{SymBool, SymInt},
    utility::{fits_signed, fits_unsigned},
    vm::{
        state::VMState,
        step::{Interrupt, StepContext},
    },
};

/// The width in which products of two VM integers are computed.
const WIDE_BITS: u32 = 2 * INT_BITS + 1;

/// The width in which left shifts by a symbolic amount are computed.
#[allow(clippy::cast_possible_truncation)] // MAX_CELL_BITS is a small constant
const SHIFT_BITS: u32 = INT_BITS + MAX_CELL_BITS as u32 + 1;

/// The binary operations on two integers.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,

    /// Subtraction with its operands reversed.
    SubR,
    Mul,

    /// Left shift by a popped amount in `0..=1023`.
    Shl,

    /// Arithmetic right shift by a popped amount in `0..=1023`.
    Shr,
    And,
    Or,
    Xor,
    Min,
    Max,
}

impl BinaryOp {
    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Sub => "SUB",
            Self::SubR => "SUBR",
            Self::Mul => "MUL",
            Self::Shl => "LSHIFT",
            Self::Shr => "RSHIFT",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Xor => "XOR",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }
}

/// The unary operations on an integer.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum UnaryOp {
    Negate,
    Inc,
    Dec,
    Not,
    Sgn,
    Abs,
}

impl UnaryOp {
    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Negate => "NEGATE",
            Self::Inc => "INC",
            Self::Dec => "DEC",
            Self::Not => "NOT",
            Self::Sgn => "SGN",
            Self::Abs => "ABS",
        }
    }
}

/// The flavours of floor division.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DivisionKind {
    Div,
    Mod,
    DivMod,
}

impl DivisionKind {
    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Div => "DIV",
            Self::Mod => "MOD",
            Self::DivMod => "DIVMOD",
        }
    }
}

/// The integer comparisons.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Comparison {
    Less,
    Equal,
    Leq,
    Greater,
    Neq,
    Geq,

    /// Three-way comparison, producing `-1`, `0` or `1`.
    Cmp,
}

impl Comparison {
    #[must_use]
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Less => "LESS",
            Self::Equal => "EQUAL",
            Self::Leq => "LEQ",
            Self::Greater => "GREATER",
            Self::Neq => "NEQ",
            Self::Geq => "GEQ",
            Self::Cmp => "CMP",
        }
    }

    /// Gets the mnemonic of the form comparing against an immediate.
    #[must_use]
    pub fn int_mnemonic(self) -> &'static str {
        match self {
            Self::Equal => "EQINT",
            Self::Less => "LESSINT",
            Self::Greater => "GTINT",
            Self::Neq => "NEQINT",
            Self::Leq => "LEQINT",
            Self::Geq => "GEQINT",
            Self::Cmp => "CMPINT",
        }
    }

    fn apply(self, x: &SymInt, y: &SymInt) -> SymInt {
        let less = x.less_than(y);
        let equal = x.equals(y);
        let condition = match self {
            Self::Less => less,
            Self::Equal => equal,
            Self::Leq => less.or(&equal),
            Self::Greater => less.or(&equal).not(),
            Self::Neq => equal.not(),
            Self::Geq => less.not(),
            Self::Cmp => return three_way(&less, &equal),
        };
        condition.to_int()
    }
}

/// Builds `-1`, `0` or `1` from the outcome of a comparison.
fn three_way(less: &SymBool, equal: &SymBool) -> SymInt {
    match (less, equal) {
        (SymBool::Concrete(true), _) => SymInt::from_i64(-1),
        (SymBool::Concrete(false), SymBool::Concrete(equal)) => SymInt::from_i64(i64::from(!equal)),
        _ => {
            let one = BV::from_u64(1, INT_BITS);
            let zero = BV::from_u64(0, INT_BITS);
            let minus_one = zero.bvsub(&one);
            let rest = equal.to_bool().ite(&zero, &one);
            SymInt::Symbolic(less.to_bool().ite(&minus_one, &rest))
        }
    }
}

/// Checks a concrete result against the range of VM integers.
fn checked(value: BigInt) -> Result<SymInt, Interrupt> {
    if fits_signed(&value, INT_BITS) {
        Ok(SymInt::Concrete(value))
    } else {
        Err(Interrupt::throw(exit_code::INTEGER_OVERFLOW))
    }
}

/// Sign-extends `value` to `width` bits.
fn widen(value: &SymInt, width: u32) -> BV {
    value.to_bv().sign_ext(width - INT_BITS)
}

/// Truncates a wide result back to a VM integer, throwing an overflow on the
/// paths where it does not fit.
fn narrow(ctx: &mut StepContext, state: &mut VMState, wide: &BV) -> Result<SymInt, Interrupt> {
    let width = wide.get_size();
    let low = wide.extract(INT_BITS - 1, 0);
    let overflow = low.sign_ext(width - INT_BITS).eq(wide).not();
    ctx.check(state, &SymBool::Symbolic(overflow), exit_code::INTEGER_OVERFLOW)?;
    Ok(SymInt::Symbolic(low))
}

/// Floor division of concrete values, with the remainder taking the sign of
/// the divisor.
fn floor_div_rem(x: &BigInt, y: &BigInt) -> (BigInt, BigInt) {
    let mut q = x / y;
    let mut r = x % y;
    if !r.is_zero() && (r.is_negative() != y.is_negative()) {
        q -= BigInt::one();
        r += y;
    }
    (q, r)
}

/// `PUSHINT x` pushes a constant.
///
/// # Errors
///
/// Never fails.
pub fn push_int(state: &mut VMState, value: BigInt) -> Result<(), Interrupt> {
    state.push(SymInt::Concrete(value));
    Ok(())
}

/// Pushes `±2^n + delta`.
///
/// # Errors
///
/// Throws an integer overflow if the value is out of range.
pub fn push_pow2(state: &mut VMState, n: u16, delta: i64, negate: bool) -> Result<(), Interrupt> {
    let mut value = BigInt::one() << usize::from(n);
    if negate {
        value = -value;
    }
    state.push(checked(value + delta)?);
    Ok(())
}

fn apply_binary(
    ctx: &mut StepContext,
    state: &mut VMState,
    op: BinaryOp,
    x: &SymInt,
    y: &SymInt,
) -> Result<SymInt, Interrupt> {
    if let (Some(a), Some(b)) = (x.as_concrete(), y.as_concrete()) {
        return match op {
            BinaryOp::Add => checked(a + b),
            BinaryOp::Sub => checked(a - b),
            BinaryOp::SubR => checked(b - a),
            BinaryOp::Mul => checked(a * b),
            BinaryOp::Shl | BinaryOp::Shr => {
                let amount = usize::try_from(b)
                    .ok()
                    .filter(|n| *n <= MAX_CELL_BITS)
                    .ok_or(Interrupt::throw(exit_code::RANGE_CHECK))?;
                if op == BinaryOp::Shl {
                    checked(a << amount)
                } else {
                    checked(a >> amount)
                }
            }
            BinaryOp::And => checked(a & b),
            BinaryOp::Or => checked(a | b),
            BinaryOp::Xor => checked(a ^ b),
            BinaryOp::Min => checked(a.min(b).clone()),
            BinaryOp::Max => checked(a.max(b).clone()),
        };
    }

    let (a, b) = (x.to_bv(), y.to_bv());
    let result = match op {
        BinaryOp::Add => narrow(ctx, state, &widen(x, WIDE_BITS).bvadd(&widen(y, WIDE_BITS)))?,
        BinaryOp::Sub => narrow(ctx, state, &widen(x, WIDE_BITS).bvsub(&widen(y, WIDE_BITS)))?,
        BinaryOp::SubR => narrow(ctx, state, &widen(y, WIDE_BITS).bvsub(&widen(x, WIDE_BITS)))?,
        BinaryOp::Mul => narrow(ctx, state, &widen(x, WIDE_BITS).bvmul(&widen(y, WIDE_BITS)))?,
        BinaryOp::Shl | BinaryOp::Shr => {
            #[allow(clippy::cast_possible_truncation)] // MAX_CELL_BITS is a small constant
            let bound = SymInt::from_i64(MAX_CELL_BITS as i64);
            let out_of_range = y
                .less_than(&SymInt::from_i64(0))
                .or(&bound.less_than(y));
            ctx.check(state, &out_of_range, exit_code::RANGE_CHECK)?;
            let amount = widen(y, SHIFT_BITS);
            let value = widen(x, SHIFT_BITS);
            if op == BinaryOp::Shl {
                narrow(ctx, state, &value.bvshl(&amount))?
            } else {
                SymInt::Symbolic(value.bvashr(&amount).extract(INT_BITS - 1, 0))
            }
        }
        BinaryOp::And => SymInt::Symbolic(a.bvand(&b)),
        BinaryOp::Or => SymInt::Symbolic(a.bvor(&b)),
        BinaryOp::Xor => SymInt::Symbolic(a.bvxor(&b)),
        BinaryOp::Min => SymInt::Symbolic(a.bvslt(&b).ite(&a, &b)),
        BinaryOp::Max => SymInt::Symbolic(a.bvslt(&b).ite(&b, &a)),
    };
    Ok(result)
}

/// Executes a binary operation.
///
/// # Semantics
///
/// | Stack Index | Input | Output     |
/// | :---------: | :---: | :--------: |
/// | 0           | `y`   | `x op y`   |
/// | 1           | `x`   |            |
///
/// # Errors
///
/// Throws an integer overflow if the result is out of range, and a range
/// check error for shifts by more than 1023 bits.
pub fn binary(ctx: &mut StepContext, state: &mut VMState, op: BinaryOp) -> Result<(), Interrupt> {
    state.ensure_depth(2)?;
    let y = state.pop_int()?;
    let x = state.pop_int()?;
    let result = apply_binary(ctx, state, op, &x, &y)?;
    state.push(result);
    Ok(())
}

/// Executes a binary operation with an immediate right operand, as in
/// `ADDCONST` and `MULCONST`.
///
/// # Errors
///
/// Throws an integer overflow if the result is out of range.
pub fn with_const(ctx: &mut StepContext, state: &mut VMState, op: BinaryOp, value: i8) -> Result<(), Interrupt> {
    let x = state.pop_int()?;
    let result = apply_binary(ctx, state, op, &x, &SymInt::from_i64(i64::from(value)))?;
    state.push(result);
    Ok(())
}

/// Executes a unary operation.
///
/// # Errors
///
/// Throws an integer overflow if the result is out of range.
pub fn unary(ctx: &mut StepContext, state: &mut VMState, op: UnaryOp) -> Result<(), Interrupt> {
    let x = state.pop_int()?;
    let result = if let Some(a) = x.as_concrete() {
        match op {
            UnaryOp::Negate => checked(-a)?,
            UnaryOp::Inc => checked(a + 1)?,
            UnaryOp::Dec => checked(a - 1)?,
            UnaryOp::Not => checked(!a)?,
            UnaryOp::Sgn => SymInt::Concrete(a.signum()),
            UnaryOp::Abs => checked(a.abs())?,
        }
    } else {
        let a = x.to_bv();
        let zero = BV::from_u64(0, INT_BITS);
        let one = BV::from_u64(1, WIDE_BITS);
        match op {
            UnaryOp::Negate => narrow(ctx, state, &widen(&x, WIDE_BITS).bvneg())?,
            UnaryOp::Inc => narrow(ctx, state, &widen(&x, WIDE_BITS).bvadd(&one))?,
            UnaryOp::Dec => narrow(ctx, state, &widen(&x, WIDE_BITS).bvsub(&one))?,
            UnaryOp::Not => SymInt::Symbolic(a.bvnot()),
            UnaryOp::Sgn => {
                let less = SymBool::Symbolic(a.bvslt(&zero));
                let equal = SymBool::Symbolic(a.eq(&zero));
                three_way(&less, &equal)
            }
            UnaryOp::Abs => {
                let wide = widen(&x, WIDE_BITS);
                let negative = a.bvslt(&zero);
                narrow(ctx, state, &negative.ite(&wide.bvneg(), &wide))?
            }
        }
    };
    state.push(result);
    Ok(())
}

/// Executes floor division.
///
/// # Semantics
///
/// | Stack Index | Input | Output (`DIVMOD`) |
/// | :---------: | :---: | :---------------: |
/// | 0           | `y`   | `x mod y`         |
/// | 1           | `x`   | `floor(x / y)`    |
///
/// `DIV` and `MOD` push only the quotient and remainder respectively.
///
/// # Errors
///
/// Throws an integer overflow on division by zero or an out-of-range
/// quotient.
pub fn divide(ctx: &mut StepContext, state: &mut VMState, kind: DivisionKind) -> Result<(), Interrupt> {
    state.ensure_depth(2)?;
    let y = state.pop_int()?;
    let x = state.pop_int()?;
    ctx.check(state, &y.is_zero(), exit_code::INTEGER_OVERFLOW)?;

    let (quotient, remainder) = if let (Some(a), Some(b)) = (x.as_concrete(), y.as_concrete()) {
        let (q, r) = floor_div_rem(a, b);
        (checked(q)?, SymInt::Concrete(r))
    } else {
        let width = INT_BITS + 1;
        let (a, b) = (widen(&x, width), widen(&y, width));
        let r = a.bvsmod(&b);
        let q = a.bvsub(&r).bvsdiv(&b);
        (
            narrow(ctx, state, &q)?,
            SymInt::Symbolic(r.extract(INT_BITS - 1, 0)),
        )
    };
    match kind {
        DivisionKind::Div => state.push(quotient),
        DivisionKind::Mod => state.push(remainder),
        DivisionKind::DivMod => {
            state.push(quotient);
            state.push(remainder);
        }
    }
    Ok(())
}

/// Shifts by an immediate amount, as in `LSHIFT n` and `RSHIFT n`.
///
/// # Errors
///
/// Throws an integer overflow if a left shift goes out of range.
pub fn shift_const(ctx: &mut StepContext, state: &mut VMState, bits: u16, left: bool) -> Result<(), Interrupt> {
    let x = state.pop_int()?;
    let op = if left { BinaryOp::Shl } else { BinaryOp::Shr };
    let result = apply_binary(ctx, state, op, &x, &SymInt::from_i64(i64::from(bits)))?;
    state.push(result);
    Ok(())
}

/// Gets the condition under which `x` does not fit into `width` bits.
#[must_use]
pub fn out_of_range(x: &SymInt, width: u32, signed: bool) -> SymBool {
    match x.as_concrete() {
        Some(a) if signed => SymBool::Concrete(!fits_signed(a, width)),
        Some(a) => SymBool::Concrete(!fits_unsigned(a, width)),
        None if signed && width >= INT_BITS => SymBool::Concrete(false),
        None if width == 0 => x.is_zero().not(),
        None if signed => {
            let v = x.to_bv();
            SymBool::Symbolic(v.extract(width - 1, 0).sign_ext(INT_BITS - width).eq(&v).not())
        }
        None => {
            let v = x.to_bv();
            let negative = v.bvslt(&BV::from_u64(0, INT_BITS));
            if width >= INT_BITS - 1 {
                SymBool::Symbolic(negative)
            } else {
                let high = v.extract(INT_BITS - 1, width);
                let zero = BV::from_u64(0, INT_BITS - width);
                SymBool::Symbolic(high.eq(&zero).not())
            }
        }
    }
}

/// `FITS n` and `UFITS n` check that the top integer fits `n` bits, leaving
/// it on the stack.
///
/// # Errors
///
/// Throws an integer overflow if the value does not fit.
pub fn fits(ctx: &mut StepContext, state: &mut VMState, bits: u16, signed: bool) -> Result<(), Interrupt> {
    let x = state.pop_int()?;
    ctx.check(state, &out_of_range(&x, u32::from(bits), signed), exit_code::INTEGER_OVERFLOW)?;
    state.push(x);
    Ok(())
}

/// Compares two integers.
///
/// # Semantics
///
/// | Stack Index | Input | Output    |
/// | :---------: | :---: | :-------: |
/// | 0           | `y`   | `x cmp y` |
/// | 1           | `x`   |           |
///
/// # Errors
///
/// Throws if either operand is missing or not an integer.
pub fn compare(_ctx: &mut StepContext, state: &mut VMState, cmp: Comparison) -> Result<(), Interrupt> {
    state.ensure_depth(2)?;
    let y = state.pop_int()?;
    let x = state.pop_int()?;
    state.push(cmp.apply(&x, &y));
    Ok(())
}

/// Compares the top integer with an immediate.
///
/// # Errors
///
/// Throws if the operand is missing or not an integer.
pub fn compare_int(_ctx: &mut StepContext, state: &mut VMState, cmp: Comparison, value: i8) -> Result<(), Interrupt> {
    let x = state.pop_int()?;
    state.push(cmp.apply(&x, &SymInt::from_i64(i64::from(value))));
    Ok(())
}

#[cfg(test)]
mod test {
    use num_bigint::BigInt;

    use crate::{
        opcode::arithmetic::{floor_div_rem, three_way, Comparison},
        solver::{SymBool, SymInt},
    };

    #[test]
    fn division_floors_towards_negative_infinity() {
        let (q, r) = floor_div_rem(&BigInt::from(-7), &BigInt::from(2));
        assert_eq!((q, r), (BigInt::from(-4), BigInt::from(1)));

        let (q, r) = floor_div_rem(&BigInt::from(7), &BigInt::from(-2));
        assert_eq!((q, r), (BigInt::from(-4), BigInt::from(-1)));
    }

    #[test]
    fn comparisons_produce_vm_booleans() {
        let (three, four) = (SymInt::from_i64(3), SymInt::from_i64(4));
        assert_eq!(
            Comparison::Geq.apply(&three, &four).as_concrete(),
            Some(&BigInt::from(0))
        );
        assert_eq!(
            Comparison::Leq.apply(&three, &four).as_concrete(),
            Some(&BigInt::from(-1))
        );
        assert_eq!(
            Comparison::Cmp.apply(&four, &three).as_concrete(),
            Some(&BigInt::from(1))
        );
        assert_eq!(
            three_way(&SymBool::Concrete(false), &SymBool::Concrete(true)).as_concrete(),
            Some(&BigInt::from(0))
        );
    }
}
