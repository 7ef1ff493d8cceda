//! Symbolic integers and booleans that stay concrete for as long as possible.
//!
//! Concrete values are kept as big integers and only lowered into solver terms
//! when they meet a symbolic operand, so that fully concrete execution never
//! touches the solver.

use std::fmt::{Display, Formatter};

use num_bigint::BigInt;
use z3::ast::{Bool, BV};

use crate::{constant::INT_BITS, utility::bigint_to_bv};

/// A VM integer: a signed 257-bit value.
#[derive(Clone, Debug)]
pub enum SymInt {
    Concrete(BigInt),
    Symbolic(BV),
}

impl SymInt {
    /// Creates a fresh unconstrained integer called `name`.
    #[must_use]
    pub fn fresh(name: &str) -> Self {
        Self::Symbolic(BV::new_const(name, INT_BITS))
    }

    #[must_use]
    pub fn from_i64(value: i64) -> Self {
        Self::Concrete(BigInt::from(value))
    }

    /// Gets the concrete value, if the integer is concrete.
    #[must_use]
    pub fn as_concrete(&self) -> Option<&BigInt> {
        match self {
            Self::Concrete(value) => Some(value),
            Self::Symbolic(_) => None,
        }
    }

    /// Gets the integer as a 257-bit solver term.
    #[must_use]
    pub fn to_bv(&self) -> BV {
        match self {
            Self::Concrete(value) => bigint_to_bv(value, INT_BITS),
            Self::Symbolic(bv) => bv.clone(),
        }
    }

    /// Compares the integer with `other` for equality.
    #[must_use]
    pub fn equals(&self, other: &SymInt) -> SymBool {
        match (self, other) {
            (Self::Concrete(l), Self::Concrete(r)) => SymBool::Concrete(l == r),
            _ => SymBool::Symbolic(self.to_bv().eq(&other.to_bv())),
        }
    }

    /// Compares the integer with `other` as signed values.
    #[must_use]
    pub fn less_than(&self, other: &SymInt) -> SymBool {
        match (self, other) {
            (Self::Concrete(l), Self::Concrete(r)) => SymBool::Concrete(l < r),
            _ => SymBool::Symbolic(self.to_bv().bvslt(&other.to_bv())),
        }
    }

    /// Checks whether the integer is zero.
    #[must_use]
    pub fn is_zero(&self) -> SymBool {
        self.equals(&SymInt::from_i64(0))
    }
}

impl Display for SymInt {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Concrete(value) => write!(f, "{value}"),
            Self::Symbolic(bv) => write!(f, "{bv}"),
        }
    }
}

/// A boolean condition.
#[derive(Clone, Debug)]
pub enum SymBool {
    Concrete(bool),
    Symbolic(Bool),
}

impl SymBool {
    /// Gets the condition as a solver term.
    #[must_use]
    pub fn to_bool(&self) -> Bool {
        match self {
            Self::Concrete(value) => Bool::from_bool(*value),
            Self::Symbolic(b) => b.clone(),
        }
    }

    #[must_use]
    pub fn as_concrete(&self) -> Option<bool> {
        match self {
            Self::Concrete(value) => Some(*value),
            Self::Symbolic(_) => None,
        }
    }

    #[must_use]
    pub fn not(&self) -> Self {
        match self {
            Self::Concrete(value) => Self::Concrete(!value),
            Self::Symbolic(b) => Self::Symbolic(b.not()),
        }
    }

    #[must_use]
    pub fn and(&self, other: &SymBool) -> Self {
        match (self, other) {
            (Self::Concrete(false), _) | (_, Self::Concrete(false)) => Self::Concrete(false),
            (Self::Concrete(true), x) | (x, Self::Concrete(true)) => x.clone(),
            (Self::Symbolic(l), Self::Symbolic(r)) => Self::Symbolic(l.clone() & r.clone()),
        }
    }

    #[must_use]
    pub fn or(&self, other: &SymBool) -> Self {
        match (self, other) {
            (Self::Concrete(true), _) | (_, Self::Concrete(true)) => Self::Concrete(true),
            (Self::Concrete(false), x) | (x, Self::Concrete(false)) => x.clone(),
            (Self::Symbolic(l), Self::Symbolic(r)) => Self::Symbolic(l.clone() | r.clone()),
        }
    }

    /// Converts the condition into the VM's integer representation of
    /// booleans, `-1` for true and `0` for false.
    #[must_use]
    pub fn to_int(&self) -> SymInt {
        match self {
            Self::Concrete(value) => SymInt::from_i64(if *value { -1 } else { 0 }),
            Self::Symbolic(b) => {
                let minus_one = bigint_to_bv(&BigInt::from(-1), INT_BITS);
                let zero = BV::from_u64(0, INT_BITS);
                SymInt::Symbolic(b.ite(&minus_one, &zero))
            }
        }
    }
}

impl From<bool> for SymBool {
    fn from(value: bool) -> Self {
        Self::Concrete(value)
    }
}

impl From<Bool> for SymBool {
    fn from(value: Bool) -> Self {
        Self::Symbolic(value)
    }
}

#[cfg(test)]
mod test {
    use num_bigint::BigInt;

    use crate::solver::value::{SymBool, SymInt};

    #[test]
    fn concrete_operations_stay_concrete() {
        let three = SymInt::from_i64(3);
        let four = SymInt::from_i64(4);

        assert_eq!(three.less_than(&four).as_concrete(), Some(true));
        assert_eq!(three.equals(&four).as_concrete(), Some(false));
        assert_eq!(
            SymBool::Concrete(true).to_int().as_concrete(),
            Some(&BigInt::from(-1))
        );
    }

    #[test]
    fn mixing_in_a_symbolic_operand_lowers_to_the_solver() {
        let x = SymInt::fresh("x");
        let cond = x.equals(&SymInt::from_i64(1));

        assert!(cond.as_concrete().is_none());
        assert!(cond.and(&SymBool::Concrete(false)).as_concrete() == Some(false));
    }
}
