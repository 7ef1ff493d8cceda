//! This module contains errors pertaining to the symbolic execution of the
//! contract code.
//!
//! Failures of a single execution path (VM exceptions, structural mismatches,
//! unsupported instructions) are not errors in this sense. They are recorded as
//! the terminal result of that path. The errors here abort the whole run.

use thiserror::Error;

use crate::error::{cell, container};

/// Engine-fatal errors that occur while exploring the contract with the
/// [`crate::vm::VM`].
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("A VM state was requested but none are available")]
    NoSuchState,

    #[error("Tried to step a state that has already terminated")]
    InvalidStep,

    #[error("The constraint solver failed: {reason}")]
    SolverFailure { reason: String },

    #[error("The contract has no method with id {id}")]
    MissingMethod { id: i32 },

    #[error("No contract with id {id} is known")]
    MissingContract { id: u32 },

    #[error("No cell exists at heap address {address}")]
    NoSuchCell { address: u32 },

    #[error("No schema definition named {name:?} was transformed")]
    UnknownLabel { name: String },

    #[error("Cell {address} has length {length} beyond its recorded upper bound of {bound}")]
    UpperBoundViolated {
        address: u32,
        length:  usize,
        bound:   u16,
    },

    #[error("The execution state is inconsistent: {reason}")]
    Inconsistent { reason: String },

    #[error(transparent)]
    Cell(#[from] cell::Error),
}

impl Error {
    /// Constructs an inconsistency error with the provided `reason`.
    pub fn inconsistent(reason: impl Into<String>) -> Self {
        Self::Inconsistent {
            reason: reason.into(),
        }
    }
}

/// An execution error with an associated location in the code.
pub type LocatedError = container::Located<Error>;

/// A container of execution errors used for aggregation of errors during
/// execution.
pub type Errors = container::Errors<LocatedError>;

/// The result type for methods that may have execution errors.
pub type Result<T> = std::result::Result<T, LocatedError>;

/// Make it possible to attach locations to these errors.
impl container::Locatable for Error {
    type Located = LocatedError;

    fn locate(self, location: Option<crate::disassembly::Location>) -> Self::Located {
        container::Located {
            location,
            payload: self,
        }
    }
}

/// Unlocated execution errors convert directly into located ones.
impl From<Error> for LocatedError {
    fn from(value: Error) -> Self {
        container::Located::unlocated(value)
    }
}

impl From<cell::Error> for LocatedError {
    fn from(value: cell::Error) -> Self {
        container::Located::unlocated(Error::from(value))
    }
}
