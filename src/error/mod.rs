//! This module contains the primary error type for the analyzer's interface.
//! It also re-exports the more specific error types that are
//! subsystem-specific.

pub mod cell;
pub mod container;
pub mod execution;
pub mod schema;

use thiserror::Error;

use crate::disassembly::Location;

/// The interface result type for the library.
///
/// # Usage
///
/// Any function considered to be part of the public interface of the library
/// should return this result type. Subsystems should return the more-specific
/// child error types as appropriate.
pub type Result<T> = std::result::Result<T, Errors>;

/// The interface error type for the library.
///
/// All errors returned from the library interface (and hence encountered by the
/// clients of the library) should be members of this enum.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    /// Errors from the concrete cell model and the container format.
    #[error(transparent)]
    Cell(#[from] cell::Error),

    /// Errors from transforming the schema document.
    #[error(transparent)]
    Schema(#[from] schema::Error),

    /// Errors from the Virtual Machine subsystem of the library.
    #[error(transparent)]
    Execution(#[from] execution::Error),

    /// The communication scheme of a multi-contract analysis is malformed.
    #[error("The communication scheme could not be parsed: {reason}")]
    MalformedScheme { reason: String },

    /// An unknown error, represented as a string.
    #[error("Unknown Error: {_0:?}")]
    Other(String),
}

impl Error {
    /// Constructs an unknown error with the provided `message`.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

/// Make it possible to attach locations to these errors.
impl container::Locatable for Error {
    type Located = LocatedError;

    fn locate(self, location: Option<Location>) -> Self::Located {
        container::Located {
            location,
            payload: self,
        }
    }
}

/// A library error with an associated code location.
pub type LocatedError = container::Located<Error>;

/// A container of errors that may occur in the analyzer.
pub type Errors = container::Errors<LocatedError>;

/// Allow simple conversions from located execution errors by re-wrapping the
/// located error around the more general payload.
impl From<execution::LocatedError> for LocatedError {
    fn from(value: execution::LocatedError) -> Self {
        Self {
            location: value.location,
            payload:  Error::from(value.payload),
        }
    }
}

/// Allow simple conversions from located execution errors by re-wrapping the
/// located error around the more general payload in the Errors container.
impl From<execution::LocatedError> for Errors {
    fn from(value: execution::LocatedError) -> Self {
        let re_wrapped: LocatedError = value.into();
        re_wrapped.into()
    }
}

/// Allow conversion from the execution errors container to the general errors
/// container.
impl From<execution::Errors> for Errors {
    fn from(value: execution::Errors) -> Self {
        let errs: Vec<execution::LocatedError> = value.into();
        let new_errs: Vec<LocatedError> = errs.into_iter().map(std::convert::Into::into).collect();

        new_errs.into()
    }
}

/// Schema errors never carry a code location.
impl From<schema::Error> for Errors {
    fn from(value: schema::Error) -> Self {
        LocatedError::unlocated(Error::from(value)).into()
    }
}

/// Container format errors never carry a code location.
impl From<cell::Error> for Errors {
    fn from(value: cell::Error) -> Self {
        LocatedError::unlocated(Error::from(value)).into()
    }
}

impl From<execution::Error> for Errors {
    fn from(value: execution::Error) -> Self {
        LocatedError::unlocated(Error::from(value)).into()
    }
}
