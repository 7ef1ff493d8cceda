//! This module contains errors pertaining to the transformation of schema
//! documents into labels.

use thiserror::Error;

/// Errors that occur while transforming a schema document into labels.
///
/// All of these indicate malformed schema input and abort the analysis.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("The definition {name:?} does not exist in the schema")]
    UnknownDefinition { name: String },

    #[error("The definition {name:?} expects {expected} type arguments but got {actual}")]
    ArityMismatch {
        name:     String,
        expected: usize,
        actual:   usize,
    },

    #[error("The type parameter {name:?} is not bound")]
    UnboundParameter { name: String },

    #[error("The parameter {name:?} is used as a {expected} but is bound to something else")]
    ParameterKindMismatch { name: String, expected: &'static str },

    #[error("The constructor tag {tag:?} is malformed")]
    MalformedTag { tag: String },

    #[error("The constructors of {name:?} have overlapping tags")]
    AmbiguousConstructors { name: String },

    #[error("The definition {name:?} has no constructors")]
    NoConstructors { name: String },

    #[error("Width {width} is invalid for {kind}")]
    InvalidWidth { kind: &'static str, width: u16 },

    #[error("The schema document could not be parsed: {reason}")]
    Malformed { reason: String },
}

/// The result type for methods that may have schema errors.
pub type Result<T> = std::result::Result<T, Error>;
