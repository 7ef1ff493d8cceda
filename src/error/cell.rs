//! This module contains errors pertaining to concrete cells, slices and
//! builders, as well as to the bag-of-cells container format.

use thiserror::Error;

/// Errors raised by the concrete cell model and its serialized form.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("Writing {requested} bits would exceed the cell capacity with {available} remaining")]
    DataOverflow { requested: usize, available: usize },

    #[error("A cell cannot hold more than {limit} references")]
    RefOverflow { limit: usize },

    #[error("Reading {requested} bits from a slice with only {available} remaining")]
    DataUnderflow { requested: usize, available: usize },

    #[error("Reading a reference from a slice with none remaining")]
    RefUnderflow,

    #[error("Integers of width {width} are not supported here")]
    InvalidWidth { width: usize },

    #[error("The value {value} does not fit into {width} bits")]
    ValueOutOfRange { value: String, width: usize },

    #[error("Expected the container magic b5ee9c72 but found {found:08x}")]
    InvalidMagic { found: u32 },

    #[error("The container ended after {available} bytes but {needed} were needed")]
    Truncated { needed: usize, available: usize },

    #[error("The container declares an invalid size of {size} bytes for {field}")]
    InvalidSize { field: &'static str, size: usize },

    #[error("Cell {cell} refers to cell {reference}, which does not come after it")]
    InvalidRefIndex { cell: usize, reference: usize },

    #[error("The root index {index} is out of bounds for {cells} cells")]
    InvalidRootIndex { index: usize, cells: usize },

    #[error("Cell {cell} has an invalid descriptor pair {d1:02x}{d2:02x}")]
    InvalidDescriptor { cell: usize, d1: u8, d2: u8 },

    #[error("Exotic cells are not supported")]
    UnsupportedExoticCell,

    #[error("The container checksum {found:08x} does not match the computed {expected:08x}")]
    ChecksumMismatch { expected: u32, found: u32 },

    #[error("The container has {count} unexpected trailing bytes")]
    TrailingBytes { count: usize },

    #[error("The cell data is missing its completion tag")]
    MissingCompletionTag,

    #[error("The dictionary is malformed: {reason}")]
    InvalidDictionary { reason: String },
}

/// The result type for methods that may have cell errors.
pub type Result<T> = std::result::Result<T, Error>;
