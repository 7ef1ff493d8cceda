//! This module contains the values that live on the VM stack and in its
//! control registers.

use std::rc::Rc;

use crate::{
    cell::CellSlice,
    solver::SymInt,
    vm::{
        data::LoopId,
        state::{
            heap::{CellAddr, CellBits, SymLen, SymRef},
            stack::Stack,
        },
    },
};

/// A value of the VM, any part of which may be symbolic.
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Int(SymInt),
    Cell(SymRef),
    Slice(SymSlice),
    Builder(SymBuilder),
    Continuation(Rc<Continuation>),
    Tuple(im::Vector<Value>),
}

impl Value {
    /// Gets the name of the kind of the value, as used in diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Int(_) => "integer",
            Self::Cell(_) => "cell",
            Self::Slice(_) => "slice",
            Self::Builder(_) => "builder",
            Self::Continuation(_) => "continuation",
            Self::Tuple(_) => "tuple",
        }
    }
}

impl From<SymInt> for Value {
    fn from(value: SymInt) -> Self {
        Self::Int(value)
    }
}

/// A read cursor over a cell on the heap.
///
/// The window of a symbolic slice always extends to the end of its cell.
/// Operations that produce a prefix of a slice seal that prefix into a cell of
/// its own.
#[derive(Clone, Debug)]
pub struct SymSlice {
    pub cell:     CellAddr,
    pub data_pos: SymLen,
    pub ref_pos:  u8,
}

impl SymSlice {
    /// Creates a slice over the whole of the cell at `cell`.
    #[must_use]
    pub fn new(cell: CellAddr) -> Self {
        Self {
            cell,
            data_pos: SymLen::zero(),
            ref_pos: 0,
        }
    }
}

/// A builder under construction.
#[derive(Clone, Debug)]
pub struct SymBuilder {
    pub bits: CellBits,
    pub refs: im::Vector<SymRef>,

    /// A concrete bound on the length of `bits`, which lets stores that
    /// certainly fit skip the overflow query.
    pub upper_bound: u16,
}

impl SymBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            bits:        CellBits::empty(),
            refs:        im::Vector::new(),
            upper_bound: 0,
        }
    }
}

impl Default for SymBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The continuations saved alongside a continuation, restored into the
/// control registers when it is jumped to.
#[derive(Clone, Debug, Default)]
pub struct SaveList {
    pub c0: Option<Rc<Continuation>>,
    pub c1: Option<Rc<Continuation>>,
    pub c2: Option<Rc<Continuation>>,
}

/// A continuation: the VM's notion of "what to execute next".
#[derive(Clone, Debug)]
pub enum Continuation {
    /// Code to be executed.
    Ordinary {
        code: CellSlice,
        save: SaveList,

        /// Whether jumping here returns from a method call, popping the call
        /// stack.
        pops_frame: bool,

        /// The stack to restore when the continuation is invoked as an
        /// exception handler, as captured by `TRY`.
        stack: Option<Stack>,
    },

    /// Ends the compute phase with the given exit code.
    Quit(i32),

    /// Ends the compute phase with the code of an unhandled exception.
    ExcQuit,

    /// A `REPEAT` loop with `count` iterations left.
    Repeat {
        count:   SymInt,
        body:    Rc<Continuation>,
        after:   Rc<Continuation>,
        loop_id: LoopId,
    },

    /// An `UNTIL` loop, checking the flag left by the body on each entry.
    Until {
        body:    Rc<Continuation>,
        after:   Rc<Continuation>,
        loop_id: LoopId,
    },

    /// A `WHILE` loop, alternating between the condition and the body.
    While {
        condition: Rc<Continuation>,
        body:      Rc<Continuation>,
        after:     Rc<Continuation>,

        /// Whether the flag left by the condition is to be checked on entry.
        checking: bool,
        loop_id:  LoopId,
    },

    /// An `AGAIN` loop, which only ever ends by a jump out of its body.
    Again {
        body:    Rc<Continuation>,
        loop_id: LoopId,
    },
}

impl Continuation {
    /// Creates an ordinary continuation over `code` with nothing saved.
    #[must_use]
    pub fn code(code: CellSlice) -> Self {
        Self::Ordinary {
            code,
            save: SaveList::default(),
            pops_frame: false,
            stack: None,
        }
    }

    /// Checks whether entering the continuation is a loop iteration.
    #[must_use]
    pub fn is_loop(&self) -> bool {
        matches!(
            self,
            Self::Repeat { .. } | Self::Until { .. } | Self::While { .. } | Self::Again { .. }
        )
    }

    /// Gets a short name for the kind of the continuation.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ordinary { .. } => "ordinary",
            Self::Quit(_) => "quit",
            Self::ExcQuit => "exc-quit",
            Self::Repeat { .. } => "repeat",
            Self::Until { .. } => "until",
            Self::While { .. } => "while",
            Self::Again { .. } => "again",
        }
    }
}
