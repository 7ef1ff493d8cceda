//! The control registers of the VM.

use std::rc::Rc;

use crate::{
    constant::exit_code,
    vm::value::{Continuation, SaveList, Value},
};

/// The control registers that the interpreter models.
///
/// `c3` (the method dictionary) is not modelled as a value, as calls go
/// through the contract's parsed method table instead, and `c5` (the output
/// actions) lives in the action list of the state.
#[derive(Clone, Debug)]
pub struct Registers {
    /// The return continuation.
    pub c0: Rc<Continuation>,

    /// The alternative return continuation.
    pub c1: Rc<Continuation>,

    /// The exception handler.
    pub c2: Rc<Continuation>,

    /// The persistent data of the contract.
    pub c4: Value,

    /// The context tuple.
    pub c7: Value,
}

impl Registers {
    /// Creates the registers as they are on entry to a method.
    #[must_use]
    pub fn new(c4: Value, c7: Value) -> Self {
        Self {
            c0: Rc::new(Continuation::Quit(exit_code::SUCCESS)),
            c1: Rc::new(Continuation::Quit(exit_code::ALTERNATIVE_SUCCESS)),
            c2: Rc::new(Continuation::ExcQuit),
            c4,
            c7,
        }
    }

    /// Restores the continuations in `save` into their registers.
    pub fn restore(&mut self, save: &SaveList) {
        if let Some(c0) = &save.c0 {
            self.c0 = c0.clone();
        }
        if let Some(c1) = &save.c1 {
            self.c1 = c1.clone();
        }
        if let Some(c2) = &save.c2 {
            self.c2 = c2.clone();
        }
    }

    /// Gets the continuation register `index`, if it is one.
    #[must_use]
    pub fn continuation(&self, index: u8) -> Option<&Rc<Continuation>> {
        match index {
            0 => Some(&self.c0),
            1 => Some(&self.c1),
            2 => Some(&self.c2),
            _ => None,
        }
    }

    /// Sets the continuation register `index`, returning whether it is one.
    pub fn set_continuation(&mut self, index: u8, continuation: Rc<Continuation>) -> bool {
        match index {
            0 => self.c0 = continuation,
            1 => self.c1 = continuation,
            2 => self.c2 = continuation,
            _ => return false,
        }
        true
    }
}
