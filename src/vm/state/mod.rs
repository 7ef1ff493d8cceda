//! The state representation for the symbolic virtual machine, and utilities for
//! dealing with said representation.
//!
//! A [`VMState`] is one execution path. Forking a path clones its state, which
//! is cheap as every growing part of it is a persistent structure sharing its
//! contents with the original.

pub mod heap;
pub mod registers;
pub mod stack;

use std::rc::Rc;

use tracing::trace;
use z3::ast::Bool;

use crate::{
    cell::CellSlice,
    constant::exit_code,
    inference::FieldManager,
    opcode::artificial::Artificial,
    orchestrator::{Delivery, Hop},
    solver::{PathConstraints, SymBool, SymInt},
    vm::{
        data::{CallStack, LoopId, LoopTracker},
        phase::{IncomingMessage, OutAction, OutMessage, Phase},
        result::{ContractId, TerminalResult, TraceEntry},
        state::{
            heap::{CellAddr, Heap, SymRef},
            registers::Registers,
            stack::Stack,
        },
        step::Interrupt,
        value::{Continuation, SymBuilder, SymSlice, Value},
    },
};

/// The identifier of a state, assigned in order of creation.
pub type StateId = u64;

/// An input of a path: a value supplied from outside the contract, whose
/// concrete form is what a generated test has to provide.
#[derive(Clone, Debug)]
pub struct Input {
    pub name:  String,
    pub value: Value,
}

/// The state of one execution path.
#[derive(Clone, Debug)]
pub struct VMState {
    /// The identifier of the state, unique within an exploration.
    pub id: StateId,

    /// The contract whose code is executing.
    pub contract: ContractId,

    /// The method of that contract that was entered.
    pub method: i32,

    /// The phase of the transaction being executed.
    pub phase: Phase,

    pub stack:     Stack,
    pub registers: Registers,

    /// The code of the current continuation, positioned at the next
    /// instruction.
    pub cc: CellSlice,

    /// An artificial instruction to execute before the next real one.
    pub pending: Option<Artificial>,

    pub gas_used:  u64,
    pub gas_limit: u64,

    pub heap:   Heap,
    pub fields: FieldManager,
    pub path:   PathConstraints,
    pub loops:  LoopTracker,
    pub calls:  CallStack,

    /// Whether popping past the bottom of the stack creates fresh inputs, as
    /// it does for get-methods whose arguments are not known in advance.
    pub lazy_stack: bool,

    /// The values supplied from outside, in order of creation.
    pub inputs: im::Vector<Input>,

    /// The actions registered by the compute phase of the current hop.
    pub actions: im::Vector<OutAction>,

    /// Every message sent along the path.
    pub out_messages: im::Vector<OutMessage>,

    pub trace: im::Vector<TraceEntry>,

    /// The contract executions completed along the path.
    pub hops: im::Vector<Hop>,

    /// Messages waiting to be delivered to other contracts.
    pub deliveries: im::Vector<Delivery>,

    /// Messages that no contract of the communication scheme accepts.
    pub unresolved: im::Vector<OutMessage>,

    /// The persistent data committed by each contract.
    pub storage: im::OrdMap<ContractId, Value>,

    /// The message being handled by the current hop, if any.
    pub incoming: Option<IncomingMessage>,

    /// A failure of a later hop that was absorbed rather than bounced.
    pub outcome: Option<TerminalResult>,

    /// The result of the path, once it has terminated.
    pub result: Option<TerminalResult>,

    names:     u32,
    arguments: u32,
}

impl VMState {
    /// Creates a state about to execute `code` as method `method` of
    /// `contract`.
    #[must_use]
    pub fn new(
        contract: ContractId,
        method: i32,
        code: CellSlice,
        registers: Registers,
        gas_limit: u64,
    ) -> Self {
        Self {
            id: 0,
            contract,
            method,
            phase: Phase::Compute,
            stack: Stack::new(),
            registers,
            cc: code,
            pending: None,
            gas_used: 0,
            gas_limit,
            heap: Heap::new(),
            fields: FieldManager::new(),
            path: PathConstraints::new(),
            loops: LoopTracker::new(),
            calls: CallStack::new(),
            lazy_stack: false,
            inputs: im::Vector::new(),
            actions: im::Vector::new(),
            out_messages: im::Vector::new(),
            trace: im::Vector::new(),
            hops: im::Vector::new(),
            deliveries: im::Vector::new(),
            unresolved: im::Vector::new(),
            storage: im::OrdMap::new(),
            incoming: None,
            outcome: None,
            result: None,
            names: 0,
            arguments: 0,
        }
    }

    /// Checks whether the path has ended.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.result.is_some()
    }

    /// Generates a name for a new symbolic variable that is unique on this
    /// path.
    ///
    /// Names are derived from the path's own counter, so re-executing the same
    /// instruction from the same state yields the same names.
    pub fn fresh_name(&mut self, prefix: &str) -> String {
        let name = format!("{prefix}#{}", self.names);
        self.names += 1;
        name
    }

    /// Generates a fresh loop identifier.
    pub fn fresh_loop(&mut self) -> LoopId {
        let id = LoopId(self.names);
        self.names += 1;
        id
    }

    /// Adds `formula` to the path without checking it.
    pub fn assume(&mut self, formula: Bool) {
        self.path.push(formula);
    }

    /// Charges `gas` to the path.
    pub fn charge(&mut self, gas: u64) {
        self.gas_used = self.gas_used.saturating_add(gas);
    }

    /// Creates a fresh symbolic integer input called `name`.
    pub fn input_int(&mut self, name: &str) -> SymInt {
        let value = SymInt::fresh(&self.fresh_name(name));
        self.record_input(name, Value::Int(value.clone()));
        value
    }

    /// Records `value` as an input of the path called `name`.
    pub fn record_input(&mut self, name: &str, value: Value) {
        self.inputs.push_back(Input {
            name: name.to_string(),
            value,
        });
    }

    /// Creates a fresh symbolic cell called `name` on the heap, without
    /// recording it as an input.
    pub fn fresh_cell(&mut self, name: &str) -> CellAddr {
        let unique = self.fresh_name(name);
        let (addr, constraints) = self.heap.allocate_input(&unique);
        self.assume(constraints);
        trace!(state = self.id, %addr, name, "Created symbolic cell");
        addr
    }

    /// Creates a fresh symbolic input cell called `name`.
    pub fn input_cell(&mut self, name: &str) -> CellAddr {
        let addr = self.fresh_cell(name);
        self.record_input(name, Value::Cell(SymRef::Concrete(addr)));
        addr
    }

    fn lazy_argument(&mut self) -> String {
        let name = format!("arg{}", self.arguments);
        self.arguments += 1;
        name
    }

    /// Makes sure the stack holds at least `depth` values, creating integer
    /// inputs at the bottom of a lazy stack as needed.
    ///
    /// # Errors
    ///
    /// Throws a stack underflow if the stack is too shallow and not lazy.
    pub fn ensure_depth(&mut self, depth: usize) -> Result<(), Interrupt> {
        while self.stack.len() < depth {
            if !self.lazy_stack {
                return Err(Interrupt::throw(exit_code::STACK_UNDERFLOW));
            }
            let name = self.lazy_argument();
            let value = self.input_int(&name);
            self.stack.push_bottom(Value::Int(value));
        }
        Ok(())
    }

    pub fn push(&mut self, value: impl Into<Value>) {
        self.stack.push(value.into());
    }

    /// Pushes a condition as the VM's integer representation of booleans.
    pub fn push_bool(&mut self, value: &SymBool) {
        self.stack.push(Value::Int(value.to_int()));
    }

    /// Pops a value of any kind.
    ///
    /// # Errors
    ///
    /// Throws a stack underflow if the stack is empty and not lazy.
    pub fn pop(&mut self) -> Result<Value, Interrupt> {
        self.ensure_depth(1)?;
        self.stack
            .pop()
            .ok_or(Interrupt::throw(exit_code::STACK_UNDERFLOW))
    }

    /// Pops an integer.
    ///
    /// # Errors
    ///
    /// Throws if the stack is empty or the top value is not an integer.
    pub fn pop_int(&mut self) -> Result<SymInt, Interrupt> {
        match self.pop()? {
            Value::Int(value) => Ok(value),
            _ => Err(Interrupt::throw(exit_code::TYPE_CHECK)),
        }
    }

    /// Pops an integer and interprets it as a condition, any non-zero value
    /// being true.
    ///
    /// # Errors
    ///
    /// Throws if the stack is empty or the top value is not an integer.
    pub fn pop_bool(&mut self) -> Result<SymBool, Interrupt> {
        Ok(self.pop_int()?.is_zero().not())
    }

    /// Pops an integer that must be concrete and within `0..=max`.
    ///
    /// # Errors
    ///
    /// Throws a range check error if the value is out of range, and reports
    /// the instruction as unsupported if the value is symbolic.
    pub fn pop_small(&mut self, max: u32, mnemonic: &str) -> Result<u32, Interrupt> {
        let value = self.pop_int()?;
        let concrete = value.as_concrete().ok_or_else(|| Interrupt::Unsupported {
            mnemonic: format!("{mnemonic} with a symbolic operand"),
        })?;
        u32::try_from(concrete)
            .ok()
            .filter(|n| *n <= max)
            .ok_or(Interrupt::throw(exit_code::RANGE_CHECK))
    }

    /// Pops a cell.
    ///
    /// # Errors
    ///
    /// Throws if the stack is empty or the top value is not a cell.
    pub fn pop_cell(&mut self) -> Result<SymRef, Interrupt> {
        if self.stack.is_empty() && self.lazy_stack {
            let name = self.lazy_argument();
            return Ok(SymRef::Concrete(self.input_cell(&name)));
        }
        match self.pop()? {
            Value::Cell(cell) => Ok(cell),
            _ => Err(Interrupt::throw(exit_code::TYPE_CHECK)),
        }
    }

    /// Pops a slice.
    ///
    /// # Errors
    ///
    /// Throws if the stack is empty or the top value is not a slice.
    pub fn pop_slice(&mut self) -> Result<SymSlice, Interrupt> {
        if self.stack.is_empty() && self.lazy_stack {
            let name = self.lazy_argument();
            let slice = SymSlice::new(self.fresh_cell(&name));
            self.record_input(&name, Value::Slice(slice.clone()));
            return Ok(slice);
        }
        match self.pop()? {
            Value::Slice(slice) => Ok(slice),
            _ => Err(Interrupt::throw(exit_code::TYPE_CHECK)),
        }
    }

    /// Pops a builder.
    ///
    /// # Errors
    ///
    /// Throws if the stack is empty or the top value is not a builder.
    pub fn pop_builder(&mut self) -> Result<SymBuilder, Interrupt> {
        match self.pop()? {
            Value::Builder(builder) => Ok(builder),
            _ => Err(Interrupt::throw(exit_code::TYPE_CHECK)),
        }
    }

    /// Pops a continuation.
    ///
    /// # Errors
    ///
    /// Throws if the stack is empty or the top value is not a continuation.
    pub fn pop_cont(&mut self) -> Result<Rc<Continuation>, Interrupt> {
        match self.pop()? {
            Value::Continuation(cont) => Ok(cont),
            _ => Err(Interrupt::throw(exit_code::TYPE_CHECK)),
        }
    }

    /// Pops a tuple.
    ///
    /// # Errors
    ///
    /// Throws if the stack is empty or the top value is not a tuple.
    pub fn pop_tuple(&mut self) -> Result<im::Vector<Value>, Interrupt> {
        match self.pop()? {
            Value::Tuple(items) => Ok(items),
            _ => Err(Interrupt::throw(exit_code::TYPE_CHECK)),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::{
        cell::Cell,
        constant::exit_code,
        solver::SymInt,
        vm::{
            state::{registers::Registers, VMState},
            step::Interrupt,
            value::Value,
        },
    };

    fn state() -> VMState {
        VMState::new(0, 0, Cell::empty().to_slice(), Registers::new(Value::Null, Value::Null), 1000)
    }

    #[test]
    fn eager_stacks_underflow() {
        let mut state = state();
        assert!(matches!(
            state.pop_int(),
            Err(Interrupt::Throw { code }) if code == exit_code::STACK_UNDERFLOW
        ));
    }

    #[test]
    fn lazy_stacks_materialise_typed_inputs() -> anyhow::Result<()> {
        let mut state = state();
        state.lazy_stack = true;
        state.push(SymInt::from_i64(5));

        assert!(state.pop_int().map_err(|e| anyhow::anyhow!("{e:?}"))?.as_concrete().is_some());
        assert!(state.pop_int().map_err(|e| anyhow::anyhow!("{e:?}"))?.as_concrete().is_none());
        state.pop_slice().map_err(|e| anyhow::anyhow!("{e:?}"))?;

        let names: Vec<_> = state.inputs.iter().map(|i| i.name.clone()).collect();
        assert_eq!(names, vec!["arg0", "arg1"]);
        assert!(matches!(state.inputs[1].value, Value::Slice(_)));
        assert_eq!(state.heap.len(), 1);
        Ok(())
    }

    #[test]
    fn type_mismatches_throw() {
        let mut state = state();
        state.push(Value::Null);
        assert!(matches!(
            state.pop_builder(),
            Err(Interrupt::Throw { code }) if code == exit_code::TYPE_CHECK
        ));
    }
}
