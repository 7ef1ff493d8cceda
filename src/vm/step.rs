//! This module contains the single-step interpreter: fetching the next
//! instruction of a state, executing it, and settling the outcome.
//!
//! # Forking
//!
//! Instructions never create successor states directly. When an instruction
//! asks [`StepContext::decide`] about a condition that may go either way, the
//! state continues with the condition assumed true and a copy of the state as
//! it was *before* the instruction is queued with the condition assumed false.
//! That copy re-executes the instruction from scratch, at which point the
//! solver only admits the false branch. This keeps instruction semantics free
//! of any knowledge about forking.

use tracing::{debug, trace};
use z3::ast::Bool;

use crate::{
    constant::{exit_code, BASIC_GAS_PRICE, CELL_LOAD_GAS_PRICE, CELL_RELOAD_GAS_PRICE, REF_GAS_PRICE},
    disassembly::{
        decoder::{self, DecodeError},
        Instruction,
        Location,
    },
    error::{cell, execution},
    opcode::{artificial::Artificial, control},
    schema::StructuralError,
    solver::{SolverSession, SymBool},
    vm::{
        phase::Phase,
        result::{DeadReason, TerminalResult, TraceEntry},
        state::{
            heap::{CellAddr, SymRef},
            VMState,
        },
        Environment,
    },
};

/// The ways in which executing an instruction can depart from the normal flow
/// of its path.
#[derive(Clone, Debug)]
pub enum Interrupt {
    /// A VM exception, which may be caught by the contract.
    Throw { code: i32 },

    /// A cell did not match its schema label.
    Structural(StructuralError),

    /// The instruction is not implemented by the engine.
    Unsupported { mnemonic: String },

    /// The path is discarded without a result.
    Dead(DeadReason),

    /// The exploration as a whole cannot continue.
    Fatal(execution::Error),
}

impl Interrupt {
    #[must_use]
    pub fn throw(code: i32) -> Self {
        Self::Throw { code }
    }

    /// Reports `mnemonic` as unsupported.
    #[must_use]
    pub fn unsupported(mnemonic: impl Into<String>) -> Self {
        Self::Unsupported {
            mnemonic: mnemonic.into(),
        }
    }
}

impl From<execution::Error> for Interrupt {
    fn from(value: execution::Error) -> Self {
        Self::Fatal(value)
    }
}

impl From<cell::Error> for Interrupt {
    fn from(value: cell::Error) -> Self {
        Self::Fatal(execution::Error::from(value))
    }
}

/// The context in which a single instruction executes.
pub struct StepContext<'a> {
    pub env:    &'a Environment,
    pub solver: &'a mut SolverSession,
    origin:     VMState,
    forks:      Vec<VMState>,

    /// The branches taken by earlier forks of this step. A fork re-executes
    /// the instruction from the origin and must not fork on them again.
    taken: Vec<Bool>,
}

impl<'a> StepContext<'a> {
    /// Creates the context for executing the next instruction of `origin`.
    #[must_use]
    pub fn new(env: &'a Environment, solver: &'a mut SolverSession, origin: VMState) -> Self {
        Self {
            env,
            solver,
            origin,
            forks: Vec::new(),
            taken: Vec::new(),
        }
    }

    /// Gets the states forked off during the step.
    #[must_use]
    pub fn into_forks(self) -> Vec<VMState> {
        self.forks
    }

    /// Decides which way `condition` goes on the path of `state`.
    ///
    /// If both outcomes are feasible the path forks, with `state` continuing
    /// on the true branch.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if neither outcome is feasible, or if forking would
    /// exceed the loop iteration bound.
    pub fn decide(&mut self, state: &mut VMState, condition: &SymBool) -> Result<bool, Interrupt> {
        let formula = match condition {
            SymBool::Concrete(value) => return Ok(*value),
            SymBool::Symbolic(formula) => formula,
        };
        let negation = formula.not();
        let can_hold = self.solver.check_with(&state.path, formula);
        let can_fail = self.solver.check_with(&state.path, &negation);

        match (can_hold, can_fail) {
            (true, true) => {
                if let Some(count) = state.loops.record_fork() {
                    if count > self.env.config.max_loop_iterations {
                        trace!(state = state.id, count, "Loop iteration bound reached");
                        return Err(Interrupt::Dead(DeadReason::LoopLimit));
                    }
                }
                let mut fork = self.origin.clone();
                for taken in &self.taken {
                    fork.path.push(taken.clone());
                }
                fork.path.push(negation);
                fork.loops = state.loops.clone();
                self.forks.push(fork);
                self.taken.push(formula.clone());
                state.assume(formula.clone());
                Ok(true)
            }
            (true, false) => Ok(true),
            (false, true) => Ok(false),
            (false, false) => Err(Interrupt::Dead(DeadReason::Infeasible)),
        }
    }

    /// Throws `code` on the paths where `failure` holds.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `failure` holds on the path of `state`.
    pub fn check(&mut self, state: &mut VMState, failure: &SymBool, code: i32) -> Result<(), Interrupt> {
        if self.decide(state, failure)? {
            Err(Interrupt::throw(code))
        } else {
            Ok(())
        }
    }

    /// Resolves a possibly symbolic reference to a single cell, forking once
    /// per cell it may refer to.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no choice is feasible.
    pub fn resolve(&mut self, state: &mut VMState, reference: &SymRef) -> Result<CellAddr, Interrupt> {
        if let Some(addr) = reference.as_concrete() {
            return Ok(addr);
        }
        let mut cases = reference.flatten();
        let last = cases
            .pop()
            .ok_or_else(|| execution::Error::inconsistent("a reference without any cases"))?;
        for (condition, addr) in cases {
            if self.decide(state, &condition)? {
                return Ok(addr);
            }
        }
        Ok(last.1)
    }

    /// Commits the cell at `addr` to its schema label on the first read of its
    /// data, asserting the resulting structural constraints on the path.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if a concrete cell does not match its label.
    pub fn fixate(&mut self, state: &mut VMState, addr: CellAddr) -> Result<(), Interrupt> {
        let cell = state.heap.get(addr)?;
        let formula = state
            .fields
            .read_data(
                &self.env.labels,
                self.env.config.max_schema_depth,
                addr,
                cell,
            )
            .map_err(Interrupt::Structural)?;
        if let Some(formula) = formula {
            debug!(state = state.id, %addr, "Fixated cell to its label");
            state.assume(formula);
        }
        Ok(())
    }

    /// Loads the cell at `addr` for reading, charging the load.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the cell does not match its label.
    pub fn open_cell(&mut self, state: &mut VMState, addr: CellAddr) -> Result<(), Interrupt> {
        let price = if state.heap.mark_loaded(addr) {
            CELL_LOAD_GAS_PRICE
        } else {
            CELL_RELOAD_GAS_PRICE
        };
        state.charge(price);
        self.fixate(state, addr)
    }

    /// Gets the child of the cell at `addr` at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the cell cannot have such a child.
    pub fn child(&mut self, state: &mut VMState, addr: CellAddr, index: usize) -> Result<SymRef, Interrupt> {
        self.fixate(state, addr)?;
        let (reference, constraints) = state.heap.child(addr, index)?;
        if let Some(constraints) = constraints {
            state.assume(constraints);
            if let Some(child) = reference.as_concrete() {
                state.fields.on_child(addr, index, child);
            }
        }
        Ok(reference)
    }
}

/// The outcome of stepping a state.
#[derive(Debug)]
pub struct Step {
    /// The state after the step, which may have terminated, or [`None`] if the
    /// path was discarded.
    pub state: Option<VMState>,

    /// The reason the path was discarded, if it was.
    pub dead: Option<DeadReason>,

    /// States forked off during the step, still to be explored.
    pub forks: Vec<VMState>,
}

/// Executes the next instruction of `state`.
///
/// # Errors
///
/// Returns [`Err`] if the exploration cannot continue, such as when the state
/// is internally inconsistent.
pub fn step(env: &Environment, solver: &mut SolverSession, mut state: VMState) -> execution::Result<Step> {
    if state.is_terminated() {
        return Err(execution::Error::InvalidStep.into());
    }
    let mut ctx = StepContext::new(env, solver, state.clone());

    let (instruction, outcome) = match fetch(&mut state) {
        Ok(instruction) => {
            let outcome = match &instruction {
                Instruction::Real { opcode, .. } => opcode.execute(&mut ctx, &mut state),
                Instruction::Artificial(artificial) => artificial.execute(&mut ctx, &mut state),
            };
            (Some(instruction), outcome)
        }
        Err(interrupt) => (None, Err(interrupt)),
    };
    let forks = ctx.into_forks();

    if let Some(instruction) = &instruction {
        settle(&mut state, instruction);
    }

    let mut dead = None;
    match outcome {
        Ok(()) => {
            if state.phase == Phase::Compute && state.gas_used > state.gas_limit {
                control::raise(&env.config, &mut state, exit_code::OUT_OF_GAS);
            }
        }
        Err(Interrupt::Throw { code }) => {
            control::raise(&env.config, &mut state, code);
        }
        Err(Interrupt::Structural(error)) => {
            debug!(state = state.id, %error, "Path ended on a structural error");
            state.result = Some(TerminalResult::Structural { error });
        }
        Err(Interrupt::Unsupported { mnemonic }) => {
            debug!(state = state.id, %mnemonic, "Path reached an unsupported instruction");
            state.result = Some(TerminalResult::Unsupported { mnemonic });
        }
        Err(Interrupt::Dead(reason)) => {
            trace!(state = state.id, ?reason, "Path discarded");
            dead = Some(reason);
        }
        Err(Interrupt::Fatal(error)) => {
            let location = instruction.as_ref().and_then(Instruction::location);
            return Err(execution::LocatedError {
                location,
                payload: error,
            });
        }
    }

    Ok(Step {
        state: if dead.is_some() { None } else { Some(state) },
        dead,
        forks,
    })
}

/// Fetches the next instruction of `state`, advancing its code cursor.
fn fetch(state: &mut VMState) -> Result<Instruction, Interrupt> {
    if let Some(artificial) = state.pending.take() {
        return Ok(Instruction::Artificial(artificial));
    }
    if state.cc.remaining_bits() == 0 {
        let artificial = if state.cc.remaining_refs() > 0 {
            Artificial::ImplicitJumpRef
        } else {
            Artificial::ImplicitReturn
        };
        return Ok(Instruction::Artificial(artificial));
    }

    let location = Location::of(&state.cc);
    let (bits_before, refs_before) = (state.cc.remaining_bits(), state.cc.remaining_refs());
    let opcode = decoder::decode(&mut state.cc).map_err(|error| match error {
        DecodeError::Unknown { prefix } => Interrupt::unsupported(format!("unknown opcode {prefix}")),
        DecodeError::Truncated => Interrupt::throw(exit_code::INVALID_OPCODE),
    })?;

    #[allow(clippy::cast_possible_truncation)] // Bounded by the cell size
    let (bits, refs) = (
        (bits_before - state.cc.remaining_bits()) as u16,
        (refs_before - state.cc.remaining_refs()) as u8,
    );
    Ok(Instruction::Real {
        opcode,
        location,
        bits,
        refs,
    })
}

/// Charges the gas of `instruction` and records it in the trace.
fn settle(state: &mut VMState, instruction: &Instruction) {
    match instruction {
        Instruction::Real {
            opcode,
            location,
            bits,
            refs,
        } => {
            state.charge(BASIC_GAS_PRICE + u64::from(*bits) + REF_GAS_PRICE * u64::from(*refs));
            state.trace.push_back(TraceEntry::Real {
                location: *location,
                mnemonic: opcode.mnemonic(),
            });
        }
        Instruction::Artificial(artificial) => {
            state.charge(artificial.gas());
            state.trace.push_back(TraceEntry::Artificial {
                name: artificial.name(),
            });
        }
    }
}
