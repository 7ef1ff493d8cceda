//! This library implements symbolic execution of the bytecode of contracts for
//! a cell-based, stack-based smart-contract VM. It explores every feasible
//! path through the methods of a contract and turns each terminated path into
//! a concrete test: the inputs that drive the path, the result it ends with,
//! and the instructions it covers.
//!
//! # How it Works
//!
//! From a very high level, the analysis is performed as follows:
//!
//! 1. A [`schema::SchemaDocument`] describing the binary layout of messages
//!    and persistent data is transformed into an arena of labels.
//! 2. The methods of the [`contract::Contract`] are executed symbolically on a
//!    [`vm::VM`]. Cells supplied from outside the contract are symbolic, and
//!    the labels attached to them are only turned into solver constraints when
//!    the contract first reads them.
//! 3. Branches on symbolic conditions fork the path. Every path runs through
//!    the compute, action and bounce phases, and messages it sends to the
//!    other contracts of the analysis are delivered by the [`orchestrator`].
//! 4. The [`resolver`] asks the solver for a model of each terminated path and
//!    collapses its symbolic inputs and outputs into concrete values.
//!
//! # Basic Usage
//!
//! For the most basic usage of the library, it is sufficient to construct an
//! `Analyzer` and call the `.analyze` method, passing your contract.
//!
//! ```
//! use tvm_symbolic_analyzer as tsa;
//! use tvm_symbolic_analyzer::{
//!     cell::CellBuilder,
//!     contract::Contract,
//!     disassembly::decoder,
//!     opcode::{arithmetic::Comparison, Opcode},
//!     vm,
//!     watchdog::LazyWatchdog,
//! };
//!
//! // Throw 100 when the op of the inbound message body is 7.
//! let mut code = CellBuilder::new();
//! for opcode in [
//!     Opcode::LoadInt { width: 32, signed: false, preload: false },
//!     Opcode::Pop(0),
//!     Opcode::CompareInt(Comparison::Equal, 7),
//!     Opcode::ThrowIf(100),
//! ] {
//!     decoder::encode(&opcode, &mut code).unwrap();
//! }
//! let contract = Contract::new(code.build().unwrap()).unwrap();
//!
//! let suite = tsa::new(contract, vm::Config::default(), LazyWatchdog.in_rc())
//!     .analyze()
//!     .unwrap();
//!
//! assert!(suite.with_exit_code(100).next().is_some());
//! ```

#![warn(clippy::all, clippy::cargo, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)] // Allows for better API naming

pub mod analyzer;
pub mod cell;
pub mod constant;
pub mod contract;
pub mod disassembly;
pub mod error;
pub mod inference;
pub mod opcode;
pub mod orchestrator;
pub mod resolver;
pub mod schema;
pub mod solver;
pub mod utility;
pub mod vm;
pub mod watchdog;

// Re-exports to provide the library interface.
pub use analyzer::new;
pub use resolver::{SymbolicTest, TestSuite};
