//! This module contains common utilities for simplifying the writing of
//! integration tests for this library.

#![cfg(test)]

use std::collections::BTreeSet;

use tvm_symbolic_analyzer as tsa;
use tvm_symbolic_analyzer::{
    analyzer::{state::HasContracts, Analyzer},
    cell::{dictionary::build_dictionary, Cell, CellBuilder},
    constant::METHOD_ID_BITS,
    contract::Contract,
    disassembly::decoder,
    opcode::Opcode,
    utility::bigint_to_bits,
    vm,
    watchdog::LazyWatchdog,
    TestSuite,
};

/// Assembles `opcodes` into a single code cell.
#[allow(unused)] // It is actually
pub fn assemble(opcodes: &[Opcode]) -> anyhow::Result<Cell> {
    let mut builder = CellBuilder::new();
    for opcode in opcodes {
        decoder::encode(opcode, &mut builder)?;
    }
    Ok(builder.build()?)
}

/// Creates a contract whose code is just `opcodes`, making it a contract with
/// a single `recv_internal` method.
#[allow(unused)] // It is actually
pub fn receiver(opcodes: &[Opcode]) -> anyhow::Result<Contract> {
    Ok(Contract::new(assemble(opcodes)?)?)
}

/// Creates a contract that dispatches to `methods` through the standard
/// method dictionary prologue.
#[allow(unused)] // It is actually
pub fn with_methods(methods: Vec<(i32, Vec<Opcode>)>) -> anyhow::Result<Contract> {
    let mut entries = Vec::with_capacity(methods.len());
    for (id, opcodes) in &methods {
        let key = bigint_to_bits(&(*id).into(), METHOD_ID_BITS);
        entries.push((key, assemble(opcodes)?.to_slice()));
    }
    let dictionary = build_dictionary(&entries, METHOD_ID_BITS)?;

    let code = assemble(&[
        Opcode::SetCp0,
        Opcode::DictPushConst {
            dictionary,
            key_bits: 19,
        },
        Opcode::DictIGetJmpZ,
    ])?;
    Ok(Contract::new(code)?)
}

/// Constructs a new analyzer exploring `contract` with `config`.
#[allow(unused)] // It is actually
pub fn new_analyzer(contract: Contract, config: vm::Config) -> Analyzer<HasContracts> {
    tsa::new(contract, config, LazyWatchdog.in_rc())
}

/// Gets the exit codes of every test in `suite`.
#[allow(unused)] // It is actually
pub fn exit_codes(suite: &TestSuite) -> BTreeSet<i32> {
    suite.tests.iter().filter_map(|t| t.result.exit_code()).collect()
}
