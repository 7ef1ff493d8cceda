//! This module is an integration test that checks the delivery of messages
//! between the contracts of an analysis.
#![cfg(test)]

use num_bigint::BigInt;
use tvm_symbolic_analyzer::{
    analyzer::{state::HasContracts, Analyzer},
    cell::{Cell, CellBuilder},
    contract::Contract,
    opcode::{arithmetic::Comparison, Opcode},
    orchestrator::{CommunicationScheme, InboundRule},
    vm::{result::TerminalResult, Config},
    SymbolicTest,
};

mod common;

/// Builds an internal message with an empty value and both addresses unset,
/// carrying `op` inline as its body.
fn message(op: u64, bounce: bool) -> anyhow::Result<Cell> {
    let mut builder = CellBuilder::new();
    builder.store_bit(false)?;
    builder.store_bit(true)?;
    builder.store_bit(bounce)?;
    builder.store_bit(false)?;
    builder.store_uint(0, 2)?;
    builder.store_uint(0, 2)?;
    builder.store_coins(&BigInt::from(0))?;
    builder.store_bit(false)?;
    builder.store_coins(&BigInt::from(0))?;
    builder.store_coins(&BigInt::from(0))?;
    builder.store_uint(0, 64)?;
    builder.store_uint(0, 32)?;
    builder.store_bit(false)?;
    builder.store_bit(false)?;
    builder.store_uint(op, 32)?;
    Ok(builder.build()?)
}

/// A contract that sends `message` whenever it receives anything.
fn sender(message: Cell) -> anyhow::Result<Contract> {
    common::receiver(&[Opcode::PushRef(message), Opcode::PushInt(BigInt::from(0)), Opcode::SendRawMsg])
}

/// A contract that fails with 55 on messages with op 5.
fn picky_receiver() -> anyhow::Result<Contract> {
    common::receiver(&[
        Opcode::LoadInt {
            width:   32,
            signed:  false,
            preload: false,
        },
        Opcode::Pop(0),
        Opcode::CompareInt(Comparison::Equal, 5),
        Opcode::ThrowIf(55),
    ])
}

fn analyzer(message: Cell, config: Config) -> anyhow::Result<Analyzer<HasContracts>> {
    let scheme = CommunicationScheme::new().with_rule(1, InboundRule::new(1, 10).from_sender(0));
    Ok(common::new_analyzer(sender(message)?, config)
        .with_contract(1, picky_receiver()?)
        .with_scheme(scheme))
}

fn only_test(tests: Vec<SymbolicTest>) -> anyhow::Result<SymbolicTest> {
    let mut tests = tests.into_iter();
    match (tests.next(), tests.next()) {
        (Some(test), None) => Ok(test),
        _ => anyhow::bail!("expected a single test"),
    }
}

#[test]
fn accepted_messages_run_the_receiving_contract() -> anyhow::Result<()> {
    let suite = analyzer(message(6, false)?, Config::default())?.analyze()?;
    let test = only_test(suite.tests)?;

    assert_eq!(test.result, TerminalResult::Success { exit_code: 0 });
    assert_eq!(test.contract, 0);
    let contracts: Vec<_> = test.hops.iter().map(|h| h.contract).collect();
    assert_eq!(contracts, vec![0, 1]);
    assert!(test.hops[1].gas_used > test.hops[0].gas_used);
    assert_eq!(test.gas_used, test.hops[1].gas_used);
    assert_eq!(test.unresolved_messages, 0);
    Ok(())
}

#[test]
fn unbounced_failures_downstream_are_soft_failures() -> anyhow::Result<()> {
    let suite = analyzer(message(5, false)?, Config::default())?.analyze()?;
    let test = only_test(suite.tests)?;

    assert_eq!(test.result, TerminalResult::SoftFailure {
        contract:  1,
        exit_code: 55,
    });
    assert_eq!(test.hops[0].result, TerminalResult::Success { exit_code: 0 });
    assert_eq!(test.hops[1].result, TerminalResult::Failure { exit_code: 55 });
    Ok(())
}

#[test]
fn bounced_messages_return_to_the_sender_until_the_hop_bound() -> anyhow::Result<()> {
    let config = Config::default().with_max_message_hops(4);
    let suite = analyzer(message(5, true)?, config)?.analyze()?;
    let test = only_test(suite.tests)?;

    // Each bounce returns to the sender, which sends the message again.
    assert_eq!(test.result, TerminalResult::Success { exit_code: 0 });
    let contracts: Vec<_> = test.hops.iter().map(|h| h.contract).collect();
    assert_eq!(contracts, vec![0, 1, 0, 1]);
    Ok(())
}

#[test]
fn messages_no_contract_accepts_are_unresolved() -> anyhow::Result<()> {
    let suite = analyzer(message(99, false)?, Config::default())?.analyze()?;
    let test = only_test(suite.tests)?;

    assert_eq!(test.result, TerminalResult::Success { exit_code: 0 });
    assert_eq!(test.hops.len(), 1);
    assert_eq!(test.unresolved_messages, 1);
    Ok(())
}

#[test]
fn messages_of_a_single_contract_are_unresolved() -> anyhow::Result<()> {
    let config = Config::default().with_analyze_out_messages(true);
    let suite = common::new_analyzer(sender(message(6, false)?)?, config).analyze()?;
    let test = only_test(suite.tests)?;

    assert_eq!(test.result, TerminalResult::Success { exit_code: 0 });
    assert_eq!(test.unresolved_messages, 1);
    Ok(())
}
