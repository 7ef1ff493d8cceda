//! This module is an integration test that checks how the analyzer explores
//! the paths of small, hand-assembled contracts, and the bounds it places on
//! that exploration.
#![cfg(test)]

use std::{
    collections::BTreeSet,
    time::{Duration, Instant},
};

use num_bigint::BigInt;
use tvm_symbolic_analyzer::{
    constant::exit_code,
    opcode::{
        arithmetic::{BinaryOp, DivisionKind},
        Opcode,
    },
    vm::{
        result::{DeadReason, TerminalResult, TraceEntry},
        Config,
        MethodSelection,
    },
    SymbolicTest,
};

mod common;

const GETTER: i32 = 85143;

#[test]
fn division_by_zero_is_an_overflow_on_every_path() -> anyhow::Result<()> {
    // Returns early unless `arg1 - (arg0 + 3) == 0`, and divides `arg1` by zero
    // otherwise.
    let contract = common::with_methods(vec![(GETTER, vec![
        Opcode::Push(1),
        Opcode::Push(1),
        Opcode::AddConst(3),
        Opcode::Binary(BinaryOp::Sub),
        Opcode::IfRet,
        Opcode::Pop(0),
        Opcode::PushInt(BigInt::from(0)),
        Opcode::Divide(DivisionKind::Div),
    ])])?;
    let config = Config::default().with_methods(MethodSelection::Specific(GETTER));
    let suite = common::new_analyzer(contract, config).analyze()?;

    let divides = |entry: &TraceEntry| matches!(entry, TraceEntry::Real { mnemonic, .. } if mnemonic == "DIV");
    let divided: Vec<_> = suite.tests.iter().filter(|t| t.trace.iter().any(divides)).collect();
    assert!(!divided.is_empty());

    for test in divided {
        assert_eq!(test.result, TerminalResult::Failure {
            exit_code: exit_code::INTEGER_OVERFLOW,
        });
        let divisor = test.input("arg0").and_then(|v| v.as_int()).cloned();
        let dividend = test.input("arg1").and_then(|v| v.as_int()).cloned();
        let (Some(divisor), Some(dividend)) = (divisor, dividend) else {
            anyhow::bail!("the arguments of the getter were not resolved");
        };
        assert_eq!(dividend - (divisor + 3), BigInt::from(0));
    }

    assert!(suite.tests.iter().any(|t| t.result.is_success()));
    Ok(())
}

#[test]
fn loops_are_bounded_by_their_forks() -> anyhow::Result<()> {
    let body = common::assemble(&[Opcode::Nop])?;
    let contract = common::with_methods(vec![(GETTER, vec![Opcode::PushCont(body.to_slice()), Opcode::Repeat])])?;
    let config = Config::default()
        .with_methods(MethodSelection::Specific(GETTER))
        .with_max_loop_iterations(3);
    let suite = common::new_analyzer(contract, config).analyze()?;

    assert!(suite.dead.iter().any(|(_, reason)| *reason == DeadReason::LoopLimit));

    let successes: Vec<_> = suite.tests.iter().filter(|t| t.result.is_success()).collect();
    assert!(!successes.is_empty());
    for test in successes {
        let count = test
            .input("arg0")
            .and_then(|v| v.as_int())
            .ok_or_else(|| anyhow::anyhow!("missing repeat count"))?;
        assert!(*count <= BigInt::from(3));
    }
    Ok(())
}

#[test]
fn recursion_is_bounded_by_the_call_depth() -> anyhow::Result<()> {
    let contract = common::with_methods(vec![(0, vec![Opcode::CallDict(1)]), (1, vec![Opcode::CallDict(1)])])?;
    let config = Config::default()
        .with_methods(MethodSelection::Specific(0))
        .with_max_recursion_depth(4);
    let suite = common::new_analyzer(contract, config).analyze()?;

    assert!(suite.tests.is_empty());
    assert!(!suite.dead.is_empty());
    assert!(suite
        .dead
        .iter()
        .all(|(_, reason)| *reason == DeadReason::RecursionLimit));
    Ok(())
}

#[test]
fn recursion_survives_up_to_the_call_depth() -> anyhow::Result<()> {
    // Method 1 calls itself with its argument decremented until it reaches zero.
    let contract = common::with_methods(vec![
        (GETTER, vec![Opcode::CallDict(1)]),
        (1, vec![
            Opcode::Push(0),
            Opcode::IfNotRet,
            Opcode::AddConst(-1),
            Opcode::CallDict(1),
        ]),
    ])?;
    let config = Config::default()
        .with_methods(MethodSelection::Specific(GETTER))
        .with_max_recursion_depth(3);
    let suite = common::new_analyzer(contract, config).analyze()?;

    assert!(suite.dead.iter().any(|(_, reason)| *reason == DeadReason::RecursionLimit));

    let calls = |test: &SymbolicTest| {
        test.trace
            .iter()
            .filter(|entry| matches!(entry, TraceEntry::Real { mnemonic, .. } if mnemonic == "CALLDICT 1"))
            .count()
    };
    let mut depths = BTreeSet::new();
    for test in suite.tests.iter().filter(|t| t.result.is_success()) {
        let argument = test
            .input("arg0")
            .and_then(|v| v.as_int())
            .ok_or_else(|| anyhow::anyhow!("missing recursion argument"))?;
        let depth = calls(test);
        assert_eq!(BigInt::from(depth - 1), *argument);
        depths.insert(depth);
    }
    assert_eq!(depths, [1, 2, 3].into());
    Ok(())
}

#[test]
fn running_out_of_gas_ends_the_compute_phase() -> anyhow::Result<()> {
    let contract = common::receiver(&vec![Opcode::Nop; 20])?;

    let config = Config::default().with_gas_limit(100);
    let suite = common::new_analyzer(contract.clone(), config).analyze()?;
    assert!(!suite.tests.is_empty());
    for test in &suite.tests {
        assert_eq!(test.result, TerminalResult::Failure {
            exit_code: exit_code::OUT_OF_GAS,
        });
        assert!(test.gas_used > 100);
    }

    let suite = common::new_analyzer(contract, Config::default()).analyze()?;
    assert_eq!(common::exit_codes(&suite), [0].into());
    Ok(())
}

#[test]
fn explores_every_method_of_the_contract() -> anyhow::Result<()> {
    let contract = common::with_methods(vec![
        (0, vec![Opcode::Throw(70)]),
        (-1, vec![Opcode::Throw(71)]),
        (GETTER, vec![Opcode::Throw(72)]),
    ])?;
    let suite = common::new_analyzer(contract, Config::default()).analyze()?;

    assert_eq!(common::exit_codes(&suite), [70, 71, 72].into());
    let methods: Vec<_> = suite.tests.iter().map(|t| t.method).collect();
    assert_eq!(methods, vec![-1, 0, GETTER]);

    let coverage = suite
        .coverage
        .method(0, GETTER)
        .ok_or_else(|| anyhow::anyhow!("missing coverage of the getter"))?;
    assert!((coverage.percentage() - 100.0).abs() < f64::EPSILON);
    Ok(())
}

#[test]
fn stops_at_the_first_failure_when_asked() -> anyhow::Result<()> {
    let contract = common::with_methods(vec![(-1, vec![Opcode::Throw(70)]), (0, vec![Opcode::Throw(71)])])?;
    let config = Config::default().with_stop_on_first_error(true);
    let suite = common::new_analyzer(contract, config).analyze()?;

    assert!(suite.stopped);
    assert_eq!(common::exit_codes(&suite), [70].into());
    Ok(())
}

#[test]
fn the_timeout_ends_exploration_of_endless_loops() -> anyhow::Result<()> {
    let body = common::assemble(&[Opcode::Nop])?;
    let contract = common::receiver(&[Opcode::PushCont(body.to_slice()), Opcode::Again])?;
    let config = Config::default()
        .with_gas_limit(50_000_000)
        .with_timeout(Duration::from_millis(50));

    let start = Instant::now();
    let suite = common::new_analyzer(contract, config).analyze()?;

    assert!(suite.stopped);
    assert!(start.elapsed() < Duration::from_secs(2));
    Ok(())
}
