//! This module is an integration test that checks the integer arithmetic of
//! the engine on both concrete and symbolic operands.
#![cfg(test)]

use num_bigint::BigInt;
use proptest::prelude::*;
use tvm_symbolic_analyzer::{
    opcode::{arithmetic::DivisionKind, Opcode},
    vm::{Config, MethodSelection},
    SymbolicTest,
};

mod common;

const GETTER: i32 = 85143;

fn run_getter(opcodes: Vec<Opcode>) -> anyhow::Result<SymbolicTest> {
    let contract = common::with_methods(vec![(GETTER, opcodes)])?;
    let config = Config::default().with_methods(MethodSelection::Specific(GETTER));
    let mut suite = common::new_analyzer(contract, config).analyze()?;
    anyhow::ensure!(suite.tests.len() == 1, "expected a single path");
    Ok(suite.tests.remove(0))
}

fn int_output(test: &SymbolicTest, depth: usize) -> Option<BigInt> {
    let index = test.outputs.len().checked_sub(depth + 1)?;
    test.outputs.get(index)?.as_int().cloned()
}

fn floor_mod(x: &BigInt, y: &BigInt) -> BigInt {
    let zero = BigInt::from(0);
    let r = x % y;
    if r != zero && (r < zero) != (*y < zero) {
        r + y
    } else {
        r
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn concrete_division_rounds_towards_negative_infinity(
        x in -1_000_000i64..1_000_000,
        y in prop::sample::select(vec![-7i64, -3, -1, 1, 2, 5, 1000]),
    ) {
        let test = run_getter(vec![
            Opcode::PushInt(BigInt::from(x)),
            Opcode::PushInt(BigInt::from(y)),
            Opcode::Divide(DivisionKind::DivMod),
        ]).unwrap();
        let (x, y) = (BigInt::from(x), BigInt::from(y));
        let quotient = int_output(&test, 1).unwrap();
        let remainder = int_output(&test, 0).unwrap();

        prop_assert_eq!(&remainder, &floor_mod(&x, &y));
        prop_assert_eq!(quotient * &y + remainder, x);
    }

    #[test]
    fn symbolic_remainders_agree_with_the_resolved_inputs(
        y in prop::sample::select(vec![-9i64, -2, 3, 10, 256]),
    ) {
        let test = run_getter(vec![
            Opcode::PushInt(BigInt::from(y)),
            Opcode::Divide(DivisionKind::Mod),
        ]).unwrap();
        let x = test.input("arg0").and_then(|v| v.as_int()).cloned().unwrap();
        let remainder = int_output(&test, 0).unwrap();

        prop_assert_eq!(remainder, floor_mod(&x, &BigInt::from(y)));
    }
}
