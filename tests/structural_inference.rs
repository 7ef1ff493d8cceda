//! This module is an integration test that checks that the cells supplied to a
//! contract are held to the schema types they are labelled with.
#![cfg(test)]

use serde_json::json;
use tvm_symbolic_analyzer::{
    cell::{Cell, CellBuilder},
    opcode::{arithmetic::Comparison, Opcode},
    schema::{SchemaDocument, StructuralError},
    vm::{result::TerminalResult, Config},
};

mod common;

fn read_flags() -> Vec<Opcode> {
    vec![
        Opcode::Pop(0),
        Opcode::Ctos,
        Opcode::LoadInt {
            width:   4,
            signed:  false,
            preload: false,
        },
        Opcode::Pop(0),
        Opcode::Throw(100),
    ]
}

#[test]
fn inbound_messages_are_never_both_bounceable_and_bounced() -> anyhow::Result<()> {
    let contract = common::receiver(&read_flags())?;
    let config = Config::default().with_analyze_bounced_messages(true);
    let suite = common::new_analyzer(contract, config).analyze()?;
    assert_eq!(common::exit_codes(&suite), [100].into());

    let mut flags = Vec::new();
    for test in &suite.tests {
        let header = test
            .input("in_msg_full")
            .and_then(|v| v.as_cell())
            .ok_or_else(|| anyhow::anyhow!("missing message header"))?;
        assert!(header.bit_len() >= 4);
        let bounce = header.data()[2];
        let bounced = header.data()[3];
        assert!(!(bounce && bounced));
        flags.push(bounce);
    }

    // The bounce phase forks on whether the message asked to be bounced.
    assert!(flags.contains(&true));
    assert!(flags.contains(&false));
    Ok(())
}

#[test]
fn message_bodies_only_carry_the_ops_of_their_type() -> anyhow::Result<()> {
    let schema: SchemaDocument = serde_json::from_value(json!({"definitions": [{
        "name": "Body",
        "constructors": [
            {
                "name": "increment",
                "tag": "#0000000a",
                "fields": [{"name": "query_id", "type": {"kind": "uint", "bits": 64}}]
            },
            {"name": "reset", "tag": "#0000000b"}
        ]
    }]}))?;
    let contract = common::receiver(&[
        Opcode::LoadInt {
            width:   32,
            signed:  false,
            preload: false,
        },
        Opcode::Pop(0),
        Opcode::CompareInt(Comparison::Equal, 10),
        Opcode::ThrowIfNot(99),
    ])?;
    let config = Config::default().with_message_body_type("Body");
    let suite = common::new_analyzer(contract, config).with_schema(schema).analyze()?;

    assert_eq!(common::exit_codes(&suite), [0, 99].into());
    for test in &suite.tests {
        let body = test
            .input("in_msg_body")
            .and_then(|v| v.as_cell())
            .ok_or_else(|| anyhow::anyhow!("missing message body"))?;
        let op = body.to_slice().preload_uint(32)?;
        match test.result.exit_code() {
            Some(0) => {
                assert_eq!(op, 10);
                assert_eq!(body.bit_len(), 32 + 64);
            }
            Some(99) => {
                assert_eq!(op, 11);
                assert_eq!(body.bit_len(), 32);
            }
            other => anyhow::bail!("unexpected exit code {other:?}"),
        }
    }
    Ok(())
}

fn maybe_cell_schema() -> anyhow::Result<SchemaDocument> {
    Ok(serde_json::from_value(json!({"definitions": [{
        "name": "Storage",
        "constructors": [{
            "name": "storage",
            "fields": [{
                "name": "extra",
                "type": {"kind": "maybe", "inner": {"kind": "ref", "inner": {"kind": "cell"}}}
            }]
        }]
    }]}))?)
}

fn open_storage(data: Cell) -> anyhow::Result<Vec<TerminalResult>> {
    let contract = common::receiver(&[Opcode::PushCtr(4), Opcode::Ctos])?.with_data(data);
    let config = Config::default().with_persistent_data_type("Storage");
    let suite = common::new_analyzer(contract, config)
        .with_schema(maybe_cell_schema()?)
        .analyze()?;
    Ok(suite.tests.into_iter().map(|t| t.result).collect())
}

#[test]
fn a_present_maybe_without_its_reference_is_a_structural_failure() -> anyhow::Result<()> {
    let mut builder = CellBuilder::new();
    builder.store_bit(true)?;
    let results = open_storage(builder.build()?)?;

    assert_eq!(results, vec![TerminalResult::Structural {
        error: StructuralError::ExpectedRef,
    }]);
    Ok(())
}

#[test]
fn a_well_formed_maybe_reads_successfully() -> anyhow::Result<()> {
    let mut builder = CellBuilder::new();
    builder.store_bit(true)?;
    builder.store_ref(Cell::empty())?;
    let results = open_storage(builder.build()?)?;

    assert_eq!(results, vec![TerminalResult::Success { exit_code: 0 }]);
    Ok(())
}
