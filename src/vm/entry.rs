//! The set-up of the states in which contract executions begin.
//!
//! A method is entered with the registers and stack the blockchain would
//! provide. Whatever the blockchain would supply from outside (the incoming
//! message, the time, unknown persistent data) is symbolic, and recorded as an
//! input of the path.

use num_bigint::BigInt;
use num_traits::One;
use tracing::debug;
use z3::ast::BV;

use crate::{
    constant::{CELL_DATA_BITS, RECV_EXTERNAL_METHOD_ID, RECV_INTERNAL_METHOD_ID},
    contract::Contract,
    error::execution,
    orchestrator::Delivery,
    solver::{SymBool, SymInt},
    vm::{
        phase::{IncomingMessage, Phase},
        result::ContractId,
        state::{
            heap::{CellAddr, SymRef},
            registers::Registers,
            stack::Stack,
            VMState,
        },
        step::{Interrupt, StepContext},
        value::{SymSlice, Value},
        Environment,
    },
};

/// The tag of the context tuple in `c7`.
const CONTEXT_MAGIC: i64 = 0x076e_f1ea;

/// The width of a `Coins` amount, in bits.
const COINS_BITS: usize = 120;

/// The positions of the `bounce` and `bounced` flags in an internal message
/// header, after the constructor tag and `ihr_disabled`.
const BOUNCE_BIT: u32 = 2;
const BOUNCED_BIT: u32 = 3;

/// Creates the state in which `method` of contract `id` begins executing.
///
/// # Errors
///
/// Returns [`Err`] if the contract or the method does not exist.
pub fn initial_state(env: &Environment, id: ContractId, method: i32) -> execution::Result<VMState> {
    let contract = env.contract(id)?;
    let code = contract
        .method(method)
        .cloned()
        .ok_or(execution::Error::MissingMethod { id: method })?;

    let mut state = VMState::new(
        id,
        method,
        code,
        Registers::new(Value::Null, Value::Null),
        env.config.gas_limit,
    );
    let c4 = persistent_data(env, &mut state, contract);
    let c7 = context(&mut state, contract);
    state.registers = Registers::new(c4, c7);
    state.calls.push(method);

    match method {
        RECV_INTERNAL_METHOD_ID => {
            state.push(SymInt::Concrete(contract.balance().clone()));
            let value = coins_input(&mut state, "msg_value");
            let header = state.input_cell("in_msg_full");
            if let Some(label) = env.internal_header {
                state.fields.request(header, label);
            }
            let (bounce, bounced) = bounce_flags(&state, header)?;
            state.assume(bounce.and(&bounced).not().to_bool());
            let body = message_body(env, &mut state);

            state.push(value.clone());
            state.push(Value::Cell(SymRef::Concrete(header)));
            state.push(Value::Slice(body.clone()));
            state.incoming = Some(IncomingMessage {
                sender: None,
                bounce,
                bounced,
                value,
                body,
                returned: false,
            });
        }
        RECV_EXTERNAL_METHOD_ID => {
            state.push(SymInt::Concrete(contract.balance().clone()));
            state.push(SymInt::from_i64(0));
            let header = state.input_cell("in_msg_full");
            if let Some(label) = env.external_header {
                state.fields.request(header, label);
            }
            let body = message_body(env, &mut state);
            state.push(Value::Cell(SymRef::Concrete(header)));
            state.push(Value::Slice(body));
        }
        _ => state.lazy_stack = true,
    }

    debug!(contract = id, method, "Created initial state");
    Ok(state)
}

/// Starts the execution of the receiver of `delivery.target` on the message
/// being delivered.
///
/// The path keeps its heap, constraints and gas, so that a later contract
/// sees exactly the cells the earlier one built. The gas limit of the new
/// compute phase is counted from the gas already used.
///
/// # Errors
///
/// Returns [`Err`] if the target contract or its receiver does not exist.
pub fn deliver(ctx: &mut StepContext, state: &mut VMState, delivery: &Delivery) -> Result<(), Interrupt> {
    let env = ctx.env;
    let contract = env.contract(delivery.target)?;
    let code = contract
        .method(RECV_INTERNAL_METHOD_ID)
        .cloned()
        .ok_or(execution::Error::MissingMethod {
            id: RECV_INTERNAL_METHOD_ID,
        })?;

    state.contract = delivery.target;
    state.method = RECV_INTERNAL_METHOD_ID;
    state.phase = Phase::Compute;
    state.cc = code;
    state.stack = Stack::new();
    state.lazy_stack = false;
    state.actions.clear();
    state.calls = Default::default();
    state.calls.push(RECV_INTERNAL_METHOD_ID);
    state.loops = Default::default();
    state.gas_limit = state.gas_used.saturating_add(env.config.gas_limit);

    let c4 = match state.storage.get(&delivery.target) {
        Some(committed) => committed.clone(),
        None => persistent_data(env, state, contract),
    };
    let c7 = context(state, contract);
    state.registers = Registers::new(c4, c7);

    let message = &delivery.message;
    state.push(SymInt::Concrete(contract.balance().clone()));
    state.push(message.value.clone());
    state.push(Value::Cell(SymRef::Concrete(message.cell)));
    state.push(Value::Slice(message.body.clone()));
    state.incoming = Some(IncomingMessage {
        sender:   Some(message.sender),
        bounce:   message.bounce.clone(),
        bounced:  message.bounced.clone(),
        value:    message.value.clone(),
        body:     message.body.clone(),
        returned: false,
    });

    debug!(
        state = state.id,
        from = message.sender,
        to = delivery.target,
        "Delivered a message"
    );
    Ok(())
}

/// Gets the persistent data of `contract`, labelled with the persistent data
/// type if there is one. The data is symbolic when the contract has none.
fn persistent_data(env: &Environment, state: &mut VMState, contract: &Contract) -> Value {
    let addr = match contract.data() {
        Some(data) => state.heap.allocate_concrete(data),
        None => state.input_cell("c4"),
    };
    if let Some(label) = env.data_label {
        state.fields.request(addr, label);
    }
    Value::Cell(SymRef::Concrete(addr))
}

/// Builds the context tuple held in `c7`.
fn context(state: &mut VMState, contract: &Contract) -> Value {
    let now = bounded_input(state, "now", 32);
    let seed = bounded_input(state, "rand_seed", 256);
    let address = state.heap.allocate_concrete(contract.address());
    let balance = Value::Tuple(im::vector![
        Value::Int(SymInt::Concrete(contract.balance().clone())),
        Value::Null,
    ]);

    let params = im::vector![
        Value::Int(SymInt::from_i64(CONTEXT_MAGIC)),
        Value::Int(SymInt::from_i64(0)),
        Value::Int(SymInt::from_i64(0)),
        Value::Int(now),
        Value::Int(SymInt::from_i64(0)),
        Value::Int(SymInt::from_i64(0)),
        Value::Int(seed),
        balance,
        Value::Slice(SymSlice::new(address)),
        Value::Null,
    ];
    Value::Tuple(im::vector![Value::Tuple(params)])
}

/// Creates the slice of the inbound message body, labelled with the message
/// body type if there is one.
fn message_body(env: &Environment, state: &mut VMState) -> SymSlice {
    let body = state.input_cell("in_msg_body");
    if let Some(label) = env.body_label {
        state.fields.request(body, label);
    }
    SymSlice::new(body)
}

/// Reads the `bounce` and `bounced` flags of the header cell at `header`.
fn bounce_flags(state: &VMState, header: CellAddr) -> Result<(SymBool, SymBool), execution::Error> {
    let data = state.heap.get(header)?.bits.to_bv();
    let flag = |position: u32| {
        let bit = CELL_DATA_BITS - 1 - position;
        SymBool::Symbolic(data.extract(bit, bit).eq(&BV::from_u64(1, 1)))
    };
    Ok((flag(BOUNCE_BIT), flag(BOUNCED_BIT)))
}

/// Creates an integer input in `0..2^bits`.
fn bounded_input(state: &mut VMState, name: &str, bits: usize) -> SymInt {
    let value = state.input_int(name);
    let low = SymInt::from_i64(0);
    let high = SymInt::Concrete(BigInt::one() << bits);
    let in_range = value.less_than(&low).not().and(&value.less_than(&high));
    state.assume(in_range.to_bool());
    value
}

fn coins_input(state: &mut VMState, name: &str) -> SymInt {
    bounded_input(state, name, COINS_BITS)
}

#[cfg(test)]
mod test {
    use bitvec::{order::Msb0, vec::BitVec};

    use crate::{
        cell::{dictionary::build_dictionary, Cell, CellBuilder},
        constant::{METHOD_ID_BITS, RECV_INTERNAL_METHOD_ID},
        contract::Contract,
        disassembly::decoder,
        opcode::Opcode,
        schema::{transformer::SchemaTransformer, SchemaDocument},
        utility::bigint_to_bits,
        vm::{entry, value::Value, Config, Environment},
    };

    fn environment(contract: Contract) -> anyhow::Result<Environment> {
        let doc = SchemaDocument::default().with_message_headers();
        let labels = SchemaTransformer::new(&doc).transform()?;
        let env = Environment::new(Config::default(), labels)
            .map_err(|e| anyhow::anyhow!("{e}"))?
            .with_contract(0, contract);
        Ok(env)
    }

    #[test]
    fn receivers_start_with_the_message_on_the_stack() -> anyhow::Result<()> {
        let env = environment(Contract::new(Cell::empty())?)?;
        let state = entry::initial_state(&env, 0, RECV_INTERNAL_METHOD_ID).map_err(|e| anyhow::anyhow!("{e}"))?;

        let kinds: Vec<_> = (0..4)
            .rev()
            .filter_map(|depth| state.stack.get(depth).map(Value::kind))
            .collect();
        assert_eq!(kinds, vec!["int", "int", "cell", "slice"]);
        assert!(state.incoming.is_some());
        assert!(!state.lazy_stack);

        let names: Vec<_> = state.inputs.iter().map(|i| i.name.as_str()).collect();
        assert!(names.contains(&"in_msg_full"));
        assert!(names.contains(&"c4"));
        Ok(())
    }

    #[test]
    fn getters_take_their_arguments_lazily() -> anyhow::Result<()> {
        let key = |id: i64| -> BitVec<u8, Msb0> { bigint_to_bits(&id.into(), METHOD_ID_BITS) };
        let dictionary = build_dictionary(&[(key(85143), Cell::empty().to_slice())], METHOD_ID_BITS)?;
        let mut builder = CellBuilder::new();
        for opcode in [
            Opcode::SetCp0,
            Opcode::DictPushConst {
                dictionary,
                key_bits: 19,
            },
            Opcode::DictIGetJmpZ,
        ] {
            decoder::encode(&opcode, &mut builder)?;
        }
        let env = environment(Contract::new(builder.build()?)?)?;

        let state = entry::initial_state(&env, 0, 85143).map_err(|e| anyhow::anyhow!("{e}"))?;
        assert!(state.lazy_stack);
        assert!(state.stack.is_empty());
        assert!(state.incoming.is_none());
        Ok(())
    }

    #[test]
    fn rejects_unknown_methods_and_contracts() -> anyhow::Result<()> {
        let env = environment(Contract::new(Cell::empty())?)?;
        assert!(entry::initial_state(&env, 0, 85143).is_err());
        assert!(entry::initial_state(&env, 1, RECV_INTERNAL_METHOD_ID).is_err());
        Ok(())
    }
}
