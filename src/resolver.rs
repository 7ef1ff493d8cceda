//! This module contains the test/coverage resolver, which turns the
//! terminated paths of an exploration into concrete tests.
//!
//! For each path the solver is asked for a single model of the path
//! constraints. Every symbolic value the path received or produced is then
//! collapsed under that model into a [`TestValue`], and the real instructions
//! the path executed are collected for coverage.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use bitvec::{order::Msb0, vec::BitVec};
use itertools::Itertools;
use num_bigint::BigInt;
use serde::{Serialize, Serializer};
use tracing::{debug, info};
use z3::{
    ast::{Bool, BV},
    Model,
};

use crate::{
    cell::{boc, Cell},
    constant::{CELL_DATA_BITS, MAX_CELL_REFS},
    disassembly::{sweep, Location, StaticCode},
    error::execution::{Error, Result},
    orchestrator::Hop,
    solver::{SolverSession, SymInt},
    utility::{bigint_to_bits, bv_to_bigint},
    vm::{
        result::{ContractId, DeadReason, TerminalResult, TraceEntry},
        state::{
            heap::{CellAddr, CellBits, CellOrigin, Heap, SymLen, SymRef},
            StateId,
            VMState,
        },
        value::{SymBuilder, SymSlice, Value},
        Environment,
        ExecutionResult,
    },
};

/// A concrete value of the VM, as assigned by a model of a path.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TestValue {
    Null,
    Int {
        #[serde(with = "crate::utility::decimal")]
        value: BigInt,
    },
    Cell {
        #[serde(serialize_with = "serialize_cell")]
        cell: Cell,
    },

    /// A slice over `cell`, positioned at `data_pos` bits and `ref_pos`
    /// references.
    Slice {
        #[serde(serialize_with = "serialize_cell")]
        cell:     Cell,
        data_pos: u16,
        ref_pos:  u8,
    },

    /// A builder, holding the contents of the cell it would seal into.
    Builder {
        #[serde(serialize_with = "serialize_cell")]
        cell: Cell,
    },
    Continuation,
    Tuple {
        items: Vec<TestValue>,
    },
}

impl TestValue {
    /// Gets the integer held by the value, if it is one.
    #[must_use]
    pub fn as_int(&self) -> Option<&BigInt> {
        match self {
            Self::Int { value } => Some(value),
            _ => None,
        }
    }

    /// Gets the cell held by the value, if it holds one.
    #[must_use]
    pub fn as_cell(&self) -> Option<&Cell> {
        match self {
            Self::Cell { cell } | Self::Slice { cell, .. } | Self::Builder { cell } => Some(cell),
            _ => None,
        }
    }
}

/// Serializes cells as hex-encoded bag-of-cells containers.
fn serialize_cell<S: Serializer>(cell: &Cell, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(boc::serialize_root(cell)))
}

/// A named input of a test.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TestInput {
    pub name:  String,
    pub value: TestValue,
}

/// A concrete test produced from one terminated path.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct SymbolicTest {
    /// The identifier of the state the test was resolved from.
    pub state: StateId,

    /// The contract and method the path started in.
    pub contract: ContractId,
    pub method:   i32,

    pub result: TerminalResult,

    /// The values supplied from outside the contract, in the order the path
    /// first used them.
    pub inputs: Vec<TestInput>,

    /// The stack at the end of the path, from bottom to top.
    pub outputs: Vec<TestValue>,

    /// The persistent data committed by each contract along the path.
    pub storage: BTreeMap<ContractId, TestValue>,

    pub gas_used: u64,
    pub trace:    Vec<TraceEntry>,

    /// Every contract execution along the path, in order.
    pub hops: Vec<Hop>,

    /// The number of outbound messages no contract accepted.
    pub unresolved_messages: usize,
}

impl SymbolicTest {
    /// Gets the input called `name`, if the path used one.
    #[must_use]
    pub fn input(&self, name: &str) -> Option<&TestValue> {
        self.inputs.iter().find(|i| i.name == name).map(|i| &i.value)
    }

    /// Iterates over the locations of the real instructions the path executed.
    pub fn locations(&self) -> impl Iterator<Item = Location> + '_ {
        self.trace.iter().filter_map(|entry| match entry {
            TraceEntry::Real { location, .. } => Some(*location),
            TraceEntry::Artificial { .. } => None,
        })
    }
}

/// The coverage of one method.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MethodCoverage {
    pub contract: ContractId,
    pub method:   i32,

    /// The instructions statically reachable within the method, and how many
    /// of them some test executed.
    pub total:   usize,
    pub covered: usize,

    /// The same, including every method reachable through `CALLDICT`.
    pub transitive_total:   usize,
    pub transitive_covered: usize,
}

impl MethodCoverage {
    #[must_use]
    pub fn percentage(&self) -> f64 {
        percentage(self.covered, self.total)
    }

    #[must_use]
    pub fn transitive_percentage(&self) -> f64 {
        percentage(self.transitive_covered, self.transitive_total)
    }
}

#[allow(clippy::cast_precision_loss)] // Instruction counts are far below 2^52
fn percentage(covered: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        covered as f64 * 100.0 / total as f64
    }
}

/// The coverage of the methods of every contract in an analysis.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CoverageReport {
    pub methods: Vec<MethodCoverage>,

    /// Every distinct instruction location any test executed.
    pub locations: BTreeSet<Location>,
}

impl CoverageReport {
    /// Computes the coverage that `tests` achieve over the contracts of `env`.
    #[must_use]
    pub fn new(env: &Environment, tests: &[SymbolicTest]) -> Self {
        let locations: BTreeSet<Location> = tests.iter().flat_map(SymbolicTest::locations).collect();

        let mut methods = Vec::new();
        for (contract_id, contract) in &env.contracts {
            let swept: BTreeMap<i32, StaticCode> = contract.methods().map(|(id, code)| (id, sweep(code))).collect();
            for (method, code) in &swept {
                let transitive = transitive_locations(&swept, *method);
                methods.push(MethodCoverage {
                    contract: *contract_id,
                    method: *method,
                    total: code.locations.len(),
                    covered: code.locations.intersection(&locations).count(),
                    transitive_total: transitive.len(),
                    transitive_covered: transitive.intersection(&locations).count(),
                });
            }
        }

        Self { methods, locations }
    }

    /// Gets the coverage of `method` of `contract`.
    #[must_use]
    pub fn method(&self, contract: ContractId, method: i32) -> Option<&MethodCoverage> {
        self.methods
            .iter()
            .find(|m| m.contract == contract && m.method == method)
    }

    /// Exports the covered locations as de-duplicated (code cell hash, bit
    /// offset) pairs.
    #[must_use]
    pub fn export(&self) -> Vec<(String, u16)> {
        self.locations
            .iter()
            .map(|location| (location.cell.to_string(), location.offset))
            .collect_vec()
    }
}

/// Collects the locations of `method` and of every method it reaches through
/// `CALLDICT`.
fn transitive_locations(
    swept: &BTreeMap<i32, StaticCode>,
    method: i32,
) -> BTreeSet<Location> {
    let mut seen = BTreeSet::new();
    let mut pending = vec![method];
    let mut locations = BTreeSet::new();
    while let Some(id) = pending.pop() {
        if !seen.insert(id) {
            continue;
        }
        if let Some(code) = swept.get(&id) {
            locations.extend(code.locations.iter().copied());
            pending.extend(code.calls.iter().copied());
        }
    }
    locations
}

/// The tests and coverage resolved from an exploration.
#[derive(Clone, Debug, Serialize)]
pub struct TestSuite {
    pub tests:    Vec<SymbolicTest>,
    pub coverage: CoverageReport,

    /// The paths discarded without a test.
    pub dead: Vec<(StateId, DeadReason)>,

    /// Whether the exploration ended before every path was explored.
    pub stopped: bool,
}

impl TestSuite {
    /// Gets the tests whose result has the given exit code.
    pub fn with_exit_code(&self, code: i32) -> impl Iterator<Item = &SymbolicTest> {
        self.tests
            .iter()
            .filter(move |t| t.result.exit_code() == Some(code))
    }
}

/// Resolves every terminated path of `result` into a test.
///
/// # Errors
///
/// Returns [`Err`] if the solver cannot produce a model for a path it
/// previously found feasible, or if a resolved cell is malformed.
pub fn resolve(result: &mut ExecutionResult) -> Result<TestSuite> {
    let mut tests = Vec::with_capacity(result.states.len());
    for state in &result.states {
        tests.push(resolve_state(&mut result.solver, state)?);
    }
    let coverage = CoverageReport::new(&result.env, &tests);
    info!(
        tests = tests.len(),
        locations = coverage.locations.len(),
        "Resolved tests"
    );
    Ok(TestSuite {
        tests,
        coverage,
        dead: result.dead.clone(),
        stopped: result.stopped,
    })
}

/// Resolves the terminated `state` into a test.
///
/// # Errors
///
/// Returns [`Err`] if the state has not terminated, if the solver cannot
/// produce a model of its path, or if a resolved cell is malformed.
pub fn resolve_state(solver: &mut SolverSession, state: &VMState) -> Result<SymbolicTest> {
    let result = state
        .result
        .clone()
        .ok_or_else(|| Error::inconsistent(format!("state {} has not terminated", state.id)))?;
    let model = solver.model(&state.path).ok_or_else(|| Error::SolverFailure {
        reason: format!("no model for the path of state {}", state.id),
    })?;

    let mut collapser = Collapser::new(&model, &state.heap);
    let inputs = state
        .inputs
        .iter()
        .map(|input| {
            Ok(TestInput {
                name:  input.name.clone(),
                value: collapser.value(&input.value)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let outputs = state
        .stack
        .iter()
        .map(|value| collapser.value(value))
        .collect::<Result<Vec<_>>>()?;
    let storage = state
        .storage
        .iter()
        .map(|(contract, value)| Ok((*contract, collapser.value(value)?)))
        .collect::<Result<BTreeMap<_, _>>>()?;

    let (contract, method) = state
        .hops
        .front()
        .map_or((state.contract, state.method), |hop| (hop.contract, hop.method));
    debug!(state = state.id, %result, inputs = inputs.len(), "Resolved test");

    Ok(SymbolicTest {
        state: state.id,
        contract,
        method,
        result,
        inputs,
        outputs,
        storage,
        gas_used: state.gas_used,
        trace: state.trace.iter().cloned().collect(),
        hops: state.hops.iter().cloned().collect(),
        unresolved_messages: state.unresolved.len(),
    })
}

/// Collapses symbolic values into concrete ones under a model.
struct Collapser<'a> {
    model: &'a Model,
    heap:  &'a Heap,
    cells: HashMap<CellAddr, Cell>,
}

impl<'a> Collapser<'a> {
    fn new(model: &'a Model, heap: &'a Heap) -> Self {
        Self {
            model,
            heap,
            cells: HashMap::new(),
        }
    }

    fn value(&mut self, value: &Value) -> Result<TestValue> {
        let resolved = match value {
            Value::Null => TestValue::Null,
            Value::Int(int) => TestValue::Int {
                value: self.int(int)?,
            },
            Value::Cell(reference) => TestValue::Cell {
                cell: self.reference(reference)?,
            },
            Value::Slice(slice) => self.slice(slice)?,
            Value::Builder(builder) => TestValue::Builder {
                cell: self.builder(builder)?,
            },
            Value::Continuation(_) => TestValue::Continuation,
            Value::Tuple(items) => TestValue::Tuple {
                items: items.iter().map(|v| self.value(v)).collect::<Result<_>>()?,
            },
        };
        Ok(resolved)
    }

    fn int(&self, value: &SymInt) -> Result<BigInt> {
        match value {
            SymInt::Concrete(value) => Ok(value.clone()),
            SymInt::Symbolic(bv) => bv_to_bigint(self.model, bv, true).ok_or_else(no_interpretation),
        }
    }

    fn boolean(&self, formula: &Bool) -> Result<bool> {
        self.model
            .eval(formula, true)
            .and_then(|b| b.as_bool())
            .ok_or_else(no_interpretation)
    }

    #[allow(clippy::cast_possible_truncation)] // Lengths are 16-bit terms
    fn length(&self, length: &SymLen) -> Result<u16> {
        match length {
            SymLen::Concrete(n) => Ok(*n),
            SymLen::Symbolic(bv) => self
                .model
                .eval(bv, true)
                .and_then(|v: BV| v.as_u64())
                .map(|v| v as u16)
                .ok_or_else(no_interpretation),
        }
    }

    fn bits(&self, bits: &CellBits) -> Result<BitVec<u8, Msb0>> {
        match bits {
            CellBits::Concrete(bits) => Ok(bits.clone()),
            CellBits::Symbolic { data, len } => {
                let len = usize::from(self.length(len)?).min(CELL_DATA_BITS as usize);
                let value = bv_to_bigint(self.model, data, false).ok_or_else(no_interpretation)?;
                let mut bits = bigint_to_bits(&value, CELL_DATA_BITS as usize);
                bits.truncate(len);
                Ok(bits)
            }
        }
    }

    fn reference(&mut self, reference: &SymRef) -> Result<Cell> {
        match reference {
            SymRef::Concrete(addr) => self.cell(*addr),
            SymRef::Ite {
                condition,
                then,
                otherwise,
            } => {
                if self.boolean(condition)? {
                    self.reference(then)
                } else {
                    self.reference(otherwise)
                }
            }
        }
    }

    fn cell(&mut self, addr: CellAddr) -> Result<Cell> {
        if let Some(cell) = self.cells.get(&addr) {
            return Ok(cell.clone());
        }
        let heap_cell = self.heap.get(addr)?;
        let cell = match &heap_cell.origin {
            CellOrigin::Concrete(cell) => cell.clone(),
            CellOrigin::Input { .. } | CellOrigin::Built => {
                let bits = self.bits(&heap_cell.bits)?;
                let refs_len = usize::from(self.length(&heap_cell.refs_len)?).min(MAX_CELL_REFS);
                let mut refs = Vec::with_capacity(refs_len);
                for index in 0..refs_len {
                    // Children the path never loaded are unconstrained.
                    let child = match heap_cell.child(index) {
                        Some(child) => self.reference(child)?,
                        None => Cell::empty(),
                    };
                    refs.push(child);
                }
                Cell::new(bits, refs)?
            }
        };
        self.cells.insert(addr, cell.clone());
        Ok(cell)
    }

    fn slice(&mut self, slice: &SymSlice) -> Result<TestValue> {
        Ok(TestValue::Slice {
            cell:     self.cell(slice.cell)?,
            data_pos: self.length(&slice.data_pos)?,
            ref_pos:  slice.ref_pos,
        })
    }

    fn builder(&mut self, builder: &SymBuilder) -> Result<Cell> {
        let bits = self.bits(&builder.bits)?;
        let refs = builder
            .refs
            .iter()
            .map(|r| self.reference(r))
            .collect::<Result<Vec<_>>>()?;
        Ok(Cell::new(bits, refs)?)
    }
}

fn no_interpretation() -> crate::error::execution::LocatedError {
    Error::SolverFailure {
        reason: "the model does not interpret a path value".into(),
    }
    .into()
}

#[cfg(test)]
mod test {
    use num_bigint::BigInt;

    use crate::{
        cell::CellBuilder,
        contract::Contract,
        disassembly::decoder,
        opcode::{arithmetic::Comparison, Opcode},
        resolver,
        schema::label::LabelArena,
        vm::{Config, Environment, VM},
        watchdog::LazyWatchdog,
    };

    fn explore() -> anyhow::Result<resolver::TestSuite> {
        let mut builder = CellBuilder::new();
        for opcode in [
            Opcode::LoadInt {
                width:   32,
                signed:  false,
                preload: false,
            },
            Opcode::Pop(0),
            Opcode::CompareInt(Comparison::Equal, 7),
            Opcode::ThrowIf(100),
        ] {
            decoder::encode(&opcode, &mut builder)?;
        }
        let env = Environment::new(Config::default(), LabelArena::new())
            .map_err(|e| anyhow::anyhow!("{e}"))?
            .with_contract(0, Contract::new(builder.build()?)?);
        let mut vm = VM::new(env, 0, LazyWatchdog.in_rc()).map_err(|e| anyhow::anyhow!("{e}"))?;
        vm.execute().map_err(|e| anyhow::anyhow!("{e:?}"))?;
        let mut result = vm.consume();
        resolver::resolve(&mut result).map_err(|e| anyhow::anyhow!("{e}"))
    }

    #[test]
    fn resolves_inputs_that_drive_each_path() -> anyhow::Result<()> {
        let suite = explore()?;
        assert_eq!(suite.tests.len(), 3);

        let thrown = suite
            .with_exit_code(100)
            .next()
            .ok_or_else(|| anyhow::anyhow!("no test for the thrown path"))?;
        let body = thrown
            .input("in_msg_body")
            .and_then(|v| v.as_cell())
            .ok_or_else(|| anyhow::anyhow!("no body"))?;
        assert!(body.bit_len() >= 32);
        assert_eq!(body.to_slice().preload_uint(32)?, 7);

        let short = suite
            .with_exit_code(9)
            .next()
            .ok_or_else(|| anyhow::anyhow!("no test for the short body"))?;
        let body = short
            .input("in_msg_body")
            .and_then(|v| v.as_cell())
            .ok_or_else(|| anyhow::anyhow!("no body"))?;
        assert!(body.bit_len() < 32);

        let value = thrown
            .input("msg_value")
            .and_then(|v| v.as_int())
            .ok_or_else(|| anyhow::anyhow!("no value"))?;
        assert!(*value >= BigInt::from(0));
        Ok(())
    }

    #[test]
    fn covers_every_instruction_of_the_receiver() -> anyhow::Result<()> {
        let suite = explore()?;
        let coverage = suite
            .coverage
            .method(0, 0)
            .ok_or_else(|| anyhow::anyhow!("no coverage for the receiver"))?;
        assert_eq!(coverage.total, 4);
        assert_eq!(coverage.covered, 4);
        assert!((coverage.percentage() - 100.0).abs() < f64::EPSILON);
        assert_eq!(suite.coverage.export().len(), 4);

        let json = serde_json::to_value(&suite.tests[0])?;
        assert!(json.get("result").is_some());
        Ok(())
    }
}
