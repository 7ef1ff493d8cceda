//! This module contains the definition of the analyzer itself.
//!
//! The analyzer drives a contract through the whole pipeline: the schema is
//! transformed into labels, the virtual machine explores the selected methods,
//! and the terminated paths are resolved into tests.

pub mod state;

use std::collections::BTreeMap;

use crate::{
    analyzer::state::State,
    contract::Contract,
    error,
    orchestrator::CommunicationScheme,
    resolver::{self, TestSuite},
    schema::{transformer::SchemaTransformer, SchemaDocument},
    vm::{self, result::ContractId, Environment, VM},
    watchdog::DynWatchdog,
};

/// Creates a new analyzer exploring `contract`, with the provided `config`
/// and `watchdog`.
///
/// The contract takes part in the analysis with identifier `0`.
#[must_use]
pub fn new(contract: Contract, config: vm::Config, watchdog: DynWatchdog) -> Analyzer<state::HasContracts> {
    let state = state::HasContracts {
        schema: SchemaDocument::default().with_message_headers(),
        scheme: None,
        config,
        watchdog,
    };
    Analyzer {
        contracts: BTreeMap::from([(0, contract)]),
        start: 0,
        state,
    }
}

/// The core of the analysis, the `Analyzer` is responsible for ingesting the
/// contracts and schema and outputting the tests that cover the contract.
///
/// # Enforcing Valid State Transitions
///
/// The analyzer enforces that only correct state transitions can occur through
/// use of structs that implement the exact state required by it at any given
/// point.
///
/// There is the [`Self::state`] function that provides access to the state data
/// of whichever state the analyzer is currently in.
pub struct Analyzer<S: State> {
    /// The contracts taking part in the analysis.
    contracts: BTreeMap<ContractId, Contract>,

    /// The contract whose methods are explored.
    start: ContractId,

    /// The internal state of the analyzer.
    state: S,
}

/// The safe operations available in all states.
impl<S: State> Analyzer<S> {
    /// Gets the contracts taking part in the analysis.
    pub fn contracts(&self) -> &BTreeMap<ContractId, Contract> {
        &self.contracts
    }

    /// Gets the identifier of the contract whose methods are explored.
    pub fn start(&self) -> ContractId {
        self.start
    }

    /// Gets an immutable reference to the current state of the analyzer.
    pub fn state(&self) -> &S {
        &self.state
    }
}

/// The unsafe operations available in all states.
///
/// These operations are capable of **violating the state invariants** of the
/// analyzer, and must be used with the _utmost_ care.
impl<S: State> Analyzer<S> {
    /// Forces the analyzer into the state `NS`, with the value of the state
    /// created by applying `transform` to the analyzer's current state and
    /// disregarding any safety with regard to state transitions.
    ///
    /// # Safety
    ///
    /// Do not force a state transition for the analyzer unless you totally
    /// understand the state that the analyzer is in, and the implications
    /// of doing so.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `transform` fails.
    pub unsafe fn transform_state<NS: State>(
        self,
        transform: impl FnOnce(&BTreeMap<ContractId, Contract>, ContractId, S) -> error::Result<NS>,
    ) -> error::Result<Analyzer<NS>> {
        let state = transform(&self.contracts, self.start, self.state)?;
        Ok(Analyzer {
            contracts: self.contracts,
            start: self.start,
            state,
        })
    }
}

/// Operations available on a newly-created analyzer.
impl Analyzer<state::HasContracts> {
    /// Adds another contract to the analysis under `id`, replacing any
    /// contract already known by it.
    #[must_use]
    pub fn with_contract(mut self, id: ContractId, contract: Contract) -> Self {
        self.contracts.insert(id, contract);
        self
    }

    /// Explores the methods of the contract `id` rather than those of the
    /// contract the analyzer was created with.
    #[must_use]
    pub fn starting_at(mut self, id: ContractId) -> Self {
        self.start = id;
        self
    }

    /// Sets the schema whose definitions label the cells of the analysis.
    ///
    /// The standard message header definitions are added to it.
    #[must_use]
    pub fn with_schema(mut self, schema: SchemaDocument) -> Self {
        self.state.schema = schema.with_message_headers();
        self
    }

    #[must_use]
    pub fn with_scheme(mut self, scheme: CommunicationScheme) -> Self {
        self.state.scheme = Some(scheme);
        self
    }

    /// Executes the analysis process from beginning to end, performing all
    /// the intermediate steps automatically and returning the tests.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if any step in the process fails.
    pub fn analyze(self) -> error::Result<TestSuite> {
        let analyzer = self.transform_schema()?;
        let analyzer = analyzer.prepare_vm()?;
        let analyzer = analyzer.execute()?;
        let analyzer = analyzer.resolve()?;
        Ok(analyzer.state.suite)
    }

    /// Transforms the schema into the labels the analysis works with.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the schema is malformed.
    pub fn transform_schema(self) -> error::Result<Analyzer<state::SchemaReady>> {
        unsafe {
            self.transform_state(|_, _, old_state| {
                let labels = SchemaTransformer::new(&old_state.schema).transform()?;
                Ok(state::SchemaReady {
                    labels,
                    scheme: old_state.scheme,
                    config: old_state.config,
                    watchdog: old_state.watchdog,
                })
            })
        }
    }
}

/// Operations available on an analyzer that has transformed its schema.
impl Analyzer<state::SchemaReady> {
    /// Prepares the virtual machine for the exploration of the starting
    /// contract.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the configuration names a schema type that does not
    /// exist, or if the contract or a selected method does not exist.
    pub fn prepare_vm(self) -> error::Result<Analyzer<state::VMReady>> {
        unsafe {
            self.transform_state(|contracts, start, old_state| {
                let mut env = Environment::new(old_state.config, old_state.labels)?;
                for (id, contract) in contracts {
                    env = env.with_contract(*id, contract.clone());
                }
                if let Some(scheme) = old_state.scheme {
                    env = env.with_scheme(scheme);
                }
                let vm = VM::new(env, start, old_state.watchdog)?;
                Ok(state::VMReady { vm })
            })
        }
    }
}

/// Operations available on an analyzer that has a virtual machine ready to
/// explore the contract.
impl Analyzer<state::VMReady> {
    /// Explores the paths of the contract on the [`VM`].
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the exploration hit an engine-fatal error.
    pub fn execute(self) -> error::Result<Analyzer<state::ExecutionComplete>> {
        unsafe {
            self.transform_state(|_, _, mut old_state| {
                old_state.vm.execute()?;
                let execution_result = old_state.vm.consume();
                Ok(state::ExecutionComplete { execution_result })
            })
        }
    }
}

/// Operations available on an analyzer whose exploration has completed.
impl Analyzer<state::ExecutionComplete> {
    /// Resolves the terminated paths into tests.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if a path cannot be resolved.
    pub fn resolve(self) -> error::Result<Analyzer<state::ResolutionComplete>> {
        unsafe {
            self.transform_state(|_, _, mut old_state| {
                let suite = resolver::resolve(&mut old_state.execution_result)?;
                Ok(state::ResolutionComplete {
                    execution_result: old_state.execution_result,
                    suite,
                })
            })
        }
    }
}

/// Operations available on an analyzer that has resolved its tests.
impl Analyzer<state::ResolutionComplete> {
    #[must_use]
    pub fn suite(&self) -> &TestSuite {
        &self.state.suite
    }

    /// Gets the raw results of the exploration.
    #[must_use]
    pub fn execution_result(&self) -> &vm::ExecutionResult {
        &self.state.execution_result
    }
}
