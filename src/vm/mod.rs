//! This module contains the symbolic virtual machine and the controller that
//! explores the paths of a contract execution.
//!
//! Exploration is depth-first. Each step executes one instruction of the most
//! recently forked state, so the solver's assertion stack only ever needs to
//! be popped back to the point at which that state diverged from its parent.

pub mod data;
pub mod entry;
pub mod phase;
pub mod result;
pub mod state;
pub mod step;
pub mod value;

use std::{
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};

use tracing::{debug, info, warn};

use crate::{
    constant::{
        DEFAULT_GAS_LIMIT,
        DEFAULT_MAX_LOOP_ITERATIONS,
        DEFAULT_MAX_MESSAGE_HOPS,
        DEFAULT_MAX_RECURSION_DEPTH,
        DEFAULT_MAX_SCHEMA_DEPTH,
        DEFAULT_SOLVER_TIMEOUT_MS,
        RECV_EXTERNAL_METHOD_ID,
        RECV_INTERNAL_METHOD_ID,
    },
    contract::Contract,
    error::execution::{Error, Errors, Result},
    orchestrator::CommunicationScheme,
    schema::{
        label::{LabelArena, LabelId},
        EXTERNAL_MESSAGE_HEADER,
        INTERNAL_MESSAGE_HEADER,
    },
    solver::SolverSession,
    vm::{
        result::{ContractId, DeadReason},
        state::{StateId, VMState},
    },
    watchdog::{
        AnyOf,
        DynStopStrategy,
        DynWatchdog,
        Exhaustive,
        ExitCodesObserved,
        FirstFailure,
        TimeoutWatchdog,
        Watchdog,
    },
};

/// The symbolic virtual machine, exploring every feasible path through the
/// methods of a contract.
#[derive(Debug)]
pub struct VM {
    /// The contracts, schema and configuration of the analysis.
    env: Environment,

    /// The incremental solver shared by all paths.
    solver: SolverSession,

    /// The states still to be explored, with the next one on top.
    work: Vec<VMState>,

    /// The identifier given to the next state created.
    next_id: StateId,

    /// The states whose paths have terminated.
    terminated: Vec<VMState>,

    /// The paths discarded without a result.
    dead: Vec<(StateId, DeadReason)>,

    /// Decides whether the exploration has seen enough.
    stop: DynStopStrategy,

    /// A watchdog that gets polled at intervals to check whether the analysis
    /// needs to exit.
    watchdog: DynWatchdog,

    /// The watchdog enforcing the configured timeout, if any.
    deadline: Option<TimeoutWatchdog>,

    /// Whether the exploration ended before every path was explored.
    stopped: bool,

    /// Any errors that were encountered during the course of execution.
    errors: Errors,

    /// The number of steps executed so far.
    steps: usize,
}

impl VM {
    /// Constructs a virtual machine that explores the methods of contract
    /// `start` selected by the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the contract or a selected method does not exist.
    pub fn new(env: Environment, start: ContractId, watchdog: DynWatchdog) -> Result<Self> {
        let contract = env.contract(start)?;
        let methods: Vec<i32> = match env.config.methods {
            MethodSelection::All => contract.methods().map(|(id, _)| id).collect(),
            MethodSelection::Specific(id) => vec![id],
            MethodSelection::Receivers => contract
                .methods()
                .map(|(id, _)| id)
                .filter(|id| matches!(*id, RECV_INTERNAL_METHOD_ID | RECV_EXTERNAL_METHOD_ID))
                .collect(),
        };

        let mut next_id = 0;
        let mut work = Vec::with_capacity(methods.len());
        // Reversed so that the lowest method id is explored first.
        for method in methods.into_iter().rev() {
            let mut state = entry::initial_state(&env, start, method)?;
            state.id = next_id;
            next_id += 1;
            work.push(state);
        }
        info!(contract = start, states = work.len(), "Prepared initial states");

        let solver = SolverSession::new(env.config.solver_timeout_ms);
        let stop = env.config.stop_strategy();
        let deadline = env.config.timeout.map(TimeoutWatchdog::new);
        Ok(Self {
            env,
            solver,
            work,
            next_id,
            terminated: Vec::new(),
            dead: Vec::new(),
            stop,
            watchdog,
            deadline,
            stopped: false,
            errors: Errors::new(),
            steps: 0,
        })
    }

    /// Explores paths until none remain, or until the stop strategy, the
    /// watchdog or the timeout ends the exploration early.
    ///
    /// An early stop is not an error. The paths that terminated before it are
    /// kept, and [`ExecutionResult::stopped`] records that the exploration is
    /// incomplete.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if a fatal error occurred. Exploration stops at the
    /// first such error, but the paths that had terminated before it can still
    /// be collected with [`Self::consume`].
    pub fn execute(&mut self) -> std::result::Result<(), Errors> {
        let poll_interval = self.watchdog.poll_every().max(1);
        let deadline_interval = self.deadline.as_ref().map_or(usize::MAX, Watchdog::poll_every).max(1);
        while let Some(state) = self.work.pop() {
            if self.should_stop(poll_interval, deadline_interval) {
                info!(steps = self.steps, "Exploration stopped by watchdog");
                self.work.push(state);
                self.stopped = true;
                break;
            }
            self.steps += 1;

            let id = state.id;
            let step = match step::step(&self.env, &mut self.solver, state) {
                Ok(step) => step,
                Err(error) => {
                    warn!(state = id, %error, "Exploration aborted");
                    self.errors.add(error);
                    self.stopped = true;
                    break;
                }
            };

            if let Some(reason) = step.dead {
                self.dead.push((id, reason));
            }
            for mut fork in step.forks {
                fork.id = self.next_id;
                self.next_id += 1;
                debug!(parent = id, state = fork.id, "Forked state");
                self.work.push(fork);
            }
            if let Some(state) = step.state {
                if state.is_terminated() {
                    if self.finish(state) {
                        self.stopped = true;
                        break;
                    }
                } else {
                    self.work.push(state);
                }
            }
        }

        info!(
            steps = self.steps,
            terminated = self.terminated.len(),
            dead = self.dead.len(),
            remaining = self.work.len(),
            "Exploration finished"
        );
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors.clone())
        }
    }

    /// Records a terminated `state`, returning whether the exploration should
    /// stop.
    fn finish(&mut self, state: VMState) -> bool {
        if !self.solver.check(&state.path) {
            debug!(state = state.id, "Terminated path is infeasible");
            self.dead.push((state.id, DeadReason::Infeasible));
            return false;
        }
        let Some(result) = &state.result else {
            return false;
        };
        debug!(state = state.id, %result, gas = state.gas_used, "Path terminated");
        let stop = self.stop.observe(result);
        self.terminated.push(state);
        stop
    }

    /// Polls the watchdog and the deadline, each on its own interval.
    fn should_stop(&self, poll_interval: usize, deadline_interval: usize) -> bool {
        let watchdog = self.steps % poll_interval == 0 && self.watchdog.should_stop();
        let deadline = self.steps % deadline_interval == 0
            && self.deadline.as_ref().is_some_and(Watchdog::should_stop);
        watchdog || deadline
    }

    /// Gets the environment of the analysis.
    #[must_use]
    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Gets the states whose paths have terminated so far.
    #[must_use]
    pub fn terminated(&self) -> &[VMState] {
        &self.terminated
    }

    /// Gets the number of states still waiting to be explored.
    #[must_use]
    pub fn remaining_state_count(&self) -> usize {
        self.work.len()
    }

    /// Consumes the virtual machine to produce the results of its exploration.
    #[must_use]
    pub fn consume(self) -> ExecutionResult {
        ExecutionResult {
            env:     self.env,
            solver:  self.solver,
            states:  self.terminated,
            dead:    self.dead,
            errors:  self.errors,
            stopped: self.stopped,
            steps:   self.steps,
        }
    }
}

/// The results of exploring a contract.
#[derive(Debug)]
pub struct ExecutionResult {
    pub env: Environment,

    /// The solver holding the assertions of the last explored path, used to
    /// produce models for the terminated paths.
    pub solver: SolverSession,

    /// The states whose paths terminated, in the order they terminated.
    pub states: Vec<VMState>,

    /// The paths discarded without a result.
    pub dead: Vec<(StateId, DeadReason)>,

    /// The errors that ended the exploration, if any.
    pub errors: Errors,

    /// Whether the exploration ended before every path was explored.
    pub stopped: bool,

    /// The number of steps executed.
    pub steps: usize,
}

/// The contracts, schema and configuration shared by every path of an
/// analysis.
#[derive(Debug)]
pub struct Environment {
    pub config: Config,

    /// The contracts taking part in the analysis.
    pub contracts: BTreeMap<ContractId, Contract>,

    /// The labels produced by transforming the schema.
    pub labels: LabelArena,

    /// Which contracts accept which messages, if the analysis involves more
    /// than one contract.
    pub scheme: Option<CommunicationScheme>,

    /// The label of inbound message bodies.
    pub body_label: Option<LabelId>,

    /// The label of persistent data that is not known concretely.
    pub data_label: Option<LabelId>,

    /// The labels of inbound message headers.
    pub internal_header: Option<LabelId>,
    pub external_header: Option<LabelId>,
}

impl Environment {
    /// Creates an environment with no contracts, resolving the label names the
    /// `config` refers to in `labels`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the config names a type that `labels` does not
    /// contain.
    pub fn new(config: Config, labels: LabelArena) -> Result<Self> {
        let resolve = |name: &Option<String>| -> Result<Option<LabelId>> {
            match name {
                Some(name) => labels
                    .by_name(name)
                    .map(Some)
                    .ok_or_else(|| Error::UnknownLabel { name: name.clone() }.into()),
                None => Ok(None),
            }
        };
        let body_label = resolve(&config.message_body_type)?;
        let data_label = resolve(&config.persistent_data_type)?;
        let internal_header = labels.by_name(INTERNAL_MESSAGE_HEADER);
        let external_header = labels.by_name(EXTERNAL_MESSAGE_HEADER);

        Ok(Self {
            config,
            contracts: BTreeMap::new(),
            labels,
            scheme: None,
            body_label,
            data_label,
            internal_header,
            external_header,
        })
    }

    /// Adds `contract` to the analysis under `id`.
    #[must_use]
    pub fn with_contract(mut self, id: ContractId, contract: Contract) -> Self {
        self.contracts.insert(id, contract);
        self
    }

    #[must_use]
    pub fn with_scheme(mut self, scheme: CommunicationScheme) -> Self {
        self.scheme = Some(scheme);
        self
    }

    /// Gets the contract with the given `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if no such contract takes part in the analysis.
    pub fn contract(&self, id: ContractId) -> std::result::Result<&Contract, Error> {
        self.contracts.get(&id).ok_or(Error::MissingContract { id })
    }
}

/// The methods of the starting contract to explore.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum MethodSelection {
    /// Every method in the method table.
    #[default]
    All,

    /// Only the method with the given id.
    Specific(i32),

    /// Only `recv_internal` and `recv_external`.
    Receivers,
}

/// The configuration for the symbolic virtual machine.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// The gas available to a single compute phase.
    pub gas_limit: u64,

    /// The number of times a method may occur on the call stack at once.
    pub max_recursion_depth: u32,

    /// The number of times a path may fork within one execution of a loop.
    pub max_loop_iterations: u32,

    /// How deep schema labels are walked when generating structural
    /// constraints.
    pub max_schema_depth: usize,

    /// The number of inter-contract deliveries along one path.
    pub max_message_hops: usize,

    /// The wall-clock time after which exploration stops.
    pub timeout: Option<Duration>,

    /// Whether to stop at the first path that does not succeed.
    pub stop_on_first_error: bool,

    /// Exit codes whose observation, taken together, ends exploration.
    pub stop_exit_codes: BTreeSet<i32>,

    /// Whether a failing receiver bounces the inbound message.
    pub analyze_bounced_messages: bool,

    /// Whether outbound messages are parsed after the action phase.
    pub analyze_out_messages: bool,

    /// The timeout of a single solver query.
    pub solver_timeout_ms: u32,

    pub methods: MethodSelection,

    /// The name of the schema type of inbound message bodies.
    pub message_body_type: Option<String>,

    /// The name of the schema type of persistent data.
    pub persistent_data_type: Option<String>,
}

impl Config {
    /// Sets the `gas_limit` config parameter to `value`.
    #[must_use]
    pub fn with_gas_limit(mut self, value: u64) -> Self {
        self.gas_limit = value;
        self
    }

    /// Sets the `max_recursion_depth` config parameter to `value`.
    #[must_use]
    pub fn with_max_recursion_depth(mut self, value: u32) -> Self {
        self.max_recursion_depth = value;
        self
    }

    /// Sets the `max_loop_iterations` config parameter to `value`.
    #[must_use]
    pub fn with_max_loop_iterations(mut self, value: u32) -> Self {
        self.max_loop_iterations = value;
        self
    }

    /// Sets the `max_schema_depth` config parameter to `value`.
    #[must_use]
    pub fn with_max_schema_depth(mut self, value: usize) -> Self {
        self.max_schema_depth = value;
        self
    }

    /// Sets the `max_message_hops` config parameter to `value`.
    #[must_use]
    pub fn with_max_message_hops(mut self, value: usize) -> Self {
        self.max_message_hops = value;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, value: Duration) -> Self {
        self.timeout = Some(value);
        self
    }

    #[must_use]
    pub fn with_stop_on_first_error(mut self, value: bool) -> Self {
        self.stop_on_first_error = value;
        self
    }

    /// Adds `codes` to the exit codes that end exploration once all have been
    /// observed.
    #[must_use]
    pub fn with_stop_exit_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.stop_exit_codes.extend(codes);
        self
    }

    #[must_use]
    pub fn with_analyze_bounced_messages(mut self, value: bool) -> Self {
        self.analyze_bounced_messages = value;
        self
    }

    #[must_use]
    pub fn with_analyze_out_messages(mut self, value: bool) -> Self {
        self.analyze_out_messages = value;
        self
    }

    #[must_use]
    pub fn with_solver_timeout_ms(mut self, value: u32) -> Self {
        self.solver_timeout_ms = value;
        self
    }

    #[must_use]
    pub fn with_methods(mut self, value: MethodSelection) -> Self {
        self.methods = value;
        self
    }

    #[must_use]
    pub fn with_message_body_type(mut self, name: impl Into<String>) -> Self {
        self.message_body_type = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_persistent_data_type(mut self, name: impl Into<String>) -> Self {
        self.persistent_data_type = Some(name.into());
        self
    }

    /// Builds the stop strategy the configuration asks for.
    #[must_use]
    pub fn stop_strategy(&self) -> DynStopStrategy {
        match (self.stop_on_first_error, self.stop_exit_codes.is_empty()) {
            (false, true) => Box::new(Exhaustive),
            (true, true) => Box::new(FirstFailure),
            (false, false) => Box::new(ExitCodesObserved::new(self.stop_exit_codes.iter().copied())),
            (true, false) => Box::new(
                AnyOf::new()
                    .with(FirstFailure)
                    .with(ExitCodesObserved::new(self.stop_exit_codes.iter().copied())),
            ),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gas_limit: DEFAULT_GAS_LIMIT,
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            max_loop_iterations: DEFAULT_MAX_LOOP_ITERATIONS,
            max_schema_depth: DEFAULT_MAX_SCHEMA_DEPTH,
            max_message_hops: DEFAULT_MAX_MESSAGE_HOPS,
            timeout: None,
            stop_on_first_error: false,
            stop_exit_codes: BTreeSet::new(),
            analyze_bounced_messages: false,
            analyze_out_messages: false,
            solver_timeout_ms: DEFAULT_SOLVER_TIMEOUT_MS,
            methods: MethodSelection::All,
            message_body_type: None,
            persistent_data_type: None,
        }
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeSet;

    use crate::{
        cell::{Cell, CellBuilder},
        contract::Contract,
        disassembly::decoder,
        opcode::{arithmetic::Comparison, Opcode},
        schema::label::LabelArena,
        vm::{Config, Environment, VM},
        watchdog::LazyWatchdog,
    };

    /// `LDU 32; DROP; EQINT 7; THROWIF 100` over the message body.
    fn op_checking_code() -> anyhow::Result<Cell> {
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
        Ok(builder.build()?)
    }

    fn vm(config: Config) -> anyhow::Result<VM> {
        let env = Environment::new(config, LabelArena::new())
            .map_err(|e| anyhow::anyhow!("{e}"))?
            .with_contract(0, Contract::new(op_checking_code()?)?);
        VM::new(env, 0, LazyWatchdog.in_rc()).map_err(|e| anyhow::anyhow!("{e}"))
    }

    #[test]
    fn explores_every_feasible_path() -> anyhow::Result<()> {
        let mut vm = vm(Config::default())?;
        vm.execute().map_err(|e| anyhow::anyhow!("{e:?}"))?;
        let result = vm.consume();

        let codes: BTreeSet<_> = result
            .states
            .iter()
            .filter_map(|s| s.result.as_ref().and_then(|r| r.exit_code()))
            .collect();
        assert_eq!(codes, BTreeSet::from([0, 9, 100]));
        assert!(!result.stopped);
        assert!(result.errors.is_empty());
        Ok(())
    }

    #[test]
    fn stops_once_the_requested_codes_are_seen() -> anyhow::Result<()> {
        let mut vm = vm(Config::default().with_stop_exit_codes([100]))?;
        vm.execute().map_err(|e| anyhow::anyhow!("{e:?}"))?;
        let result = vm.consume();

        assert!(result.stopped);
        let last = result.states.last().and_then(|s| s.result.as_ref()).and_then(|r| r.exit_code());
        assert_eq!(last, Some(100));
        Ok(())
    }

    #[test]
    fn rejects_unknown_type_names() {
        let config = Config::default().with_message_body_type("Missing");
        assert!(Environment::new(config, LabelArena::new()).is_err());
    }
}
