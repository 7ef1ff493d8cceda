//! This module contains the state tracking functionality for the analyzer.

use std::fmt::Debug;

use crate::{
    orchestrator::CommunicationScheme,
    resolver::TestSuite,
    schema::{label::LabelArena, SchemaDocument},
    vm::{Config, ExecutionResult, VM},
    watchdog::DynWatchdog,
};

/// A marker trait that says that the type implementing it is an analyzer state.
pub trait State
where
    Self: Debug + Sized,
{
}

/// The initial state for the analyzer, holding the inputs of the analysis.
#[derive(Clone, Debug)]
pub struct HasContracts {
    /// The schema whose definitions label the cells of the analysis.
    pub schema: SchemaDocument,

    /// Which contracts accept which messages, if more than one contract takes
    /// part.
    pub scheme: Option<CommunicationScheme>,

    pub config:   Config,
    pub watchdog: DynWatchdog,
}
impl State for HasContracts {}

/// The analyzer has transformed the schema into labels.
#[derive(Clone, Debug)]
pub struct SchemaReady {
    pub labels:   LabelArena,
    pub scheme:   Option<CommunicationScheme>,
    pub config:   Config,
    pub watchdog: DynWatchdog,
}
impl State for SchemaReady {}

/// The analyzer has prepared the virtual machine to explore the contract.
#[derive(Debug)]
pub struct VMReady {
    pub vm: VM,
}
impl State for VMReady {}

/// The analyzer has explored every path it was allowed to.
#[derive(Debug)]
pub struct ExecutionComplete {
    /// The results from exploring the contract.
    pub execution_result: ExecutionResult,
}
impl State for ExecutionComplete {}

/// The analyzer has resolved the explored paths into tests.
#[derive(Debug)]
pub struct ResolutionComplete {
    pub execution_result: ExecutionResult,
    pub suite:            TestSuite,
}
impl State for ResolutionComplete {}
