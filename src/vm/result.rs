//! The classification of how an execution path ended.

use std::fmt::{Display, Formatter};

use serde::Serialize;

use crate::{
    disassembly::Location,
    schema::StructuralError,
};

/// The identifier of a contract taking part in an analysis.
pub type ContractId = u32;

/// How a path that ran to completion ended.
///
/// Every terminal, reachable path is classified with exactly one of these.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TerminalResult {
    /// The compute and action phases both succeeded.
    Success { exit_code: i32 },

    /// The compute phase ended with a VM exception or a contract-defined exit
    /// code.
    Failure { exit_code: i32 },

    /// The compute phase succeeded but the action phase failed.
    ActionFailure { exit_code: i32 },

    /// A cell did not match the schema label assigned to it.
    Structural { error: StructuralError },

    /// The path reached an instruction the engine does not implement.
    Unsupported { mnemonic: String },

    /// A contract reached by an inter-contract message failed, but the failure
    /// was not propagated back to the sender as a bounce.
    SoftFailure { contract: ContractId, exit_code: i32 },
}

impl TerminalResult {
    /// Gets the exit code of the result, if it has one.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Success { exit_code }
            | Self::Failure { exit_code }
            | Self::ActionFailure { exit_code }
            | Self::SoftFailure { exit_code, .. } => Some(*exit_code),
            Self::Structural { .. } | Self::Unsupported { .. } => None,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

impl Display for TerminalResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success { exit_code } => write!(f, "success ({exit_code})"),
            Self::Failure { exit_code } => write!(f, "failure ({exit_code})"),
            Self::ActionFailure { exit_code } => write!(f, "action failure ({exit_code})"),
            Self::Structural { error } => write!(f, "structural failure: {error}"),
            Self::Unsupported { mnemonic } => write!(f, "unsupported instruction {mnemonic}"),
            Self::SoftFailure {
                contract,
                exit_code,
            } => write!(f, "soft failure of contract {contract} ({exit_code})"),
        }
    }
}

/// The reasons for which a path is discarded without a result.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadReason {
    /// The constraints of the path cannot be satisfied.
    Infeasible,

    /// A method occurred on the call stack more often than allowed.
    RecursionLimit,

    /// The path forked inside a loop more often than allowed.
    LoopLimit,
}

/// One step of the trace of a path.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEntry {
    Real { location: Location, mnemonic: String },
    Artificial { name: String },
}
