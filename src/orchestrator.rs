//! This module contains the inter-contract orchestrator.
//!
//! An analysis may involve several contracts. Each path carries the persistent
//! data of every contract it has executed, and when a contract sends a
//! message that another contract of the analysis accepts, the path continues
//! with that contract handling the message. The contracts that accept a
//! message are given by a [`CommunicationScheme`].
//!
//! # Routing
//!
//! Bounced messages go back to their sender. Any other message is offered to
//! the inbound rules of the scheme in order of contract identifier and then in
//! the order the rules are listed, and is delivered to the first contract
//! whose rule accepts it. A message that no rule accepts, or that is sent in an
//! analysis without a scheme, is recorded as unresolved and not explored
//! further.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    constant::exit_code,
    error::{self, Error, LocatedError},
    opcode::artificial::Artificial,
    solver::{SymBool, SymInt},
    vm::{
        phase::{OutMessage, Phase},
        result::{ContractId, TerminalResult},
        state::VMState,
        step::{Interrupt, StepContext},
    },
};

/// Which contracts accept which messages.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct CommunicationScheme {
    /// The inbound rules of each contract.
    #[serde(default)]
    pub contracts: BTreeMap<ContractId, ContractRules>,
}

impl CommunicationScheme {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a scheme from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `text` is not a valid scheme.
    pub fn from_json(text: &str) -> error::Result<Self> {
        serde_json::from_str(text).map_err(|e| {
            LocatedError::unlocated(Error::MalformedScheme {
                reason: e.to_string(),
            })
            .into()
        })
    }

    /// Adds a rule by which `contract` accepts messages.
    #[must_use]
    pub fn with_rule(mut self, contract: ContractId, rule: InboundRule) -> Self {
        self.contracts.entry(contract).or_default().inbound.push(rule);
        self
    }

    /// Iterates over the rules that may accept a message from `sender`, along
    /// with the contract each belongs to.
    pub fn candidates(&self, sender: ContractId) -> impl Iterator<Item = (ContractId, &InboundRule)> {
        self.contracts.iter().flat_map(move |(contract, rules)| {
            rules
                .inbound
                .iter()
                .filter(move |rule| rule.accepts_sender(sender))
                .map(move |rule| (*contract, rule))
        })
    }
}

/// The inbound rules of one contract.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ContractRules {
    #[serde(default)]
    pub inbound: Vec<InboundRule>,
}

/// A range of message ops that a contract accepts, optionally only from some
/// senders.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct InboundRule {
    pub op_from: u32,
    pub op_to:   u32,

    /// The contracts the rule accepts messages from, with an empty set
    /// accepting any sender.
    #[serde(default)]
    pub senders: BTreeSet<ContractId>,
}

impl InboundRule {
    /// Creates a rule accepting ops in `op_from..=op_to` from any sender.
    #[must_use]
    pub fn new(op_from: u32, op_to: u32) -> Self {
        Self {
            op_from,
            op_to,
            senders: BTreeSet::new(),
        }
    }

    /// Restricts the rule to messages from `sender`.
    #[must_use]
    pub fn from_sender(mut self, sender: ContractId) -> Self {
        self.senders.insert(sender);
        self
    }

    #[must_use]
    pub fn accepts_sender(&self, sender: ContractId) -> bool {
        self.senders.is_empty() || self.senders.contains(&sender)
    }

    /// Gets the condition under which the rule accepts a message with `op`.
    #[must_use]
    pub fn accepts_op(&self, op: &SymInt) -> SymBool {
        let low = SymInt::from_i64(i64::from(self.op_from));
        let high = SymInt::from_i64(i64::from(self.op_to));
        op.less_than(&low).not().and(&high.less_than(op).not())
    }
}

/// A message waiting to be handled by another contract.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub target:  ContractId,
    pub message: OutMessage,
}

/// A completed contract execution on a path.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Hop {
    pub contract: ContractId,
    pub method:   i32,
    pub result:   TerminalResult,

    /// The gas used along the path by the end of the execution.
    pub gas_used: u64,
}

/// Routes `message` to the contract that accepts it, forking on the rules
/// that may or may not accept its op.
///
/// # Errors
///
/// Returns [`Err`] if forking fails.
pub fn route(ctx: &mut StepContext, state: &mut VMState, message: &OutMessage) -> Result<(), Interrupt> {
    let env = ctx.env;
    let Some(scheme) = &env.scheme else {
        debug!(state = state.id, from = message.sender, "Message sent without a communication scheme");
        state.unresolved.push_back(message.clone());
        return Ok(());
    };
    for (target, rule) in scheme.candidates(message.sender) {
        if ctx.decide(state, &rule.accepts_op(&message.op))? {
            debug!(state = state.id, from = message.sender, to = target, "Routed a message");
            state.deliveries.push_back(Delivery {
                target,
                message: message.clone(),
            });
            return Ok(());
        }
    }
    debug!(state = state.id, from = message.sender, "Message accepted by no contract");
    state.unresolved.push_back(message.clone());
    Ok(())
}

/// Ends the current contract execution with `result`, continuing the path
/// with the next message waiting to be delivered, if any.
///
/// The result of the path is that of its first execution. A later execution
/// that fails without bouncing its message turns an otherwise successful path
/// into a soft failure.
///
/// # Errors
///
/// Never fails.
pub fn finish_hop(ctx: &mut StepContext, state: &mut VMState, result: TerminalResult) -> Result<(), Interrupt> {
    state.phase = Phase::Exit;
    let later = !state.hops.is_empty();
    let returned = state.incoming.as_ref().is_some_and(|m| m.returned);
    state.hops.push_back(Hop {
        contract: state.contract,
        method:   state.method,
        result:   result.clone(),
        gas_used: state.gas_used,
    });

    if later && !result.is_success() && !returned && state.outcome.is_none() {
        state.outcome = Some(TerminalResult::SoftFailure {
            contract:  state.contract,
            exit_code: result.exit_code().unwrap_or(exit_code::FATAL),
        });
    }

    if let Some(delivery) = state.deliveries.pop_front() {
        if state.hops.len() < ctx.env.config.max_message_hops {
            state.pending = Some(Artificial::Deliver { delivery });
            return Ok(());
        }
        debug!(state = state.id, "Message hop bound reached");
        state.deliveries.push_front(delivery);
    }

    let first = state.hops.front().map_or(result, |hop| hop.result.clone());
    let result = match &state.outcome {
        Some(soft) if first.is_success() => soft.clone(),
        _ => first,
    };
    info!(state = state.id, %result, hops = state.hops.len(), "Path terminated");
    state.result = Some(result);
    Ok(())
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use crate::{
        orchestrator::{CommunicationScheme, InboundRule},
        solver::SymInt,
    };

    #[test]
    fn parses_schemes_from_json() -> anyhow::Result<()> {
        let text = json!({"contracts": {
            "1": {"inbound": [{"op_from": 1, "op_to": 5, "senders": [0]}]},
            "2": {"inbound": [{"op_from": 6, "op_to": 6}]}
        }})
        .to_string();
        let scheme = CommunicationScheme::from_json(&text).map_err(|e| anyhow::anyhow!("{e:?}"))?;

        let expected = CommunicationScheme::new()
            .with_rule(1, InboundRule::new(1, 5).from_sender(0))
            .with_rule(2, InboundRule::new(6, 6));
        assert_eq!(scheme, expected);

        let from_zero: Vec<_> = scheme.candidates(0).map(|(c, _)| c).collect();
        assert_eq!(from_zero, vec![1, 2]);
        let from_two: Vec<_> = scheme.candidates(2).map(|(c, _)| c).collect();
        assert_eq!(from_two, vec![2]);
        Ok(())
    }

    #[test]
    fn rules_accept_inclusive_op_ranges() {
        let rule = InboundRule::new(10, 20);
        let accepts = |op| rule.accepts_op(&SymInt::from_i64(op)).as_concrete();
        assert_eq!(accepts(9), Some(false));
        assert_eq!(accepts(10), Some(true));
        assert_eq!(accepts(20), Some(true));
        assert_eq!(accepts(21), Some(false));
    }

    #[test]
    fn rejects_malformed_schemes() {
        assert!(CommunicationScheme::from_json("{\"contracts\": 3}").is_err());
    }
}
