//! Agent-facing side of the bridge: action registration, decision intake,
//! and the epoch bookkeeping that keeps stale decisions out of the executor.
//!
//! The [`AgentTransport`] trait abstracts the wire (the shipped
//! implementation is [`crate::transport::WsTransport`]); the bridge itself
//! only tracks which actions are registered and under which epoch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::catalog::{AbstractAction, ActionKind};
use crate::Result;

/// A decision received from the agent.
#[derive(Debug, Clone)]
pub struct AgentChoice {
    /// Opaque decision id, echoed back in the result.
    pub id: String,
    /// Wire name of the chosen action.
    pub name: String,
    /// Raw parameters, validated later against the current snapshot.
    pub data: Value,
}

/// What came out of one bounded wait for a decision.
#[derive(Debug)]
pub enum ChoiceOutcome {
    /// A decision for a currently-registered action.
    Decision(AgentChoice, ActionKind),
    /// The wait slice elapsed with no decision. The caller re-polls the page
    /// and waits again; the request stays pending.
    TimedOut,
    /// A decision arrived for an action that is no longer registered. It has
    /// already been answered with a failed result and must not be executed.
    Stale(AgentChoice),
}

/// Wire operations the bridge needs from an agent connection.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Advertise actions the agent may choose from now on.
    async fn register_actions(&self, actions: &[AbstractAction]) -> Result<()>;

    /// Withdraw previously advertised actions.
    async fn unregister_actions(&self, names: &[&str]) -> Result<()>;

    /// Ask the agent to pick one of the named actions now.
    async fn request_decision(&self, state: &str, query: &str, names: &[&str]) -> Result<()>;

    /// Push free-form context the agent does not need to act on.
    async fn send_context(&self, message: &str) -> Result<()>;

    /// Report the outcome of a decision.
    async fn send_result(&self, id: &str, success: bool, message: Option<&str>) -> Result<()>;

    /// Wait up to `timeout` for the next incoming decision. `Ok(None)` means
    /// the slice elapsed; `Err` means the connection is gone.
    async fn next_choice(&self, timeout: Duration) -> Result<Option<AgentChoice>>;
}

struct Registered {
    kind: ActionKind,
    epoch: u64,
}

/// Tracks the registered action set and its epoch on top of a transport.
///
/// At most one decision request is outstanding at a time; the phase loop
/// enforces that by only calling [`AgentBridge::request_decision`] once per
/// epoch.
pub struct AgentBridge {
    transport: Arc<dyn AgentTransport>,
    registered: HashMap<String, Registered>,
    epoch: u64,
}

impl AgentBridge {
    pub fn new(transport: Arc<dyn AgentTransport>) -> Self {
        Self {
            transport,
            registered: HashMap::new(),
            epoch: 0,
        }
    }

    /// The epoch of the currently registered action set.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Names of the currently registered actions.
    pub fn registered_names(&self) -> Vec<&str> {
        self.registered.keys().map(String::as_str).collect()
    }

    /// Replace the registered action set for a new epoch.
    ///
    /// Everything previously registered is withdrawn first, so a decision
    /// naming an old action can only arrive as unregistered (and therefore
    /// stale). Epochs must be strictly increasing.
    pub async fn sync(&mut self, epoch: u64, actions: &[AbstractAction]) -> Result<()> {
        debug_assert!(epoch > self.epoch || (epoch == 0 && self.epoch == 0));
        if !self.registered.is_empty() {
            let old: Vec<&str> = self.registered.keys().map(String::as_str).collect();
            self.transport.unregister_actions(&old).await?;
            self.registered.clear();
        }
        // Decisions still queued were made against the old action set. A
        // later epoch may re-register the same action name, so they must be
        // answered now, before the new set exists to alias them.
        while let Some(choice) = self.transport.next_choice(Duration::ZERO).await? {
            warn!(action = %choice.name, "dropping decision from a superseded action set");
            self.transport
                .send_result(
                    &choice.id,
                    false,
                    Some("That action is no longer available."),
                )
                .await?;
        }
        if !actions.is_empty() {
            self.transport.register_actions(actions).await?;
            for action in actions {
                self.registered.insert(
                    action.kind.name().to_string(),
                    Registered {
                        kind: action.kind,
                        epoch,
                    },
                );
            }
        }
        self.epoch = epoch;
        debug!(epoch, count = actions.len(), "action set synced");
        Ok(())
    }

    /// Ask the agent to pick from the currently registered actions.
    pub async fn request_decision(&self, state: &str, query: &str) -> Result<()> {
        let names = self.registered_names();
        self.transport.request_decision(state, query, &names).await
    }

    /// Wait one bounded slice for a decision.
    ///
    /// Stale decisions (unknown action name, or an action registered under
    /// an earlier epoch) are answered with a failed result here and reported
    /// as [`ChoiceOutcome::Stale`] so the caller can keep the request
    /// pending without ever executing them.
    pub async fn await_choice(&self, slice: Duration) -> Result<ChoiceOutcome> {
        let Some(choice) = self.transport.next_choice(slice).await? else {
            return Ok(ChoiceOutcome::TimedOut);
        };
        match self.registered.get(&choice.name) {
            Some(reg) if reg.epoch == self.epoch => {
                Ok(ChoiceOutcome::Decision(choice.clone(), reg.kind))
            }
            _ => {
                warn!(action = %choice.name, epoch = self.epoch, "dropping stale decision");
                self.transport
                    .send_result(
                        &choice.id,
                        false,
                        Some("That action is no longer available."),
                    )
                    .await?;
                Ok(ChoiceOutcome::Stale(choice))
            }
        }
    }

    /// Report a decision's outcome back to the agent.
    pub async fn report_result(&self, id: &str, success: bool, message: Option<&str>) -> Result<()> {
        self.transport.send_result(id, success, message).await
    }

    /// Push narration the agent does not need to act on.
    pub async fn report_context(&self, message: &str) -> Result<()> {
        self.transport.send_context(message).await
    }
}
