//! The phase loop: poll, classify, advertise, await, execute, report.
//!
//! One iteration per poll interval. On a phase change the epoch advances and
//! the registered action set is replaced before anything else happens, so a
//! decision made against the previous screen can never reach the page. While
//! a decision request is outstanding the loop waits in bounded slices,
//! re-polling the page between slices; the request survives slices but not
//! phase changes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bridge::{AgentBridge, ChoiceOutcome};
use crate::catalog::{numbered, Catalog};
use crate::config::BridgeConfig;
use crate::executor::{ExecutionResult, Executor};
use crate::page::{GameClient, PageSnapshot};
use crate::phase::{self, GamePhase};
use crate::{Error, Result};

/// Consecutive failed page probes tolerated before the run is declared dead.
/// A screen transition blanks a probe or two; a crashed browser blanks all
/// of them.
const MAX_CONSECUTIVE_PROBE_FAILURES: u32 = 10;

/// Drives the game from join until shutdown.
pub struct PhaseLoop {
    client: Arc<dyn GameClient>,
    bridge: AgentBridge,
    catalog: Catalog,
    executor: Executor,
    poll_interval: Duration,
    decision_slice: Duration,
    phase: GamePhase,
    pending: bool,
}

impl PhaseLoop {
    pub fn new(client: Arc<dyn GameClient>, bridge: AgentBridge, config: &BridgeConfig) -> Self {
        let executor = Executor::new(client.clone(), config.timing.clone());
        Self {
            client,
            bridge,
            catalog: Catalog::new(config.game.clone()),
            executor,
            poll_interval: Duration::from_millis(config.timing.poll_interval_ms),
            decision_slice: Duration::from_millis(config.timing.decision_slice_ms),
            phase: GamePhase::Unknown,
            pending: false,
        }
    }

    /// The agent bridge the loop drives.
    pub fn bridge(&self) -> &AgentBridge {
        &self.bridge
    }

    /// Run until `shutdown` flips true or a fatal error occurs.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut probe_failures = 0u32;
        loop {
            if *shutdown.borrow() {
                info!("shutdown requested, leaving phase loop");
                let epoch = self.bridge.epoch() + 1;
                self.bridge.sync(epoch, &[]).await.ok();
                return Ok(());
            }

            let snapshot = match self.client.snapshot().await {
                Ok(snapshot) => {
                    probe_failures = 0;
                    snapshot
                }
                Err(Error::ObservationTimeout(msg)) => {
                    probe_failures += 1;
                    if probe_failures >= MAX_CONSECUTIVE_PROBE_FAILURES {
                        return Err(Error::ObservationTimeout(format!(
                            "page unreadable for {probe_failures} consecutive polls: {msg}"
                        )));
                    }
                    warn!(probe_failures, "page probe failed: {msg}");
                    PageSnapshot::default()
                }
                Err(e) => return Err(e),
            };

            let phase = phase::detect(&snapshot);
            if phase != self.phase {
                self.enter_phase(phase, &snapshot).await?;
            }

            if self.pending {
                self.await_decision(&snapshot).await?;
            } else {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }

    /// Handle a phase change: bump the epoch, swap the action set, narrate,
    /// and request a decision if the new phase has anything to decide.
    async fn enter_phase(&mut self, phase: GamePhase, snapshot: &PageSnapshot) -> Result<()> {
        info!(from = %self.phase, to = %phase, "phase change");
        self.pending = false;

        let epoch = self.bridge.epoch() + 1;
        let actions = self.catalog.actions_for(phase, snapshot);
        self.bridge.sync(epoch, &actions).await?;

        if let Some(message) = narration(phase, snapshot) {
            self.bridge.report_context(&message).await?;
        }

        if !actions.is_empty() {
            let query = decision_query(phase);
            self.bridge
                .request_decision(&phase.to_string(), query)
                .await?;
            self.pending = true;
        }

        self.phase = phase;
        Ok(())
    }

    /// Wait one slice for the pending decision and execute it if one lands.
    async fn await_decision(&mut self, snapshot: &PageSnapshot) -> Result<()> {
        match self.bridge.await_choice(self.decision_slice).await? {
            ChoiceOutcome::TimedOut => Ok(()),
            ChoiceOutcome::Stale(choice) => {
                debug!(action = %choice.name, "stale decision dropped");
                Ok(())
            }
            ChoiceOutcome::Decision(choice, kind) => {
                let params = match self.catalog.parse_params(kind, &choice.data, snapshot) {
                    Ok(params) => params,
                    Err(message) => {
                        // Invalid parameters never reach the page; the agent
                        // is asked again via the failed result.
                        warn!(action = %choice.name, "rejected parameters: {message}");
                        self.bridge
                            .report_result(&choice.id, false, Some(&message))
                            .await?;
                        return Ok(());
                    }
                };

                match self.executor.execute(&params).await {
                    ExecutionResult::Success => {
                        debug!(action = %choice.name, "action executed");
                        self.bridge.report_result(&choice.id, true, None).await?;
                        self.pending = false;
                    }
                    ExecutionResult::Retried(attempts) => {
                        debug!(action = %choice.name, attempts, "action executed after retries");
                        self.bridge.report_result(&choice.id, true, None).await?;
                        self.pending = false;
                    }
                    ExecutionResult::Failed(message) => {
                        warn!(action = %choice.name, "action failed: {message}");
                        self.bridge
                            .report_result(&choice.id, false, Some(&message))
                            .await?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// What the agent is told when a phase begins. Only `Unknown` stays quiet.
fn narration(phase: GamePhase, snapshot: &PageSnapshot) -> Option<String> {
    match phase {
        GamePhase::Lobby => Some("You're in the lobby, waiting for the game to start.".into()),
        GamePhase::PromptEntry => Some(format!("Prompt: {}", snapshot.prompt_text)),
        GamePhase::AnswerSelection => Some(format!(
            "You ran out of time, so pick one of these prepared answers:\n{}",
            numbered(&snapshot.selection_options)
        )),
        GamePhase::Voting => Some(format!(
            "You're voting on your favorite answer to the prompt.\nPrompt: {}\n{}",
            snapshot.vote_prompt,
            numbered(&snapshot.vote_options)
        )),
        GamePhase::Results => Some("The round results are on screen.".into()),
        GamePhase::RoundTransition => Some("Waiting for the other players.".into()),
        GamePhase::Unknown => None,
    }
}

fn decision_query(phase: GamePhase) -> &'static str {
    match phase {
        GamePhase::PromptEntry => "Write your answer to the prompt.",
        GamePhase::AnswerSelection => "Pick one of the prepared answers.",
        GamePhase::Voting => "Vote for your favorite answer.",
        _ => "Choose an action.",
    }
}
