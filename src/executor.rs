//! Executes validated actions against the page with bounded retries.
//!
//! Every recipe is post-condition driven: the executor checks whether the
//! desired page state already holds before touching anything, re-checks
//! after each attempt, and gives up after the configured attempt budget.
//! Re-executing an action whose effect already took is therefore a no-op
//! success, and a click swallowed by a screen transition is retried rather
//! than trusted.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::catalog::ActionParams;
use crate::config::TimingConfig;
use crate::page::GameClient;
use crate::Result;

/// Outcome of executing one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    /// The post-condition holds after at most one interaction, including
    /// zero when the effect had already taken.
    Success,
    /// The post-condition holds, but only after this many interactions.
    Retried(u32),
    /// The post-condition never held within the attempt budget, or the
    /// action has no page effect. Reported to the agent; not fatal.
    Failed(String),
}

impl ExecutionResult {
    fn completed(attempts: u32) -> Self {
        if attempts > 1 {
            ExecutionResult::Retried(attempts)
        } else {
            ExecutionResult::Success
        }
    }

    pub fn succeeded(&self) -> bool {
        !matches!(self, ExecutionResult::Failed(_))
    }
}

/// Runs action recipes against a [`GameClient`].
pub struct Executor {
    client: Arc<dyn GameClient>,
    timing: TimingConfig,
}

impl Executor {
    pub fn new(client: Arc<dyn GameClient>, timing: TimingConfig) -> Self {
        Self { client, timing }
    }

    /// Execute `params` until its post-condition holds or the attempt budget
    /// runs out. Page and driver errors during an attempt count against the
    /// budget instead of aborting the run.
    pub async fn execute(&self, params: &ActionParams) -> ExecutionResult {
        if matches!(params, ActionParams::SetName { .. }) {
            // The name is part of the join form; once in a room there is
            // nothing on the page for it to change.
            return ExecutionResult::Failed("The name can only be set before joining.".into());
        }

        let mut attempts = 0u32;
        let mut last_error: Option<String> = None;

        for round in 0..self.timing.retry_attempts {
            match self.satisfied(params).await {
                Ok(true) => {
                    debug!(?params, attempts, "post-condition holds");
                    return ExecutionResult::completed(attempts);
                }
                Ok(false) => {}
                Err(e) => {
                    last_error = Some(e.to_string());
                }
            }

            if round > 0 {
                tokio::time::sleep(Duration::from_millis(self.timing.retry_delay_ms)).await;
            }
            if let Err(e) = self.attempt(params).await {
                warn!(?params, error = %e, "interaction attempt failed");
                last_error = Some(e.to_string());
            }
            attempts += 1;
            tokio::time::sleep(Duration::from_millis(self.timing.settle_ms)).await;
        }

        match self.satisfied(params).await {
            Ok(true) => ExecutionResult::completed(attempts),
            Ok(false) => ExecutionResult::Failed(match last_error {
                Some(err) => err,
                None => format!("The action did not take effect after {attempts} attempts."),
            }),
            Err(e) => {
                ExecutionResult::Failed(last_error.unwrap_or_else(|| e.to_string()))
            }
        }
    }

    /// Whether the action's desired page state already holds.
    async fn satisfied(&self, params: &ActionParams) -> Result<bool> {
        match params {
            ActionParams::SubmitAnswer { .. } => self.client.answer_submitted().await,
            ActionParams::ChooseAnswer { index } => self.client.choice_selected(*index).await,
            ActionParams::CastVote { index } => self.client.vote_cast(*index).await,
            ActionParams::SetName { .. } => Ok(false),
        }
    }

    /// One page interaction for the action.
    async fn attempt(&self, params: &ActionParams) -> Result<()> {
        match params {
            ActionParams::SubmitAnswer { answer } => self.client.enter_answer(answer).await,
            ActionParams::ChooseAnswer { index } => self.client.click_choice(*index).await,
            ActionParams::CastVote { index } => self.client.click_vote(*index).await,
            ActionParams::SetName { .. } => Ok(()),
        }
    }
}
