//! Page observation and interaction — the only module that touches the
//! browser driver.
//!
//! One injected probe reads every phase marker in a single round trip and
//! returns a [`PageSnapshot`]; classification and catalog building happen on
//! the snapshot, never against the live DOM. Interactions go through the
//! [`GameClient`] trait so the executor and phase loop can run against a
//! scripted fake in tests.

use async_trait::async_trait;
use eoka::Page;
use serde::Deserialize;
use tracing::debug;

use crate::config::{MarkerConfig, TimingConfig};
use crate::{Error, Result};

/// Everything the bridge can observe about the game surface in one poll.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageSnapshot {
    /// Waiting-room container is active.
    pub lobby: bool,
    /// Prompt-entry container is active.
    pub prompt_active: bool,
    /// Prompt text, when the prompt-entry container is active.
    #[serde(default)]
    pub prompt_text: String,
    /// Canned-answer selection container is active.
    pub selection_active: bool,
    /// Candidate answer texts, in on-screen order.
    #[serde(default)]
    pub selection_options: Vec<String>,
    /// Voting container is active.
    pub voting_active: bool,
    /// Prompt text shown on the voting screen.
    #[serde(default)]
    pub vote_prompt: String,
    /// Vote target texts, in on-screen order.
    #[serde(default)]
    pub vote_options: Vec<String>,
    /// The voting container shows the waiting-for-other-players message.
    pub waiting: bool,
    /// Round-results banner is active.
    pub results: bool,
    /// Between-rounds interstitial is active.
    pub round_banner: bool,
}

/// Read/interact surface of the live game page.
///
/// Post-condition queries (`answer_submitted`, `choice_selected`,
/// `vote_cast`) are idempotent reads; the executor polls them after each
/// interaction attempt.
#[async_trait]
pub trait GameClient: Send + Sync {
    /// Read all phase markers in one round trip.
    async fn snapshot(&self) -> Result<PageSnapshot>;

    /// Type an answer into the prompt input and press submit.
    async fn enter_answer(&self, text: &str) -> Result<()>;

    /// Whether the prompt-entry screen has accepted an answer (container
    /// deactivated).
    async fn answer_submitted(&self) -> Result<bool>;

    /// Click the Nth candidate answer (zero-based).
    async fn click_choice(&self, index: usize) -> Result<()>;

    /// Whether the Nth candidate is marked selected or the selection screen
    /// has moved on.
    async fn choice_selected(&self, index: usize) -> Result<bool>;

    /// Click the Nth vote target (zero-based).
    async fn click_vote(&self, index: usize) -> Result<()>;

    /// Whether the Nth vote target is marked selected or the voting screen
    /// has moved on.
    async fn vote_cast(&self, index: usize) -> Result<bool>;

    /// Fill the join form and enter the room.
    async fn join_room(&self, code: &str, name: &str) -> Result<()>;
}

/// Wraps an `eoka::Page` with marker-driven queries and interactions.
pub struct PageReader {
    page: Page,
    markers: MarkerConfig,
    timing: TimingConfig,
}

impl PageReader {
    pub fn new(page: Page, markers: MarkerConfig, timing: TimingConfig) -> Self {
        Self {
            page,
            markers,
            timing,
        }
    }

    /// Get a reference to the underlying page.
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Click the Nth element matching `button_sel` inside `container_sel`.
    async fn click_nth(&self, container_sel: &str, button_sel: &str, index: usize) -> Result<()> {
        let js = format!(
            r#"(() => {{
    const root = document.querySelector({container});
    if (!root) return false;
    const buttons = root.querySelectorAll({button});
    if ({index} >= buttons.length) return false;
    buttons[{index}].click();
    return true;
}})()"#,
            container = serde_json::to_string(container_sel).unwrap(),
            button = serde_json::to_string(button_sel).unwrap(),
            index = index,
        );
        let clicked: bool = self.page.evaluate(&js).await?;
        if !clicked {
            return Err(Error::ExecutionFailed(format!(
                "button [{index}] under '{container_sel}' not found"
            )));
        }
        Ok(())
    }

    /// Whether the Nth button carries the selected class, or the container
    /// has gone inactive (the screen moved on, so the click took effect).
    async fn nth_selected_or_done(
        &self,
        container_sel: &str,
        button_sel: &str,
        index: usize,
    ) -> Result<bool> {
        let js = format!(
            r#"(() => {{
    const root = document.querySelector({container});
    if (!root || root.classList.contains({inactive})) return true;
    const buttons = root.querySelectorAll({button});
    if ({index} >= buttons.length) return false;
    const b = buttons[{index}];
    return b.classList.contains({selected}) || b.disabled === true;
}})()"#,
            container = serde_json::to_string(container_sel).unwrap(),
            button = serde_json::to_string(button_sel).unwrap(),
            inactive = serde_json::to_string(&self.markers.inactive_class).unwrap(),
            selected = serde_json::to_string(&self.markers.selected_class).unwrap(),
            index = index,
        );
        Ok(self.page.evaluate(&js).await?)
    }
}

/// JS probe that reads every phase marker in one evaluation.
fn build_probe_js(m: &MarkerConfig) -> String {
    let markers = serde_json::json!({
        "lobby_state": m.lobby_state,
        "answer_state": m.answer_state,
        "question_text": m.question_text,
        "selection_state": m.selection_state,
        "choice_button": m.choice_button,
        "vote_state": m.vote_state,
        "vote_text": m.vote_text,
        "vote_button": m.vote_button,
        "results_state": m.results_state,
        "round_state": m.round_state,
        "inactive_class": m.inactive_class,
        "waiting_text": m.waiting_text,
    });
    format!(
        r#"(() => {{
    const M = {markers};
    const activeEl = (sel) => {{
        const el = document.querySelector(sel);
        return el && !el.classList.contains(M.inactive_class) ? el : null;
    }};
    const textIn = (root, sel) => {{
        const el = root.querySelector(sel);
        return el ? el.textContent.trim() : '';
    }};
    const textsIn = (root, sel) =>
        Array.from(root.querySelectorAll(sel)).map(b => b.textContent.trim());

    const promptEl = activeEl(M.answer_state);
    const selEl = activeEl(M.selection_state);
    const voteEl = activeEl(M.vote_state);
    const voteStatus = voteEl ? textIn(voteEl, M.vote_text) : '';

    return JSON.stringify({{
        lobby: !!activeEl(M.lobby_state),
        prompt_active: !!promptEl,
        prompt_text: promptEl ? textIn(promptEl, M.question_text) : '',
        selection_active: !!selEl,
        selection_options: selEl ? textsIn(selEl, M.choice_button) : [],
        voting_active: !!voteEl,
        vote_prompt: voteEl ? textIn(voteEl, M.question_text) : '',
        vote_options: voteEl ? textsIn(voteEl, M.vote_button) : [],
        waiting: voteStatus === M.waiting_text,
        results: !!activeEl(M.results_state),
        round_banner: !!activeEl(M.round_state),
    }});
}})()"#,
        markers = serde_json::to_string(&markers).unwrap()
    )
}

#[async_trait]
impl GameClient for PageReader {
    async fn snapshot(&self) -> Result<PageSnapshot> {
        let js = build_probe_js(&self.markers);
        // Transient failures during screen transitions are expected; retry
        // briefly before surfacing a timeout the loop maps to Unknown.
        let mut last_err = None;
        for _ in 0..3 {
            match self.page.evaluate::<String>(&js).await {
                Ok(json_str) => {
                    let snapshot: PageSnapshot = serde_json::from_str(&json_str)
                        .map_err(|e| Error::Protocol(format!("probe parse error: {e}")))?;
                    return Ok(snapshot);
                }
                Err(e) => {
                    debug!("page probe failed, retrying: {e}");
                    last_err = Some(e);
                    self.page.wait(self.timing.settle_ms).await;
                }
            }
        }
        Err(Error::ObservationTimeout(format!(
            "page probe failed: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn enter_answer(&self, text: &str) -> Result<()> {
        self.page.fill(&self.markers.answer_input, text).await?;
        self.page.click(&self.markers.submit_button).await?;
        Ok(())
    }

    async fn answer_submitted(&self) -> Result<bool> {
        let js = format!(
            r#"(() => {{
    const el = document.querySelector({state});
    return !el || el.classList.contains({inactive});
}})()"#,
            state = serde_json::to_string(&self.markers.answer_state).unwrap(),
            inactive = serde_json::to_string(&self.markers.inactive_class).unwrap(),
        );
        Ok(self.page.evaluate(&js).await?)
    }

    async fn click_choice(&self, index: usize) -> Result<()> {
        self.click_nth(
            &self.markers.selection_state,
            &self.markers.choice_button,
            index,
        )
        .await
    }

    async fn choice_selected(&self, index: usize) -> Result<bool> {
        self.nth_selected_or_done(
            &self.markers.selection_state,
            &self.markers.choice_button,
            index,
        )
        .await
    }

    async fn click_vote(&self, index: usize) -> Result<()> {
        self.click_nth(&self.markers.vote_state, &self.markers.vote_button, index)
            .await
    }

    async fn vote_cast(&self, index: usize) -> Result<bool> {
        self.nth_selected_or_done(&self.markers.vote_state, &self.markers.vote_button, index)
            .await
    }

    async fn join_room(&self, code: &str, name: &str) -> Result<()> {
        let timeout = self.timing.join_timeout_ms;
        self.page
            .wait_for_visible(&self.markers.roomcode_input, timeout)
            .await
            .map_err(|e| Error::ObservationTimeout(format!("join form did not appear: {e}")))?;
        self.page.fill(&self.markers.roomcode_input, code).await?;
        self.page.fill(&self.markers.username_input, name).await?;
        self.page.click(&self.markers.join_button).await?;
        debug!("joined room {code} as {name}");
        Ok(())
    }
}
