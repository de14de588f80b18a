//! End-to-end phase loop tests against a scripted page and a scripted agent.
//!
//! The page fake serves a fixed sequence of snapshots and honors post-
//! conditions the way the real client does (an answer reads as submitted
//! only after it was entered); the transport fake records every wire call
//! and serves queued decisions.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use quiplink::bridge::{AgentChoice, AgentTransport};
use quiplink::catalog::AbstractAction;
use quiplink::{
    AgentBridge, BridgeConfig, Error, GameClient, PageSnapshot, PhaseLoop, Result,
};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Serves snapshots one per poll; the last one repeats forever.
#[derive(Default)]
struct ScriptedPage {
    snapshots: Mutex<VecDeque<PageSnapshot>>,
    last: Mutex<PageSnapshot>,
    fail_probes: bool,
    answer: Mutex<Option<String>>,
    chosen: Mutex<Option<usize>>,
    voted: Mutex<Option<usize>>,
}

impl ScriptedPage {
    fn with_script(snapshots: Vec<PageSnapshot>) -> Self {
        Self {
            snapshots: Mutex::new(snapshots.into()),
            ..Self::default()
        }
    }

    fn submitted_answer(&self) -> Option<String> {
        self.answer.lock().unwrap().clone()
    }

    fn vote(&self) -> Option<usize> {
        *self.voted.lock().unwrap()
    }
}

#[async_trait]
impl GameClient for ScriptedPage {
    async fn snapshot(&self) -> Result<PageSnapshot> {
        if self.fail_probes {
            return Err(Error::ObservationTimeout("scripted failure".into()));
        }
        let mut queue = self.snapshots.lock().unwrap();
        if let Some(next) = queue.pop_front() {
            *self.last.lock().unwrap() = next.clone();
            Ok(next)
        } else {
            Ok(self.last.lock().unwrap().clone())
        }
    }

    async fn enter_answer(&self, text: &str) -> Result<()> {
        *self.answer.lock().unwrap() = Some(text.to_string());
        Ok(())
    }

    async fn answer_submitted(&self) -> Result<bool> {
        Ok(self.answer.lock().unwrap().is_some())
    }

    async fn click_choice(&self, index: usize) -> Result<()> {
        *self.chosen.lock().unwrap() = Some(index);
        Ok(())
    }

    async fn choice_selected(&self, index: usize) -> Result<bool> {
        Ok(*self.chosen.lock().unwrap() == Some(index))
    }

    async fn click_vote(&self, index: usize) -> Result<()> {
        *self.voted.lock().unwrap() = Some(index);
        Ok(())
    }

    async fn vote_cast(&self, index: usize) -> Result<bool> {
        Ok(*self.voted.lock().unwrap() == Some(index))
    }

    async fn join_room(&self, _code: &str, _name: &str) -> Result<()> {
        Ok(())
    }
}

/// Records every wire call and serves decisions pushed by the test.
#[derive(Default)]
struct ScriptedAgent {
    events: Mutex<Vec<String>>,
    queue: Mutex<VecDeque<AgentChoice>>,
}

impl ScriptedAgent {
    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn push_choice(&self, id: &str, name: &str, data: Value) {
        self.queue.lock().unwrap().push_back(AgentChoice {
            id: id.into(),
            name: name.into(),
            data,
        });
    }
}

#[async_trait]
impl AgentTransport for ScriptedAgent {
    async fn register_actions(&self, actions: &[AbstractAction]) -> Result<()> {
        let names: Vec<&str> = actions.iter().map(|a| a.kind.name()).collect();
        self.record(format!("register:{}", names.join(",")));
        for action in actions {
            self.record(format!(
                "advertise:{}:{}",
                action.kind.name(),
                action.description
            ));
        }
        Ok(())
    }

    async fn unregister_actions(&self, names: &[&str]) -> Result<()> {
        self.record(format!("unregister:{}", names.join(",")));
        Ok(())
    }

    async fn request_decision(&self, state: &str, _query: &str, _names: &[&str]) -> Result<()> {
        self.record(format!("force:{state}"));
        Ok(())
    }

    async fn send_context(&self, message: &str) -> Result<()> {
        self.record(format!("context:{message}"));
        Ok(())
    }

    async fn send_result(&self, id: &str, success: bool, message: Option<&str>) -> Result<()> {
        self.record(format!(
            "result:{id}:{success}:{}",
            message.unwrap_or_default()
        ));
        Ok(())
    }

    async fn next_choice(&self, timeout: Duration) -> Result<Option<AgentChoice>> {
        if let Some(choice) = self.queue.lock().unwrap().pop_front() {
            return Ok(Some(choice));
        }
        tokio::time::sleep(timeout).await;
        Ok(self.queue.lock().unwrap().pop_front())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn fast_config() -> BridgeConfig {
    let mut config = BridgeConfig::default();
    config.timing.poll_interval_ms = 5;
    config.timing.decision_slice_ms = 10;
    config.timing.settle_ms = 1;
    config.timing.retry_delay_ms = 1;
    config
}

fn prompt_snapshot(text: &str) -> PageSnapshot {
    PageSnapshot {
        prompt_active: true,
        prompt_text: text.into(),
        ..PageSnapshot::default()
    }
}

fn voting_snapshot(options: &[&str]) -> PageSnapshot {
    PageSnapshot {
        voting_active: true,
        vote_prompt: "Best pizza topping".into(),
        vote_options: options.iter().map(|s| s.to_string()).collect(),
        ..PageSnapshot::default()
    }
}

fn results_snapshot() -> PageSnapshot {
    PageSnapshot {
        results: true,
        ..PageSnapshot::default()
    }
}

/// Spawn the loop, run `scenario`, then shut the loop down and return the
/// recorded wire events.
async fn drive<F, Fut>(
    page: Arc<ScriptedPage>,
    agent: Arc<ScriptedAgent>,
    scenario: F,
) -> Vec<String>
where
    F: FnOnce(Arc<ScriptedAgent>) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let config = fast_config();
    let bridge = AgentBridge::new(agent.clone());
    let mut game_loop = PhaseLoop::new(page, bridge, &config);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(async move { game_loop.run(shutdown_rx).await });

    scenario(agent.clone()).await;

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop did not stop")
        .expect("loop task panicked")
        .expect("loop returned an error");

    agent.events()
}

/// Wait until the recorded events satisfy `pred`.
async fn wait_for(agent: &ScriptedAgent, pred: impl Fn(&[String]) -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if pred(&agent.events()) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached; events: {:?}",
            agent.events()
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn has(events: &[String], needle: &str) -> bool {
    events.iter().any(|e| e.contains(needle))
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_full_round_trip() {
    let page = Arc::new(ScriptedPage::with_script(vec![
        prompt_snapshot("Write something funny about cats"),
    ]));
    let agent = Arc::new(ScriptedAgent::default());

    let events = drive(page.clone(), agent.clone(), |agent| async move {
        wait_for(&agent, |e| has(e, "force:prompt-entry")).await;
        agent.push_choice("d-1", "submit_answer", json!({"answer": "Cats are liquid"}));
        wait_for(&agent, |e| has(e, "result:d-1:true")).await;
    })
    .await;

    assert!(has(&events, "register:submit_answer"));
    // The registered description carries the prompt the agent is answering.
    assert!(events.iter().any(|e| {
        e.starts_with("advertise:submit_answer:")
            && e.contains("Write something funny about cats")
    }));
    assert!(has(
        &events,
        "context:Prompt: Write something funny about cats"
    ));
    assert_eq!(page.submitted_answer().as_deref(), Some("Cats are liquid"));
    assert!(has(&events, "result:d-1:true"));
}

#[tokio::test]
async fn test_voting_round_uses_one_based_numbers() {
    let page = Arc::new(ScriptedPage::with_script(vec![voting_snapshot(&[
        "Pineapple",
        "Regret",
    ])]));
    let agent = Arc::new(ScriptedAgent::default());

    drive(page.clone(), agent.clone(), |agent| async move {
        wait_for(&agent, |e| has(e, "force:voting")).await;
        agent.push_choice("d-1", "cast_vote", json!({"vote": 2}));
        wait_for(&agent, |e| has(e, "result:d-1:true")).await;
    })
    .await;

    // Agent said 2; the page click is zero-based.
    assert_eq!(page.vote(), Some(1));
}

#[tokio::test]
async fn test_phase_change_abandons_pending_decision() {
    // Prompt entry, then the screen moves on before the agent answers.
    let page = Arc::new(ScriptedPage::with_script(vec![
        prompt_snapshot("Too slow"),
        voting_snapshot(&["A", "B"]),
    ]));
    let agent = Arc::new(ScriptedAgent::default());

    let events = drive(page.clone(), agent.clone(), |agent| async move {
        // The late answer arrives only after voting has replaced the
        // prompt-entry action set.
        wait_for(&agent, |e| has(e, "register:cast_vote")).await;
        agent.push_choice("late-1", "submit_answer", json!({"answer": "Too late"}));
        wait_for(&agent, |e| has(e, "result:late-1:false")).await;
        agent.push_choice("d-2", "cast_vote", json!({"vote": 1}));
        wait_for(&agent, |e| has(e, "result:d-2:true")).await;
    })
    .await;

    assert!(has(&events, "unregister:submit_answer"));
    // The stale answer never reached the page.
    assert_eq!(page.submitted_answer(), None);
    assert_eq!(page.vote(), Some(0));
}

#[tokio::test]
async fn test_invalid_parameters_never_touch_the_page() {
    let page = Arc::new(ScriptedPage::with_script(vec![voting_snapshot(&[
        "A", "B",
    ])]));
    let agent = Arc::new(ScriptedAgent::default());

    drive(page.clone(), agent.clone(), |agent| async move {
        wait_for(&agent, |e| has(e, "force:voting")).await;
        agent.push_choice("bad-1", "cast_vote", json!({"vote": 5}));
        wait_for(&agent, |e| has(e, "result:bad-1:false:Invalid vote")).await;
        assert_eq!(page.vote(), None);
        agent.push_choice("d-2", "cast_vote", json!({"vote": 1}));
        wait_for(&agent, |e| has(e, "result:d-2:true")).await;
    })
    .await;
}

#[tokio::test]
async fn test_quiet_phases_register_nothing() {
    let page = Arc::new(ScriptedPage::with_script(vec![results_snapshot()]));
    let agent = Arc::new(ScriptedAgent::default());

    let events = drive(page, agent.clone(), |agent| async move {
        wait_for(&agent, |e| has(e, "context:The round results")).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
    })
    .await;

    assert!(!has(&events, "register:"));
    assert!(!has(&events, "force:"));
}

#[tokio::test]
async fn test_epoch_advances_once_per_phase_change() {
    let page = Arc::new(ScriptedPage::with_script(vec![
        prompt_snapshot("Write something funny about cats"),
        voting_snapshot(&["A", "B"]),
        results_snapshot(),
    ]));
    let agent = Arc::new(ScriptedAgent::default());

    let config = fast_config();
    let bridge = AgentBridge::new(agent.clone());
    let mut game_loop = PhaseLoop::new(page, bridge, &config);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(async move {
        let outcome = game_loop.run(shutdown_rx).await;
        (game_loop, outcome)
    });

    wait_for(&agent, |e| has(e, "context:The round results")).await;
    shutdown_tx.send(true).unwrap();
    let (game_loop, outcome) = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop did not stop")
        .expect("loop task panicked");
    outcome.expect("loop returned an error");

    // Prompt entry, voting, results, then the shutdown sync: four action-set
    // replacements, each under its own epoch.
    assert_eq!(game_loop.bridge().epoch(), 4);
}

#[tokio::test]
async fn test_persistent_probe_failure_is_fatal() {
    let page = Arc::new(ScriptedPage {
        fail_probes: true,
        ..ScriptedPage::default()
    });
    let agent = Arc::new(ScriptedAgent::default());

    let config = fast_config();
    let bridge = AgentBridge::new(agent);
    let mut game_loop = PhaseLoop::new(page, bridge, &config);
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let outcome = tokio::time::timeout(Duration::from_secs(5), game_loop.run(shutdown_rx))
        .await
        .expect("loop did not stop");
    match outcome {
        Err(Error::ObservationTimeout(msg)) => assert!(msg.contains("consecutive")),
        other => panic!("expected fatal observation timeout, got {other:?}"),
    }
}
