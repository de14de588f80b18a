//! # quiplink
//!
//! Bridge between an autonomous agent and a Quiplash-style party game
//! running in a real browser. The bridge polls the rendered game surface,
//! classifies the active phase, advertises the phase's valid actions to the
//! agent over a websocket action protocol, executes the agent's choice
//! against the page, and reports the outcome back.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use quiplink::{AgentBridge, BridgeConfig, PageReader, PhaseLoop, WsTransport};
//!
//! # #[tokio::main]
//! # async fn main() -> quiplink::Result<()> {
//! let config = BridgeConfig::default();
//! let transport = WsTransport::connect("ws://localhost:8000", "Quiplash 2").await?;
//! let bridge = AgentBridge::new(Arc::new(transport));
//!
//! let browser = eoka::Browser::launch().await?;
//! let page = browser.new_page(&config.game.lobby_url).await?;
//! let reader = PageReader::new(page, config.markers.clone(), config.timing.clone());
//!
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let mut game_loop = PhaseLoop::new(Arc::new(reader), bridge, &config);
//! game_loop.run(shutdown_rx).await?;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod catalog;
pub mod config;
pub mod executor;
pub mod page;
pub mod phase;
pub mod runner;
pub mod transport;

pub use bridge::{AgentBridge, AgentChoice, AgentTransport, ChoiceOutcome};
pub use catalog::{AbstractAction, ActionKind, ActionParams, Catalog};
pub use config::{BridgeConfig, GameConfig, MarkerConfig, TimingConfig};
pub use executor::{ExecutionResult, Executor};
pub use page::{GameClient, PageReader, PageSnapshot};
pub use phase::GamePhase;
pub use runner::PhaseLoop;
pub use transport::WsTransport;

/// Result type for quiplink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while bridging the agent and the game page.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Browser session failure. Fatal to the run.
    #[error("browser error: {0}")]
    Driver(#[from] eoka::Error),

    /// The page never reached the expected state within the bounded wait.
    /// Recoverable: the caller classifies the phase as unknown and re-polls.
    #[error("page observation timed out: {0}")]
    ObservationTimeout(String),

    /// An interaction recipe did not take effect after bounded retries.
    /// Reported to the agent as a failed result; not fatal to the loop.
    #[error("action failed: {0}")]
    ExecutionFailed(String),

    /// The agent session was lost. Fatal to the run.
    #[error("agent transport closed: {0}")]
    TransportClosed(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}
