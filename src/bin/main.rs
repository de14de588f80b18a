use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use quiplink::bridge::ChoiceOutcome;
use quiplink::catalog::{ActionParams, Catalog};
use quiplink::{
    AgentBridge, BridgeConfig, GameClient, PageReader, PageSnapshot, PhaseLoop, WsTransport,
};

#[derive(Parser)]
#[command(name = "quiplink")]
#[command(about = "Bridge an autonomous agent into a Quiplash-style party game")]
#[command(version)]
struct Cli {
    /// Agent websocket endpoint
    #[arg(long, env = "QUIPLINK_WS_URL", default_value = "ws://localhost:8000")]
    ws_url: String,

    /// Room code to join (prompted on stdin when omitted)
    #[arg(long)]
    room: Option<String>,

    /// Config file (defaults are built in)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run the browser headless (overrides config)
    #[arg(long)]
    headless: bool,

    /// Verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (only errors)
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.quiet {
        Level::ERROR
    } else {
        match cli.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        }
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    let mut config = match &cli.config {
        Some(path) => BridgeConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => BridgeConfig::default(),
    };
    if cli.headless {
        config.browser.headless = true;
    }

    let room = match cli.room {
        Some(room) => room,
        None => prompt_room_code()?,
    };
    let room = normalize_room_code(&room, config.game.room_code_length)?;

    let catalog = Catalog::new(config.game.clone());
    let transport = WsTransport::connect(&cli.ws_url, "Quiplash 2")
        .await
        .with_context(|| format!("connecting to agent at {}", cli.ws_url))?;
    let mut bridge = AgentBridge::new(Arc::new(transport));

    let name = negotiate_name(&mut bridge, &catalog).await?;
    info!(name = %name, room = %room, "joining game");

    let stealth = eoka::StealthConfig {
        headless: config.browser.headless,
        proxy: config.browser.proxy.clone(),
        user_agent: config.browser.user_agent.clone(),
        viewport_width: config.browser.viewport.as_ref().map(|v| v.width).unwrap_or(1280),
        viewport_height: config.browser.viewport.as_ref().map(|v| v.height).unwrap_or(720),
        ..Default::default()
    };
    let browser = eoka::Browser::launch_with_config(stealth)
        .await
        .context("launching browser")?;
    let page = browser
        .new_page(&config.game.lobby_url)
        .await
        .context("opening lobby page")?;

    let reader = PageReader::new(page, config.markers.clone(), config.timing.clone());
    reader
        .join_room(&room, &name)
        .await
        .with_context(|| format!("joining room {room}"))?;
    bridge
        .report_context(&format!("Joined room {room} as {name}."))
        .await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            shutdown_tx.send(true).ok();
        }
    });

    let mut game_loop = PhaseLoop::new(Arc::new(reader), bridge, &config);
    let outcome = game_loop.run(shutdown_rx).await;

    browser.close().await.ok();

    if let Err(e) = outcome {
        error!("bridge stopped: {e}");
        std::process::exit(1);
    }
    Ok(())
}

/// Ask the agent to pick its player name before anything touches the page.
///
/// Only `set_name` is registered during this exchange, and it is withdrawn
/// the moment a valid name lands, so it can never fire mid-game.
async fn negotiate_name(bridge: &mut AgentBridge, catalog: &Catalog) -> anyhow::Result<String> {
    let epoch = bridge.epoch() + 1;
    bridge.sync(epoch, &[catalog.set_name_action()]).await?;
    bridge
        .request_decision("startup", "Pick the name you will play under.")
        .await?;

    let blank = PageSnapshot::default();
    loop {
        match bridge.await_choice(Duration::from_secs(30)).await? {
            ChoiceOutcome::TimedOut | ChoiceOutcome::Stale(_) => continue,
            ChoiceOutcome::Decision(choice, kind) => {
                match catalog.parse_params(kind, &choice.data, &blank) {
                    Ok(ActionParams::SetName { name }) => {
                        bridge.report_result(&choice.id, true, None).await?;
                        let epoch = bridge.epoch() + 1;
                        bridge.sync(epoch, &[]).await?;
                        return Ok(name);
                    }
                    Ok(_) => {
                        bridge
                            .report_result(&choice.id, false, Some("Pick a name first."))
                            .await?;
                    }
                    Err(message) => {
                        // A failed result on a forced action makes the agent
                        // try again.
                        bridge.report_result(&choice.id, false, Some(&message)).await?;
                    }
                }
            }
        }
    }
}

fn prompt_room_code() -> anyhow::Result<String> {
    print!("Room code: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn normalize_room_code(raw: &str, expected_len: usize) -> anyhow::Result<String> {
    let code = raw.trim().to_uppercase();
    if code.len() != expected_len || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        bail!("room code must be {expected_len} letters, got '{raw}'");
    }
    Ok(code)
}
