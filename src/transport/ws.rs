//! Websocket implementation of [`AgentTransport`].
//!
//! Speaks the action protocol the agent side expects: every outgoing frame
//! is an envelope of `command`, `game`, and optional `data`; the only frame
//! the bridge consumes is `action`, carrying a decision id, an action name,
//! and JSON-string-encoded parameters. A background task owns the read half
//! and feeds decisions into a channel so [`next_choice`] can wait with a
//! timeout without blocking writes.
//!
//! [`next_choice`]: AgentTransport::next_choice

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, warn};

use crate::bridge::{AgentChoice, AgentTransport};
use crate::catalog::AbstractAction;
use crate::{Error, Result};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Agent connection over a websocket.
pub struct WsTransport {
    game: String,
    sink: Mutex<WsSink>,
    choices: Mutex<mpsc::UnboundedReceiver<AgentChoice>>,
}

#[derive(Debug, Deserialize)]
struct Incoming {
    command: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct IncomingAction {
    id: String,
    name: String,
    #[serde(default)]
    data: Value,
}

impl WsTransport {
    /// Connect to the agent and announce the game with a `startup` frame.
    ///
    /// `game` names the game in every envelope; the agent uses it to route
    /// frames when several integrations share one endpoint.
    pub async fn connect(url: &str, game: &str) -> Result<Self> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| Error::TransportClosed(format!("connect to {url} failed: {e}")))?;
        debug!(url, "agent websocket connected");

        let (sink, mut read) = stream.split();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                let msg = match frame {
                    Ok(msg) => msg,
                    Err(e) => {
                        error!("agent websocket read error: {e}");
                        break;
                    }
                };
                let text = match msg {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    // Pings are answered by the library on the next flush.
                    _ => continue,
                };
                match parse_incoming(&text) {
                    Ok(Some(choice)) => {
                        if tx.send(choice).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("ignoring malformed agent frame: {e}"),
                }
            }
            debug!("agent websocket reader finished");
        });

        let transport = Self {
            game: game.to_string(),
            sink: Mutex::new(sink),
            choices: Mutex::new(rx),
        };
        transport.send("startup", None).await?;
        Ok(transport)
    }

    async fn send(&self, command: &str, data: Option<Value>) -> Result<()> {
        let mut envelope = json!({
            "command": command,
            "game": self.game,
        });
        if let Some(data) = data {
            envelope["data"] = data;
        }
        let text = serde_json::to_string(&envelope)
            .map_err(|e| Error::Protocol(format!("envelope encode failed: {e}")))?;
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text))
            .await
            .map_err(|e| Error::TransportClosed(format!("send failed: {e}")))
    }
}

/// Decode one incoming frame; `Ok(None)` for frames the bridge ignores.
fn parse_incoming(text: &str) -> Result<Option<AgentChoice>> {
    let incoming: Incoming = serde_json::from_str(text)
        .map_err(|e| Error::Protocol(format!("bad frame: {e}")))?;
    if incoming.command != "action" {
        return Ok(None);
    }
    let action: IncomingAction = serde_json::from_value(incoming.data)
        .map_err(|e| Error::Protocol(format!("bad action frame: {e}")))?;
    // Parameters arrive JSON-string-encoded inside the frame.
    let data = match &action.data {
        Value::String(encoded) if !encoded.is_empty() => serde_json::from_str(encoded)
            .map_err(|e| Error::Protocol(format!("bad action data: {e}")))?,
        Value::String(_) | Value::Null => Value::Null,
        other => other.clone(),
    };
    Ok(Some(AgentChoice {
        id: action.id,
        name: action.name,
        data,
    }))
}

#[async_trait]
impl AgentTransport for WsTransport {
    async fn register_actions(&self, actions: &[AbstractAction]) -> Result<()> {
        let actions: Vec<Value> = actions
            .iter()
            .map(|a| {
                json!({
                    "name": a.kind.name(),
                    "description": a.description,
                    "schema": a.schema,
                })
            })
            .collect();
        self.send("actions/register", Some(json!({ "actions": actions })))
            .await
    }

    async fn unregister_actions(&self, names: &[&str]) -> Result<()> {
        self.send(
            "actions/unregister",
            Some(json!({ "action_names": names })),
        )
        .await
    }

    async fn request_decision(&self, state: &str, query: &str, names: &[&str]) -> Result<()> {
        self.send(
            "actions/force",
            Some(json!({
                "state": state,
                "query": query,
                "ephemeral_context": false,
                "action_names": names,
            })),
        )
        .await
    }

    async fn send_context(&self, message: &str) -> Result<()> {
        self.send(
            "context",
            Some(json!({ "message": message, "silent": true })),
        )
        .await
    }

    async fn send_result(&self, id: &str, success: bool, message: Option<&str>) -> Result<()> {
        self.send(
            "action/result",
            Some(json!({ "id": id, "success": success, "message": message })),
        )
        .await
    }

    async fn next_choice(&self, timeout: Duration) -> Result<Option<AgentChoice>> {
        let mut choices = self.choices.lock().await;
        match tokio::time::timeout(timeout, choices.recv()).await {
            Ok(Some(choice)) => Ok(Some(choice)),
            Ok(None) => Err(Error::TransportClosed("agent connection lost".into())),
            Err(_elapsed) => Ok(None),
        }
    }
}
