//! WebSocket handler for live workflow events and run control.
//!
//! The `/ws/events` endpoint upgrades an HTTP connection to a WebSocket.
//! Once connected, the handler:
//!
//! - **Forwards events:** subscribes to the engine's event bus and pushes
//!   every [`WorkflowEvent`] to the client as a JSON text frame. A
//!   `?run_id=<uuid>` query narrows the stream to one run.
//! - **Receives commands:** parses incoming text frames as [`WsCommand`]
//!   (`ping`, `pause`, `resume`, `cancel`) and answers each with a JSON reply.
//!
//! Disconnecting does not affect running workflows.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use flowpilot_types::event::WorkflowEvent;

use crate::state::{AppState, ConcreteEngine};

#[derive(Debug, Default, Deserialize)]
pub struct EventFilter {
    pub run_id: Option<Uuid>,
}

impl EventFilter {
    fn matches(&self, event: &WorkflowEvent) -> bool {
        self.run_id.is_none_or(|id| event.is_for_run(id))
    }
}

/// Command from a WebSocket client. Malformed messages get an error reply.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsCommand {
    /// Server responds with `{"type":"pong"}`.
    Ping,
    Pause { run_id: Uuid },
    Resume { run_id: Uuid },
    Cancel { run_id: Uuid },
}

/// Mounted at `/ws/events` in the router.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(filter): Query<EventFilter>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state, filter))
}

/// Multiplex bus events and client commands in one task so replies and
/// events share the single sender half.
async fn handle_ws_connection(socket: WebSocket, state: AppState, filter: EventFilter) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let mut events = state.engine.event_bus().subscribe_stream();

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                if !filter.matches(&event) {
                    continue;
                }
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        if ws_sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!("Failed to serialize WorkflowEvent: {err}");
                    }
                }
            }

            msg_result = ws_receiver.next() => {
                match msg_result {
                    Some(Ok(Message::Text(text))) => {
                        let reply = process_command(&text, &state.engine).await;
                        if ws_sender.send(Message::Text(reply.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!("WebSocket receive error: {err}");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    tracing::debug!("WebSocket connection closed");
}

/// Parse and apply one client command, returning the reply frame.
async fn process_command(text: &str, engine: &ConcreteEngine) -> Value {
    let cmd: WsCommand = match serde_json::from_str(text) {
        Ok(cmd) => cmd,
        Err(err) => {
            tracing::warn!(raw = %text, error = %err, "Ignoring malformed WebSocket command");
            return json!({ "type": "error", "message": format!("malformed command: {err}") });
        }
    };

    let (command, run_id, result) = match cmd {
        WsCommand::Ping => return json!({ "type": "pong" }),
        WsCommand::Pause { run_id } => ("pause", run_id, engine.pause(run_id).await),
        WsCommand::Resume { run_id } => ("resume", run_id, engine.resume(run_id).await),
        WsCommand::Cancel { run_id } => ("cancel", run_id, engine.cancel(run_id).await),
    };

    match result {
        Ok(()) => {
            tracing::info!(%run_id, command, "run control via WebSocket");
            json!({ "type": "ack", "command": command, "run_id": run_id })
        }
        Err(err) => json!({
            "type": "error",
            "command": command,
            "run_id": run_id,
            "message": err.to_string(),
        }),
    }
}
