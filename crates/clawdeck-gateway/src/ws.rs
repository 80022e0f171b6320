//! WebSocket event push: snapshot on connect, live events afterwards.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::{info, warn};

use clawdeck_scheduler::Notifier;

use crate::{GatewayState, extract_bearer_token};

/// One published event, as fanned out to every connected observer.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub event: String,
    pub payload: Value,
}

/// Fan-out hub over a broadcast channel. Publishing never blocks and
/// never fails; with no connected observers events are dropped.
pub struct EventHub {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Notifier for EventHub {
    fn publish(&self, event: &str, payload: Value) {
        let _ = self.tx.send(EventEnvelope {
            event: event.to_string(),
            payload,
        });
    }
}

/// Query parameters for WebSocket connection (alternative auth).
#[derive(Deserialize, Default)]
pub struct WsQuery {
    token: Option<String>,
}

/// GET /ws — WebSocket upgrade with optional bearer token authentication.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    if let Some(expected_token) = &state.config.gateway.auth_token {
        let provided_token = extract_bearer_token(&headers).or(query.token.as_deref());

        match provided_token {
            Some(token) if token == expected_token => {}
            _ => {
                warn!("WebSocket authentication failed");
                return Err(StatusCode::UNAUTHORIZED);
            }
        }
    }

    Ok(ws.on_upgrade(move |socket| handle_ws_connection(socket, state)))
}

/// Handle one WebSocket connection: initial snapshot, then live events.
pub async fn handle_ws_connection(mut socket: WebSocket, state: Arc<GatewayState>) {
    info!("WebSocket client connected");

    if let Some(snapshot) = dashboard_snapshot(&state).await {
        if send_event(&mut socket, "dashboard:data", &snapshot).await.is_err() {
            return;
        }
    }

    let mut events = state.hub.subscribe();

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(envelope) => {
                        if send_event(&mut socket, &envelope.event, &envelope.payload)
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("WebSocket client lagged, skipped {skipped} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket receive error: {e}");
                        break;
                    }
                }
            }
        }
    }

    info!("WebSocket connection closed");
}

/// The initial dashboard payload: aggregates, recent work items, agents.
async fn dashboard_snapshot(state: &GatewayState) -> Option<Value> {
    let stats = match state.store.dashboard_stats().await {
        Ok(stats) => stats,
        Err(e) => {
            warn!("Failed to build dashboard snapshot: {e}");
            return None;
        }
    };
    let recent_tasks = state.store.list_work_items(10).await.unwrap_or_default();
    let agents = state.store.list_agents().await.unwrap_or_default();

    Some(json!({
        "stats": stats,
        "recent_tasks": recent_tasks,
        "agents": agents,
    }))
}

/// Send one event frame as JSON text.
async fn send_event(
    socket: &mut WebSocket,
    event: &str,
    payload: &Value,
) -> Result<(), axum::Error> {
    let frame = json!({ "event": event, "payload": payload }).to_string();
    socket.send(Message::Text(frame.into())).await.map_err(axum::Error::new)
}
