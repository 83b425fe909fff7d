//! WebSocket fan-out of call events to dashboard clients.
//!
//! Publishing never blocks the turn handler: each subscriber has a bounded
//! outbound queue and events are dropped (with a log line) when a slow client
//! falls behind. Dead subscribers are pruned on send failure. The server
//! pings every 20 seconds to keep NAT paths open.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::state::AppState;

/// Interval between server pings.
pub const PING_INTERVAL: Duration = Duration::from_secs(20);

/// Outbound queue depth per subscriber before events are dropped.
const SUBSCRIBER_QUEUE_DEPTH: usize = 64;

/// Events fanned out to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    Connected { connection_id: Uuid },
    Disconnected { connection_id: Uuid },
    CallInitiated { call_id: i64, lead_id: i64 },
    CallInProgress { call_id: i64, lead_id: i64 },
    CallStatus { call_id: i64, lead_id: i64, status: String },
    CallTranscriptUpdate { call_id: i64, delta: String },
    RecordingReady { call_id: i64, recording_url: String },
    Ping,
    Pong,
}

/// Non-blocking fan-out hub.
#[derive(Debug, Default)]
pub struct Broadcaster {
    subscribers: Mutex<HashMap<Uuid, mpsc::Sender<GatewayEvent>>>,
    dropped: AtomicU64,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber, returning its id and event receiver.
    pub fn subscribe(&self) -> (Uuid, mpsc::Receiver<GatewayEvent>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_DEPTH);
        let id = Uuid::new_v4();
        self.subscribers
            .lock()
            .expect("subscriber registry lock poisoned")
            .insert(id, tx);
        info!(target: "voxant::gateway", connection_id = %id, "subscriber connected");
        (id, rx)
    }

    pub fn unsubscribe(&self, id: Uuid) {
        let removed = self
            .subscribers
            .lock()
            .expect("subscriber registry lock poisoned")
            .remove(&id)
            .is_some();
        if removed {
            info!(target: "voxant::gateway", connection_id = %id, "subscriber disconnected");
        }
    }

    /// Enqueue an event to every subscriber without blocking. Full queues
    /// drop the event for that subscriber; closed queues remove it.
    pub fn publish(&self, event: GatewayEvent) {
        let mut dead: Vec<Uuid> = Vec::new();
        {
            let subscribers = self
                .subscribers
                .lock()
                .expect("subscriber registry lock poisoned");
            for (id, tx) in subscribers.iter() {
                match tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            target: "voxant::gateway",
                            connection_id = %id,
                            "subscriber queue full, dropping event"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => dead.push(*id),
                }
            }
        }
        for id in dead {
            self.unsubscribe(id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .expect("subscriber registry lock poisoned")
            .len()
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// WebSocket upgrade handler for `/ws`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let (id, mut rx) = state.broadcaster.subscribe();

    let hello = GatewayEvent::Connected { connection_id: id };
    if let Ok(json) = serde_json::to_string(&hello) {
        if socket.send(WsMessage::Text(json)).await.is_err() {
            state.broadcaster.unsubscribe(id);
            return;
        }
    }

    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.tick().await; // first tick fires immediately; skip it

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                let Ok(json) = serde_json::to_string(&event) else { continue };
                if socket.send(WsMessage::Text(json)).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                let Ok(json) = serde_json::to_string(&GatewayEvent::Ping) else { continue };
                if socket.send(WsMessage::Text(json)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<GatewayEvent>(&text) {
                            Ok(GatewayEvent::Ping) => {
                                let Ok(json) = serde_json::to_string(&GatewayEvent::Pong) else {
                                    continue;
                                };
                                if socket.send(WsMessage::Text(json)).await.is_err() {
                                    break;
                                }
                            }
                            Ok(_) => {}
                            Err(e) => {
                                debug!(target: "voxant::gateway", error = %e, "ignoring malformed client message");
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(target: "voxant::gateway", error = %e, "socket error");
                        break;
                    }
                }
            }
        }
    }

    state.broadcaster.unsubscribe(id);
    state
        .broadcaster
        .publish(GatewayEvent::Disconnected { connection_id: id });
}
