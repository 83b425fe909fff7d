//! HTTP surface: carrier webhooks, audio serving, operator endpoints, and
//! the WebSocket gateway.

pub mod calls;
pub mod webhooks;

use crate::gateway;
use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhook/:call_id", post(webhooks::initial))
        .route("/webhook/:call_id/turn", post(webhooks::turn))
        .route("/webhook/:call_id/status", post(webhooks::status))
        .route("/webhook/:call_id/recording", post(webhooks::recording))
        .route("/calls/quality/metrics", get(calls::quality_metrics))
        .route("/calls/breakers", get(calls::breakers))
        .route("/calls/:call_id/transcript", get(calls::transcript))
        .route("/calls/:call_id/tts/:filename", get(calls::serve_tts))
        .route("/ws", get(gateway::ws_handler))
        .route("/health", get(calls::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
