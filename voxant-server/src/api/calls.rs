//! Operator endpoints and audio serving.

use crate::db;
use crate::error::ServerError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use std::sync::Arc;

/// `GET /calls/{call_id}/transcript`
pub async fn transcript(
    Path(call_id): Path<i64>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let call = db::get_call(&state.db, call_id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("call {call_id}")))?;

    Ok(Json(json!({
        "call_id": call.id,
        "lead_id": call.lead_id,
        "status": call.status,
        "duration": call.duration_secs,
        "sentiment": call.sentiment,
        "interest_level": call.interest_level,
        "recording_url": call.recording_url,
        "full_transcript": call.full_transcript,
        "transcript_summary": call.transcript_summary,
    })))
}

/// `GET /calls/quality/metrics`
pub async fn quality_metrics(State(state): State<Arc<AppState>>) -> Response {
    Json(state.quality.report()).into_response()
}

/// `GET /calls/breakers` — circuit-breaker state per upstream.
pub async fn breakers(State(state): State<Arc<AppState>>) -> Response {
    let snapshots = vec![
        state.engine.llm_breaker().snapshot(),
        state.engine.tts_breaker().snapshot(),
    ];
    Json(snapshots).into_response()
}

/// `GET /calls/{call_id}/tts/{filename}` — serve a content-addressed audio
/// file from the disk cache. Idempotent and cacheable.
pub async fn serve_tts(
    Path((_call_id, filename)): Path<(i64, String)>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(path) = state.tts.disk().resolve(&filename) else {
        return (StatusCode::BAD_REQUEST, "invalid filename").into_response();
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let content_type = match path.extension().and_then(|e| e.to_str()) {
                Some("wav") => "audio/wav",
                Some("opus") => "audio/opus",
                Some("flac") => "audio/flac",
                _ => "audio/mpeg",
            };
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, content_type),
                    (header::CACHE_CONTROL, "public, max-age=86400"),
                ],
                bytes,
            )
                .into_response()
        }
        Err(_) => (StatusCode::NOT_FOUND, "audio not found").into_response(),
    }
}

/// `GET /health`
pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    Json(json!({
        "status": "ok",
        "connections": state.broadcaster.subscriber_count(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
    .into_response()
}
