//! Carrier webhook handlers.
//!
//! Every carrier-originated request is authenticated with the HMAC signature
//! header before processing. Malformed or unauthenticated requests never
//! produce a user-audible error: the prospect side always receives valid
//! markup (or, for signature failures, a 403 the carrier retries).

use crate::db;
use crate::gateway::GatewayEvent;
use crate::state::AppState;
use crate::turn;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Form;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use voxant_core::carrier::{verify_signature, SIGNATURE_HEADER};

fn xml_response(body: String) -> Response {
    (
        StatusCode::OK,
        [("content-type", "application/xml")],
        body,
    )
        .into_response()
}

/// Authenticate a webhook request. The canonical URL is the configured public
/// base joined with the request path, matching what the carrier signed.
fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    uri: &Uri,
    form: &BTreeMap<String, String>,
) -> Result<(), Response> {
    if !state.config.carrier.signature_verification_enabled {
        return Ok(());
    }
    let token = state.config.carrier.auth_token.as_str();
    if token.is_empty() {
        warn!("carrier auth token not configured, skipping signature verification");
        return Ok(());
    }

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let url = format!(
        "{}{}",
        state.config.carrier.webhook_base_url.trim_end_matches('/'),
        uri.path()
    );

    if verify_signature(signature, &url, form, token) {
        Ok(())
    } else {
        warn!(path = uri.path(), "webhook signature verification failed");
        Err((StatusCode::FORBIDDEN, "invalid signature").into_response())
    }
}

/// `POST /webhook/{call_id}` — first contact when the carrier connects.
pub async fn initial(
    Path(call_id): Path<i64>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    uri: Uri,
    form: Option<Form<BTreeMap<String, String>>>,
) -> Response {
    // A malformed body never produces a user-audible error; it degrades to
    // an empty field set.
    let form = form.map(|Form(f)| f).unwrap_or_default();
    if let Err(response) = authenticate(&state, &headers, &uri, &form) {
        return response;
    }
    let carrier_sid = form.get("CallSid").map(String::as_str).unwrap_or("");
    xml_response(turn::handle_initial(&state, call_id, carrier_sid).await)
}

/// `POST /webhook/{call_id}/turn` — one prospect utterance.
pub async fn turn(
    Path(call_id): Path<i64>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    uri: Uri,
    form: Option<Form<BTreeMap<String, String>>>,
) -> Response {
    let form = form.map(|Form(f)| f).unwrap_or_default();
    if let Err(response) = authenticate(&state, &headers, &uri, &form) {
        return response;
    }
    let speech = form.get("SpeechResult").map(String::as_str).unwrap_or("");
    xml_response(turn::handle_turn(&state, call_id, speech).await)
}

/// `POST /webhook/{call_id}/status` — lifecycle callback. Idempotent.
pub async fn status(
    Path(call_id): Path<i64>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    uri: Uri,
    form: Option<Form<BTreeMap<String, String>>>,
) -> Response {
    let form = form.map(|Form(f)| f).unwrap_or_default();
    if let Err(response) = authenticate(&state, &headers, &uri, &form) {
        return response;
    }

    let call_status = form.get("CallStatus").map(String::as_str).unwrap_or("");
    let carrier_sid = form.get("CallSid").map(String::as_str).unwrap_or("");
    if call_status.is_empty() {
        return (StatusCode::OK, axum::Json(json!({ "ok": false }))).into_response();
    }

    if let Err(e) = db::apply_status(&state.db, call_id, call_status, carrier_sid).await {
        warn!(call_id, error = %e, "status update failed");
        return (StatusCode::OK, axum::Json(json!({ "ok": false }))).into_response();
    }

    if let Ok(Some(call)) = db::get_call(&state.db, call_id).await {
        state.broadcaster.publish(GatewayEvent::CallStatus {
            call_id,
            lead_id: call.lead_id,
            status: call.status.clone(),
        });

        // Terminal unanswered outcomes hand off to the post-call pipeline.
        if matches!(
            call.status.as_str(),
            "no_answer" | "busy" | "failed" | "canceled"
        ) {
            info!(call_id, status = call.status.as_str(), "call unanswered");
        }
    }

    (StatusCode::OK, axum::Json(json!({ "ok": true }))).into_response()
}

/// `POST /webhook/{call_id}/recording` — recording-ready callback.
pub async fn recording(
    Path(call_id): Path<i64>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    uri: Uri,
    form: Option<Form<BTreeMap<String, String>>>,
) -> Response {
    let form = form.map(|Form(f)| f).unwrap_or_default();
    if let Err(response) = authenticate(&state, &headers, &uri, &form) {
        return response;
    }

    let url = form.get("RecordingUrl").map(String::as_str).unwrap_or("");
    if url.is_empty() {
        return (StatusCode::OK, axum::Json(json!({ "ok": false }))).into_response();
    }

    if let Err(e) = db::set_recording_url(&state.db, call_id, url).await {
        warn!(call_id, error = %e, "recording update failed");
        return (StatusCode::OK, axum::Json(json!({ "ok": false }))).into_response();
    }

    state.broadcaster.publish(GatewayEvent::RecordingReady {
        call_id,
        recording_url: url.to_string(),
    });

    (StatusCode::OK, axum::Json(json!({ "ok": true }))).into_response()
}
