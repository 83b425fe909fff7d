//! End-to-end turn flow through the router with mock providers and an
//! in-memory database.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use voxant_core::carrier::{compute_signature, SIGNATURE_HEADER};
use voxant_core::config::VoxantConfig;
use voxant_core::llm::MockLlmProvider;
use voxant_core::states::SalesState;
use voxant_core::tts::MockTtsProvider;
use voxant_server::db::{self, NewLead};
use voxant_server::{api, AppState};

struct TestApp {
    state: Arc<AppState>,
    router: Router,
    call_id: i64,
    _tts_dir: tempfile::TempDir,
}

async fn setup(llm_reply: &str, tts_works: bool, verify_signatures: bool) -> TestApp {
    let tts_dir = tempfile::tempdir().unwrap();

    let mut config = VoxantConfig::default();
    config.carrier.webhook_base_url = "https://voice.example".to_string();
    config.carrier.signature_verification_enabled = verify_signatures;
    config.carrier.auth_token = if verify_signatures {
        "test-token".to_string()
    } else {
        String::new()
    };
    config.tts.cache_dir = tts_dir.path().to_string_lossy().to_string();

    let pool = db::connect("sqlite::memory:", 4).await.unwrap();
    db::init_schema(&pool).await.unwrap();

    let lead_id = db::create_lead(
        &pool,
        &NewLead {
            name: "Maya Chen".into(),
            company: "Northwind Logistics".into(),
            title: "VP Operations".into(),
            industry: "Logistics".into(),
            phone: "+15550100".into(),
            email: "maya@northwind.example".into(),
            source: "cold list".into(),
        },
    )
    .await
    .unwrap();
    let call_id = db::create_call(&pool, lead_id, "+15550100").await.unwrap();

    let tts: Arc<dyn voxant_core::tts::TtsProvider> = if tts_works {
        Arc::new(MockTtsProvider::new())
    } else {
        Arc::new(MockTtsProvider::failing())
    };

    let state = AppState::build(
        config,
        pool,
        Arc::new(MockLlmProvider::new(llm_reply)),
        tts,
    );
    let router = api::router(state.clone());

    TestApp {
        state,
        router,
        call_id,
        _tts_dir: tts_dir,
    }
}

async fn set_sales_state(app: &TestApp, state: SalesState) {
    sqlx::query(
        "UPDATE calls SET sales_state = ?, state_turns = 0, state_questions = 0,
         status = 'in_progress' WHERE id = ?",
    )
    .bind(state.id() as i64)
    .bind(app.call_id)
    .execute(&app.state.db)
    .await
    .unwrap();
}

fn form_body(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={}", v.replace(' ', "+")))
        .collect::<Vec<_>>()
        .join("&")
}

async fn post_form(router: &Router, path: &str, pairs: &[(&str, &str)]) -> (StatusCode, String) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form_body(pairs)))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8_lossy(&bytes).to_string())
}

async fn get(router: &Router, path: &str) -> (StatusCode, String) {
    let request = Request::builder().uri(path).body(Body::empty()).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8_lossy(&bytes).to_string())
}

/// Poll until the background persistence task lands the expected transcript
/// fragment.
async fn wait_for_transcript(app: &TestApp, fragment: &str) {
    for _ in 0..100 {
        let call = db::get_call(&app.state.db, app.call_id)
            .await
            .unwrap()
            .unwrap();
        if call.full_transcript.contains(fragment) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("transcript never contained {fragment:?}");
}

/// Poll until the background persistence task lands the expected state.
async fn wait_for_sales_state(app: &TestApp, expected: SalesState) {
    for _ in 0..100 {
        let call = db::get_call(&app.state.db, app.call_id)
            .await
            .unwrap()
            .unwrap();
        if call.sales_state == expected.id() as i64 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let call = db::get_call(&app.state.db, app.call_id)
        .await
        .unwrap()
        .unwrap();
    panic!(
        "sales_state never reached {} (still {})",
        expected.id(),
        call.sales_state
    );
}

#[tokio::test]
async fn cold_call_opener_uses_quick_template_with_name() {
    // TTS disabled so the reply text shows up in <Say>
    let app = setup("unused", false, false).await;
    set_sales_state(&app, SalesState::CallStart).await;

    let (status, body) = post_form(
        &app.router,
        &format!("/webhook/{}/turn", app.call_id),
        &[("SpeechResult", "")],
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<Say>"), "expected carrier-voice fallback: {body}");
    assert!(body.contains("Maya"), "opener must greet the lead: {body}");
    assert!(body.contains("<Gather"), "call must continue: {body}");
}

#[tokio::test]
async fn permission_granted_advances_to_discovery() {
    let app = setup(
        "Happy to hear that. Do you handle invoicing centrally, or is it spread across teams?",
        false,
        false,
    )
    .await;
    set_sales_state(&app, SalesState::Permission).await;

    let (status, body) = post_form(
        &app.router,
        &format!("/webhook/{}/turn", app.call_id),
        &[("SpeechResult", "sure, go ahead")],
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<Gather"));
    wait_for_sales_state(&app, SalesState::OpenDiscovery).await;

    let call = db::get_call(&app.state.db, app.call_id)
        .await
        .unwrap()
        .unwrap();
    assert!(call.full_transcript.contains("LEAD: sure, go ahead"));
    assert!(call.full_transcript.contains("AGENT:"));
}

#[tokio::test]
async fn hostile_mid_presentation_hangs_up() {
    let app = setup("unused", false, false).await;
    set_sales_state(&app, SalesState::ValueProposition).await;

    let (status, body) = post_form(
        &app.router,
        &format!("/webhook/{}/turn", app.call_id),
        &[("SpeechResult", "stop calling me you scammers")],
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<Hangup/>"));
    assert!(!body.contains("<Gather"), "hostile exit must not gather: {body}");

    // Polite exit, twenty words or fewer
    let say = body
        .split("<Say>")
        .nth(1)
        .and_then(|s| s.split("</Say>").next())
        .unwrap();
    assert!(say.split_whitespace().count() <= 20, "exit too long: {say}");

    wait_for_sales_state(&app, SalesState::Exit).await;
}

#[tokio::test]
async fn exit_state_is_absorbing_across_turns() {
    let app = setup("unused", false, false).await;
    set_sales_state(&app, SalesState::ValueProposition).await;

    post_form(
        &app.router,
        &format!("/webhook/{}/turn", app.call_id),
        &[("SpeechResult", "stop calling me")],
    )
    .await;
    wait_for_sales_state(&app, SalesState::Exit).await;

    // A late turn after exit gets the exit document again
    let (_, body) = post_form(
        &app.router,
        &format!("/webhook/{}/turn", app.call_id),
        &[("SpeechResult", "wait, actually tell me more")],
    )
    .await;
    assert!(body.contains("<Hangup/>"));
    assert!(!body.contains("<Gather"));

    let call = db::get_call(&app.state.db, app.call_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(call.sales_state, SalesState::Exit.id() as i64);
}

#[tokio::test]
async fn objection_routes_to_handling_state() {
    let app = setup(
        "That's fair, and worth comparing. What's working well with your current setup?",
        false,
        false,
    )
    .await;
    set_sales_state(&app, SalesState::ValueProposition).await;

    let (status, body) = post_form(
        &app.router,
        &format!("/webhook/{}/turn", app.call_id),
        &[("SpeechResult", "we already use Competitor X")],
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<Gather"));
    wait_for_sales_state(&app, SalesState::ObjectionHandling).await;
}

#[tokio::test]
async fn scheduling_intent_reaches_scheduling_state() {
    let app = setup(
        "Great — Tuesday works. Morning or afternoon, and what's the best email for the invite?",
        false,
        false,
    )
    .await;
    set_sales_state(&app, SalesState::DeepEngagement).await;

    let (status, body) = post_form(
        &app.router,
        &format!("/webhook/{}/turn", app.call_id),
        &[("SpeechResult", "can we set up a demo next Tuesday")],
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<Gather"));
    wait_for_sales_state(&app, SalesState::Scheduling).await;
}

#[tokio::test]
async fn repeated_turn_is_served_from_cache() {
    let app = setup(
        "Roughly how many hours a week does that cost the team?",
        false,
        false,
    )
    .await;
    set_sales_state(&app, SalesState::ProbeDiscovery).await;

    let (_, first) = post_form(
        &app.router,
        &format!("/webhook/{}/turn", app.call_id),
        &[("SpeechResult", "the manual rekeying is painful")],
    )
    .await;
    wait_for_transcript(&app, "LEAD: the manual rekeying is painful").await;

    // Same state, same lead, same utterance: identical reply text
    set_sales_state(&app, SalesState::ProbeDiscovery).await;
    let (_, second) = post_form(
        &app.router,
        &format!("/webhook/{}/turn", app.call_id),
        &[("SpeechResult", "the manual rekeying is painful")],
    )
    .await;

    let say_of = |body: &str| {
        body.split("<Say>")
            .nth(1)
            .and_then(|s| s.split("</Say>").next())
            .unwrap()
            .to_string()
    };
    assert_eq!(say_of(&first), say_of(&second));
}

#[tokio::test]
async fn synthesized_audio_is_played_and_served() {
    let app = setup("unused", true, false).await;
    set_sales_state(&app, SalesState::CallStart).await;

    let (_, body) = post_form(
        &app.router,
        &format!("/webhook/{}/turn", app.call_id),
        &[("SpeechResult", "")],
    )
    .await;

    assert!(body.contains("<Play>"), "working tts should play audio: {body}");
    let url = body
        .split("<Play>")
        .nth(1)
        .and_then(|s| s.split("</Play>").next())
        .unwrap();
    assert!(url.starts_with("https://voice.example/calls/"));

    // The same file must be servable through the audio route
    let path = url.strip_prefix("https://voice.example").unwrap();
    let (status, audio) = get(&app.router, path).await;
    assert_eq!(status, StatusCode::OK);
    assert!(audio.contains("Maya"), "mock audio encodes the text");
}

#[tokio::test]
async fn unknown_call_yields_minimal_markup() {
    let app = setup("unused", false, false).await;
    let (status, body) = post_form(
        &app.router,
        "/webhook/9999/turn",
        &[("SpeechResult", "hello")],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "<Response></Response>");
}

#[tokio::test]
async fn status_webhook_is_idempotent() {
    let app = setup("unused", false, false).await;
    set_sales_state(&app, SalesState::Permission).await;

    for _ in 0..3 {
        let (status, body) = post_form(
            &app.router,
            &format!("/webhook/{}/status", app.call_id),
            &[("CallStatus", "completed"), ("CallSid", "CA123")],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"ok\":true"));
    }

    let call = db::get_call(&app.state.db, app.call_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(call.status, "completed");
    assert_eq!(call.carrier_call_sid.as_deref(), Some("CA123"));
}

#[tokio::test]
async fn signature_verification_rejects_unsigned_requests() {
    let app = setup("unused", false, true).await;
    set_sales_state(&app, SalesState::Permission).await;

    let (status, _) = post_form(
        &app.router,
        &format!("/webhook/{}/turn", app.call_id),
        &[("SpeechResult", "hello")],
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn signature_verification_accepts_signed_requests() {
    let app = setup("Understood. What does your current process look like?", false, true).await;
    set_sales_state(&app, SalesState::OpenDiscovery).await;

    let path = format!("/webhook/{}/turn", app.call_id);
    let url = format!("https://voice.example{path}");
    let mut params = BTreeMap::new();
    params.insert("SpeechResult".to_string(), "we do it all by hand today".to_string());
    let signature = compute_signature(&url, &params, "test-token");

    let request = Request::builder()
        .method("POST")
        .uri(&path)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header(SIGNATURE_HEADER, signature)
        .body(Body::from(form_body(&[(
            "SpeechResult",
            "we do it all by hand today",
        )])))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn transcript_endpoint_reports_call_fields() {
    let app = setup("Noted. Is that a daily or weekly headache?", false, false).await;
    set_sales_state(&app, SalesState::ProbeDiscovery).await;

    post_form(
        &app.router,
        &format!("/webhook/{}/turn", app.call_id),
        &[("SpeechResult", "it is a real problem for us")],
    )
    .await;
    wait_for_transcript(&app, "LEAD: it is a real problem for us").await;

    let (status, body) = get(
        &app.router,
        &format!("/calls/{}/transcript", app.call_id),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["call_id"], app.call_id);
    assert!(json["full_transcript"]
        .as_str()
        .unwrap()
        .contains("LEAD: it is a real problem for us"));

    let (status, _) = get(&app.router, "/calls/9999/transcript").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn quality_metrics_endpoint_reports_distribution() {
    let app = setup("unused", false, false).await;
    set_sales_state(&app, SalesState::CallStart).await;

    post_form(
        &app.router,
        &format!("/webhook/{}/turn", app.call_id),
        &[("SpeechResult", "")],
    )
    .await;

    // Quality scoring is fire-and-forget; give it a beat
    tokio::time::sleep(Duration::from_millis(50)).await;

    let (status, body) = get(&app.router, "/calls/quality/metrics").await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["total_responses"], 1);
    assert_eq!(json["response_distribution"]["quick"], 1);
    assert!(json["quality_metrics"]["avg_overall_score"].as_f64().unwrap() >= 70.0);
}

#[tokio::test]
async fn breaker_endpoint_lists_upstreams() {
    let app = setup("unused", false, false).await;
    let (status, body) = get(&app.router, "/calls/breakers").await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    let names: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"llm"));
    assert!(names.contains(&"tts"));
}

#[tokio::test]
async fn recording_webhook_stores_url() {
    let app = setup("unused", false, false).await;
    let (status, body) = post_form(
        &app.router,
        &format!("/webhook/{}/recording", app.call_id),
        &[("RecordingUrl", "https://carrier.example/rec/123.mp3")],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("\"ok\":true"));

    let call = db::get_call(&app.state.db, app.call_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        call.recording_url.as_deref(),
        Some("https://carrier.example/rec/123.mp3")
    );
}

#[tokio::test]
async fn initial_webhook_plays_opener_and_gathers() {
    let app = setup("unused", true, false).await;

    let (status, body) = post_form(
        &app.router,
        &format!("/webhook/{}", app.call_id),
        &[("CallSid", "CA555")],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<Play>"));
    assert!(body.contains(&format!("/webhook/{}/turn", app.call_id)));

    let call = db::get_call(&app.state.db, app.call_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(call.status, "in_progress");
    assert_eq!(call.carrier_call_sid.as_deref(), Some("CA555"));
}

#[tokio::test]
async fn health_endpoint_is_up() {
    let app = setup("unused", false, false).await;
    let (status, body) = get(&app.router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("\"status\":\"ok\""));
}
