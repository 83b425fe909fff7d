//! Startup warming: connection pools, one minimal LLM completion, and
//! pre-synthesis of the common phrases.
//!
//! Runs as a background task so process readiness never waits on it.
//! Idempotent; safe to re-run.

use crate::llm::LlmProvider;
use crate::tts::TtsEngine;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Phrases every call is likely to need; synthesized into both cache tiers
/// before the first webhook arrives.
pub const COMMON_PHRASES: [&str; 7] = [
    "Did I catch you at a bad time?",
    "Before we continue — can you hear me clearly?",
    "Got it. What's the best way to think about that on your side?",
    "No problem at all — thanks for your time. I'll let you go.",
    "Totally fair — thanks for the quick response. I'll let you go.",
    "I hear you — that's a fair concern.",
    "Thanks for your time, and have a great day.",
];

/// Result of one warmup pass.
#[derive(Debug, Clone, Default)]
pub struct WarmupReport {
    pub endpoints_warmed: Vec<String>,
    pub endpoints_failed: Vec<(String, String)>,
    pub llm_ready: bool,
    pub phrases_cached: usize,
    pub duration: Duration,
}

/// Pre-establish a TCP+TLS connection to an endpoint host. HTTP-level errors
/// (401, 405) are fine; only connect failures matter.
async fn warm_endpoint(client: &reqwest::Client, url: &str) -> Result<(), String> {
    match client.head(url).send().await {
        Ok(_) => Ok(()),
        Err(e) => {
            if e.is_connect() || e.is_timeout() {
                Err(format!("connection failed: {e}"))
            } else {
                Ok(())
            }
        }
    }
}

/// Run the full warmup sequence: endpoint handshakes, one tiny completion to
/// warm the model endpoint, and pre-synthesis of the common phrases.
pub async fn run_warmup(
    llm: Arc<dyn LlmProvider>,
    tts: Arc<TtsEngine>,
    endpoints: Vec<String>,
) -> WarmupReport {
    let start = Instant::now();
    let mut report = WarmupReport::default();

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .connect_timeout(Duration::from_secs(3))
        .pool_max_idle_per_host(2)
        .build()
        .unwrap_or_default();

    for endpoint in endpoints {
        match warm_endpoint(&client, &endpoint).await {
            Ok(()) => report.endpoints_warmed.push(endpoint),
            Err(e) => report.endpoints_failed.push((endpoint, e)),
        }
    }

    match llm
        .complete("Respond with the single word: ready", 10, Duration::from_secs(30))
        .await
    {
        Ok(_) => {
            report.llm_ready = true;
            info!(target: "voxant::warmup", "llm endpoint warm");
        }
        Err(e) => {
            warn!(target: "voxant::warmup", error = %e, "llm warmup failed");
        }
    }

    for phrase in COMMON_PHRASES {
        match tts.synthesize(phrase).await {
            Ok(_) => report.phrases_cached += 1,
            Err(e) => {
                warn!(target: "voxant::warmup", phrase, error = %e, "phrase pre-synthesis failed");
            }
        }
    }

    report.duration = start.elapsed();
    info!(
        target: "voxant::warmup",
        endpoints = report.endpoints_warmed.len(),
        llm_ready = report.llm_ready,
        phrases = report.phrases_cached,
        duration_ms = report.duration.as_millis() as u64,
        "warmup complete"
    );
    report
}
