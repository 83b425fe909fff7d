//! Per-turn latency tracking.
//!
//! One tracker is created at turn-handler entry; pipeline stages record O(1)
//! marks against it and a single structured event is emitted at the end of
//! the turn.

use std::collections::HashMap;
use std::time::Instant;
use tracing::info;

/// Stage names recorded during a turn.
pub mod marks {
    pub const PROMPT_BUILT: &str = "prompt_built";
    pub const LLM_FIRST_TOKEN: &str = "llm_first_token";
    pub const LLM_DONE: &str = "llm_done";
    pub const TTS_DONE: &str = "tts_done";
    pub const PERSIST_DONE: &str = "persist_done";
}

/// Stage timing marks for a single turn.
#[derive(Debug)]
pub struct LatencyTracker {
    call_id: i64,
    start: Instant,
    timestamps: HashMap<&'static str, Instant>,
}

impl LatencyTracker {
    pub fn new(call_id: i64) -> Self {
        Self {
            call_id,
            start: Instant::now(),
            timestamps: HashMap::new(),
        }
    }

    /// Record a mark for a stage. Last write wins.
    pub fn mark(&mut self, stage: &'static str) {
        self.timestamps.insert(stage, Instant::now());
    }

    /// Milliseconds from turn start to the given mark.
    pub fn since_start_ms(&self, stage: &str) -> Option<f64> {
        self.timestamps
            .get(stage)
            .map(|t| t.duration_since(self.start).as_secs_f64() * 1000.0)
    }

    /// Milliseconds between two marks, if both were recorded in order.
    pub fn elapsed_ms(&self, from: &str, to: &str) -> Option<f64> {
        let a = self.timestamps.get(from)?;
        let b = self.timestamps.get(to)?;
        Some(b.checked_duration_since(*a)?.as_secs_f64() * 1000.0)
    }

    /// Total milliseconds since the tracker was created.
    pub fn total_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Timing summary for the turn.
    pub fn summary(&self) -> LatencySummary {
        LatencySummary {
            call_id: self.call_id,
            prompt_ms: self.since_start_ms(marks::PROMPT_BUILT),
            llm_first_token_ms: self.since_start_ms(marks::LLM_FIRST_TOKEN),
            llm_ms: self.elapsed_ms(marks::PROMPT_BUILT, marks::LLM_DONE),
            tts_ms: self.elapsed_ms(marks::LLM_DONE, marks::TTS_DONE),
            total_ms: self.total_ms(),
        }
    }

    /// Emit the single end-of-turn latency event.
    pub fn emit(&self) {
        let s = self.summary();
        info!(
            target: "voxant::latency",
            call_id = s.call_id,
            prompt_ms = s.prompt_ms.map(|v| v.round()),
            llm_first_token_ms = s.llm_first_token_ms.map(|v| v.round()),
            llm_ms = s.llm_ms.map(|v| v.round()),
            tts_ms = s.tts_ms.map(|v| v.round()),
            total_ms = s.total_ms.round(),
            "turn complete"
        );
    }
}

/// Point-in-time latency summary.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LatencySummary {
    pub call_id: i64,
    pub prompt_ms: Option<f64>,
    pub llm_first_token_ms: Option<f64>,
    pub llm_ms: Option<f64>,
    pub tts_ms: Option<f64>,
    pub total_ms: f64,
}
