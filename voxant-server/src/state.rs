//! Process-wide application state shared by all handlers.

use crate::db::Db;
use crate::gateway::Broadcaster;
use std::sync::Arc;
use std::time::Instant;
use voxant_core::cache::response::ResponseCache;
use voxant_core::config::VoxantConfig;
use voxant_core::engine::ResponseEngine;
use voxant_core::llm::LlmProvider;
use voxant_core::prompt::PromptBuilder;
use voxant_core::quality::QualityScorer;
use voxant_core::tts::{TtsEngine, TtsProvider};

/// Everything a request handler can reach. Built once at startup; the HTTP
/// clients, caches, and scorer are the only process-wide mutable state and
/// each is guarded internally by a single short-lived lock.
pub struct AppState {
    pub config: VoxantConfig,
    pub db: Db,
    pub engine: ResponseEngine,
    pub tts: Arc<TtsEngine>,
    pub quality: Arc<QualityScorer>,
    pub broadcaster: Broadcaster,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the engine and shared singletons from configuration and the two
    /// provider implementations (real in `main`, mocks in tests).
    pub fn build(
        config: VoxantConfig,
        db: Db,
        llm: Arc<dyn LlmProvider>,
        tts_provider: Arc<dyn TtsProvider>,
    ) -> Arc<Self> {
        let tts = Arc::new(TtsEngine::new(tts_provider, &config.tts));
        let quality = Arc::new(QualityScorer::new(
            config.quality.baseline_score,
            config.quality.alert_threshold,
            config.quality.window,
        ));
        let cache = Arc::new(ResponseCache::new(
            std::time::Duration::from_secs(config.response_cache.ttl_secs),
            config.response_cache.max_entries,
        ));
        let prompts = PromptBuilder::new(
            config.agent.agent_name.clone(),
            config.agent.company_name.clone(),
        );
        let engine = ResponseEngine::new(
            llm,
            tts.clone(),
            cache,
            quality.clone(),
            prompts,
            config.llm.max_tokens,
            config.llm.serial_fallback,
        );

        Arc::new(Self {
            config,
            db,
            engine,
            tts,
            quality,
            broadcaster: Broadcaster::new(),
            started_at: Instant::now(),
        })
    }

    /// Public URL the carrier fetches a cached audio file from.
    pub fn audio_url(&self, call_id: i64, file_name: &str) -> String {
        format!(
            "{}/calls/{}/tts/{}",
            self.config.carrier.webhook_base_url.trim_end_matches('/'),
            call_id,
            file_name
        )
    }
}
