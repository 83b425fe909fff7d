//! Speech synthesis with a two-tier cache in front of the provider.
//!
//! Lookup order is memory LRU, then disk, then one provider call per content
//! key. Synthesis is binary: it either yields audio bytes within the hard
//! timeout or a distinguished error the handler degrades on (carrier-native
//! `<Say>`).

use crate::cache::tts::{tts_cache_key, DiskTtsCache, TtsMemoryCache};
use crate::config::TtsConfig;
use crate::error::TtsError;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Provider accepts up to this much text per request.
const MAX_TTS_INPUT_CHARS: usize = 4096;

const SUPPORTED_VOICES: &[&str] = &[
    "alloy", "ash", "ballad", "coral", "echo", "fable", "onyx", "nova", "sage", "shimmer",
];

const SUPPORTED_FORMATS: &[&str] = &["mp3", "wav", "opus", "flac", "pcm"];

/// One synthesis request.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice: String,
    pub format: String,
    pub speed: f32,
}

/// Trait for speech synthesis providers.
#[async_trait]
pub trait TtsProvider: Send + Sync {
    /// Synthesize speech, returning encoded audio bytes.
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>, TtsError>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

/// OpenAI speech endpoint over one shared HTTP client.
pub struct OpenAiTtsProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiTtsProvider {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .connect_timeout(Duration::from_secs(3))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl TtsProvider for OpenAiTtsProvider {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>, TtsError> {
        let text: String = request.text.chars().take(MAX_TTS_INPUT_CHARS).collect();
        let url = format!("{}/audio/speech", self.base_url.trim_end_matches('/'));

        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": request.voice,
            "speed": request.speed,
            "response_format": request.format,
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| TtsError::SynthesisFailed {
                message: format!("HTTP request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TtsError::SynthesisFailed {
                message: format!("HTTP {status}: {body}"),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TtsError::SynthesisFailed {
                message: format!("failed to read audio body: {e}"),
            })?;
        Ok(bytes.to_vec())
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// A mock provider generating deterministic pseudo-audio for tests.
pub struct MockTtsProvider {
    call_count: AtomicUsize,
    fail: bool,
}

impl MockTtsProvider {
    pub fn new() -> Self {
        Self {
            call_count: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            call_count: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }
}

impl Default for MockTtsProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TtsProvider for MockTtsProvider {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>, TtsError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        if self.fail {
            return Err(TtsError::SynthesisFailed {
                message: "mock provider configured to fail".to_string(),
            });
        }
        // Bytes derived from the text so callers can assert on content
        Ok(request.text.as_bytes().to_vec())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Synthesis front-end: validates requests, runs the two-tier cache, and
/// guarantees at most one provider call per content key.
pub struct TtsEngine {
    provider: Arc<dyn TtsProvider>,
    memory: TtsMemoryCache,
    disk: DiskTtsCache,
    inflight: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    model: String,
    voice: String,
    format: String,
    speed: f32,
    timeout: Duration,
    retry: RetryPolicy,
}

impl TtsEngine {
    pub fn new(provider: Arc<dyn TtsProvider>, config: &TtsConfig) -> Self {
        let voice = if SUPPORTED_VOICES.contains(&config.voice.as_str()) {
            config.voice.clone()
        } else {
            warn!(voice = config.voice.as_str(), "unsupported voice, using alloy");
            "alloy".to_string()
        };
        let format = if SUPPORTED_FORMATS.contains(&config.format.as_str()) {
            config.format.clone()
        } else {
            warn!(format = config.format.as_str(), "unknown audio format, using mp3");
            "mp3".to_string()
        };

        Self {
            provider,
            memory: TtsMemoryCache::new(config.memory_cache_size),
            disk: DiskTtsCache::new(&config.cache_dir),
            inflight: AsyncMutex::new(HashMap::new()),
            model: config.model.clone(),
            voice,
            format,
            speed: config.speed.clamp(0.25, 4.0),
            timeout: Duration::from_secs(config.timeout_secs),
            retry: RetryPolicy::default(),
        }
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn disk(&self) -> &DiskTtsCache {
        &self.disk
    }

    fn key_for(&self, text: &str) -> String {
        tts_cache_key(&self.model, &self.voice, &self.format, text)
    }

    /// Synthesize `text`, consulting memory then disk then the provider.
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>, TtsError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TtsError::EmptyText);
        }
        let key = self.key_for(text);

        if let Some(bytes) = self.memory.get(&key) {
            debug!(target: "voxant::cache", key = key.as_str(), "tts memory hit");
            return Ok(bytes);
        }
        if let Some(bytes) = self.disk.read(&key, &self.format).await {
            self.memory.set(&key, bytes.clone());
            return Ok(bytes);
        }

        // Per-key guard: concurrent requests for the same phrase wait for the
        // first caller instead of issuing duplicate provider calls.
        let key_lock = {
            let mut inflight = self.inflight.lock().await;
            inflight.entry(key.clone()).or_default().clone()
        };
        let _guard = key_lock.lock().await;

        // Re-check both tiers now that we hold the key lock
        if let Some(bytes) = self.memory.get(&key) {
            return Ok(bytes);
        }
        if let Some(bytes) = self.disk.read(&key, &self.format).await {
            self.memory.set(&key, bytes.clone());
            return Ok(bytes);
        }

        let request = SynthesisRequest {
            text: text.to_string(),
            voice: self.voice.clone(),
            format: self.format.clone(),
            speed: self.speed,
        };

        let result = self.call_provider(&request).await;
        {
            let mut inflight = self.inflight.lock().await;
            inflight.remove(&key);
        }
        let bytes = result?;

        self.memory.set(&key, bytes.clone());
        if let Err(e) = self.disk.write(&key, &self.format, &bytes).await {
            warn!(key = key.as_str(), error = %e, "failed to persist tts audio");
        }

        Ok(bytes)
    }

    /// Synthesize and return the disk-cache file name the carrier can fetch.
    pub async fn synthesize_to_file(&self, text: &str) -> Result<String, TtsError> {
        self.synthesize(text).await?;
        let key = self.key_for(text.trim());
        Ok(DiskTtsCache::file_name(&key, &self.format))
    }

    /// Store pre-concatenated audio (e.g. overlapped first sentence plus
    /// remainder) under the full text's key and return its file name.
    pub async fn store_combined(&self, full_text: &str, audio: Vec<u8>) -> Result<String, TtsError> {
        let text = full_text.trim();
        if text.is_empty() || audio.is_empty() {
            return Err(TtsError::EmptyText);
        }
        let key = self.key_for(text);
        self.memory.set(&key, audio.clone());
        self.disk
            .write(&key, &self.format, &audio)
            .await
            .map_err(|e| TtsError::CacheIo {
                message: e.to_string(),
            })?;
        Ok(DiskTtsCache::file_name(&key, &self.format))
    }

    async fn call_provider(&self, request: &SynthesisRequest) -> Result<Vec<u8>, TtsError> {
        let started = std::time::Instant::now();
        let mut attempt = 0u32;
        loop {
            let remaining = self.timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(TtsError::Timeout {
                    timeout_secs: self.timeout.as_secs(),
                });
            }

            let result = timeout(remaining, self.provider.synthesize(request)).await;
            match result {
                Err(_) => {
                    return Err(TtsError::Timeout {
                        timeout_secs: self.timeout.as_secs(),
                    })
                }
                Ok(Ok(bytes)) => {
                    info!(
                        target: "voxant::latency",
                        provider = self.provider.name(),
                        chars = request.text.len(),
                        total_ms = started.elapsed().as_millis() as u64,
                        "tts synthesis"
                    );
                    return Ok(bytes);
                }
                Ok(Err(e)) => {
                    attempt += 1;
                    let delay = self.retry.delay(attempt);
                    let budget_left = self.timeout.saturating_sub(started.elapsed());
                    if !e.is_transient() || attempt >= self.retry.max_attempts || delay >= budget_left
                    {
                        return Err(e);
                    }
                    warn!(
                        provider = self.provider.name(),
                        attempt,
                        error = %e,
                        "transient tts failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_with(provider: Arc<dyn TtsProvider>, dir: &std::path::Path) -> TtsEngine {
        let config = TtsConfig {
            cache_dir: dir.to_string_lossy().to_string(),
            ..TtsConfig::default()
        };
        TtsEngine::new(provider, &config)
    }

    #[tokio::test]
    async fn test_synthesize_populates_both_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(MockTtsProvider::new());
        let engine = engine_with(provider.clone(), dir.path());

        let bytes = engine.synthesize("Hello there.").await.unwrap();
        assert_eq!(bytes, b"Hello there.");
        assert_eq!(provider.call_count(), 1);

        // Memory hit: no new provider call
        let again = engine.synthesize("Hello there.").await.unwrap();
        assert_eq!(again, bytes);
        assert_eq!(provider.call_count(), 1);

        // Disk hit after memory clear: still no new provider call
        engine.memory.clear();
        let from_disk = engine.synthesize("Hello there.").await.unwrap();
        assert_eq!(from_disk, bytes);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_at_most_one_provider_call_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(MockTtsProvider::new());
        let engine = Arc::new(engine_with(provider.clone(), dir.path()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = engine.clone();
            handles.push(tokio::spawn(
                async move { engine.synthesize("Same phrase.").await },
            ));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(Arc::new(MockTtsProvider::new()), dir.path());
        assert!(matches!(
            engine.synthesize("   ").await,
            Err(TtsError::EmptyText)
        ));
    }

    #[tokio::test]
    async fn test_provider_failure_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(Arc::new(MockTtsProvider::failing()), dir.path());
        assert!(matches!(
            engine.synthesize("hello").await,
            Err(TtsError::SynthesisFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_synthesize_to_file_names_are_stable() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(Arc::new(MockTtsProvider::new()), dir.path());
        let a = engine.synthesize_to_file("Hi.").await.unwrap();
        let b = engine.synthesize_to_file("Hi.").await.unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("tts_"));
        assert!(a.ends_with(".mp3"));
        assert!(dir.path().join(&a).exists());
    }

    #[tokio::test]
    async fn test_store_combined_round_trips_through_cache() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(MockTtsProvider::new());
        let engine = engine_with(provider.clone(), dir.path());

        let file = engine
            .store_combined("Full reply text.", b"joined-audio".to_vec())
            .await
            .unwrap();
        assert!(dir.path().join(&file).exists());

        // A later lookup for the same text is served from cache
        let bytes = engine.synthesize("Full reply text.").await.unwrap();
        assert_eq!(bytes, b"joined-audio");
        assert_eq!(provider.call_count(), 0);
    }

    #[test]
    fn test_voice_and_format_validation() {
        let config = TtsConfig {
            voice: "robotvoice".to_string(),
            format: "midi".to_string(),
            ..TtsConfig::default()
        };
        let engine = TtsEngine::new(Arc::new(MockTtsProvider::new()), &config);
        assert_eq!(engine.voice, "alloy");
        assert_eq!(engine.format(), "mp3");
    }

    #[test]
    fn test_speed_clamped() {
        let config = TtsConfig {
            speed: 9.0,
            ..TtsConfig::default()
        };
        let engine = TtsEngine::new(Arc::new(MockTtsProvider::new()), &config);
        assert_eq!(engine.speed, 4.0);
    }
}
