//! Token-streaming LLM client.
//!
//! Speaks the OpenAI-compatible chat completions API. The streaming path
//! reads SSE chunks incrementally, fires the first-sentence hook exactly once
//! so speech synthesis can overlap the remaining tokens, and on deadline
//! returns whatever prefix was accumulated instead of surfacing an error.

use crate::config::LlmConfig;
use crate::error::LlmError;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Hook invoked once with the first complete sentence of a streamed reply.
pub type FirstSentenceHook = Box<dyn FnOnce(String) + Send + 'static>;

/// Find the first sentence boundary: `.`, `!` or `?` followed by whitespace.
/// Returns `(first_sentence, remainder)` with both sides trimmed.
pub fn split_first_sentence(text: &str) -> Option<(String, String)> {
    let mut chars = text.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some((_, next)) = chars.peek() {
                if next.is_whitespace() {
                    let first = text[..idx + c.len_utf8()].trim().to_string();
                    let rest = text[idx + c.len_utf8()..].trim().to_string();
                    if !first.is_empty() {
                        return Some((first, rest));
                    }
                }
            }
        }
    }
    None
}

/// Provider interface for reply generation.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// One-shot completion.
    async fn complete(
        &self,
        prompt: &str,
        max_tokens: u32,
        deadline: Duration,
    ) -> Result<String, LlmError>;

    /// Streaming completion. `on_first_sentence` fires exactly once when the
    /// first sentence boundary is observed. If the deadline passes mid-stream
    /// the accumulated prefix is returned; an empty prefix is a timeout error.
    async fn complete_streaming(
        &self,
        prompt: &str,
        max_tokens: u32,
        deadline: Duration,
        on_first_sentence: Option<FirstSentenceHook>,
    ) -> Result<String, LlmError>;

    fn model_name(&self) -> &str;
}

/// OpenAI-compatible provider over one shared HTTP client.
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAiCompatProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .connect_timeout(Duration::from_secs(3))
            .build()
            .map_err(|e| LlmError::Connection {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    /// Host of the completions endpoint, for connection warming.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request_body(&self, prompt: &str, max_tokens: u32, stream: bool) -> Value {
        json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": max_tokens,
            "stream": stream,
            "messages": [
                {
                    "role": "system",
                    "content": "You are a concise sales voice assistant. Return only the words to speak, nothing else."
                },
                { "role": "user", "content": prompt },
            ],
        })
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    LlmError::Connection {
                        message: format!("request failed: {e}"),
                    }
                } else {
                    LlmError::ApiRequest {
                        message: format!("request failed: {e}"),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Self::map_http_error(status, &body_text));
        }
        Ok(response)
    }

    fn map_http_error(status: reqwest::StatusCode, body: &str) -> LlmError {
        match status.as_u16() {
            401 => LlmError::AuthFailed {
                provider: "openai-compatible".to_string(),
            },
            429 => LlmError::RateLimited {
                retry_after_secs: 5,
            },
            s if s >= 500 => LlmError::ApiRequest {
                message: format!("Server error ({s}): {body}"),
            },
            s => LlmError::ApiRequest {
                message: format!("HTTP {s}: {body}"),
            },
        }
    }

    /// Parse a single SSE data line into its JSON payload.
    fn parse_sse_line(line: &str) -> Option<Value> {
        let data = line.strip_prefix("data: ")?;
        if data == "[DONE]" {
            return None;
        }
        serde_json::from_str(data).ok()
    }

    fn token_from_chunk(chunk: &Value) -> Option<&str> {
        chunk
            .get("choices")?
            .get(0)?
            .get("delta")?
            .get("content")?
            .as_str()
            .filter(|s| !s.is_empty())
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn complete(
        &self,
        prompt: &str,
        max_tokens: u32,
        deadline: Duration,
    ) -> Result<String, LlmError> {
        let body = self.request_body(prompt, max_tokens, false);
        let started = Instant::now();

        let response = timeout(deadline, self.send(&body))
            .await
            .map_err(|_| LlmError::Timeout {
                timeout_ms: deadline.as_millis() as u64,
            })??;

        let remaining = deadline.saturating_sub(started.elapsed());
        let body_text = timeout(remaining, response.text())
            .await
            .map_err(|_| LlmError::Timeout {
                timeout_ms: deadline.as_millis() as u64,
            })?
            .map_err(|e| LlmError::ApiRequest {
                message: format!("failed to read response: {e}"),
            })?;

        let parsed: Value =
            serde_json::from_str(&body_text).map_err(|e| LlmError::ResponseParse {
                message: format!("invalid JSON: {e}"),
            })?;
        let text = parsed
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|t| t.as_str())
            .ok_or_else(|| LlmError::ResponseParse {
                message: "no message content in response".to_string(),
            })?;

        info!(
            target: "voxant::latency",
            model = self.model.as_str(),
            total_ms = started.elapsed().as_millis() as u64,
            "llm completion"
        );
        Ok(text.trim().to_string())
    }

    async fn complete_streaming(
        &self,
        prompt: &str,
        max_tokens: u32,
        deadline: Duration,
        on_first_sentence: Option<FirstSentenceHook>,
    ) -> Result<String, LlmError> {
        let body = self.request_body(prompt, max_tokens, true);
        let started = Instant::now();

        let response = match timeout(deadline, self.send(&body)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(LlmError::Timeout {
                    timeout_ms: deadline.as_millis() as u64,
                })
            }
        };

        let mut stream = response.bytes_stream();
        let mut pending = String::new();
        let mut collected = String::new();
        let mut first_token_at: Option<Instant> = None;
        let mut hook = on_first_sentence;
        let mut timed_out = false;

        'read: loop {
            let remaining = deadline.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                timed_out = true;
                break;
            }
            match timeout(remaining, stream.next()).await {
                Err(_) => {
                    timed_out = true;
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    // A broken stream with a prefix degrades like a timeout
                    if collected.is_empty() {
                        return Err(LlmError::Streaming {
                            message: format!("stream read failed: {e}"),
                        });
                    }
                    warn!(
                        target: "voxant::latency",
                        model = self.model.as_str(),
                        "stream broke mid-reply, using prefix"
                    );
                    break;
                }
                Ok(Some(Ok(chunk))) => {
                    pending.push_str(&String::from_utf8_lossy(&chunk));
                    while let Some(newline) = pending.find('\n') {
                        let line = pending[..newline].trim().to_string();
                        pending.drain(..=newline);
                        if line.is_empty() || line.starts_with(':') {
                            continue;
                        }
                        if line == "data: [DONE]" {
                            break 'read;
                        }
                        if let Some(data) = Self::parse_sse_line(&line) {
                            if let Some(token) = Self::token_from_chunk(&data) {
                                if first_token_at.is_none() {
                                    first_token_at = Some(Instant::now());
                                }
                                collected.push_str(token);
                                if hook.is_some() {
                                    if let Some((first, _)) = split_first_sentence(&collected) {
                                        if let Some(hook) = hook.take() {
                                            hook(first);
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }

        let ttft_ms = first_token_at
            .map(|t| t.duration_since(started).as_millis() as u64)
            .unwrap_or(0);
        info!(
            target: "voxant::latency",
            model = self.model.as_str(),
            ttft_ms,
            total_ms = started.elapsed().as_millis() as u64,
            timed_out,
            "llm streaming"
        );

        let collected = collected.trim().to_string();
        if timed_out && collected.is_empty() {
            return Err(LlmError::Timeout {
                timeout_ms: deadline.as_millis() as u64,
            });
        }
        debug!(chars = collected.len(), "llm stream collected");
        Ok(collected)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Scripted provider for tests: emits a fixed reply token by token with an
/// optional per-token delay, so timeout and overlap behavior is exercisable
/// without a network.
pub struct MockLlmProvider {
    reply: String,
    token_delay: Duration,
    fail_with_timeout: bool,
    calls: AtomicUsize,
}

impl MockLlmProvider {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            token_delay: Duration::ZERO,
            fail_with_timeout: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Delay between emitted tokens; lets tests trigger mid-stream deadlines.
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    /// Hang after the scripted tokens until the caller's deadline fires.
    pub fn hanging_after_reply(mut self) -> Self {
        self.fail_with_timeout = true;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn tokens(&self) -> Vec<String> {
        // Split keeping whitespace attached so re-joining is lossless
        let mut tokens = Vec::new();
        let mut current = String::new();
        for c in self.reply.chars() {
            current.push(c);
            if c.is_whitespace() {
                tokens.push(std::mem::take(&mut current));
            }
        }
        if !current.is_empty() {
            tokens.push(current);
        }
        tokens
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(
        &self,
        _prompt: &str,
        _max_tokens: u32,
        deadline: Duration,
    ) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_with_timeout {
            tokio::time::sleep(deadline).await;
            return Err(LlmError::Timeout {
                timeout_ms: deadline.as_millis() as u64,
            });
        }
        Ok(self.reply.clone())
    }

    async fn complete_streaming(
        &self,
        _prompt: &str,
        _max_tokens: u32,
        deadline: Duration,
        on_first_sentence: Option<FirstSentenceHook>,
    ) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        let mut collected = String::new();
        let mut hook = on_first_sentence;

        for token in self.tokens() {
            if !self.token_delay.is_zero() {
                let remaining = deadline.saturating_sub(started.elapsed());
                tokio::time::sleep(self.token_delay.min(remaining)).await;
            }
            // A token that would arrive past the deadline never arrives
            if started.elapsed() >= deadline {
                let prefix = collected.trim().to_string();
                if prefix.is_empty() {
                    return Err(LlmError::Timeout {
                        timeout_ms: deadline.as_millis() as u64,
                    });
                }
                return Ok(prefix);
            }
            collected.push_str(&token);
            if hook.is_some() {
                if let Some((first, _)) = split_first_sentence(&collected) {
                    if let Some(hook) = hook.take() {
                        hook(first);
                    }
                }
            }
        }

        if self.fail_with_timeout {
            let remaining = deadline.saturating_sub(started.elapsed());
            tokio::time::sleep(remaining).await;
            let prefix = collected.trim().to_string();
            if prefix.is_empty() {
                return Err(LlmError::Timeout {
                    timeout_ms: deadline.as_millis() as u64,
                });
            }
            return Ok(prefix);
        }

        Ok(collected.trim().to_string())
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn test_split_first_sentence() {
        let (first, rest) = split_first_sentence("Hello there. How are you?").unwrap();
        assert_eq!(first, "Hello there.");
        assert_eq!(rest, "How are you?");
    }

    #[test]
    fn test_split_requires_whitespace_after_punctuation() {
        assert!(split_first_sentence("v1.2 release").is_none());
        let (first, _) = split_first_sentence("v1.2 is out. More soon.").unwrap();
        assert_eq!(first, "v1.2 is out.");
    }

    #[test]
    fn test_split_no_boundary() {
        assert!(split_first_sentence("no punctuation here").is_none());
        assert!(split_first_sentence("trailing period.").is_none());
    }

    #[test]
    fn test_parse_sse_line() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#;
        let parsed = OpenAiCompatProvider::parse_sse_line(line).unwrap();
        assert_eq!(OpenAiCompatProvider::token_from_chunk(&parsed), Some("Hi"));
        assert!(OpenAiCompatProvider::parse_sse_line("data: [DONE]").is_none());
        assert!(OpenAiCompatProvider::parse_sse_line("event: ping").is_none());
    }

    #[tokio::test]
    async fn test_mock_streaming_fires_hook_once() {
        let provider = MockLlmProvider::new("First sentence. Second sentence follows here.");
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        let captured = Arc::new(std::sync::Mutex::new(String::new()));
        let captured_clone = captured.clone();

        let hook: FirstSentenceHook = Box::new(move |sentence| {
            assert!(!fired_clone.swap(true, Ordering::SeqCst), "hook fired twice");
            *captured_clone.lock().unwrap() = sentence;
        });

        let full = provider
            .complete_streaming("p", 150, Duration::from_secs(5), Some(hook))
            .await
            .unwrap();

        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(*captured.lock().unwrap(), "First sentence.");
        assert_eq!(full, "First sentence. Second sentence follows here.");
    }

    #[tokio::test]
    async fn test_mock_timeout_returns_prefix() {
        let provider = MockLlmProvider::new("one two three four five six seven eight")
            .with_token_delay(Duration::from_millis(20));
        let result = provider
            .complete_streaming("p", 150, Duration::from_millis(70), None)
            .await
            .unwrap();
        assert!(!result.is_empty());
        assert!(result.len() < "one two three four five six seven eight".len());
    }

    #[tokio::test]
    async fn test_mock_timeout_with_no_tokens_errors() {
        let provider =
            MockLlmProvider::new("slow").with_token_delay(Duration::from_millis(100));
        let result = provider
            .complete_streaming("p", 150, Duration::from_millis(10), None)
            .await;
        assert!(matches!(result, Err(LlmError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_mock_hang_after_reply_returns_prefix_at_deadline() {
        let provider = MockLlmProvider::new("Short answer. ").hanging_after_reply();
        let started = Instant::now();
        let result = provider
            .complete_streaming("p", 150, Duration::from_millis(80), None)
            .await
            .unwrap();
        assert_eq!(result, "Short answer.");
        assert!(started.elapsed() >= Duration::from_millis(80));
    }

    #[test]
    fn test_http_error_mapping() {
        let err =
            OpenAiCompatProvider::map_http_error(reqwest::StatusCode::UNAUTHORIZED, "denied");
        assert!(matches!(err, LlmError::AuthFailed { .. }));

        let err = OpenAiCompatProvider::map_http_error(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            "slow down",
        );
        assert!(matches!(err, LlmError::RateLimited { .. }));

        let err = OpenAiCompatProvider::map_http_error(
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            "boom",
        );
        assert!(err.is_transient());
    }

    #[test]
    fn test_provider_construction() {
        let config = LlmConfig {
            base_url: "http://localhost:11434/v1/".to_string(),
            ..LlmConfig::default()
        };
        let provider = OpenAiCompatProvider::new(&config).unwrap();
        assert_eq!(provider.base_url(), "http://localhost:11434/v1");
        assert_eq!(provider.model_name(), "gpt-4o-mini");
    }

    #[test]
    fn test_mock_tokens_lossless() {
        let provider = MockLlmProvider::new("a b  c.");
        let rejoined: String = provider.tokens().concat();
        assert_eq!(rejoined, "a b  c.");
    }
}
