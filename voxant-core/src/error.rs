//! Error types for the Voxant engine.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering the LLM, TTS, engine, carrier-webhook, and configuration domains.

/// Top-level error type for the Voxant core library.
#[derive(Debug, thiserror::Error)]
pub enum VoxantError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("TTS error: {0}")]
    Tts(#[from] TtsError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Carrier error: {0}")]
    Carrier(#[from] CarrierError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from LLM provider interactions.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Streaming error: {message}")]
    Streaming { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

impl LlmError {
    /// Whether a retry against the provider could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Connection { .. } | LlmError::RateLimited { .. } => true,
            LlmError::ApiRequest { message } => message.contains("Server error"),
            _ => false,
        }
    }
}

/// Errors from speech synthesis.
#[derive(Debug, thiserror::Error)]
pub enum TtsError {
    #[error("Synthesis failed: {message}")]
    SynthesisFailed { message: String },

    #[error("Synthesis timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("TTS text is empty")]
    EmptyText,

    #[error("Cache IO error: {message}")]
    CacheIo { message: String },
}

impl TtsError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TtsError::SynthesisFailed { message } if message.contains("HTTP 5"))
    }
}

/// Errors from the response engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Circuit breaker open for upstream '{upstream}'")]
    CircuitOpen { upstream: String },

    #[error("No reply produced for state {state_id}")]
    EmptyReply { state_id: u8 },
}

/// Errors from carrier webhook handling.
#[derive(Debug, thiserror::Error)]
pub enum CarrierError {
    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Missing webhook field: {field}")]
    MissingField { field: String },

    #[error("Unknown call: {call_id}")]
    CallNotFound { call_id: i64 },

    #[error("Call {call_id} is in a terminal state")]
    TerminalState { call_id: i64 },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Convenience result alias for the crate.
pub type Result<T> = std::result::Result<T, VoxantError>;
