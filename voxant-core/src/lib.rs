//! # Voxant Core
//!
//! Conversational engine for a real-time outbound voice sales agent.
//! Provides the 13-state sales machine, intent detection, the three-tier
//! reply pipeline (quick templates, response cache, streaming LLM with
//! overlapped speech synthesis), tiered audio caches, quality scoring,
//! latency instrumentation, and carrier markup with webhook authentication.

pub mod breaker;
pub mod cache;
pub mod carrier;
pub mod config;
pub mod engine;
pub mod error;
pub mod intents;
pub mod latency;
pub mod llm;
pub mod prompt;
pub mod quality;
pub mod quick;
pub mod retry;
pub mod states;
pub mod tts;
pub mod warmup;

// Re-export commonly used types at the crate root.
pub use breaker::{BreakerSnapshot, BreakerState, CircuitBreaker};
pub use cache::response::ResponseCache;
pub use config::{load_config, VoxantConfig};
pub use engine::{clean_reply, EngineReply, ResponseEngine, TurnInput};
pub use error::{Result, VoxantError};
pub use intents::{detect_objection, IntentFlags, ObjectionKind};
pub use latency::LatencyTracker;
pub use llm::{LlmProvider, MockLlmProvider, OpenAiCompatProvider};
pub use prompt::{LeadContext, PromptBuilder};
pub use quality::{QualityScorer, ReplySource};
pub use states::{route, Channel, ConversationState, SalesState};
pub use tts::{MockTtsProvider, OpenAiTtsProvider, TtsEngine, TtsProvider};
