//! Tiered caches backing the low-latency reply pipeline.

pub mod response;
pub mod tts;

pub use response::{normalize, ResponseCache, ResponseCacheStats};
pub use tts::{tts_cache_key, DiskTtsCache, TtsMemoryCache};
