//! Bounded TTL cache for generated replies.
//!
//! Keyed by `(state_id, lead_id, hash(normalized utterance))` so a repeated
//! utterance at the same point in the flow skips the LLM entirely. The hash
//! is a 4-byte FNV-1a: collisions are tolerable because the key already
//! includes the lead id and state.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Lowercase, trim, and collapse internal whitespace. Idempotent.
pub fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// 32-bit FNV-1a. Non-cryptographic by design.
fn fnv1a32(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

#[derive(Debug)]
struct CacheInner {
    entries: HashMap<String, (String, Instant)>,
    /// Insertion order for oldest-first eviction.
    order: VecDeque<String>,
    hits: u64,
    misses: u64,
}

/// Hit/miss statistics for the operator endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate_percent: f64,
    pub entries: usize,
}

/// In-memory reply cache with TTL and a bounded entry count.
#[derive(Debug)]
pub struct ResponseCache {
    ttl: Duration,
    max_entries: usize,
    inner: Mutex<CacheInner>,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                hits: 0,
                misses: 0,
            }),
        }
    }

    fn make_key(state_id: u8, lead_id: i64, user_input: &str) -> String {
        let hash = fnv1a32(normalize(user_input).as_bytes());
        format!("{state_id}_{lead_id}_{hash:08x}")
    }

    /// Fetch a cached reply if present and not expired.
    pub fn get(&self, state_id: u8, lead_id: i64, user_input: &str) -> Option<String> {
        let key = Self::make_key(state_id, lead_id, user_input);
        let mut inner = self.inner.lock().expect("response cache lock poisoned");

        match inner.entries.get(&key) {
            Some((reply, inserted)) if inserted.elapsed() <= self.ttl => {
                let reply = reply.clone();
                inner.hits += 1;
                debug!(target: "voxant::cache", key = key.as_str(), "response cache hit");
                Some(reply)
            }
            Some(_) => {
                inner.entries.remove(&key);
                inner.order.retain(|k| k != &key);
                inner.misses += 1;
                None
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Store a reply, evicting the oldest insertion on overflow.
    pub fn set(&self, state_id: u8, lead_id: i64, user_input: &str, reply: &str) {
        let key = Self::make_key(state_id, lead_id, user_input);
        let mut inner = self.inner.lock().expect("response cache lock poisoned");

        if !inner.entries.contains_key(&key) {
            while inner.entries.len() >= self.max_entries {
                match inner.order.pop_front() {
                    Some(oldest) => {
                        inner.entries.remove(&oldest);
                    }
                    None => break,
                }
            }
            inner.order.push_back(key.clone());
        }
        inner
            .entries
            .insert(key.clone(), (reply.to_string(), Instant::now()));
        debug!(
            target: "voxant::cache",
            key = key.as_str(),
            chars = reply.len(),
            "response cache set"
        );
    }

    pub fn stats(&self) -> ResponseCacheStats {
        let inner = self.inner.lock().expect("response cache lock poisoned");
        let total = inner.hits + inner.misses;
        ResponseCacheStats {
            hits: inner.hits,
            misses: inner.misses,
            hit_rate_percent: if total == 0 {
                0.0
            } else {
                (inner.hits as f64 / total as f64 * 10_000.0).round() / 100.0
            },
            entries: inner.entries.len(),
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("response cache lock poisoned");
        inner.entries.clear();
        inner.order.clear();
        inner.hits = 0;
        inner.misses = 0;
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600), 1000)
    }
}
