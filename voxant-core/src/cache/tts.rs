//! Two-tier audio cache: in-memory LRU over content-addressed disk files.
//!
//! Keys are derived from `(model, voice, format, text)` only — never the lead
//! — so common phrases are shared across calls. Disk files are served
//! directly to the carrier by the audio route.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Content-addressed cache key for one synthesis result.
pub fn tts_cache_key(model: &str, voice: &str, format: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update(b"|");
    hasher.update(voice.as_bytes());
    hasher.update(b"|");
    hasher.update(format.as_bytes());
    hasher.update(b"|");
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    // 20 hex chars is plenty for a file name and keeps paths short
    digest[..10].iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, Default)]
struct LruInner {
    entries: HashMap<String, Vec<u8>>,
    /// Access order, least recently used first.
    order: Vec<String>,
}

/// Bounded in-memory LRU of hot audio bytes.
#[derive(Debug)]
pub struct TtsMemoryCache {
    max_entries: usize,
    inner: Mutex<LruInner>,
}

impl TtsMemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            inner: Mutex::new(LruInner::default()),
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock().expect("tts memory cache lock poisoned");
        if inner.entries.contains_key(key) {
            inner.order.retain(|k| k != key);
            inner.order.push(key.to_string());
            return inner.entries.get(key).cloned();
        }
        None
    }

    pub fn set(&self, key: &str, audio: Vec<u8>) {
        let mut inner = self.inner.lock().expect("tts memory cache lock poisoned");
        if inner.entries.contains_key(key) {
            inner.order.retain(|k| k != key);
        } else if inner.entries.len() >= self.max_entries {
            let oldest = inner.order.remove(0);
            inner.entries.remove(&oldest);
        }
        inner.entries.insert(key.to_string(), audio);
        inner.order.push(key.to_string());
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("tts memory cache lock poisoned")
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("tts memory cache lock poisoned");
        inner.entries.clear();
        inner.order.clear();
    }
}

/// Disk tier of the audio cache. Files are named `tts_<key>.<format>` under
/// the cache directory so the audio-serving route can address them directly.
#[derive(Debug, Clone)]
pub struct DiskTtsCache {
    dir: PathBuf,
}

impl DiskTtsCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(key: &str, format: &str) -> String {
        format!("tts_{key}.{format}")
    }

    pub fn path_for(&self, key: &str, format: &str) -> PathBuf {
        self.dir.join(Self::file_name(key, format))
    }

    /// Read cached audio, if the file exists and is non-empty.
    pub async fn read(&self, key: &str, format: &str) -> Option<Vec<u8>> {
        let path = self.path_for(key, format);
        match tokio::fs::read(&path).await {
            Ok(bytes) if !bytes.is_empty() => {
                debug!(target: "voxant::cache", key, "tts disk cache hit");
                Some(bytes)
            }
            _ => None,
        }
    }

    /// Write audio under its content key, creating the directory on demand.
    pub async fn write(&self, key: &str, format: &str, audio: &[u8]) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key, format);
        tokio::fs::write(&path, audio).await?;
        Ok(path)
    }

    /// Resolve a serving request, refusing path traversal.
    pub fn resolve(&self, file_name: &str) -> Option<PathBuf> {
        if file_name.is_empty()
            || file_name.contains("..")
            || file_name.contains('/')
            || file_name.contains('\\')
        {
            return None;
        }
        Some(self.dir.join(file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_ignores_lead_identity() {
        let a = tts_cache_key("tts-1", "alloy", "mp3", "Hello there");
        let b = tts_cache_key("tts-1", "alloy", "mp3", "Hello there");
        assert_eq!(a, b);
        assert_eq!(a.len(), 20);
    }

    #[test]
    fn test_cache_key_varies_with_voice_and_text() {
        let base = tts_cache_key("tts-1", "alloy", "mp3", "Hello");
        assert_ne!(base, tts_cache_key("tts-1", "nova", "mp3", "Hello"));
        assert_ne!(base, tts_cache_key("tts-1", "alloy", "wav", "Hello"));
        assert_ne!(base, tts_cache_key("tts-1", "alloy", "mp3", "Goodbye"));
    }

    #[test]
    fn test_memory_lru_eviction() {
        let cache = TtsMemoryCache::new(2);
        cache.set("a", vec![1]);
        cache.set("b", vec![2]);
        // Touch "a" so "b" becomes least recently used
        assert!(cache.get("a").is_some());
        cache.set("c", vec![3]);
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_memory_overwrite_keeps_size() {
        let cache = TtsMemoryCache::new(2);
        cache.set("a", vec![1]);
        cache.set("a", vec![2]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("a").unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn test_disk_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = DiskTtsCache::new(dir.path());
        let key = tts_cache_key("tts-1", "alloy", "mp3", "hello");

        assert!(cache.read(&key, "mp3").await.is_none());
        cache.write(&key, "mp3", b"audio-bytes").await.unwrap();
        assert_eq!(cache.read(&key, "mp3").await.unwrap(), b"audio-bytes");
    }

    #[tokio::test]
    async fn test_disk_write_creates_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("deep/cache");
        let cache = DiskTtsCache::new(&nested);
        cache.write("k", "mp3", b"x").await.unwrap();
        assert!(nested.join("tts_k.mp3").exists());
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let cache = DiskTtsCache::new("/tmp/tts");
        assert!(cache.resolve("../etc/passwd").is_none());
        assert!(cache.resolve("a/b.mp3").is_none());
        assert!(cache.resolve("a\\b.mp3").is_none());
        assert!(cache.resolve("").is_none());
        assert!(cache.resolve("tts_abc.mp3").is_some());
    }
}
