use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use tracing::debug;

use signalflow_core::sha256_hex;

/// Injected store for AI responses.
pub trait ResponseCache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&self, key: String, response: String);
}

/// Cache key for a prompt sent to a model.
pub fn cache_key(model: &str, prompt: &str) -> String {
    let mut material = Vec::with_capacity(model.len() + prompt.len() + 1);
    material.extend_from_slice(model.as_bytes());
    material.push(0);
    material.extend_from_slice(prompt.as_bytes());
    sha256_hex(&material)
}

struct CachedResponse {
    response: String,
    stored_at: Instant,
}

/// Bounded LRU cache whose entries expire after a fixed TTL.
pub struct LruResponseCache {
    entries: Mutex<LruCache<String, CachedResponse>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LruResponseCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl ResponseCache for LruResponseCache {
    fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let fresh = match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.response.clone()),
            Some(_) => {
                entries.pop(key);
                debug!("expired cached response evicted");
                None
            }
            None => None,
        };
        let counter = if fresh.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        fresh
    }

    fn put(&self, key: String, response: String) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.put(
            key,
            CachedResponse {
                response,
                stored_at: Instant::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_separates_model_and_prompt() {
        assert_ne!(cache_key("a", "bc"), cache_key("ab", "c"));
        assert_eq!(cache_key("m", "p"), cache_key("m", "p"));
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = LruResponseCache::new(2, Duration::from_secs(60));
        cache.put("a".into(), "1".into());
        cache.put("b".into(), "2".into());
        assert_eq!(cache.get("a").as_deref(), Some("1"));
        cache.put("c".into(), "3".into());

        assert!(cache.get("b").is_none());
        assert_eq!(cache.get("a").as_deref(), Some("1"));
        assert_eq!(cache.get("c").as_deref(), Some("3"));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.hits(), 3);
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn expired_entries_are_dropped() {
        let cache = LruResponseCache::new(4, Duration::from_millis(20));
        cache.put("k".into(), "v".into());
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }
}
