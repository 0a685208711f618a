use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;

const DEFAULT_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
struct CachedResponse {
    body: Value,
    status: u16,
    expires_at: Instant,
}

/// Replay cache for mutating action calls, keyed by the client-supplied
/// `Idempotency-Key` header. Process-local `dashmap` store with lazy TTL
/// eviction: entries are only dropped when looked up and found stale, there is
/// no background sweep, which keeps the contract small enough to later swap in
/// a shared store without behavioral change.
#[derive(Clone, Default)]
pub struct IdempotencyCache {
    entries: std::sync::Arc<DashMap<String, CachedResponse>>,
    ttl: Duration,
}

impl IdempotencyCache {
    pub fn new() -> Self {
        Self {
            entries: std::sync::Arc::new(DashMap::new()),
            ttl: DEFAULT_TTL,
        }
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: std::sync::Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Look up a previously cached response for `key`, pruning it first if expired.
    pub fn get(&self, key: &str) -> Option<(u16, Value)> {
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > Instant::now() {
                return Some((entry.status, entry.body.clone()));
            }
        }
        self.entries.remove(key);
        None
    }

    pub fn put(&self, key: impl Into<String>, status: u16, body: Value) {
        self.entries.insert(
            key.into(),
            CachedResponse {
                body,
                status,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replays_cached_response_for_same_key() {
        let cache = IdempotencyCache::new();
        cache.put("key-1", 200, json!({"status": "FROZEN"}));

        let (status, body) = cache.get("key-1").expect("cached response present");
        assert_eq!(status, 200);
        assert_eq!(body, json!({"status": "FROZEN"}));
    }

    #[test]
    fn expired_entries_are_not_replayed() {
        let cache = IdempotencyCache::with_ttl(Duration::from_millis(1));
        cache.put("key-2", 200, json!({"status": "OPEN"}));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("key-2").is_none());
    }

    #[test]
    fn unknown_key_misses() {
        let cache = IdempotencyCache::new();
        assert!(cache.get("missing").is_none());
    }
}
