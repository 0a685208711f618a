use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use crate::error::TriageError;

/// Bound on how long a single coordination-store call may take before the
/// limiter treats it as unreachable and fails open.
const STORE_CALL_TIMEOUT: Duration = Duration::from_millis(50);

/// The rate limiter's only dependency on distributed state: a Redis-shaped
/// key-value store with sorted-set and TTL primitives. Implemented by a Redis
/// adapter in `triage-adapters` and an in-memory test double for unit tests.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Add `member` scored at `score` to the sorted set at `key`.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), TriageError>;
    /// Remove members scored below `min_score` from the sorted set at `key`.
    async fn zremrangebyscore(&self, key: &str, min_score: f64) -> Result<(), TriageError>;
    /// Count members in the sorted set at `key`.
    async fn zcard(&self, key: &str) -> Result<u64, TriageError>;
    /// Lowest score currently in the sorted set at `key`, if any.
    async fn zmin_score(&self, key: &str) -> Result<Option<f64>, TriageError>;
    /// Set (or refresh) the TTL, in seconds, on `key`.
    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), TriageError>;
}

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub window: Duration,
    pub capacity: u64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(1),
            capacity: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Rejected { retry_after_secs: u64 },
}

/// Distributed sliding-window log limiter. Fail-open on coordination-store
/// unavailability (availability over strict enforcement) with every fail-open
/// admission surfaced via `fail_opens()` so it can drive a Prometheus counter.
pub struct RateLimiter<S: CoordinationStore> {
    store: Arc<S>,
    config: RateLimiterConfig,
    fail_opens: std::sync::atomic::AtomicU64,
}

impl<S: CoordinationStore> RateLimiter<S> {
    pub fn new(store: Arc<S>, config: RateLimiterConfig) -> Self {
        Self {
            store,
            config,
            fail_opens: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn fail_opens(&self) -> u64 {
        self.fail_opens.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Check admission for `client_key` ("API key" or remote IP fallback),
    /// scoped per-client and self-expiring via the store's TTL primitive.
    pub async fn check(&self, client_key: &str) -> Admission {
        let key = format!("ratelimit:{client_key}");
        let window_secs = self.config.window.as_secs_f64();

        let result = timeout(STORE_CALL_TIMEOUT, self.check_inner(&key, window_secs)).await;

        match result {
            Ok(Ok(admission)) => admission,
            Ok(Err(_)) | Err(_) => {
                self.fail_opens
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                Admission::Admitted
            }
        }
    }

    async fn check_inner(&self, key: &str, window_secs: f64) -> Result<Admission, TriageError> {
        let now = now_secs();
        let floor = now - window_secs;

        self.store.zremrangebyscore(key, floor).await?;
        self.store.zadd(key, &now.to_string(), now).await?;
        self.store
            .expire(key, (window_secs * 2.0).ceil() as u64)
            .await?;

        let count = self.store.zcard(key).await?;
        if count > self.config.capacity {
            let oldest = self.store.zmin_score(key).await?.unwrap_or(now);
            let age = (now - oldest).max(0.0);
            let retry_after_secs = (window_secs - age).max(1.0).ceil() as u64;
            return Ok(Admission::Rejected { retry_after_secs });
        }

        Ok(Admission::Admitted)
    }
}

fn now_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashmap::DashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct InMemoryStore {
        sets: DashMap<String, Mutex<Vec<(String, f64)>>>,
    }

    #[async_trait]
    impl CoordinationStore for InMemoryStore {
        async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), TriageError> {
            self.sets
                .entry(key.to_string())
                .or_default()
                .lock()
                .unwrap()
                .push((member.to_string(), score));
            Ok(())
        }
        async fn zremrangebyscore(&self, key: &str, min_score: f64) -> Result<(), TriageError> {
            if let Some(set) = self.sets.get(key) {
                set.lock().unwrap().retain(|(_, score)| *score >= min_score);
            }
            Ok(())
        }
        async fn zcard(&self, key: &str) -> Result<u64, TriageError> {
            Ok(self
                .sets
                .get(key)
                .map(|set| set.lock().unwrap().len() as u64)
                .unwrap_or(0))
        }
        async fn zmin_score(&self, key: &str) -> Result<Option<f64>, TriageError> {
            Ok(self.sets.get(key).and_then(|set| {
                set.lock()
                    .unwrap()
                    .iter()
                    .map(|(_, score)| *score)
                    .fold(None, |acc, score| match acc {
                        None => Some(score),
                        Some(min) => Some(min.min(score)),
                    })
            }))
        }
        async fn expire(&self, _key: &str, _ttl_secs: u64) -> Result<(), TriageError> {
            Ok(())
        }
    }

    struct AlwaysFailStore;

    #[async_trait]
    impl CoordinationStore for AlwaysFailStore {
        async fn zadd(&self, _key: &str, _member: &str, _score: f64) -> Result<(), TriageError> {
            Err(TriageError::Upstream("down".to_string()))
        }
        async fn zremrangebyscore(&self, _key: &str, _min_score: f64) -> Result<(), TriageError> {
            Err(TriageError::Upstream("down".to_string()))
        }
        async fn zcard(&self, _key: &str) -> Result<u64, TriageError> {
            Err(TriageError::Upstream("down".to_string()))
        }
        async fn zmin_score(&self, _key: &str) -> Result<Option<f64>, TriageError> {
            Err(TriageError::Upstream("down".to_string()))
        }
        async fn expire(&self, _key: &str, _ttl_secs: u64) -> Result<(), TriageError> {
            Err(TriageError::Upstream("down".to_string()))
        }
    }

    #[tokio::test]
    async fn admits_up_to_capacity_then_rejects() {
        let limiter = RateLimiter::new(Arc::new(InMemoryStore::default()), RateLimiterConfig::default());

        for _ in 0..5 {
            assert_eq!(limiter.check("client-a").await, Admission::Admitted);
        }

        match limiter.check("client-a").await {
            Admission::Rejected { retry_after_secs } => assert!(retry_after_secs >= 1),
            Admission::Admitted => panic!("6th request should have been rejected"),
        }
    }

    #[tokio::test]
    async fn fails_open_when_store_unreachable() {
        let limiter = RateLimiter::new(Arc::new(AlwaysFailStore), RateLimiterConfig::default());
        assert_eq!(limiter.check("client-b").await, Admission::Admitted);
        assert_eq!(limiter.fail_opens(), 1);
    }
}
