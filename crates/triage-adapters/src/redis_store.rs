use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use triage_core::{CoordinationStore, TriageError};

/// Redis-backed `CoordinationStore`. Each logical key maps onto a Redis sorted
/// set so the sliding-window limiter's ZADD/ZREMRANGEBYSCORE/ZCARD/EXPIRE
/// primitives are native commands rather than emulated client-side.
///
/// Uses a `ConnectionManager` rather than a raw `Connection` so reconnects
/// after a dropped socket are transparent to every caller sharing this store.
#[derive(Clone)]
pub struct RedisCoordinationStore {
    manager: ConnectionManager,
}

impl RedisCoordinationStore {
    pub async fn connect(redis_url: &str) -> Result<Self, TriageError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| TriageError::Upstream(format!("redis client open failed: {e}")))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| TriageError::Upstream(format!("redis connect failed: {e}")))?;
        Ok(Self { manager })
    }
}

fn store_err(op: &'static str) -> impl Fn(redis::RedisError) -> TriageError {
    move |e| TriageError::Upstream(format!("redis {op} failed: {e}"))
}

#[async_trait]
impl CoordinationStore for RedisCoordinationStore {
    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), TriageError> {
        let mut conn = self.manager.clone();
        redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(store_err("ZADD"))
    }

    async fn zremrangebyscore(&self, key: &str, min_score: f64) -> Result<(), TriageError> {
        let mut conn = self.manager.clone();
        redis::cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(min_score)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(store_err("ZREMRANGEBYSCORE"))
    }

    async fn zcard(&self, key: &str) -> Result<u64, TriageError> {
        let mut conn = self.manager.clone();
        conn.zcard(key).await.map_err(store_err("ZCARD"))
    }

    async fn zmin_score(&self, key: &str) -> Result<Option<f64>, TriageError> {
        let mut conn = self.manager.clone();
        let result: Vec<(String, f64)> = redis::cmd("ZRANGE")
            .arg(key)
            .arg(0)
            .arg(0)
            .arg("WITHSCORES")
            .query_async(&mut conn)
            .await
            .map_err(store_err("ZRANGE"))?;
        Ok(result.into_iter().next().map(|(_, score)| score))
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), TriageError> {
        let mut conn = self.manager.clone();
        conn.expire(key, ttl_secs as i64)
            .await
            .map_err(store_err("EXPIRE"))
    }
}
