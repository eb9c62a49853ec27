//! Shared key/value cache with TTL
//!
//! Backs the idempotency store and the short-lived driver view cache. The
//! cache is advisory: a miss (or an unreachable backend treated as a miss by
//! the caller) re-runs an operation that is safe to re-run.
//!
//! `RedisKvCache` is the production implementation, shared across dispatch
//! instances; `InMemoryKvCache` serves dev and tests.

use crate::errors::DispatchResult;
use async_trait::async_trait;
use dashmap::DashMap;
use redis::{aio::ConnectionManager, AsyncCommands};
use std::time::{Duration, Instant};

#[async_trait]
pub trait KvCache: Send + Sync {
    /// Fetch a value; `None` on miss or expiry
    async fn get(&self, key: &str) -> DispatchResult<Option<String>>;

    /// Store a value that expires after `ttl`
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> DispatchResult<()>;

    /// Drop a key; absent keys are fine
    async fn delete(&self, key: &str) -> DispatchResult<()>;
}

/// Redis-backed cache shared across dispatch instances
#[derive(Clone)]
pub struct RedisKvCache {
    conn: ConnectionManager,
}

impl RedisKvCache {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl KvCache for RedisKvCache {
    async fn get(&self, key: &str) -> DispatchResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> DispatchResult<()> {
        let mut conn = self.conn.clone();
        let () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> DispatchResult<()> {
        let mut conn = self.conn.clone();
        let () = conn.del(key).await?;
        Ok(())
    }
}

/// In-process cache for dev and tests; expiry is checked on read
#[derive(Default)]
pub struct InMemoryKvCache {
    entries: DashMap<String, (String, Instant)>,
}

impl InMemoryKvCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvCache for InMemoryKvCache {
    async fn get(&self, key: &str) -> DispatchResult<Option<String>> {
        // the read guard must drop before a same-key remove
        let live = match self.entries.get(key) {
            Some(entry) if entry.1 > Instant::now() => Some(entry.0.clone()),
            Some(_) => None,
            None => return Ok(None),
        };

        match live {
            Some(value) => Ok(Some(value)),
            None => {
                self.entries.remove(key);
                Ok(None)
            }
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> DispatchResult<()> {
        self.entries
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> DispatchResult<()> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = InMemoryKvCache::new();

        assert_eq!(cache.get("k").await.unwrap(), None);

        cache
            .set_with_ttl("k", "v", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));

        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expiry() {
        let cache = InMemoryKvCache::new();
        cache
            .set_with_ttl("k", "v", Duration::from_millis(20))
            .await
            .unwrap();

        assert_eq!(cache.get("k").await.unwrap(), Some("v".to_string()));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overwrite_refreshes_value_and_ttl() {
        let cache = InMemoryKvCache::new();
        cache
            .set_with_ttl("k", "old", Duration::from_millis(20))
            .await
            .unwrap();
        cache
            .set_with_ttl("k", "new", Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get("k").await.unwrap(), Some("new".to_string()));
    }
}
