//! Redis presence backend
//!
//! Same key layout as the in-memory backend; TTLs are Redis key expiries so
//! several server processes share one view of who is online.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;

use super::backend::{PresenceBackend, PresenceError};

/// Presence backend over a Redis `ConnectionManager`
#[derive(Clone)]
pub struct RedisPresenceBackend {
    manager: ConnectionManager,
}

impl RedisPresenceBackend {
    /// Connect to `redis_url` and verify the server answers `PING`
    pub async fn connect(redis_url: &str) -> Result<Self, PresenceError> {
        let client = redis::Client::open(redis_url)?;
        let mut manager = ConnectionManager::new(client).await?;
        let _: String = redis::cmd("PING")
            .query_async::<_, String>(&mut manager)
            .await?;
        Ok(Self { manager })
    }

    fn seconds(ttl: Duration) -> u64 {
        ttl.as_secs().max(1)
    }
}

#[async_trait]
impl PresenceBackend for RedisPresenceBackend {
    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64, PresenceError> {
        let mut conn = self.manager.clone();
        let (count,): (i64,) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("EXPIRE")
            .arg(key)
            .arg(Self::seconds(ttl))
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn decr(&self, key: &str) -> Result<i64, PresenceError> {
        let mut conn = self.manager.clone();
        Ok(redis::cmd("DECR")
            .arg(key)
            .query_async::<_, i64>(&mut conn)
            .await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, PresenceError> {
        let mut conn = self.manager.clone();
        let updated = redis::cmd("EXPIRE")
            .arg(key)
            .arg(Self::seconds(ttl))
            .query_async::<_, i64>(&mut conn)
            .await?;
        Ok(updated == 1)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, PresenceError> {
        let mut conn = self.manager.clone();
        Ok(redis::cmd("GET")
            .arg(key)
            .query_async::<_, Option<String>>(&mut conn)
            .await?)
    }

    async fn get_counters(&self, keys: &[String]) -> Result<Vec<Option<i64>>, PresenceError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("MGET");
        for key in keys {
            cmd.arg(key);
        }
        Ok(cmd.query_async::<_, Vec<Option<i64>>>(&mut conn).await?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), PresenceError> {
        let mut conn = self.manager.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(Self::seconds(ttl));
        }
        cmd.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), PresenceError> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}
