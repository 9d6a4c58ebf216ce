/**
 * Presence Backing Store
 *
 * Presence needs a tiny key/expiry store: counters with a TTL, plain values,
 * and deletes. `PresenceBackend` is that surface; the in-memory
 * implementation below mirrors Redis semantics closely enough that the
 * `PresenceStore` logic is identical on both.
 *
 * # Semantics
 *
 * - `incr` creates a missing (or expired) counter at 0 before incrementing,
 *   and always (re)sets the TTL.
 * - `decr` does not touch the TTL, like Redis `DECR`.
 * - `expire` returns `false` when the key does not exist.
 */

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Presence backend failures
#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("value under '{key}' is not an integer")]
    Corrupt { key: String },
}

/// Key/expiry store used by the presence layer
#[async_trait]
pub trait PresenceBackend: Send + Sync {
    /// Increment a counter and set its TTL; returns the new value
    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64, PresenceError>;

    /// Decrement a counter; returns the new value
    async fn decr(&self, key: &str) -> Result<i64, PresenceError>;

    /// Reset the TTL of an existing key
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, PresenceError>;

    async fn get(&self, key: &str) -> Result<Option<String>, PresenceError>;

    /// Read many counters at once, in key order
    async fn get_counters(&self, keys: &[String]) -> Result<Vec<Option<i64>>, PresenceError>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), PresenceError>;

    async fn delete(&self, key: &str) -> Result<(), PresenceError>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process presence backend with tokio-time expiry
#[derive(Default)]
pub struct MemoryPresenceBackend {
    entries: DashMap<String, Entry>,
}

impl MemoryPresenceBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn counter(key: &str, entry: &Entry) -> Result<i64, PresenceError> {
        entry.value.parse().map_err(|_| PresenceError::Corrupt {
            key: key.to_string(),
        })
    }

    fn live(&self, key: &str) -> Option<Entry> {
        let now = Instant::now();
        let entry = self.entries.get(key)?.clone();
        if entry.is_live(now) {
            Some(entry)
        } else {
            self.entries.remove_if(key, |_, e| !e.is_live(now));
            None
        }
    }

    fn add(&self, key: &str, delta: i64, ttl: Option<Duration>) -> Result<i64, PresenceError> {
        let now = Instant::now();
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: "0".to_string(),
            expires_at: None,
        });
        if !entry.is_live(now) {
            entry.value = "0".to_string();
            entry.expires_at = None;
        }
        let value = Self::counter(key, &entry)? + delta;
        entry.value = value.to_string();
        if let Some(ttl) = ttl {
            entry.expires_at = Some(now + ttl);
        }
        Ok(value)
    }
}

#[async_trait]
impl PresenceBackend for MemoryPresenceBackend {
    async fn incr(&self, key: &str, ttl: Duration) -> Result<i64, PresenceError> {
        self.add(key, 1, Some(ttl))
    }

    async fn decr(&self, key: &str) -> Result<i64, PresenceError> {
        self.add(key, -1, None)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, PresenceError> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if entry.is_live(now) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, PresenceError> {
        Ok(self.live(key).map(|entry| entry.value))
    }

    async fn get_counters(&self, keys: &[String]) -> Result<Vec<Option<i64>>, PresenceError> {
        keys.iter()
            .map(|key| self.live(key).map(|entry| Self::counter(key, &entry)).transpose())
            .collect()
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), PresenceError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), PresenceError> {
        self.entries.remove(key);
        Ok(())
    }
}
