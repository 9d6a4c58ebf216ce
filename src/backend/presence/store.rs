/**
 * Presence Store
 *
 * Tracks which users are connected and from how many sessions. Each user has
 * a connection counter under `presence:{user}:connections` that lives for
 * `presence_ttl`; heartbeats keep it alive, and the last disconnect removes
 * it and records `presence:{user}:last_seen`.
 *
 * Presence is advisory. The router only uses it to choose between live
 * delivery and queueing, and a stale "online" still ends in the queue when
 * no connection accepts the event.
 */

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use super::backend::{PresenceBackend, PresenceError};
use crate::shared::messaging::UserId;

/// Snapshot returned by the status endpoint
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceStatus {
    pub user_id: UserId,
    pub online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

/// TTL-based presence on top of a `PresenceBackend`
#[derive(Clone)]
pub struct PresenceStore {
    backend: Arc<dyn PresenceBackend>,
    ttl: Duration,
}

impl PresenceStore {
    pub fn new(backend: Arc<dyn PresenceBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn connections_key(user_id: UserId) -> String {
        format!("presence:{}:connections", user_id)
    }

    fn last_seen_key(user_id: UserId) -> String {
        format!("presence:{}:last_seen", user_id)
    }

    /// Count one more connection for `user_id`; returns the new count
    pub async fn mark_online(&self, user_id: UserId) -> Result<i64, PresenceError> {
        let count = self
            .backend
            .incr(&Self::connections_key(user_id), self.ttl)
            .await?;
        tracing::debug!("[Presence] {} online with {} connection(s)", user_id, count);
        Ok(count)
    }

    /// Refresh the TTL. An expired record is revived with the caller's view
    /// of how many connections the user has; returns `true` in that case.
    pub async fn heartbeat(&self, user_id: UserId, live_connections: usize) -> Result<bool, PresenceError> {
        let key = Self::connections_key(user_id);
        if self.backend.expire(&key, self.ttl).await? {
            return Ok(false);
        }
        let count = live_connections.max(1).to_string();
        self.backend.set(&key, &count, Some(self.ttl)).await?;
        tracing::info!("[Presence] Revived expired presence for {} ({} connection(s))", user_id, count);
        Ok(true)
    }

    /// Remove one connection that is known not to be the user's last.
    /// Returns the remaining count.
    pub async fn release(&self, user_id: UserId) -> Result<i64, PresenceError> {
        let key = Self::connections_key(user_id);
        let remaining = self.backend.decr(&key).await?;
        if remaining <= 0 {
            // Counter expired underneath us; the next heartbeat revives it.
            self.backend.delete(&key).await?;
        }
        Ok(remaining)
    }

    /// Remove one connection. When it was the last one the record is
    /// deleted, `last_seen` is written, and `true` is returned.
    pub async fn mark_offline_if_last_connection(&self, user_id: UserId) -> Result<bool, PresenceError> {
        let key = Self::connections_key(user_id);
        let remaining = self.backend.decr(&key).await?;
        if remaining > 0 {
            tracing::debug!("[Presence] {} still has {} connection(s)", user_id, remaining);
            return Ok(false);
        }

        self.backend.delete(&key).await?;
        self.backend
            .set(&Self::last_seen_key(user_id), &Utc::now().to_rfc3339(), None)
            .await?;
        tracing::info!("[Presence] {} is offline", user_id);
        Ok(true)
    }

    pub async fn is_online(&self, user_id: UserId) -> Result<bool, PresenceError> {
        let counters = self
            .backend
            .get_counters(&[Self::connections_key(user_id)])
            .await?;
        Ok(matches!(counters.first(), Some(Some(count)) if *count > 0))
    }

    /// The subset of `users` that is online
    pub async fn online_users(&self, users: &[UserId]) -> Result<HashSet<UserId>, PresenceError> {
        let keys: Vec<String> = users.iter().copied().map(Self::connections_key).collect();
        let counters = self.backend.get_counters(&keys).await?;
        Ok(users
            .iter()
            .zip(counters)
            .filter(|(_, count)| matches!(count, Some(count) if *count > 0))
            .map(|(user, _)| *user)
            .collect())
    }

    pub async fn last_seen(&self, user_id: UserId) -> Result<Option<DateTime<Utc>>, PresenceError> {
        let raw = self.backend.get(&Self::last_seen_key(user_id)).await?;
        Ok(raw
            .and_then(|value| DateTime::parse_from_rfc3339(&value).ok())
            .map(|at| at.with_timezone(&Utc)))
    }

    pub async fn status(&self, user_id: UserId) -> Result<PresenceStatus, PresenceError> {
        let online = self.is_online(user_id).await?;
        let last_seen = if online { None } else { self.last_seen(user_id).await? };
        Ok(PresenceStatus {
            user_id,
            online,
            last_seen,
        })
    }
}
