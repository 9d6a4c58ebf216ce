/**
 * Connection Registry
 *
 * In-process map from user id to that user's live connections. A user may
 * hold any number of connections (one per device or tab); each one is
 * tracked on its own and owns a bounded outbound channel drained by the
 * connection's writer task.
 *
 * # Presence Coupling
 *
 * Every `register` counts one connection in the Presence Store and every
 * `unregister` releases exactly one. Releasing the user's last connection is
 * deferred by the grace period: if the user reconnects in the meantime the
 * counter never reaches zero and nobody sees them go offline.
 *
 * Online/offline transitions are reported on an unbounded channel; the chat
 * router turns them into `presence` events.
 *
 * # Held Conversations
 *
 * A handle can hold live traffic of a conversation back while that
 * conversation's backlog is still on its way. Fan-out skips a held
 * conversation and queues instead; reconciliation releases it once the
 * backlog is in the outbound channel.
 */

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::backend::auth::Identity;
use crate::backend::presence::PresenceStore;
use crate::shared::event::ServerEvent;
use crate::shared::messaging::{ConversationId, UserId};

pub type ConnectionId = Uuid;

/// Why an event could not be handed to a connection
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("outbound buffer full")]
    Full,
    #[error("connection closed")]
    Closed,
}

/// Handle to one live connection
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub identity: Identity,
    pub connected_at: DateTime<Utc>,
    tx: mpsc::Sender<ServerEvent>,
    held: Arc<DashSet<ConversationId>>,
}

impl ConnectionHandle {
    /// Create a handle and the receiving end of its outbound channel
    pub fn channel(identity: Identity, capacity: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: Uuid::new_v4(),
            identity,
            connected_at: Utc::now(),
            tx,
            held: Arc::new(DashSet::new()),
        };
        (handle, rx)
    }

    pub fn user_id(&self) -> UserId {
        self.identity.user_id
    }

    /// Hand an event over without waiting. Used by fan-out, where a slow
    /// reader must not hold up other recipients.
    pub fn deliver(&self, event: ServerEvent) -> Result<(), DeliveryError> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Hand an event over, waiting for buffer space. Used for replies and
    /// reconciliation backlog on the connection's own task.
    pub async fn send(&self, event: ServerEvent) -> Result<(), DeliveryError> {
        self.tx.send(event).await.map_err(|_| DeliveryError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Stop live delivery of `conversation_id` to this connection
    pub fn hold(&self, conversation_id: ConversationId) -> bool {
        self.held.insert(conversation_id)
    }

    /// Resume live delivery of `conversation_id`
    pub fn release(&self, conversation_id: ConversationId) -> bool {
        self.held.remove(&conversation_id).is_some()
    }

    pub fn is_held(&self, conversation_id: ConversationId) -> bool {
        self.held.contains(&conversation_id)
    }
}

/// A user came online or went offline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceTransition {
    Online(UserId),
    Offline {
        user_id: UserId,
        last_seen: DateTime<Utc>,
    },
}

/// user id → live connections
pub struct ConnectionRegistry {
    connections: DashMap<UserId, HashMap<ConnectionId, ConnectionHandle>>,
    owners: DashMap<ConnectionId, UserId>,
    presence: PresenceStore,
    grace: Duration,
    transitions: mpsc::UnboundedSender<PresenceTransition>,
}

impl ConnectionRegistry {
    pub fn new(
        presence: PresenceStore,
        grace: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<PresenceTransition>) {
        let (transitions, rx) = mpsc::unbounded_channel();
        let registry = Self {
            connections: DashMap::new(),
            owners: DashMap::new(),
            presence,
            grace,
            transitions,
        };
        (registry, rx)
    }

    /// Track a new connection and count it in the Presence Store
    pub async fn register(&self, handle: ConnectionHandle) {
        let user_id = handle.user_id();
        let connection_id = handle.id;
        self.owners.insert(connection_id, user_id);
        self.connections
            .entry(user_id)
            .or_default()
            .insert(connection_id, handle);

        match self.presence.mark_online(user_id).await {
            Ok(1) => {
                let _ = self.transitions.send(PresenceTransition::Online(user_id));
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("[Registry] Presence update failed for {}: {}", user_id, e),
        }
        tracing::info!(
            "[Registry] Registered connection {} for {} ({} live)",
            connection_id,
            user_id,
            self.connection_count(user_id)
        );
    }

    /// Forget a connection. Unknown ids are ignored, so calling this twice
    /// for the same connection releases presence only once.
    pub async fn unregister(&self, connection_id: ConnectionId) -> Option<ConnectionHandle> {
        let (_, user_id) = self.owners.remove(&connection_id)?;

        let (handle, last) = match self.connections.get_mut(&user_id) {
            Some(mut live) => {
                let handle = live.remove(&connection_id);
                (handle, live.is_empty())
            }
            None => (None, true),
        };

        if last {
            self.connections.remove_if(&user_id, |_, live| live.is_empty());
            self.schedule_offline(user_id);
        } else if let Err(e) = self.presence.release(user_id).await {
            tracing::warn!("[Registry] Presence release failed for {}: {}", user_id, e);
        }

        tracing::info!("[Registry] Unregistered connection {} of {}", connection_id, user_id);
        handle
    }

    fn schedule_offline(&self, user_id: UserId) {
        let presence = self.presence.clone();
        let transitions = self.transitions.clone();
        let grace = self.grace;

        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            match presence.mark_offline_if_last_connection(user_id).await {
                Ok(true) => {
                    let _ = transitions.send(PresenceTransition::Offline {
                        user_id,
                        last_seen: Utc::now(),
                    });
                }
                Ok(false) => {
                    tracing::debug!("[Registry] {} reconnected within the grace period", user_id);
                }
                Err(e) => {
                    tracing::warn!("[Registry] Could not mark {} offline: {}", user_id, e);
                }
            }
        });
    }

    /// Refresh presence for `user_id`. Returns `true` when an expired record
    /// had to be revived, in which case the user is reported online again.
    pub async fn heartbeat(&self, user_id: UserId) -> bool {
        match self.presence.heartbeat(user_id, self.connection_count(user_id)).await {
            Ok(true) => {
                let _ = self.transitions.send(PresenceTransition::Online(user_id));
                true
            }
            Ok(false) => false,
            Err(e) => {
                tracing::warn!("[Registry] Heartbeat for {} not recorded: {}", user_id, e);
                false
            }
        }
    }

    /// Live connections of `user_id`, possibly none
    pub fn connections_for(&self, user_id: UserId) -> Vec<ConnectionHandle> {
        self.connections
            .get(&user_id)
            .map(|live| live.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, connection_id: ConnectionId) -> Option<ConnectionHandle> {
        let user_id = *self.owners.get(&connection_id)?;
        self.connections
            .get(&user_id)
            .and_then(|live| live.get(&connection_id).cloned())
    }

    pub fn connection_count(&self, user_id: UserId) -> usize {
        self.connections.get(&user_id).map(|live| live.len()).unwrap_or(0)
    }

    pub fn connected_users(&self) -> Vec<UserId> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    pub fn total_connections(&self) -> usize {
        self.owners.len()
    }

    pub fn presence(&self) -> &PresenceStore {
        &self.presence
    }
}
