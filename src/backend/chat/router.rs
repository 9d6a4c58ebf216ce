/**
 * Chat Router
 *
 * Entry point for every chat action a connection performs. The router owns
 * the sequencer, the connection registry, the presence store and the
 * delivery queue, and ties them together:
 *
 * 1. Validate the action against the conversation (membership, authorship,
 *    message state) while holding the conversation's sequence guard
 * 2. Persist through `ChatStorage`, retrying transient failures with bounded
 *    exponential backoff
 * 3. Fan the resulting event out to the other participants' live
 *    connections, queueing a reference for anyone it could not reach
 *
 * The guard is held from step 1 through step 3, which is what gives every
 * participant the same per-conversation order.
 *
 * # Catching Up
 *
 * A connection opened while the user has queued deliveries holds those
 * conversations: fan-out queues for it instead of delivering live, until
 * reconciliation has put the backlog in its outbound channel. Live traffic
 * can therefore never overtake the backlog.
 *
 * # Per-user State
 *
 * Delete-for-self hides a message from one participant and syncs their other
 * connections. Read markers only move forward; receipts go live to the other
 * participants and are never queued.
 *
 * # Failed Sends
 *
 * A sequence is never reused. When a message cannot be persisted its slot is
 * filled with a tombstone; if even the tombstone cannot be written it is
 * parked on the sequencer slot and written by the next action on that
 * conversation.
 *
 * # Background Tasks
 *
 * `start` spawns the presence broadcaster (turns registry transitions into
 * `presence` events for co-participants) and the maintenance loop (purges
 * expired queue entries and reclaims idle sequencer slots).
 */

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::backend::auth::Identity;
use crate::backend::chat::sequencer::{SequenceGuard, Sequencer};
use crate::backend::delivery::DeliveryQueue;
use crate::backend::error::ChatError;
use crate::backend::presence::{PresenceBackend, PresenceStatus, PresenceStore};
use crate::backend::realtime::registry::{
    ConnectionHandle, ConnectionId, ConnectionRegistry, DeliveryError, PresenceTransition,
};
use crate::backend::storage::{ChatStorage, StorageError};
use crate::shared::config::ChatConfig;
use crate::shared::event::{ClientEvent, DeleteMode, PendingConversation, ServerEvent};
use crate::shared::messaging::{
    validate_body, Conversation, ConversationId, ConversationSummary, HistoryResponse, Message,
    MessageRef, MessageState, ParticipantSummary, Sequence, UserId,
};

/// How a fan-out reached the recipients
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanOut {
    /// Recipients reached on at least one live connection
    pub delivered: usize,
    /// Recipients that got a queue entry, including reached ones with a
    /// connection still catching up on the conversation
    pub queued: usize,
}

/// What one recipient's live connections did with an event
#[derive(Debug, Default, Clone, Copy)]
struct Reach {
    reached: bool,
    held: bool,
}

/// Storage kept failing; `attempts` includes the first try
struct PersistFailure {
    attempts: u32,
    source: StorageError,
}

pub struct ChatRouter {
    config: Arc<ChatConfig>,
    storage: Arc<dyn ChatStorage>,
    sequencer: Sequencer,
    registry: ConnectionRegistry,
    queue: DeliveryQueue,
    transitions: Mutex<Option<mpsc::UnboundedReceiver<PresenceTransition>>>,
}

impl ChatRouter {
    pub fn new(
        config: Arc<ChatConfig>,
        storage: Arc<dyn ChatStorage>,
        presence_backend: Arc<dyn PresenceBackend>,
    ) -> Self {
        let presence = PresenceStore::new(presence_backend, config.presence_ttl());
        let (registry, transitions) = ConnectionRegistry::new(presence, config.presence_grace());

        Self {
            sequencer: Sequencer::new(storage.clone()),
            queue: DeliveryQueue::new(config.queue_retention()),
            registry,
            storage,
            config,
            transitions: Mutex::new(Some(transitions)),
        }
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn ChatStorage> {
        &self.storage
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn queue(&self) -> &DeliveryQueue {
        &self.queue
    }

    pub fn presence(&self) -> &PresenceStore {
        self.registry.presence()
    }

    // ========== Connections ==========

    /// Open a connection for `identity`.
    ///
    /// The returned receiver already holds the `hello` event, which lists
    /// the conversations with queued deliveries for this user. Those
    /// conversations stay held on the new connection until it reconciles.
    pub async fn connect(&self, identity: Identity) -> (ConnectionHandle, mpsc::Receiver<ServerEvent>) {
        let (handle, rx) = ConnectionHandle::channel(identity, self.config.outbound_buffer);

        let pending = self.queue.pending(identity.user_id);
        for conversation in &pending {
            handle.hold(conversation.conversation_id);
        }

        let hello = ServerEvent::Hello {
            connection_id: handle.id,
            user_id: identity.user_id,
            heartbeat_interval_secs: self.config.heartbeat_interval_secs,
            pending,
        };
        if let Err(e) = handle.deliver(hello) {
            tracing::warn!("[Router] Could not greet connection {}: {}", handle.id, e);
        }

        self.registry.register(handle.clone()).await;
        (handle, rx)
    }

    pub async fn disconnect(&self, connection_id: ConnectionId) {
        self.registry.unregister(connection_id).await;
    }

    /// Run one client event for `connection`. Errors are meant to be sent
    /// back to that connection only.
    pub async fn dispatch(&self, connection: &ConnectionHandle, event: ClientEvent) -> Result<(), ChatError> {
        let identity = connection.identity;
        tracing::debug!(
            "[Router] {} from {} on {}",
            event.kind(),
            identity.user_id,
            connection.id
        );

        match event {
            ClientEvent::Send { conversation_id, body } => {
                let message = self.send(identity, conversation_id, &body).await?;
                reply(
                    connection,
                    ServerEvent::Accepted {
                        conversation_id,
                        sequence: message.sequence,
                    },
                )
                .await;
            }
            ClientEvent::Edit {
                conversation_id,
                sequence,
                body,
            } => {
                self.edit(identity, conversation_id, sequence, &body).await?;
            }
            ClientEvent::Delete {
                conversation_id,
                sequence,
                mode: DeleteMode::All,
            } => {
                self.delete(identity, conversation_id, sequence).await?;
            }
            ClientEvent::Delete {
                conversation_id,
                sequence,
                mode: DeleteMode::ForSelf,
            } => {
                self.delete_for_self(identity, conversation_id, sequence).await?;
            }
            ClientEvent::Read {
                conversation_id,
                sequence,
            } => {
                self.mark_read(identity, conversation_id, sequence).await?;
            }
            ClientEvent::Heartbeat => {
                self.heartbeat(identity.user_id).await;
                reply(connection, ServerEvent::HeartbeatAck).await;
            }
            ClientEvent::Ack {
                conversation_id,
                sequence,
            } => {
                self.acknowledge(identity.user_id, conversation_id, sequence);
            }
            ClientEvent::Reconcile {
                conversation_id,
                last_seen,
            } => {
                self.reconcile(connection, conversation_id, last_seen).await?;
            }
        }
        Ok(())
    }

    // ========== Message Operations ==========

    /// Sequence, persist and fan out a new message.
    pub async fn send(
        &self,
        identity: Identity,
        conversation_id: ConversationId,
        raw_body: &str,
    ) -> Result<Message, ChatError> {
        let body = validate_body(raw_body, self.config.max_body_chars)?;

        let mut guard = self.sequencer.lock(conversation_id).await?;
        ensure_participant(guard.conversation(), identity.user_id)?;
        self.flush_pending_tombstones(&mut guard).await;

        let sequence = guard.next();
        let message = Message::new(conversation_id, sequence, identity.user_id, body);

        match self.with_retry("persist message", || self.storage.create_message(&message)).await {
            Ok(_) => {
                let report = self
                    .fan_out(
                        guard.conversation(),
                        &[identity.user_id],
                        ServerEvent::message(&message),
                        message.reference(),
                    )
                    .await;
                tracing::info!(
                    "[Router] Message {}#{} from {} ({} delivered, {} queued)",
                    conversation_id,
                    sequence,
                    identity.user_id,
                    report.delivered,
                    report.queued
                );
                Ok(message)
            }
            Err(failure) => {
                tracing::error!(
                    "[Router] Message {}#{} lost after {} attempt(s): {}",
                    conversation_id,
                    sequence,
                    failure.attempts,
                    failure.source
                );
                let tombstone = Message::tombstone(conversation_id, sequence, identity.user_id);
                if let Err(e) = self.storage.create_message(&tombstone).await {
                    tracing::warn!(
                        "[Router] Tombstone for {}#{} deferred: {}",
                        conversation_id,
                        sequence,
                        e
                    );
                    guard.defer_tombstone(sequence, identity.user_id);
                }
                self.fan_out(
                    guard.conversation(),
                    &[identity.user_id],
                    ServerEvent::deleted(&tombstone),
                    tombstone.reference(),
                )
                .await;

                Err(ChatError::Persistence {
                    conversation_id,
                    sequence: Some(sequence),
                    attempts: failure.attempts,
                    source: failure.source,
                })
            }
        }
    }

    /// Replace the body of an active message. Only its sender may edit it,
    /// and not once they hid it from themselves.
    pub async fn edit(
        &self,
        identity: Identity,
        conversation_id: ConversationId,
        sequence: Sequence,
        raw_body: &str,
    ) -> Result<Message, ChatError> {
        let body = validate_body(raw_body, self.config.max_body_chars)?;

        let mut guard = self.sequencer.lock(conversation_id).await?;
        ensure_participant(guard.conversation(), identity.user_id)?;
        self.flush_pending_tombstones(&mut guard).await;

        let current = self.load_message(conversation_id, sequence).await?;
        if current.sender_id != identity.user_id {
            return Err(ChatError::NotAuthor {
                conversation_id,
                sequence,
            });
        }
        let current = current.view_for(identity.user_id);
        if current.state != MessageState::Active {
            return Err(ChatError::InvalidState {
                conversation_id,
                sequence,
                state: current.state,
            });
        }

        let updated = self
            .with_retry("edit message", || {
                self.storage
                    .update_message_state(conversation_id, sequence, MessageState::Edited, Some(body.clone()))
            })
            .await
            .map_err(|failure| failure.into_chat_error(conversation_id, sequence))?;

        let mut exclude = updated.hidden_for.clone();
        exclude.push(identity.user_id);
        self.fan_out(
            guard.conversation(),
            &exclude,
            ServerEvent::edited(&updated),
            updated.reference(),
        )
        .await;
        tracing::info!("[Router] Message {}#{} edited", conversation_id, sequence);
        Ok(updated)
    }

    /// Tombstone a message. Its sender or a moderator may delete it.
    pub async fn delete(
        &self,
        identity: Identity,
        conversation_id: ConversationId,
        sequence: Sequence,
    ) -> Result<Message, ChatError> {
        let mut guard = self.sequencer.lock(conversation_id).await?;
        if !identity.moderator {
            ensure_participant(guard.conversation(), identity.user_id)?;
        }
        self.flush_pending_tombstones(&mut guard).await;

        let current = self.load_message(conversation_id, sequence).await?;
        if current.sender_id != identity.user_id && !identity.moderator {
            return Err(ChatError::NotAuthor {
                conversation_id,
                sequence,
            });
        }
        if current.state == MessageState::Deleted {
            return Err(ChatError::InvalidState {
                conversation_id,
                sequence,
                state: current.state,
            });
        }

        let updated = self
            .with_retry("delete message", || {
                self.storage
                    .update_message_state(conversation_id, sequence, MessageState::Deleted, None)
            })
            .await
            .map_err(|failure| failure.into_chat_error(conversation_id, sequence))?;

        self.fan_out(
            guard.conversation(),
            &[identity.user_id],
            ServerEvent::deleted(&updated),
            updated.reference(),
        )
        .await;
        tracing::info!(
            "[Router] Message {}#{} deleted by {}{}",
            conversation_id,
            sequence,
            identity.user_id,
            if identity.moderator { " (moderator)" } else { "" }
        );
        Ok(updated)
    }

    /// Hide a message from the caller only.
    ///
    /// The caller's connections get a `deleted` event for it; everyone else
    /// is left alone. Hiding a message the caller already cannot see fails
    /// with `InvalidState`.
    pub async fn delete_for_self(
        &self,
        identity: Identity,
        conversation_id: ConversationId,
        sequence: Sequence,
    ) -> Result<Message, ChatError> {
        let user_id = identity.user_id;
        let mut guard = self.sequencer.lock(conversation_id).await?;
        ensure_participant(guard.conversation(), user_id)?;
        self.flush_pending_tombstones(&mut guard).await;

        let current = self.load_message(conversation_id, sequence).await?;
        if current.is_tombstone() || current.is_hidden_for(user_id) {
            return Err(ChatError::InvalidState {
                conversation_id,
                sequence,
                state: MessageState::Deleted,
            });
        }

        let hidden = self
            .with_retry("hide message", || {
                self.storage.hide_message(conversation_id, sequence, user_id)
            })
            .await
            .map_err(|failure| failure.into_chat_error(conversation_id, sequence))?
            .view_for(user_id);

        self.fan_out_to(
            conversation_id,
            vec![user_id],
            ServerEvent::deleted(&hidden),
            hidden.reference(),
        )
        .await;
        tracing::info!(
            "[Router] Message {}#{} hidden for {}",
            conversation_id,
            sequence,
            user_id
        );
        Ok(hidden)
    }

    /// Move the caller's read marker forward to `sequence`.
    ///
    /// Returns the marker now stored. When it advanced, the other
    /// participants' live connections get a `read` receipt; receipts are
    /// not queued.
    pub async fn mark_read(
        &self,
        identity: Identity,
        conversation_id: ConversationId,
        sequence: Sequence,
    ) -> Result<Sequence, ChatError> {
        let user_id = identity.user_id;
        let guard = self.sequencer.lock(conversation_id).await?;
        ensure_participant(guard.conversation(), user_id)?;
        if sequence > guard.highest_sequence() {
            return Err(ChatError::MessageNotFound {
                conversation_id,
                sequence,
            });
        }

        let previous = self
            .storage
            .read_markers(conversation_id)
            .await
            .map_err(|e| ChatError::storage(conversation_id, Some(sequence), e))?
            .get(&user_id)
            .copied()
            .unwrap_or(0);
        if sequence <= previous {
            return Ok(previous);
        }

        let through = self
            .with_retry("mark read", || self.storage.mark_read(conversation_id, user_id, sequence))
            .await
            .map_err(|failure| failure.into_chat_error(conversation_id, sequence))?;

        let receipt = ServerEvent::Read {
            conversation_id,
            user_id,
            through,
        };
        let reached = self
            .deliver_live(guard.conversation().others(user_id), Some(conversation_id), receipt)
            .await;
        tracing::debug!(
            "[Router] {} read {} through {} ({} notified)",
            user_id,
            conversation_id,
            through,
            reached
        );
        Ok(through)
    }

    // ========== Presence & Queue ==========

    /// Refresh the user's presence. Returns `true` if it had expired.
    pub async fn heartbeat(&self, user_id: UserId) -> bool {
        self.registry.heartbeat(user_id).await
    }

    /// Drop queued deliveries of `conversation_id` up to `sequence`
    pub fn acknowledge(&self, user_id: UserId, conversation_id: ConversationId, sequence: Sequence) -> usize {
        let removed = self.queue.acknowledge(user_id, conversation_id, sequence);
        if removed > 0 {
            tracing::debug!(
                "[Router] {} acknowledged {} queued deliveries in {}",
                user_id,
                removed,
                conversation_id
            );
        }
        removed
    }

    pub fn pending(&self, user_id: UserId) -> Vec<PendingConversation> {
        self.queue.pending(user_id)
    }

    pub async fn presence_status(&self, user_id: UserId) -> Result<PresenceStatus, ChatError> {
        Ok(self.presence().status(user_id).await?)
    }

    // ========== Conversations ==========

    /// Create a conversation between the caller and `participant_ids`.
    /// A direct conversation that already exists is returned as is.
    pub async fn create_conversation(
        &self,
        caller: UserId,
        participant_ids: Vec<UserId>,
    ) -> Result<Conversation, ChatError> {
        let mut participants = Vec::with_capacity(participant_ids.len() + 1);
        participants.push(caller);
        participants.extend(participant_ids);

        let conversation = self
            .storage
            .create_conversation(participants)
            .await
            .map_err(|e| ChatError::storage(Uuid::nil(), None, e))?;
        tracing::info!(
            "[Router] Conversation {} ready for {} participants",
            conversation.id,
            conversation.participants.len()
        );
        Ok(conversation)
    }

    /// Non-archived conversations of `user_id`, most recently active first,
    /// each with participant presence, read markers and the newest message.
    pub async fn conversations(&self, user_id: UserId) -> Result<Vec<ConversationSummary>, ChatError> {
        let conversations = self
            .storage
            .conversations_for_user(user_id)
            .await
            .map_err(|e| ChatError::storage(Uuid::nil(), None, e))?;

        let mut summaries = Vec::with_capacity(conversations.len());
        for conversation in conversations.into_iter().filter(|c| !c.archived) {
            summaries.push(self.summarize(&conversation, user_id).await?);
        }
        summaries.sort_by(|a, b| activity(b).cmp(&activity(a)));
        Ok(summaries)
    }

    async fn summarize(&self, conversation: &Conversation, viewer: UserId) -> Result<ConversationSummary, ChatError> {
        let conversation_id = conversation.id;
        let markers: HashMap<UserId, Sequence> = self
            .storage
            .read_markers(conversation_id)
            .await
            .map_err(|e| ChatError::storage(conversation_id, None, e))?;

        let mut participants = Vec::with_capacity(conversation.participants.len());
        for participant in &conversation.participants {
            let (online, last_seen) = match self.presence().status(*participant).await {
                Ok(status) => (status.online, status.last_seen),
                Err(e) => {
                    tracing::warn!("[Router] Presence of {} unavailable: {}", participant, e);
                    (false, None)
                }
            };
            participants.push(ParticipantSummary {
                user_id: *participant,
                online,
                last_seen,
                read_through: markers.get(participant).copied().unwrap_or(0),
            });
        }

        let highest = conversation.highest_sequence();
        let last_message = if highest == 0 {
            None
        } else {
            let stored = self
                .storage
                .fetch_message(conversation_id, highest)
                .await
                .map_err(|e| ChatError::storage(conversation_id, Some(highest), e))?;
            fill_gaps(
                conversation_id,
                highest,
                highest,
                stored.into_iter().collect(),
                &BTreeMap::new(),
            )
            .pop()
            .map(|message| message.view_for(viewer))
        };

        let read_through = markers.get(&viewer).copied().unwrap_or(0);
        Ok(ConversationSummary {
            id: conversation_id,
            participants,
            next_sequence: conversation.next_sequence,
            created_at: conversation.created_at,
            last_message,
            read_through,
            unread: ConversationSummary::unread_after(conversation, read_through),
        })
    }

    /// Stored messages of a conversation, one page at a time.
    ///
    /// `from` defaults to 1 and `to` to the newest message; the page never
    /// exceeds the configured reconciliation page size. Missing sequences and
    /// messages the caller hid are returned as tombstones.
    pub async fn history(
        &self,
        user_id: UserId,
        conversation_id: ConversationId,
        from: Option<Sequence>,
        to: Option<Sequence>,
    ) -> Result<HistoryResponse, ChatError> {
        let conversation = self
            .storage
            .conversation(conversation_id)
            .await
            .map_err(|e| ChatError::storage(conversation_id, None, e))?
            .ok_or(ChatError::ConversationNotFound(conversation_id))?;
        ensure_participant(&conversation, user_id)?;

        let highest = conversation.highest_sequence();
        let from = from.unwrap_or(1).max(1);
        let page_end = from.saturating_add(self.config.reconcile_page_size.saturating_sub(1));
        let to = to.unwrap_or(highest).min(highest).min(page_end);

        let messages = if from > to {
            Vec::new()
        } else {
            let stored = self
                .storage
                .fetch_range(conversation_id, from, to)
                .await
                .map_err(|e| ChatError::storage(conversation_id, None, e))?;
            fill_gaps(conversation_id, from, to, stored, &BTreeMap::new())
                .into_iter()
                .map(|message| message.view_for(user_id))
                .collect()
        };

        Ok(HistoryResponse {
            conversation_id,
            messages,
            next_sequence: conversation.next_sequence,
        })
    }

    // ========== Internals ==========

    async fn load_message(&self, conversation_id: ConversationId, sequence: Sequence) -> Result<Message, ChatError> {
        self.storage
            .fetch_message(conversation_id, sequence)
            .await
            .map_err(|e| ChatError::storage(conversation_id, Some(sequence), e))?
            .ok_or(ChatError::MessageNotFound {
                conversation_id,
                sequence,
            })
    }

    /// Write tombstones parked by earlier failed sends
    async fn flush_pending_tombstones(&self, guard: &mut SequenceGuard) {
        let conversation_id = guard.conversation_id();
        for (sequence, sender_id) in guard.take_pending_tombstones() {
            let tombstone = Message::tombstone(conversation_id, sequence, sender_id);
            match self.storage.create_message(&tombstone).await {
                Ok(_) => tracing::info!("[Router] Wrote deferred tombstone {}#{}", conversation_id, sequence),
                Err(e) => {
                    tracing::warn!(
                        "[Router] Deferred tombstone {}#{} still failing: {}",
                        conversation_id,
                        sequence,
                        e
                    );
                    guard.defer_tombstone(sequence, sender_id);
                }
            }
        }
    }

    /// Run a storage operation, retrying transient failures with
    /// exponential backoff capped at `retry_backoff_max`.
    async fn with_retry<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T, PersistFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let max_attempts = self.config.persist_retries.saturating_add(1);
        let mut backoff = self.config.retry_backoff();
        let mut attempts = 0;

        loop {
            attempts += 1;
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(source) if attempts < max_attempts && is_transient(&source) => {
                    tracing::warn!(
                        "[Router] {} failed (attempt {}/{}), retrying in {:?}: {}",
                        operation,
                        attempts,
                        max_attempts,
                        backoff,
                        source
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.config.retry_backoff_max());
                }
                Err(source) => return Err(PersistFailure { attempts, source }),
            }
        }
    }

    /// Deliver `event` to every participant not in `exclude`.
    ///
    /// A participant counts as reached when at least one of their live
    /// connections accepted the event; everyone else gets `reference` queued.
    /// If presence cannot be read, every recipient is treated as offline.
    pub async fn fan_out(
        &self,
        conversation: &Conversation,
        exclude: &[UserId],
        event: ServerEvent,
        reference: MessageRef,
    ) -> FanOut {
        let recipients: Vec<UserId> = conversation
            .participants
            .iter()
            .copied()
            .filter(|participant| !exclude.contains(participant))
            .collect();
        self.fan_out_to(conversation.id, recipients, event, reference).await
    }

    /// Deliver `event` to `recipients`, queueing `reference` for each one not
    /// reached live. A recipient with a connection still catching up on the
    /// conversation is queued even when another connection took the event.
    async fn fan_out_to(
        &self,
        conversation_id: ConversationId,
        recipients: Vec<UserId>,
        event: ServerEvent,
        reference: MessageRef,
    ) -> FanOut {
        let online = match self.presence().online_users(&recipients).await {
            Ok(online) => online,
            Err(e) => {
                tracing::warn!("[Router] Presence lookup failed, queueing for everyone: {}", e);
                HashSet::new()
            }
        };

        let mut report = FanOut::default();
        let mut closed = Vec::new();

        for recipient in recipients {
            let reach = if online.contains(&recipient) {
                self.reach(recipient, Some(conversation_id), &event, &mut closed)
            } else {
                Reach::default()
            };

            if reach.reached {
                report.delivered += 1;
            }
            if reach.held || !reach.reached {
                self.queue.enqueue(recipient, reference);
                report.queued += 1;
            }
        }

        self.unregister_closed(closed).await;
        report
    }

    /// Best-effort delivery to the live connections of `recipients`; nothing
    /// is queued. Returns how many recipients were reached.
    async fn deliver_live(
        &self,
        recipients: impl IntoIterator<Item = UserId>,
        conversation_id: Option<ConversationId>,
        event: ServerEvent,
    ) -> usize {
        let mut closed = Vec::new();
        let reached = recipients
            .into_iter()
            .filter(|recipient| self.reach(*recipient, conversation_id, &event, &mut closed).reached)
            .count();
        self.unregister_closed(closed).await;
        reached
    }

    /// Offer `event` to every connection of `recipient`. Connections holding
    /// `conversation_id` are skipped and closed ones are collected.
    fn reach(
        &self,
        recipient: UserId,
        conversation_id: Option<ConversationId>,
        event: &ServerEvent,
        closed: &mut Vec<ConnectionId>,
    ) -> Reach {
        let mut reach = Reach::default();
        for connection in self.registry.connections_for(recipient) {
            if conversation_id.is_some_and(|id| connection.is_held(id)) {
                reach.held = true;
                continue;
            }
            match connection.deliver(event.clone()) {
                Ok(()) => reach.reached = true,
                Err(DeliveryError::Closed) => closed.push(connection.id),
                Err(DeliveryError::Full) => {
                    tracing::warn!(
                        "[Router] Outbound buffer of {} full, dropping {}",
                        connection.id,
                        event.kind()
                    );
                }
            }
        }
        reach
    }

    async fn unregister_closed(&self, closed: Vec<ConnectionId>) {
        for connection_id in closed {
            self.registry.unregister(connection_id).await;
        }
    }

    /// Send a presence change to the live connections of everyone sharing a
    /// conversation with the user.
    async fn broadcast_presence(&self, transition: PresenceTransition) {
        let (user_id, online, last_seen) = match transition {
            PresenceTransition::Online(user_id) => (user_id, true, None),
            PresenceTransition::Offline { user_id, last_seen } => (user_id, false, Some(last_seen)),
        };

        let conversations = match self.storage.conversations_for_user(user_id).await {
            Ok(conversations) => conversations,
            Err(e) => {
                tracing::warn!("[Presence] Could not load conversations of {}: {}", user_id, e);
                return;
            }
        };

        let peers: HashSet<UserId> = conversations
            .iter()
            .flat_map(|conversation| conversation.others(user_id))
            .collect();
        let event = ServerEvent::Presence {
            user_id,
            online,
            last_seen,
        };

        self.deliver_live(peers, None, event).await;
        tracing::debug!("[Presence] {} is {}", user_id, if online { "online" } else { "offline" });
    }

    /// Spawn the presence broadcaster and the maintenance loop.
    ///
    /// The broadcaster can only be started once; later calls start the
    /// maintenance loop alone.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::with_capacity(2);

        let transitions = self.transitions.lock().ok().and_then(|mut slot| slot.take());
        if let Some(mut transitions) = transitions {
            let router = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                while let Some(transition) = transitions.recv().await {
                    router.broadcast_presence(transition).await;
                }
            }));
        }

        let router = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(router.config.maintenance_interval());
            interval.tick().await;
            loop {
                interval.tick().await;
                router.run_maintenance();
            }
        }));

        tracing::info!("[Router] Background tasks started");
        tasks
    }

    /// One maintenance pass. Returns (purged queue entries, reclaimed slots).
    pub fn run_maintenance(&self) -> (usize, usize) {
        let purged = self.queue.purge_expired();
        let reclaimed = self.sequencer.reclaim_idle(self.config.sequencer_idle());
        if purged > 0 || reclaimed > 0 {
            tracing::info!(
                "[Maintenance] Purged {} expired deliveries, reclaimed {} idle sequencers",
                purged,
                reclaimed
            );
        }
        (purged, reclaimed)
    }
}

impl PersistFailure {
    fn into_chat_error(self, conversation_id: ConversationId, sequence: Sequence) -> ChatError {
        match ChatError::storage(conversation_id, Some(sequence), self.source) {
            ChatError::Persistence {
                conversation_id,
                sequence,
                source,
                ..
            } => ChatError::Persistence {
                conversation_id,
                sequence,
                attempts: self.attempts,
                source,
            },
            other => other,
        }
    }
}

pub(crate) fn ensure_participant(conversation: &Conversation, user_id: UserId) -> Result<(), ChatError> {
    if conversation.has_participant(user_id) {
        Ok(())
    } else {
        Err(ChatError::NotParticipant {
            user_id,
            conversation_id: conversation.id,
        })
    }
}

/// Storage failures worth another attempt
fn is_transient(error: &StorageError) -> bool {
    matches!(error, StorageError::Database(_) | StorageError::Unavailable(_))
}

/// Contiguous `from..=to` run built from `stored`; sequences with no stored
/// row become tombstones, attributed to the parked sender when known.
pub(crate) fn fill_gaps(
    conversation_id: ConversationId,
    from: Sequence,
    to: Sequence,
    stored: Vec<Message>,
    parked: &BTreeMap<Sequence, UserId>,
) -> Vec<Message> {
    let mut stored = stored.into_iter().peekable();
    let mut messages = Vec::with_capacity(to.saturating_sub(from) as usize + 1);

    for sequence in from..=to {
        while stored.next_if(|message| message.sequence < sequence).is_some() {}
        let message = match stored.next_if(|message| message.sequence == sequence) {
            Some(message) => message,
            None => {
                let sender = parked.get(&sequence).copied().unwrap_or_else(Uuid::nil);
                Message::tombstone(conversation_id, sequence, sender)
            }
        };
        messages.push(message);
    }
    messages
}

/// Listing order key: newest message, else creation time
fn activity(summary: &ConversationSummary) -> chrono::DateTime<chrono::Utc> {
    summary
        .last_message
        .as_ref()
        .map(|message| message.created_at)
        .unwrap_or(summary.created_at)
}

async fn reply(connection: &ConnectionHandle, event: ServerEvent) {
    if let Err(e) = connection.send(event).await {
        tracing::debug!("[Router] Reply to {} dropped: {}", connection.id, e);
    }
}
