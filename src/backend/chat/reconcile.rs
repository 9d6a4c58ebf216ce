/**
 * Reconciliation
 *
 * Brings a reconnecting client up to date on one conversation. The client
 * sends the highest sequence it has seen; the server answers, on that
 * connection only:
 *
 * 1. Queued edits and deletes of messages the client already holds
 *    (sequence <= `last_seen`), in sequence order
 * 2. Every message after `last_seen` in its current state, paged through
 *    storage. Sequences with no stored row, and messages the user hid, are
 *    sent as tombstones.
 * 3. `reconciled` with the sequence it is now current through
 *
 * # Ordering
 *
 * The connection holds the conversation for the whole run, so fan-out queues
 * for it instead of delivering live. Each round takes the queue entries up
 * to the conversation's highest sequence while holding the sequence guard,
 * then releases the guard before awaiting the sends: a client that stops
 * reading only stalls its own reconciliation. Rounds repeat until one finds
 * nothing new; that round sends `reconciled` and releases the hold without
 * letting go of the guard, so the next live event lands behind the backlog.
 *
 * Entries taken in a round that could not be sent are queued again.
 *
 * A `last_seen` at or beyond the conversation's next sequence means the
 * client is ahead of the server; it gets `resync` and nothing else.
 */

use std::collections::BTreeMap;

use crate::backend::chat::router::{ensure_participant, fill_gaps, ChatRouter};
use crate::backend::error::ChatError;
use crate::backend::realtime::registry::{ConnectionHandle, DeliveryError};
use crate::shared::event::ServerEvent;
use crate::shared::messaging::{ConversationId, MessageRef, Sequence, UserId};

/// What one reconciliation sent
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub conversation_id: ConversationId,
    /// Edits and deletes replayed for messages the client already held
    pub mutations: usize,
    /// Messages streamed after `last_seen`, tombstones included
    pub streamed: usize,
    /// Highest sequence the client is now current through
    pub through: Sequence,
    /// False when the connection closed before the backlog was sent
    pub complete: bool,
}

impl ChatRouter {
    /// Reconcile `connection` on `conversation_id` from `last_seen`
    pub async fn reconcile(
        &self,
        connection: &ConnectionHandle,
        conversation_id: ConversationId,
        last_seen: Sequence,
    ) -> Result<ReconcileSummary, ChatError> {
        let result = self.catch_up(connection, conversation_id, last_seen).await;
        connection.release(conversation_id);

        match &result {
            Ok(summary) if summary.complete => tracing::info!(
                "[Reconcile] {} on {}: {} mutations, {} messages, through {}",
                connection.user_id(),
                conversation_id,
                summary.mutations,
                summary.streamed,
                summary.through
            ),
            Ok(summary) => tracing::debug!(
                "[Reconcile] Connection {} closed during reconcile of {} at {}",
                connection.id,
                conversation_id,
                summary.through
            ),
            Err(_) => {}
        }
        result
    }

    async fn catch_up(
        &self,
        connection: &ConnectionHandle,
        conversation_id: ConversationId,
        last_seen: Sequence,
    ) -> Result<ReconcileSummary, ChatError> {
        let user_id = connection.user_id();
        let mut guard = self.sequencer().lock(conversation_id).await?;
        ensure_participant(guard.conversation(), user_id)?;

        let next_sequence = guard.next_sequence();
        if last_seen >= next_sequence {
            tracing::warn!(
                "[Reconcile] {} is ahead on {} (last seen {}, next {})",
                user_id,
                conversation_id,
                last_seen,
                next_sequence
            );
            return Err(ChatError::SequenceMismatch {
                conversation_id,
                last_seen,
                next_sequence,
            });
        }
        connection.hold(conversation_id);

        let mut summary = ReconcileSummary {
            conversation_id,
            through: last_seen,
            ..ReconcileSummary::default()
        };
        let mut announced = false;

        loop {
            let highest = guard.highest_sequence();
            let taken = self.queue().take_through(user_id, conversation_id, highest);

            if highest == summary.through && taken.is_empty() {
                let reconciled = ServerEvent::Reconciled {
                    conversation_id,
                    through: summary.through,
                };
                if announced {
                    connection.release(conversation_id);
                    summary.complete = true;
                    return Ok(summary);
                }
                match connection.deliver(reconciled.clone()) {
                    Ok(()) => {
                        connection.release(conversation_id);
                        summary.complete = true;
                        return Ok(summary);
                    }
                    Err(DeliveryError::Closed) => return Ok(summary),
                    Err(DeliveryError::Full) => {
                        drop(guard);
                        if connection.send(reconciled).await.is_err() {
                            return Ok(summary);
                        }
                        announced = true;
                    }
                }
            } else {
                let parked = guard.pending_tombstones().clone();
                drop(guard);
                announced = false;

                match self.send_round(connection, &mut summary, &taken, highest, &parked).await {
                    Ok(true) => {}
                    Ok(false) => {
                        self.requeue(user_id, &taken);
                        return Ok(summary);
                    }
                    Err(e) => {
                        self.requeue(user_id, &taken);
                        return Err(e);
                    }
                }
            }

            guard = self.sequencer().lock(conversation_id).await?;
        }
    }

    /// Send one round: mutations of what the client already has, then the
    /// messages up to `highest`. Returns `false` once the connection is gone.
    async fn send_round(
        &self,
        connection: &ConnectionHandle,
        summary: &mut ReconcileSummary,
        taken: &[MessageRef],
        highest: Sequence,
        parked: &BTreeMap<Sequence, UserId>,
    ) -> Result<bool, ChatError> {
        let conversation_id = summary.conversation_id;
        let user_id = connection.user_id();
        let seen = summary.through;

        for reference in taken.iter().filter(|reference| reference.sequence <= seen) {
            let stored = self
                .storage()
                .fetch_message(conversation_id, reference.sequence)
                .await
                .map_err(|e| ChatError::storage(conversation_id, Some(reference.sequence), e))?;
            let Some(event) = stored
                .map(|message| message.view_for(user_id))
                .as_ref()
                .and_then(ServerEvent::mutation)
            else {
                continue;
            };
            if connection.send(event).await.is_err() {
                return Ok(false);
            }
            summary.mutations += 1;
        }

        let page_size = self.config().reconcile_page_size.max(1);
        let mut from = seen + 1;
        while from <= highest {
            let to = from.saturating_add(page_size - 1).min(highest);
            let stored = self
                .storage()
                .fetch_range(conversation_id, from, to)
                .await
                .map_err(|e| ChatError::storage(conversation_id, None, e))?;

            for message in fill_gaps(conversation_id, from, to, stored, parked) {
                let view = message.view_for(user_id);
                if connection.send(ServerEvent::message(&view)).await.is_err() {
                    return Ok(false);
                }
                summary.streamed += 1;
            }
            summary.through = to;
            from = to + 1;
        }
        Ok(true)
    }

    fn requeue(&self, user_id: UserId, taken: &[MessageRef]) {
        for reference in taken {
            self.queue().enqueue(user_id, *reference);
        }
    }
}
