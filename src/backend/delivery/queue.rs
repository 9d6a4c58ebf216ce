/**
 * Delivery Queue
 *
 * Per-recipient queue of message references that no live connection of the
 * recipient accepted. Entries are references, not payloads: whoever drains
 * the queue reads the current state of the message from storage, so an edit
 * or delete that happened while the recipient was away is seen directly.
 *
 * # Guarantees
 *
 * - `enqueue` de-duplicates on `(recipient, conversation, sequence)`.
 * - `drain` is ordered by conversation, then sequence, and removes nothing.
 * - Only `acknowledge`, `take_through` and retention expiry remove entries.
 * - Each recipient's map sits behind one `DashMap` shard lock, so
 *   enqueue/acknowledge of one `(recipient, conversation)` never interleave.
 */

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::time::Duration;
use tokio::time::Instant;

use crate::shared::event::PendingConversation;
use crate::shared::messaging::{ConversationId, MessageRef, Sequence, UserId};

/// Per-user queue of undelivered message references
pub struct DeliveryQueue {
    recipients: DashMap<UserId, BTreeMap<MessageRef, Instant>>,
    retention: Duration,
}

impl DeliveryQueue {
    pub fn new(retention: Duration) -> Self {
        Self {
            recipients: DashMap::new(),
            retention,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    fn is_live(&self, enqueued_at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(enqueued_at) < self.retention
    }

    /// Queue `reference` for `recipient`. Returns `false` if it was already queued.
    pub fn enqueue(&self, recipient: UserId, reference: MessageRef) -> bool {
        let mut entries = self.recipients.entry(recipient).or_default();
        if entries.contains_key(&reference) {
            return false;
        }
        entries.insert(reference, Instant::now());
        tracing::debug!(
            "[Queue] Queued {}#{} for {}",
            reference.conversation_id,
            reference.sequence,
            recipient
        );
        true
    }

    /// Lazily walk everything queued for `recipient`
    pub fn drain(&self, recipient: UserId) -> Drain<'_> {
        Drain {
            queue: self,
            recipient,
            lower: Bound::Unbounded,
            conversation: None,
            now: Instant::now(),
        }
    }

    /// Lazily walk what is queued for `recipient` in one conversation
    pub fn drain_conversation(&self, recipient: UserId, conversation_id: ConversationId) -> Drain<'_> {
        Drain {
            queue: self,
            recipient,
            lower: Bound::Included(MessageRef::new(conversation_id, 0)),
            conversation: Some(conversation_id),
            now: Instant::now(),
        }
    }

    /// Remove every entry of `conversation_id` at or below `up_to`.
    ///
    /// Returns the number of entries removed; acknowledging twice is a no-op.
    pub fn acknowledge(&self, recipient: UserId, conversation_id: ConversationId, up_to: Sequence) -> usize {
        let removed = match self.recipients.get_mut(&recipient) {
            Some(mut entries) => {
                let acked: Vec<MessageRef> = entries
                    .range(MessageRef::new(conversation_id, 0)..=MessageRef::new(conversation_id, up_to))
                    .map(|(reference, _)| *reference)
                    .collect();
                for reference in &acked {
                    entries.remove(reference);
                }
                acked.len()
            }
            None => 0,
        };
        self.recipients.remove_if(&recipient, |_, entries| entries.is_empty());

        if removed > 0 {
            tracing::debug!(
                "[Queue] {} acknowledged {} entries of {} up to {}",
                recipient,
                removed,
                conversation_id,
                up_to
            );
        }
        removed
    }

    /// Remove and return the live entries of `conversation_id` at or below
    /// `up_to`, in sequence order. Callers that fail to deliver what they
    /// took put it back with `enqueue`.
    pub fn take_through(
        &self,
        recipient: UserId,
        conversation_id: ConversationId,
        up_to: Sequence,
    ) -> Vec<MessageRef> {
        let now = Instant::now();
        let taken = match self.recipients.get_mut(&recipient) {
            Some(mut entries) => {
                let range: Vec<(MessageRef, Instant)> = entries
                    .range(MessageRef::new(conversation_id, 0)..=MessageRef::new(conversation_id, up_to))
                    .map(|(reference, enqueued_at)| (*reference, *enqueued_at))
                    .collect();
                let mut taken = Vec::with_capacity(range.len());
                for (reference, enqueued_at) in range {
                    entries.remove(&reference);
                    if self.is_live(enqueued_at, now) {
                        taken.push(reference);
                    }
                }
                taken
            }
            None => Vec::new(),
        };
        self.recipients.remove_if(&recipient, |_, entries| entries.is_empty());
        taken
    }

    /// Drop entries older than the retention horizon
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut purged = 0;
        for mut entries in self.recipients.iter_mut() {
            let before = entries.len();
            entries.retain(|_, enqueued_at| self.is_live(*enqueued_at, now));
            purged += before - entries.len();
        }
        self.recipients.retain(|_, entries| !entries.is_empty());
        if purged > 0 {
            tracing::info!("[Queue] Purged {} expired entries", purged);
        }
        purged
    }

    /// Per-conversation summary of what is queued for `recipient`
    pub fn pending(&self, recipient: UserId) -> Vec<PendingConversation> {
        let mut summary: Vec<PendingConversation> = Vec::new();
        for reference in self.drain(recipient) {
            match summary.last_mut() {
                Some(last) if last.conversation_id == reference.conversation_id => {
                    last.count += 1;
                    last.highest = reference.sequence;
                }
                _ => summary.push(PendingConversation {
                    conversation_id: reference.conversation_id,
                    count: 1,
                    lowest: reference.sequence,
                    highest: reference.sequence,
                }),
            }
        }
        summary
    }

    /// Number of live entries queued for `recipient`
    pub fn len(&self, recipient: UserId) -> usize {
        self.drain(recipient).count()
    }

    pub fn is_empty(&self, recipient: UserId) -> bool {
        self.drain(recipient).next().is_none()
    }

    /// Number of recipients with at least one entry
    pub fn recipient_count(&self) -> usize {
        self.recipients.len()
    }
}

/// Lazy, non-destructive iterator over a recipient's queue.
///
/// Each step takes the recipient's shard lock only for the lookup, so
/// concurrent enqueues and acknowledgements proceed between steps.
pub struct Drain<'a> {
    queue: &'a DeliveryQueue,
    recipient: UserId,
    lower: Bound<MessageRef>,
    conversation: Option<ConversationId>,
    now: Instant,
}

impl Iterator for Drain<'_> {
    type Item = MessageRef;

    fn next(&mut self) -> Option<MessageRef> {
        let entries = self.queue.recipients.get(&self.recipient)?;
        let found = entries
            .range((self.lower, Bound::Unbounded))
            .find(|(_, enqueued_at)| self.queue.is_live(**enqueued_at, self.now))
            .map(|(reference, _)| *reference)?;
        drop(entries);

        if let Some(conversation_id) = self.conversation {
            if found.conversation_id != conversation_id {
                return None;
            }
        }
        self.lower = Bound::Excluded(found);
        Some(found)
    }
}
