/**
 * Conversation Sequencer
 *
 * Hands out strictly increasing, gap-free sequence numbers per conversation.
 *
 * # Locking
 *
 * Each conversation has a slot behind its own `tokio::sync::Mutex`, created
 * lazily in a `DashMap` arena. `lock` returns an owned guard; the router
 * holds it from sequence assignment through persistence and fan-out, so all
 * participants see one order per conversation. Unrelated conversations never
 * contend.
 *
 * # Counter Source
 *
 * The counter is the larger of the slot's cached value and the stored
 * conversation's `next_sequence`. Storage is re-read on every acquisition, so
 * a slot that was reclaimed (or another writer that advanced the stored
 * counter) is picked up without special casing.
 *
 * # Pending Tombstones
 *
 * A sequence whose message and gap-filling tombstone both failed to persist
 * is parked on the slot and written by the next holder of the guard. A slot
 * with parked tombstones is never reclaimed.
 */

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

use crate::backend::error::ChatError;
use crate::backend::storage::ChatStorage;
use crate::shared::messaging::{Conversation, ConversationId, Sequence, UserId};

/// Per-conversation sequencing state
#[derive(Debug)]
pub struct Slot {
    next: Sequence,
    pending_tombstones: BTreeMap<Sequence, UserId>,
    last_used: Instant,
}

impl Slot {
    fn new() -> Self {
        Self {
            next: 1,
            pending_tombstones: BTreeMap::new(),
            last_used: Instant::now(),
        }
    }
}

/// Exclusive access to one conversation's sequencing state
pub struct SequenceGuard {
    conversation: Conversation,
    slot: OwnedMutexGuard<Slot>,
}

impl SequenceGuard {
    /// The conversation as loaded when the guard was taken, with
    /// `next_sequence` reflecting the guard's counter
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation.id
    }

    /// Sequence the next `next()` call will return
    pub fn next_sequence(&self) -> Sequence {
        self.slot.next
    }

    /// Highest sequence handed out so far, 0 if none
    pub fn highest_sequence(&self) -> Sequence {
        self.slot.next.saturating_sub(1)
    }

    /// Assign the next sequence. Never reused, whatever happens to the message.
    pub fn next(&mut self) -> Sequence {
        let sequence = self.slot.next;
        self.slot.next += 1;
        self.conversation.next_sequence = self.slot.next;
        sequence
    }

    /// Park a sequence whose tombstone could not be written yet
    pub fn defer_tombstone(&mut self, sequence: Sequence, sender_id: UserId) {
        self.slot.pending_tombstones.insert(sequence, sender_id);
    }

    /// Take the parked tombstones; the caller re-parks any it cannot write
    pub fn take_pending_tombstones(&mut self) -> BTreeMap<Sequence, UserId> {
        std::mem::take(&mut self.slot.pending_tombstones)
    }

    /// Sender of a parked tombstone, if `sequence` is parked
    pub fn pending_sender(&self, sequence: Sequence) -> Option<UserId> {
        self.slot.pending_tombstones.get(&sequence).copied()
    }

    pub fn pending_tombstones(&self) -> &BTreeMap<Sequence, UserId> {
        &self.slot.pending_tombstones
    }
}

impl Drop for SequenceGuard {
    fn drop(&mut self) {
        self.slot.last_used = Instant::now();
    }
}

/// Per-conversation sequence allocator
pub struct Sequencer {
    storage: Arc<dyn ChatStorage>,
    slots: DashMap<ConversationId, Arc<Mutex<Slot>>>,
}

impl Sequencer {
    pub fn new(storage: Arc<dyn ChatStorage>) -> Self {
        Self {
            storage,
            slots: DashMap::new(),
        }
    }

    /// Enter the conversation's critical section.
    ///
    /// Fails with `ConversationNotFound` for unknown conversations.
    pub async fn lock(&self, conversation_id: ConversationId) -> Result<SequenceGuard, ChatError> {
        let slot = self
            .slots
            .entry(conversation_id)
            .or_insert_with(|| Arc::new(Mutex::new(Slot::new())))
            .clone();
        let mut slot = slot.lock_owned().await;

        let mut conversation = self
            .storage
            .conversation(conversation_id)
            .await
            .map_err(|e| ChatError::storage(conversation_id, None, e))?
            .ok_or(ChatError::ConversationNotFound(conversation_id))?;

        if conversation.next_sequence > slot.next {
            slot.next = conversation.next_sequence;
        }
        conversation.next_sequence = slot.next;

        Ok(SequenceGuard { conversation, slot })
    }

    /// Assign one sequence and release the guard straight away. Nothing is
    /// persisted, so a reclaimed slot may hand the same number out again.
    #[cfg(test)]
    pub(crate) async fn next(&self, conversation_id: ConversationId) -> Result<Sequence, ChatError> {
        let mut guard = self.lock(conversation_id).await?;
        Ok(guard.next())
    }

    /// Drop slots that are idle, unheld, and carry no parked tombstones.
    /// Returns how many were dropped.
    pub fn reclaim_idle(&self, idle: Duration) -> usize {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(state) => {
                    !state.pending_tombstones.is_empty()
                        || now.saturating_duration_since(state.last_used) < idle
                }
                Err(_) => true,
            }
        });
        let reclaimed = before.saturating_sub(self.slots.len());
        if reclaimed > 0 {
            tracing::debug!("[Sequencer] Reclaimed {} idle slots", reclaimed);
        }
        reclaimed
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }
}
