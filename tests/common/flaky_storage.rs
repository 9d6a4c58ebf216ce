//! Storage that fails on demand
//!
//! Wraps `MemoryStorage` and injects `StorageError::Unavailable` into
//! `create_message` calls, either for the next N calls or for as long as an
//! outage is switched on.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use uuid::Uuid;
use xfchat::backend::storage::{ChatStorage, MemoryStorage, StorageError};
use xfchat::shared::messaging::{Conversation, ConversationId, Message, MessageState, Sequence, UserId};

#[derive(Default)]
pub struct FlakyStorage {
    inner: MemoryStorage,
    failures: AtomicU32,
    outage: AtomicBool,
    create_calls: AtomicU32,
}

impl FlakyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` message writes
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Fail every message write until switched off
    pub fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    /// Number of `create_message` calls seen, failed ones included
    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &MemoryStorage {
        &self.inner
    }

    fn should_fail(&self) -> bool {
        if self.outage.load(Ordering::SeqCst) {
            return true;
        }
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ChatStorage for FlakyStorage {
    async fn conversation(&self, id: ConversationId) -> Result<Option<Conversation>, StorageError> {
        self.inner.conversation(id).await
    }

    async fn create_conversation(&self, participants: Vec<UserId>) -> Result<Conversation, StorageError> {
        self.inner.create_conversation(participants).await
    }

    async fn conversations_for_user(&self, user_id: UserId) -> Result<Vec<Conversation>, StorageError> {
        self.inner.conversations_for_user(user_id).await
    }

    async fn create_message(&self, message: &Message) -> Result<Uuid, StorageError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail() {
            return Err(StorageError::Unavailable("injected failure".to_string()));
        }
        self.inner.create_message(message).await
    }

    async fn update_message_state(
        &self,
        conversation_id: ConversationId,
        sequence: Sequence,
        state: MessageState,
        body: Option<String>,
    ) -> Result<Message, StorageError> {
        self.inner
            .update_message_state(conversation_id, sequence, state, body)
            .await
    }

    async fn fetch_message(
        &self,
        conversation_id: ConversationId,
        sequence: Sequence,
    ) -> Result<Option<Message>, StorageError> {
        self.inner.fetch_message(conversation_id, sequence).await
    }

    async fn fetch_range(
        &self,
        conversation_id: ConversationId,
        from: Sequence,
        to: Sequence,
    ) -> Result<Vec<Message>, StorageError> {
        self.inner.fetch_range(conversation_id, from, to).await
    }

    async fn hide_message(
        &self,
        conversation_id: ConversationId,
        sequence: Sequence,
        user_id: UserId,
    ) -> Result<Message, StorageError> {
        self.inner.hide_message(conversation_id, sequence, user_id).await
    }

    async fn mark_read(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        sequence: Sequence,
    ) -> Result<Sequence, StorageError> {
        self.inner.mark_read(conversation_id, user_id, sequence).await
    }

    async fn read_markers(&self, conversation_id: ConversationId) -> Result<HashMap<UserId, Sequence>, StorageError> {
        self.inner.read_markers(conversation_id).await
    }
}
