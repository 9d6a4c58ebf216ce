//! Storage Module
//!
//! Durable storage of conversations and messages, consumed by the chat core
//! through the `ChatStorage` trait.
//!
//! # Architecture
//!
//! - **`memory`** - `MemoryStorage`, used when no database is configured and in tests
//! - **`postgres`** - `PgStorage`, sqlx runtime queries against PostgreSQL
//!
//! # Module Structure
//!
//! ```text
//! storage/
//! ├── mod.rs       - ChatStorage trait, StorageError, shared transition rules
//! ├── memory.rs    - In-memory implementation
//! └── postgres.rs  - PostgreSQL implementation
//! ```
//!
//! # Contract
//!
//! - `create_message` is idempotent on `(conversation, sequence)`: writing a
//!   slot that already exists returns the stored id and changes nothing.
//! - Storing a message advances the conversation's `next_sequence` past it.
//! - `update_message_state` never moves a message out of `deleted`.
//! - `fetch_range` is inclusive on both ends and ordered by sequence.
//! - `hide_message` is idempotent and leaves the message's state alone.
//! - Read markers only move forward: `mark_read` keeps the higher of the
//!   stored and the requested sequence.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::shared::messaging::{
    Conversation, ConversationId, Message, MessageState, Sequence, UserId,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStorage;
pub use postgres::PgStorage;

/// Storage failures
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("conversation {0} not found")]
    ConversationNotFound(ConversationId),

    #[error("message {sequence} not found in conversation {conversation_id}")]
    MessageNotFound {
        conversation_id: ConversationId,
        sequence: Sequence,
    },

    /// The requested state change is not allowed from the stored state
    #[error("message {sequence} in conversation {conversation_id} is {state}")]
    Conflict {
        conversation_id: ConversationId,
        sequence: Sequence,
        state: MessageState,
    },

    #[error("invalid conversation: {0}")]
    InvalidConversation(String),

    /// A stored row could not be decoded
    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Durable storage used by the chat core
#[async_trait]
pub trait ChatStorage: Send + Sync {
    /// Load a conversation, `None` if it does not exist
    async fn conversation(&self, id: ConversationId) -> Result<Option<Conversation>, StorageError>;

    /// Create a conversation. For exactly two participants an existing,
    /// non-archived conversation between the same two users is returned.
    async fn create_conversation(&self, participants: Vec<UserId>) -> Result<Conversation, StorageError>;

    /// Conversations `user_id` takes part in
    async fn conversations_for_user(&self, user_id: UserId) -> Result<Vec<Conversation>, StorageError>;

    /// Persist a sequenced message and return its stored id
    async fn create_message(&self, message: &Message) -> Result<Uuid, StorageError>;

    /// Move a message to `state`. `body` is the replacement body for edits.
    async fn update_message_state(
        &self,
        conversation_id: ConversationId,
        sequence: Sequence,
        state: MessageState,
        body: Option<String>,
    ) -> Result<Message, StorageError>;

    async fn fetch_message(
        &self,
        conversation_id: ConversationId,
        sequence: Sequence,
    ) -> Result<Option<Message>, StorageError>;

    /// Messages with `from <= sequence <= to`, ascending
    async fn fetch_range(
        &self,
        conversation_id: ConversationId,
        from: Sequence,
        to: Sequence,
    ) -> Result<Vec<Message>, StorageError>;

    /// Hide a message from `user_id` only and return the stored message
    async fn hide_message(
        &self,
        conversation_id: ConversationId,
        sequence: Sequence,
        user_id: UserId,
    ) -> Result<Message, StorageError>;

    /// Advance `user_id`'s read marker to `sequence` and return the marker
    /// now stored, which is never lower than before.
    async fn mark_read(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        sequence: Sequence,
    ) -> Result<Sequence, StorageError>;

    /// Read markers of a conversation; participants who never read are absent
    async fn read_markers(&self, conversation_id: ConversationId) -> Result<HashMap<UserId, Sequence>, StorageError>;
}

/// Apply a requested state change to a loaded message.
///
/// Shared by every backend so that the transition rules live in one place.
pub(crate) fn apply_transition(
    message: &mut Message,
    state: MessageState,
    body: Option<String>,
) -> Result<(), StorageError> {
    let (conversation_id, sequence) = (message.conversation_id, message.sequence);
    let conflict = move |current: MessageState| StorageError::Conflict {
        conversation_id,
        sequence,
        state: current,
    };
    match state {
        MessageState::Edited => {
            let current = message.state;
            let body = body.ok_or_else(|| conflict(current))?;
            message.apply_edit(body).map_err(conflict)
        }
        MessageState::Deleted => message.apply_delete().map_err(conflict),
        MessageState::Active => Err(conflict(message.state)),
    }
}
