//! Messaging Module
//!
//! Data structures for the chat core:
//!
//! - `Conversation` - participants and the sequencing counter
//! - `Message` - a sequenced message, possibly edited or tombstoned
//! - `MessageRef` - `(conversation, sequence)` pointer used by the delivery queue
//! - `ConversationSummary` - a conversation as listed for one participant
//!
//! # Usage
//!
//! ```rust
//! use xfchat::shared::messaging::{Conversation, Message, MessageState};
//! ```

pub mod conversation;
pub mod message;

/// Verified user identifier, issued by the auth collaborator
pub type UserId = uuid::Uuid;

/// Conversation identifier
pub type ConversationId = uuid::Uuid;

/// Per-conversation message position, starting at 1
pub type Sequence = u64;

pub use conversation::{
    dedup_participants, Conversation, ConversationSummary, CreateConversationRequest,
    HistoryResponse, ParticipantSummary,
};
pub use message::{
    validate_body, Message, MessageRef, MessageState, DEFAULT_MAX_BODY_CHARS,
};
