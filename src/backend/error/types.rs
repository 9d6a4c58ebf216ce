/**
 * Chat Error Types
 *
 * Every failure the chat core reports to a client.
 *
 * # Error Categories
 *
 * ## User Input
 *
 * `NotParticipant`, `InvalidBody`, `NotAuthor`, `InvalidState`,
 * `MessageNotFound`, `InvalidEnvelope`, `InvalidConversation`: returned to
 * the originating connection or request, never retried.
 *
 * ## Transient
 *
 * `Persistence`: storage kept failing after the bounded retries. For a send
 * the allocated sequence has been gap-filled with a tombstone.
 * `PresenceUnavailable`: the presence backend could not answer a status
 * query.
 *
 * ## Request-fatal
 *
 * `ConversationNotFound` fails the request only. `SequenceMismatch` makes
 * the client resynchronize; its connection stays open.
 */

use axum::http::StatusCode;
use thiserror::Error;

use crate::backend::presence::PresenceError;
use crate::backend::storage::StorageError;
use crate::shared::error::SharedError;
use crate::shared::messaging::{ConversationId, MessageState, Sequence, UserId};

/// Errors raised by the chat core
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("user {user_id} is not a participant of conversation {conversation_id}")]
    NotParticipant {
        user_id: UserId,
        conversation_id: ConversationId,
    },

    #[error("invalid message body: {reason}")]
    InvalidBody { reason: String },

    #[error("only the sender may modify message {sequence} of conversation {conversation_id}")]
    NotAuthor {
        conversation_id: ConversationId,
        sequence: Sequence,
    },

    #[error("message {sequence} of conversation {conversation_id} is {state}")]
    InvalidState {
        conversation_id: ConversationId,
        sequence: Sequence,
        state: MessageState,
    },

    #[error("message {sequence} not found in conversation {conversation_id}")]
    MessageNotFound {
        conversation_id: ConversationId,
        sequence: Sequence,
    },

    #[error("conversation {0} not found")]
    ConversationNotFound(ConversationId),

    #[error("last seen sequence {last_seen} is ahead of conversation {conversation_id} (next is {next_sequence})")]
    SequenceMismatch {
        conversation_id: ConversationId,
        last_seen: Sequence,
        next_sequence: Sequence,
    },

    #[error("could not persist to conversation {conversation_id} after {attempts} attempt(s): {source}")]
    Persistence {
        conversation_id: ConversationId,
        sequence: Option<Sequence>,
        attempts: u32,
        #[source]
        source: StorageError,
    },

    #[error("invalid conversation: {reason}")]
    InvalidConversation { reason: String },

    #[error("invalid envelope: {reason}")]
    InvalidEnvelope { reason: String },

    #[error("presence unavailable: {0}")]
    PresenceUnavailable(#[from] PresenceError),
}

impl ChatError {
    /// Map a storage failure seen while working on `conversation_id`
    pub fn storage(conversation_id: ConversationId, sequence: Option<Sequence>, error: StorageError) -> Self {
        match error {
            StorageError::ConversationNotFound(id) => Self::ConversationNotFound(id),
            StorageError::MessageNotFound {
                conversation_id,
                sequence,
            } => Self::MessageNotFound {
                conversation_id,
                sequence,
            },
            StorageError::Conflict {
                conversation_id,
                sequence,
                state,
            } => Self::InvalidState {
                conversation_id,
                sequence,
                state,
            },
            StorageError::InvalidConversation(reason) => Self::InvalidConversation { reason },
            source => Self::Persistence {
                conversation_id,
                sequence,
                attempts: 1,
                source,
            },
        }
    }

    /// Stable machine-readable code sent to clients
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotParticipant { .. } => "not_participant",
            Self::InvalidBody { .. } => "invalid_body",
            Self::NotAuthor { .. } => "not_author",
            Self::InvalidState { .. } => "invalid_state",
            Self::MessageNotFound { .. } => "message_not_found",
            Self::ConversationNotFound(_) => "conversation_not_found",
            Self::SequenceMismatch { .. } => "sequence_mismatch",
            Self::Persistence { .. } => "persistence_failed",
            Self::InvalidConversation { .. } => "invalid_conversation",
            Self::InvalidEnvelope { .. } => "invalid_envelope",
            Self::PresenceUnavailable(_) => "presence_unavailable",
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotParticipant { .. } | Self::NotAuthor { .. } => StatusCode::FORBIDDEN,
            Self::InvalidBody { .. }
            | Self::InvalidConversation { .. }
            | Self::InvalidEnvelope { .. } => StatusCode::BAD_REQUEST,
            Self::InvalidState { .. } | Self::SequenceMismatch { .. } => StatusCode::CONFLICT,
            Self::MessageNotFound { .. } | Self::ConversationNotFound(_) => StatusCode::NOT_FOUND,
            Self::Persistence { .. } | Self::PresenceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        match self {
            Self::NotParticipant { conversation_id, .. }
            | Self::NotAuthor { conversation_id, .. }
            | Self::InvalidState { conversation_id, .. }
            | Self::MessageNotFound { conversation_id, .. }
            | Self::SequenceMismatch { conversation_id, .. }
            | Self::Persistence { conversation_id, .. } => Some(*conversation_id),
            Self::ConversationNotFound(id) => Some(*id),
            _ => None,
        }
    }

    pub fn sequence(&self) -> Option<Sequence> {
        match self {
            Self::NotAuthor { sequence, .. }
            | Self::InvalidState { sequence, .. }
            | Self::MessageNotFound { sequence, .. } => Some(*sequence),
            Self::Persistence { sequence, .. } => *sequence,
            _ => None,
        }
    }

    /// True for failures caused by the caller's input
    pub fn is_user_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

impl From<SharedError> for ChatError {
    fn from(error: SharedError) -> Self {
        match error {
            SharedError::ValidationError { field, message } if field == "body" => {
                Self::InvalidBody { reason: message }
            }
            SharedError::ValidationError { message, .. } => Self::InvalidConversation { reason: message },
            SharedError::SerializationError { message } => Self::InvalidEnvelope { reason: message },
        }
    }
}
