/**
 * Chat Wire Protocol
 *
 * Envelopes exchanged over a chat connection. Every frame is a JSON text
 * frame with a `type` discriminator and camelCase fields.
 *
 * # Inbound (client → server)
 *
 * - `send` - new message `{conversationId, body}`
 * - `edit` - replace the body of `{conversationId, sequence}`
 * - `delete` - tombstone `{conversationId, sequence}` for everyone, or with
 *   `mode: "self"` hide it from the caller only
 * - `read` - the caller has read `{conversationId, sequence}` and everything
 *   before it
 * - `heartbeat` - keep presence alive
 * - `ack` - everything up to `{conversationId, sequence}` is applied
 * - `reconcile` - replay everything after `{conversationId, lastSeen}`
 *
 * # Outbound (server → client)
 *
 * - `message` / `edited` / `deleted` - message events, always carrying the
 *   original sequence number
 * - `presence` - a co-participant went online or offline
 * - `read` - a co-participant's read marker moved forward
 * - `hello`, `accepted`, `heartbeat_ack`, `reconciled`, `resync`, `error` -
 *   session control
 */
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::error::SharedError;
use crate::shared::messaging::{ConversationId, Message, MessageState, Sequence, UserId};

/// Event sent by a client over its connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    Send {
        conversation_id: ConversationId,
        body: String,
    },
    Edit {
        conversation_id: ConversationId,
        sequence: Sequence,
        body: String,
    },
    Delete {
        conversation_id: ConversationId,
        sequence: Sequence,
        #[serde(default)]
        mode: DeleteMode,
    },
    Read {
        conversation_id: ConversationId,
        sequence: Sequence,
    },
    Heartbeat,
    Ack {
        conversation_id: ConversationId,
        sequence: Sequence,
    },
    Reconcile {
        conversation_id: ConversationId,
        #[serde(default)]
        last_seen: Sequence,
    },
}

impl ClientEvent {
    /// Decode one text frame
    pub fn parse(frame: &str) -> Result<Self, SharedError> {
        Ok(serde_json::from_str(frame)?)
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::Send { .. } => "send",
            ClientEvent::Edit { .. } => "edit",
            ClientEvent::Delete {
                mode: DeleteMode::All,
                ..
            } => "delete",
            ClientEvent::Delete {
                mode: DeleteMode::ForSelf,
                ..
            } => "delete_for_self",
            ClientEvent::Read { .. } => "read",
            ClientEvent::Heartbeat => "heartbeat",
            ClientEvent::Ack { .. } => "ack",
            ClientEvent::Reconcile { .. } => "reconcile",
        }
    }
}

/// Who a delete applies to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum DeleteMode {
    /// Tombstone the message for every participant
    #[default]
    #[serde(rename = "all")]
    All,
    /// Hide the message from the caller only
    #[serde(rename = "self")]
    ForSelf,
}

/// Message payload of `message`, `edited` and `deleted` events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    pub conversation_id: ConversationId,
    pub sequence: Sequence,
    pub sender: UserId,
    /// Absent for tombstones
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub state: MessageState,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
}

impl From<&Message> for MessageEnvelope {
    fn from(message: &Message) -> Self {
        Self {
            conversation_id: message.conversation_id,
            sequence: message.sequence,
            sender: message.sender_id,
            body: (!message.is_tombstone()).then(|| message.body.clone()),
            state: message.state,
            created_at: message.created_at,
            edited_at: message.edited_at,
        }
    }
}

/// Queue summary for one conversation, sent on connect
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PendingConversation {
    pub conversation_id: ConversationId,
    pub count: usize,
    pub lowest: Sequence,
    pub highest: Sequence,
}

/// Event sent by the server to a connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    Hello {
        connection_id: uuid::Uuid,
        user_id: UserId,
        heartbeat_interval_secs: u64,
        pending: Vec<PendingConversation>,
    },
    Message(MessageEnvelope),
    Edited(MessageEnvelope),
    Deleted(MessageEnvelope),
    Presence {
        user_id: UserId,
        online: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_seen: Option<DateTime<Utc>>,
    },
    Read {
        conversation_id: ConversationId,
        user_id: UserId,
        through: Sequence,
    },
    Accepted {
        conversation_id: ConversationId,
        sequence: Sequence,
    },
    HeartbeatAck,
    Reconciled {
        conversation_id: ConversationId,
        through: Sequence,
    },
    Resync {
        conversation_id: ConversationId,
        next_sequence: Sequence,
    },
    Error {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<ConversationId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sequence: Option<Sequence>,
    },
}

impl ServerEvent {
    /// A new message, or a backlog entry during reconciliation
    pub fn message(message: &Message) -> Self {
        ServerEvent::Message(message.into())
    }

    pub fn edited(message: &Message) -> Self {
        ServerEvent::Edited(message.into())
    }

    pub fn deleted(message: &Message) -> Self {
        ServerEvent::Deleted(message.into())
    }

    /// The mutation event matching the message's current state
    pub fn mutation(message: &Message) -> Option<Self> {
        match message.state {
            MessageState::Active => None,
            MessageState::Edited => Some(Self::edited(message)),
            MessageState::Deleted => Some(Self::deleted(message)),
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code: code.into(),
            message: message.into(),
            conversation_id: None,
            sequence: None,
        }
    }

    /// Envelope of a message event, if this is one
    pub fn envelope(&self) -> Option<&MessageEnvelope> {
        match self {
            ServerEvent::Message(envelope)
            | ServerEvent::Edited(envelope)
            | ServerEvent::Deleted(envelope) => Some(envelope),
            _ => None,
        }
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Hello { .. } => "hello",
            ServerEvent::Message(_) => "message",
            ServerEvent::Edited(_) => "edited",
            ServerEvent::Deleted(_) => "deleted",
            ServerEvent::Presence { .. } => "presence",
            ServerEvent::Read { .. } => "read",
            ServerEvent::Accepted { .. } => "accepted",
            ServerEvent::HeartbeatAck => "heartbeat_ack",
            ServerEvent::Reconciled { .. } => "reconciled",
            ServerEvent::Resync { .. } => "resync",
            ServerEvent::Error { .. } => "error",
        }
    }
}
