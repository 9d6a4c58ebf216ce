//! Chat Message Data Structure
//!
//! A message occupies exactly one sequence slot in its conversation. The slot
//! is assigned once and never reused; deleting a message turns it into a
//! tombstone that keeps the slot but drops the body.
//!
//! A participant can also hide a message from themselves only. Everyone else
//! keeps seeing it; the hiding user sees a tombstone from then on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{ConversationId, Sequence, UserId};
use crate::shared::error::SharedError;

/// Default upper bound on message body length, in characters
pub const DEFAULT_MAX_BODY_CHARS: usize = 2000;

/// Lifecycle state of a message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    #[default]
    Active,
    Edited,
    /// Terminal. The slot stays, the body is gone.
    Deleted,
}

impl MessageState {
    /// Column/wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageState::Active => "active",
            MessageState::Edited => "edited",
            MessageState::Deleted => "deleted",
        }
    }

    /// Whether a message in this state may move to `next`.
    ///
    /// Only active messages are editable, and nothing leaves `Deleted`, which
    /// is what makes a delete win over a racing edit.
    pub fn can_transition_to(&self, next: MessageState) -> bool {
        matches!(
            (self, next),
            (MessageState::Active, MessageState::Edited)
                | (MessageState::Active, MessageState::Deleted)
                | (MessageState::Edited, MessageState::Deleted)
        )
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageState {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(MessageState::Active),
            "edited" => Ok(MessageState::Edited),
            "deleted" => Ok(MessageState::Deleted),
            other => Err(SharedError::validation(
                "state",
                format!("unknown message state '{}'", other),
            )),
        }
    }
}

/// Pointer to one sequence slot of one conversation.
///
/// Ordering is by conversation first, then by sequence, which is the order
/// the delivery queue hands entries back in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct MessageRef {
    pub conversation_id: ConversationId,
    pub sequence: Sequence,
}

impl MessageRef {
    pub fn new(conversation_id: ConversationId, sequence: Sequence) -> Self {
        Self {
            conversation_id,
            sequence,
        }
    }
}

/// A sequenced chat message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Storage identifier
    pub id: Uuid,
    /// Conversation this message belongs to
    pub conversation_id: ConversationId,
    /// Position in the conversation, starting at 1
    pub sequence: Sequence,
    /// Author of the message
    pub sender_id: UserId,
    /// Current body; empty for tombstones
    pub body: String,
    pub state: MessageState,
    /// Body before the most recent edit
    pub previous_body: Option<String>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    /// Participants who deleted this message for themselves
    #[serde(default, skip_serializing)]
    pub hidden_for: Vec<UserId>,
}

impl Message {
    /// Create a new active message
    pub fn new(
        conversation_id: ConversationId,
        sequence: Sequence,
        sender_id: UserId,
        body: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            sequence,
            sender_id,
            body,
            state: MessageState::Active,
            previous_body: None,
            created_at: Utc::now(),
            edited_at: None,
            hidden_for: Vec::new(),
        }
    }

    /// Create a gap-filling tombstone for a slot whose message never made it
    /// to storage, or which storage no longer has.
    pub fn tombstone(conversation_id: ConversationId, sequence: Sequence, sender_id: UserId) -> Self {
        Self {
            body: String::new(),
            state: MessageState::Deleted,
            ..Self::new(conversation_id, sequence, sender_id, String::new())
        }
    }

    pub fn reference(&self) -> MessageRef {
        MessageRef::new(self.conversation_id, self.sequence)
    }

    pub fn is_tombstone(&self) -> bool {
        self.state == MessageState::Deleted
    }

    /// Replace the body, keeping the old one as edit history
    pub fn apply_edit(&mut self, body: String) -> Result<(), MessageState> {
        if !self.state.can_transition_to(MessageState::Edited) {
            return Err(self.state);
        }
        self.previous_body = Some(std::mem::replace(&mut self.body, body));
        self.state = MessageState::Edited;
        self.edited_at = Some(Utc::now());
        Ok(())
    }

    /// Turn the message into a tombstone
    pub fn apply_delete(&mut self) -> Result<(), MessageState> {
        if !self.state.can_transition_to(MessageState::Deleted) {
            return Err(self.state);
        }
        self.body.clear();
        self.previous_body = None;
        self.state = MessageState::Deleted;
        Ok(())
    }

    pub fn is_hidden_for(&self, user_id: UserId) -> bool {
        self.hidden_for.contains(&user_id)
    }

    /// Hide the message from `user_id`. Returns `false` if it already was.
    pub fn hide_for(&mut self, user_id: UserId) -> bool {
        if self.is_hidden_for(user_id) {
            return false;
        }
        self.hidden_for.push(user_id);
        true
    }

    /// The message as `viewer` sees it: a tombstone once they hid it
    pub fn view_for(&self, viewer: UserId) -> Message {
        if !self.is_hidden_for(viewer) || self.is_tombstone() {
            return self.clone();
        }
        Message {
            body: String::new(),
            previous_body: None,
            state: MessageState::Deleted,
            ..self.clone()
        }
    }
}

/// Check a raw body against the content policy and return the stored form.
///
/// The stored body is trimmed. It must be non-empty, at most `max_chars`
/// characters long, and free of control characters other than newline,
/// carriage return and tab.
pub fn validate_body(raw: &str, max_chars: usize) -> Result<String, SharedError> {
    let body = raw.trim();
    if body.is_empty() {
        return Err(SharedError::validation("body", "message body cannot be empty"));
    }
    let length = body.chars().count();
    if length > max_chars {
        return Err(SharedError::validation(
            "body",
            format!("message body is {} characters, limit is {}", length, max_chars),
        ));
    }
    if body
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
    {
        return Err(SharedError::validation(
            "body",
            "message body contains control characters",
        ));
    }
    Ok(body.to_string())
}
