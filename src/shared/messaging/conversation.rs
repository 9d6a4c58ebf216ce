//! Conversation Data Structure
//!
//! Represents a conversation between two or more users.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ConversationId, Sequence, UserId};
use crate::shared::error::SharedError;

/// A conversation and its sequencing counter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Unique conversation ID
    pub id: ConversationId,
    /// Participant user IDs, de-duplicated, in order of first appearance
    pub participants: Vec<UserId>,
    /// Sequence number the next message will receive; starts at 1
    pub next_sequence: Sequence,
    /// When the conversation was created
    pub created_at: DateTime<Utc>,
    /// Archived conversations are kept, never erased
    pub archived: bool,
}

impl Conversation {
    /// Create a new conversation.
    ///
    /// Fails when fewer than two distinct participants remain after
    /// de-duplication.
    pub fn new(participants: impl IntoIterator<Item = UserId>) -> Result<Self, SharedError> {
        let participants = dedup_participants(participants);
        if participants.len() < 2 {
            return Err(SharedError::validation(
                "participants",
                "a conversation needs at least two distinct participants",
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            participants,
            next_sequence: 1,
            created_at: Utc::now(),
            archived: false,
        })
    }

    /// Check if user is a participant
    pub fn has_participant(&self, user_id: UserId) -> bool {
        self.participants.contains(&user_id)
    }

    /// Every participant except `user_id`
    pub fn others(&self, user_id: UserId) -> impl Iterator<Item = UserId> + '_ {
        self.participants
            .iter()
            .copied()
            .filter(move |participant| *participant != user_id)
    }

    /// Highest sequence assigned so far, 0 for an empty conversation
    pub fn highest_sequence(&self) -> Sequence {
        self.next_sequence.saturating_sub(1)
    }

    /// True when both conversations have the same participant set
    pub fn same_members(&self, participants: &[UserId]) -> bool {
        self.participants.len() == participants.len()
            && participants.iter().all(|p| self.participants.contains(p))
    }
}

/// Remove duplicate ids while keeping first-appearance order
pub fn dedup_participants(participants: impl IntoIterator<Item = UserId>) -> Vec<UserId> {
    let mut unique = Vec::new();
    for participant in participants {
        if !unique.contains(&participant) {
            unique.push(participant);
        }
    }
    unique
}

/// Request to create (or find) a conversation with the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversationRequest {
    pub participant_ids: Vec<UserId>,
}

/// Response for a history fetch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub conversation_id: ConversationId,
    pub messages: Vec<super::Message>,
    pub next_sequence: Sequence,
}

/// One participant of a listed conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSummary {
    pub user_id: UserId,
    pub online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    /// Highest sequence this participant has marked as read
    pub read_through: Sequence,
}

/// A conversation as listed for one of its participants
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub participants: Vec<ParticipantSummary>,
    pub next_sequence: Sequence,
    pub created_at: DateTime<Utc>,
    /// Newest message as the caller sees it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<super::Message>,
    /// The caller's own read marker
    pub read_through: Sequence,
    /// Sequences after the caller's read marker
    pub unread: u64,
}

impl ConversationSummary {
    /// Messages after `read_through`, never negative
    pub fn unread_after(conversation: &Conversation, read_through: Sequence) -> u64 {
        conversation.highest_sequence().saturating_sub(read_through)
    }
}
