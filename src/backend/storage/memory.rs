/**
 * In-memory Chat Storage
 *
 * Keeps conversations and their messages in process memory. Used when
 * `DATABASE_URL` is not configured, and by the test suites. Nothing survives
 * a restart.
 */

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{apply_transition, ChatStorage, StorageError};
use crate::shared::messaging::{
    dedup_participants, Conversation, ConversationId, Message, MessageState, Sequence, UserId,
};

struct ConversationRecord {
    conversation: Conversation,
    messages: BTreeMap<Sequence, Message>,
    read_markers: HashMap<UserId, Sequence>,
}

/// Chat storage backed by a `HashMap`
#[derive(Default)]
pub struct MemoryStorage {
    conversations: RwLock<HashMap<ConversationId, ConversationRecord>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored messages in a conversation, tombstones included
    pub async fn message_count(&self, conversation_id: ConversationId) -> usize {
        self.conversations
            .read()
            .await
            .get(&conversation_id)
            .map(|record| record.messages.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ChatStorage for MemoryStorage {
    async fn conversation(&self, id: ConversationId) -> Result<Option<Conversation>, StorageError> {
        Ok(self
            .conversations
            .read()
            .await
            .get(&id)
            .map(|record| record.conversation.clone()))
    }

    async fn create_conversation(&self, participants: Vec<UserId>) -> Result<Conversation, StorageError> {
        let participants = dedup_participants(participants);
        let mut conversations = self.conversations.write().await;

        if participants.len() == 2 {
            let existing = conversations.values().find(|record| {
                !record.conversation.archived && record.conversation.same_members(&participants)
            });
            if let Some(record) = existing {
                return Ok(record.conversation.clone());
            }
        }

        let conversation = Conversation::new(participants)
            .map_err(|e| StorageError::InvalidConversation(e.detail().to_string()))?;
        conversations.insert(
            conversation.id,
            ConversationRecord {
                conversation: conversation.clone(),
                messages: BTreeMap::new(),
                read_markers: HashMap::new(),
            },
        );
        Ok(conversation)
    }

    async fn conversations_for_user(&self, user_id: UserId) -> Result<Vec<Conversation>, StorageError> {
        let conversations = self.conversations.read().await;
        let mut found: Vec<Conversation> = conversations
            .values()
            .filter(|record| record.conversation.has_participant(user_id))
            .map(|record| record.conversation.clone())
            .collect();
        found.sort_by_key(|conversation| conversation.created_at);
        Ok(found)
    }

    async fn create_message(&self, message: &Message) -> Result<Uuid, StorageError> {
        let mut conversations = self.conversations.write().await;
        let record = conversations
            .get_mut(&message.conversation_id)
            .ok_or(StorageError::ConversationNotFound(message.conversation_id))?;

        let id = record
            .messages
            .entry(message.sequence)
            .or_insert_with(|| message.clone())
            .id;
        let after = message.sequence + 1;
        if record.conversation.next_sequence < after {
            record.conversation.next_sequence = after;
        }
        Ok(id)
    }

    async fn update_message_state(
        &self,
        conversation_id: ConversationId,
        sequence: Sequence,
        state: MessageState,
        body: Option<String>,
    ) -> Result<Message, StorageError> {
        let mut conversations = self.conversations.write().await;
        let message = conversations
            .get_mut(&conversation_id)
            .ok_or(StorageError::ConversationNotFound(conversation_id))?
            .messages
            .get_mut(&sequence)
            .ok_or(StorageError::MessageNotFound {
                conversation_id,
                sequence,
            })?;

        let mut updated = message.clone();
        apply_transition(&mut updated, state, body)?;
        *message = updated.clone();
        Ok(updated)
    }

    async fn fetch_message(
        &self,
        conversation_id: ConversationId,
        sequence: Sequence,
    ) -> Result<Option<Message>, StorageError> {
        let conversations = self.conversations.read().await;
        let record = conversations
            .get(&conversation_id)
            .ok_or(StorageError::ConversationNotFound(conversation_id))?;
        Ok(record.messages.get(&sequence).cloned())
    }

    async fn fetch_range(
        &self,
        conversation_id: ConversationId,
        from: Sequence,
        to: Sequence,
    ) -> Result<Vec<Message>, StorageError> {
        let conversations = self.conversations.read().await;
        let record = conversations
            .get(&conversation_id)
            .ok_or(StorageError::ConversationNotFound(conversation_id))?;
        if to < from {
            return Ok(Vec::new());
        }
        Ok(record.messages.range(from..=to).map(|(_, m)| m.clone()).collect())
    }

    async fn hide_message(
        &self,
        conversation_id: ConversationId,
        sequence: Sequence,
        user_id: UserId,
    ) -> Result<Message, StorageError> {
        let mut conversations = self.conversations.write().await;
        let message = conversations
            .get_mut(&conversation_id)
            .ok_or(StorageError::ConversationNotFound(conversation_id))?
            .messages
            .get_mut(&sequence)
            .ok_or(StorageError::MessageNotFound {
                conversation_id,
                sequence,
            })?;
        message.hide_for(user_id);
        Ok(message.clone())
    }

    async fn mark_read(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        sequence: Sequence,
    ) -> Result<Sequence, StorageError> {
        let mut conversations = self.conversations.write().await;
        let record = conversations
            .get_mut(&conversation_id)
            .ok_or(StorageError::ConversationNotFound(conversation_id))?;
        let marker = record.read_markers.entry(user_id).or_insert(0);
        *marker = (*marker).max(sequence);
        Ok(*marker)
    }

    async fn read_markers(&self, conversation_id: ConversationId) -> Result<HashMap<UserId, Sequence>, StorageError> {
        let conversations = self.conversations.read().await;
        let record = conversations
            .get(&conversation_id)
            .ok_or(StorageError::ConversationNotFound(conversation_id))?;
        Ok(record.read_markers.clone())
    }
}
