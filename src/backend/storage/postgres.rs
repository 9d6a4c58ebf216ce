//! PostgreSQL chat storage
//!
//! Runtime sqlx queries against the tables created by `migrations/`.
//! Sequence numbers are `BIGINT` columns; `(conversation_id, sequence)` is
//! the primary key of `chat_messages`. Per-user hiding is a `UUID[]` column
//! on the message row, read markers live in `chat_read_markers`.

use async_trait::async_trait;
use std::collections::HashMap;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{apply_transition, ChatStorage, StorageError};
use crate::shared::messaging::{
    dedup_participants, Conversation, ConversationId, Message, MessageState, Sequence, UserId,
};

const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sequence, sender_id, body, state, previous_body, created_at, edited_at, hidden_for";

/// Chat storage backed by PostgreSQL
#[derive(Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn participants(&self, conversation_id: ConversationId) -> Result<Vec<UserId>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT user_id
            FROM chat_conversation_participants
            WHERE conversation_id = $1
            ORDER BY position
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get("user_id").map_err(StorageError::from))
            .collect()
    }

    async fn conversation_from_row(&self, row: PgRow) -> Result<Conversation, StorageError> {
        let id: Uuid = row.try_get("id")?;
        Ok(Conversation {
            id,
            participants: self.participants(id).await?,
            next_sequence: from_db(row.try_get("next_sequence")?),
            created_at: row.try_get("created_at")?,
            archived: row.try_get("archived")?,
        })
    }

    async fn find_pair(&self, participants: &[UserId]) -> Result<Option<Conversation>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT c.id, c.next_sequence, c.created_at, c.archived
            FROM chat_conversations c
            JOIN chat_conversation_participants p ON p.conversation_id = c.id
            WHERE NOT c.archived
            GROUP BY c.id
            HAVING COUNT(*) = 2 AND bool_and(p.user_id = ANY($1))
            ORDER BY c.created_at
            LIMIT 1
            "#,
        )
        .bind(participants)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.conversation_from_row(row).await?)),
            None => Ok(None),
        }
    }
}

fn to_db(sequence: Sequence) -> i64 {
    i64::try_from(sequence).unwrap_or(i64::MAX)
}

fn from_db(value: i64) -> Sequence {
    u64::try_from(value).unwrap_or(0)
}

fn message_from_row(row: &PgRow) -> Result<Message, StorageError> {
    let state: String = row.try_get("state")?;
    Ok(Message {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        sequence: from_db(row.try_get("sequence")?),
        sender_id: row.try_get("sender_id")?,
        body: row.try_get("body")?,
        state: state
            .parse::<MessageState>()
            .map_err(|e| StorageError::Corrupt(e.to_string()))?,
        previous_body: row.try_get("previous_body")?,
        created_at: row.try_get("created_at")?,
        edited_at: row.try_get("edited_at")?,
        hidden_for: row.try_get("hidden_for")?,
    })
}

#[async_trait]
impl ChatStorage for PgStorage {
    async fn conversation(&self, id: ConversationId) -> Result<Option<Conversation>, StorageError> {
        let row = sqlx::query(
            r#"
            SELECT id, next_sequence, created_at, archived
            FROM chat_conversations
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.conversation_from_row(row).await?)),
            None => Ok(None),
        }
    }

    async fn create_conversation(&self, participants: Vec<UserId>) -> Result<Conversation, StorageError> {
        let participants = dedup_participants(participants);
        if participants.len() == 2 {
            if let Some(existing) = self.find_pair(&participants).await? {
                return Ok(existing);
            }
        }

        let conversation = Conversation::new(participants)
            .map_err(|e| StorageError::InvalidConversation(e.detail().to_string()))?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO chat_conversations (id, next_sequence, created_at, archived)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(conversation.id)
        .bind(to_db(conversation.next_sequence))
        .bind(conversation.created_at)
        .bind(conversation.archived)
        .execute(&mut *tx)
        .await?;

        for (position, user_id) in conversation.participants.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO chat_conversation_participants (conversation_id, user_id, position)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(conversation.id)
            .bind(user_id)
            .bind(position as i32)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::info!(
            "[Storage] Created conversation {} with {} participants",
            conversation.id,
            conversation.participants.len()
        );
        Ok(conversation)
    }

    async fn conversations_for_user(&self, user_id: UserId) -> Result<Vec<Conversation>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.next_sequence, c.created_at, c.archived
            FROM chat_conversations c
            JOIN chat_conversation_participants p ON p.conversation_id = c.id
            WHERE p.user_id = $1
            ORDER BY c.created_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut conversations = Vec::with_capacity(rows.len());
        for row in rows {
            conversations.push(self.conversation_from_row(row).await?);
        }
        Ok(conversations)
    }

    async fn create_message(&self, message: &Message) -> Result<Uuid, StorageError> {
        let mut tx = self.pool.begin().await?;

        let advanced = sqlx::query(
            r#"
            UPDATE chat_conversations
            SET next_sequence = GREATEST(next_sequence, $2)
            WHERE id = $1
            "#,
        )
        .bind(message.conversation_id)
        .bind(to_db(message.sequence + 1))
        .execute(&mut *tx)
        .await?;
        if advanced.rows_affected() == 0 {
            return Err(StorageError::ConversationNotFound(message.conversation_id));
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO chat_messages
                (id, conversation_id, sequence, sender_id, body, state, previous_body, created_at, edited_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (conversation_id, sequence) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(message.id)
        .bind(message.conversation_id)
        .bind(to_db(message.sequence))
        .bind(message.sender_id)
        .bind(&message.body)
        .bind(message.state.as_str())
        .bind(&message.previous_body)
        .bind(message.created_at)
        .bind(message.edited_at)
        .fetch_optional(&mut *tx)
        .await?;

        let id = match inserted {
            Some(row) => row.try_get("id")?,
            None => {
                let existing = sqlx::query(
                    "SELECT id FROM chat_messages WHERE conversation_id = $1 AND sequence = $2",
                )
                .bind(message.conversation_id)
                .bind(to_db(message.sequence))
                .fetch_one(&mut *tx)
                .await?;
                existing.try_get("id")?
            }
        };
        tx.commit().await?;
        Ok(id)
    }

    async fn update_message_state(
        &self,
        conversation_id: ConversationId,
        sequence: Sequence,
        state: MessageState,
        body: Option<String>,
    ) -> Result<Message, StorageError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM chat_messages WHERE conversation_id = $1 AND sequence = $2 FOR UPDATE",
            MESSAGE_COLUMNS
        ))
        .bind(conversation_id)
        .bind(to_db(sequence))
        .fetch_optional(&mut *tx)
        .await?;

        let mut message = match row {
            Some(row) => message_from_row(&row)?,
            None => {
                return Err(StorageError::MessageNotFound {
                    conversation_id,
                    sequence,
                })
            }
        };
        apply_transition(&mut message, state, body)?;

        sqlx::query(
            r#"
            UPDATE chat_messages
            SET body = $3, state = $4, previous_body = $5, edited_at = $6
            WHERE conversation_id = $1 AND sequence = $2
            "#,
        )
        .bind(conversation_id)
        .bind(to_db(sequence))
        .bind(&message.body)
        .bind(message.state.as_str())
        .bind(&message.previous_body)
        .bind(message.edited_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(message)
    }

    async fn fetch_message(
        &self,
        conversation_id: ConversationId,
        sequence: Sequence,
    ) -> Result<Option<Message>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM chat_messages WHERE conversation_id = $1 AND sequence = $2",
            MESSAGE_COLUMNS
        ))
        .bind(conversation_id)
        .bind(to_db(sequence))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(message_from_row).transpose()
    }

    async fn fetch_range(
        &self,
        conversation_id: ConversationId,
        from: Sequence,
        to: Sequence,
    ) -> Result<Vec<Message>, StorageError> {
        if to < from {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT {} FROM chat_messages \
             WHERE conversation_id = $1 AND sequence BETWEEN $2 AND $3 \
             ORDER BY sequence",
            MESSAGE_COLUMNS
        ))
        .bind(conversation_id)
        .bind(to_db(from))
        .bind(to_db(to))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    async fn hide_message(
        &self,
        conversation_id: ConversationId,
        sequence: Sequence,
        user_id: UserId,
    ) -> Result<Message, StorageError> {
        let row = sqlx::query(&format!(
            "UPDATE chat_messages \
             SET hidden_for = CASE WHEN $3 = ANY(hidden_for) THEN hidden_for ELSE array_append(hidden_for, $3) END \
             WHERE conversation_id = $1 AND sequence = $2 \
             RETURNING {}",
            MESSAGE_COLUMNS
        ))
        .bind(conversation_id)
        .bind(to_db(sequence))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => message_from_row(&row),
            None => Err(StorageError::MessageNotFound {
                conversation_id,
                sequence,
            }),
        }
    }

    async fn mark_read(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        sequence: Sequence,
    ) -> Result<Sequence, StorageError> {
        let row = sqlx::query(
            r#"
            INSERT INTO chat_read_markers (conversation_id, user_id, read_through, updated_at)
            SELECT $1, $2, $3, NOW()
            WHERE EXISTS (SELECT 1 FROM chat_conversations WHERE id = $1)
            ON CONFLICT (conversation_id, user_id) DO UPDATE
            SET read_through = GREATEST(chat_read_markers.read_through, EXCLUDED.read_through),
                updated_at = NOW()
            RETURNING read_through
            "#,
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(to_db(sequence))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(from_db(row.try_get("read_through")?)),
            None => Err(StorageError::ConversationNotFound(conversation_id)),
        }
    }

    async fn read_markers(&self, conversation_id: ConversationId) -> Result<HashMap<UserId, Sequence>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, read_through
            FROM chat_read_markers
            WHERE conversation_id = $1
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<(UserId, Sequence), StorageError> {
                Ok((row.try_get("user_id")?, from_db(row.try_get("read_through")?)))
            })
            .collect()
    }
}
