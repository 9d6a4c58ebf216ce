//! Chat HTTP Handlers
//!
//! Request/response endpoints next to the WebSocket: conversation creation
//! and listing, history, deletes, read markers, pending deliveries and
//! presence status. All of them require an authenticated caller. Writes go
//! through the same router operations as their WebSocket counterparts, so
//! connected participants see the same events either way.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::backend::chat::ChatRouter;
use crate::backend::error::ChatError;
use crate::backend::middleware::AuthenticatedUser;
use crate::backend::presence::PresenceStatus;
use crate::shared::event::PendingConversation;
use crate::shared::messaging::{
    Conversation, ConversationSummary, CreateConversationRequest, HistoryResponse, Message, Sequence,
};

/// Query parameters of the history endpoint
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub from: Option<Sequence>,
    pub to: Option<Sequence>,
}

/// Body of the mark-read endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadRequest {
    pub sequence: Sequence,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReadResponse {
    pub conversation_id: Uuid,
    pub read_through: Sequence,
}

/// Create a conversation between the caller and the listed users
pub async fn create_conversation(
    State(router): State<Arc<ChatRouter>>,
    AuthenticatedUser(identity): AuthenticatedUser,
    Json(request): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<Conversation>), ChatError> {
    let conversation = router
        .create_conversation(identity.user_id, request.participant_ids)
        .await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

/// The caller's conversations, most recently active first
pub async fn list_conversations(
    State(router): State<Arc<ChatRouter>>,
    AuthenticatedUser(identity): AuthenticatedUser,
) -> Result<Json<Vec<ConversationSummary>>, ChatError> {
    Ok(Json(router.conversations(identity.user_id).await?))
}

/// Page of a conversation's messages
pub async fn get_history(
    State(router): State<Arc<ChatRouter>>,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ChatError> {
    let history = router
        .history(identity.user_id, conversation_id, query.from, query.to)
        .await?;
    Ok(Json(history))
}

/// Conversations with queued deliveries for the caller
pub async fn get_pending(
    State(router): State<Arc<ChatRouter>>,
    AuthenticatedUser(identity): AuthenticatedUser,
) -> Json<Vec<PendingConversation>> {
    Json(router.pending(identity.user_id))
}

/// Online status and last-seen time of a user
pub async fn get_user_status(
    State(router): State<Arc<ChatRouter>>,
    AuthenticatedUser(_identity): AuthenticatedUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<PresenceStatus>, ChatError> {
    Ok(Json(router.presence_status(user_id).await?))
}

/// Tombstone a message for every participant
pub async fn delete_message(
    State(router): State<Arc<ChatRouter>>,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path((conversation_id, sequence)): Path<(Uuid, Sequence)>,
) -> Result<Json<Message>, ChatError> {
    Ok(Json(router.delete(identity, conversation_id, sequence).await?))
}

/// Hide a message from the caller only
pub async fn delete_message_for_self(
    State(router): State<Arc<ChatRouter>>,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path((conversation_id, sequence)): Path<(Uuid, Sequence)>,
) -> Result<Json<Message>, ChatError> {
    Ok(Json(router.delete_for_self(identity, conversation_id, sequence).await?))
}

/// Move the caller's read marker forward
pub async fn mark_read(
    State(router): State<Arc<ChatRouter>>,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(conversation_id): Path<Uuid>,
    Json(request): Json<ReadRequest>,
) -> Result<Json<ReadResponse>, ChatError> {
    let read_through = router.mark_read(identity, conversation_id, request.sequence).await?;
    Ok(Json(ReadResponse {
        conversation_id,
        read_through,
    }))
}
