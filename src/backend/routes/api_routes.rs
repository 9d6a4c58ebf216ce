/**
 * API Route Handlers
 *
 * Registers the versioned chat API.
 *
 * # Routes
 *
 * ## Real-time
 * - `GET /api/v1/ws/chat` - WebSocket upgrade
 *
 * ## Conversations
 * - `GET /api/v1/conversations` - The caller's conversations with unread counts
 * - `POST /api/v1/conversations` - Get or create a conversation
 * - `GET /api/v1/conversations/{conversation_id}/messages?from=&to=` - History
 * - `DELETE /api/v1/conversations/{conversation_id}/messages/{sequence}` - Delete for everyone
 * - `DELETE /api/v1/conversations/{conversation_id}/messages/{sequence}/self` - Delete for the caller
 * - `POST /api/v1/conversations/{conversation_id}/read` - Advance the read marker
 *
 * ## Delivery & Presence
 * - `GET /api/v1/chat/pending` - Queued deliveries of the caller
 * - `GET /api/v1/users/{user_id}/status` - Presence status
 *
 * # Authentication
 *
 * Every route here requires a bearer token (header, `token` query parameter
 * or `refresh_token` cookie); handlers take an `AuthenticatedUser`.
 */

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::backend::chat::handlers::{
    create_conversation, delete_message, delete_message_for_self, get_history, get_pending,
    get_user_status, list_conversations, mark_read,
};
use crate::backend::realtime::ws_handler;
use crate::backend::server::state::AppState;

/// Configure API routes
pub fn configure_api_routes(router: Router<AppState>) -> Router<AppState> {
    router
        // Real-time connection
        .route("/api/v1/ws/chat", get(ws_handler))
        // Conversations
        .route(
            "/api/v1/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route(
            "/api/v1/conversations/{conversation_id}/messages",
            get(get_history),
        )
        .route(
            "/api/v1/conversations/{conversation_id}/messages/{sequence}",
            delete(delete_message),
        )
        .route(
            "/api/v1/conversations/{conversation_id}/messages/{sequence}/self",
            delete(delete_message_for_self),
        )
        .route("/api/v1/conversations/{conversation_id}/read", post(mark_read))
        // Delivery queue
        .route("/api/v1/chat/pending", get(get_pending))
        // Presence
        .route("/api/v1/users/{user_id}/status", get(get_user_status))
}
