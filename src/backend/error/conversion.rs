/**
 * Error Conversion
 *
 * Turns chat errors into HTTP responses and into wire events.
 *
 * # Response Format
 *
 * ```json
 * {
 *   "error": "Error message",
 *   "code": "not_participant",
 *   "status": 403
 * }
 * ```
 *
 * # Wire Format
 *
 * `SequenceMismatch` becomes a `resync` event; everything else becomes an
 * `error` event carrying the same code.
 */

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::backend::auth::AuthError;
use crate::backend::error::types::ChatError;
use crate::shared::event::ServerEvent;

fn json_error(status: StatusCode, code: &str, message: String) -> Response {
    let body = serde_json::json!({
        "error": message,
        "code": code,
        "status": status.as_u16(),
    });
    (status, Json(body)).into_response()
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("[Router] Request failed: {}", self);
        }
        json_error(status, self.code(), self.to_string())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        json_error(StatusCode::UNAUTHORIZED, "unauthorized", self.to_string())
    }
}

impl From<&ChatError> for ServerEvent {
    fn from(error: &ChatError) -> Self {
        match error {
            ChatError::SequenceMismatch {
                conversation_id,
                next_sequence,
                ..
            } => ServerEvent::Resync {
                conversation_id: *conversation_id,
                next_sequence: *next_sequence,
            },
            other => ServerEvent::Error {
                code: other.code().to_string(),
                message: other.to_string(),
                conversation_id: other.conversation_id(),
                sequence: other.sequence(),
            },
        }
    }
}
