/**
 * WebSocket Connection Handler
 *
 * One task per connection reads client frames and dispatches them to the
 * chat router; a writer task drains the connection's outbound channel into
 * the socket. Events therefore reach the client in the order they were put
 * on the channel, whoever produced them.
 *
 * # Framing
 *
 * Every frame is a JSON text frame carrying one `ClientEvent` or
 * `ServerEvent`. A text frame that does not decode gets an
 * `invalid_envelope` error and the connection stays open; a binary frame
 * gets the same error and the connection is closed.
 *
 * # Liveness
 *
 * A connection that sends nothing for `idle_timeout_secs` is closed.
 * Clients are told the heartbeat cadence in `hello`.
 */

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;

use crate::backend::auth::Identity;
use crate::backend::chat::ChatRouter;
use crate::backend::error::ChatError;
use crate::backend::middleware::AuthenticatedUser;
use crate::backend::realtime::registry::ConnectionHandle;
use crate::shared::event::{ClientEvent, ServerEvent};

/// Upgrade an authenticated request to a chat connection (GET /api/v1/ws/chat)
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(router): State<Arc<ChatRouter>>,
    AuthenticatedUser(identity): AuthenticatedUser,
) -> Response {
    tracing::info!("[Socket] Upgrade requested by {}", identity.user_id);
    ws.on_upgrade(move |socket| run_connection(socket, router, identity))
}

/// Serve one connection until the client leaves or goes idle
pub async fn run_connection(socket: WebSocket, router: Arc<ChatRouter>, identity: Identity) {
    let (mut sink, mut stream) = socket.split();
    let (handle, mut outbound) = router.connect(identity).await;
    let connection_id = handle.id;

    let writer = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let frame = match serde_json::to_string(&event) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!("[Socket] Could not encode {}: {}", event.kind(), e);
                    continue;
                }
            };
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let idle = router.config().idle_timeout();
    loop {
        let frame = match tokio::time::timeout(idle, stream.next()).await {
            Err(_) => {
                tracing::info!("[Socket] Connection {} idle, closing", connection_id);
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                tracing::debug!("[Socket] Read error on {}: {}", connection_id, e);
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => handle_text(&router, &handle, text.as_str()).await,
            Message::Binary(_) => {
                let error = ChatError::InvalidEnvelope {
                    reason: "binary frames are not supported".to_string(),
                };
                let _ = handle.send(ServerEvent::from(&error)).await;
                break;
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    router.disconnect(connection_id).await;
    drop(handle);
    let _ = writer.await;
    tracing::info!("[Socket] Connection {} of {} closed", connection_id, identity.user_id);
}

async fn handle_text(router: &ChatRouter, handle: &ConnectionHandle, text: &str) {
    let result = match ClientEvent::parse(text) {
        Ok(event) => router.dispatch(handle, event).await,
        Err(e) => Err(ChatError::from(e)),
    };

    if let Err(error) = result {
        if error.is_user_error() {
            tracing::debug!("[Socket] Rejected event on {}: {}", handle.id, error);
        } else {
            tracing::warn!("[Socket] Event on {} failed: {}", handle.id, error);
        }
        let _ = handle.send(ServerEvent::from(&error)).await;
    }
}
