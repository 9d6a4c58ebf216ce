/**
 * Server Initialization
 *
 * Builds the application state and the axum router.
 *
 * # Initialization Process
 *
 * 1. Connect storage and the presence backend (falling back to memory)
 * 2. Create the chat router and start its background tasks
 * 3. Create the authenticator
 * 4. Configure routes and middleware
 */

use axum::Router;
use std::sync::Arc;

use crate::backend::auth::JwtAuthenticator;
use crate::backend::chat::ChatRouter;
use crate::backend::presence::PresenceBackend;
use crate::backend::routes::router::create_router;
use crate::backend::server::config::{load_presence_backend, load_storage};
use crate::backend::server::state::AppState;
use crate::backend::storage::ChatStorage;
use crate::shared::config::ChatConfig;

/// Create and configure the axum application
pub async fn create_app(config: ChatConfig) -> Router<()> {
    tracing::info!("[Startup] Initializing xfchat backend");

    let storage = load_storage(&config).await;
    let presence_backend = load_presence_backend(&config).await;
    let state = build_state_with(config, storage, presence_backend);

    state.router.start();
    tracing::info!("[Startup] Router configured with background maintenance");

    create_router(state)
}

/// Assemble the state from already-connected services
pub fn build_state_with(
    config: ChatConfig,
    storage: Arc<dyn ChatStorage>,
    presence_backend: Arc<dyn PresenceBackend>,
) -> AppState {
    let config = Arc::new(config);
    let authenticator = Arc::new(JwtAuthenticator::new(&config.jwt_secret));
    let router = Arc::new(ChatRouter::new(config.clone(), storage, presence_backend));

    AppState {
        router,
        authenticator,
        config,
    }
}
