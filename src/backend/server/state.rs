/**
 * Application State Management
 *
 * `AppState` is the state handed to the axum router. It is cheap to clone:
 * every field is behind an `Arc`.
 *
 * # State Extraction
 *
 * The `FromRef` implementations let handlers extract just the part they
 * need, e.g. `State(router): State<Arc<ChatRouter>>`.
 */

use axum::extract::FromRef;
use std::sync::Arc;

use crate::backend::auth::Authenticator;
use crate::backend::chat::ChatRouter;
use crate::shared::config::ChatConfig;

/// Shared state of the HTTP/WebSocket server
#[derive(Clone)]
pub struct AppState {
    /// Chat core: sequencing, fan-out, presence and queue
    pub router: Arc<ChatRouter>,

    /// Verifies bearer tokens on every authenticated route
    pub authenticator: Arc<dyn Authenticator>,

    pub config: Arc<ChatConfig>,
}

impl FromRef<AppState> for Arc<ChatRouter> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.router.clone()
    }
}

impl FromRef<AppState> for Arc<dyn Authenticator> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.authenticator.clone()
    }
}

impl FromRef<AppState> for Arc<ChatConfig> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.config.clone()
    }
}
