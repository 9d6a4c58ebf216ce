/**
 * Router Configuration
 *
 * Combines all route configurations into a single axum router.
 *
 * # Route Order
 *
 * 1. API routes (WebSocket upgrade included)
 * 2. Health check
 * 3. Fallback handler (404)
 *
 * Every request is traced through `tower_http::trace::TraceLayer`.
 */

use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::backend::chat::ChatRouter;
use crate::backend::routes::api_routes::configure_api_routes;
use crate::backend::server::state::AppState;

/// Create the axum router with all routes configured
pub fn create_router(app_state: AppState) -> Router<()> {
    let router = configure_api_routes(Router::new());

    let router = router.route("/health", get(health));

    let router = router.fallback(|| async { (axum::http::StatusCode::NOT_FOUND, "404 Not Found") });

    router.layer(TraceLayer::new_for_http()).with_state(app_state)
}

/// Liveness check (GET /health)
async fn health(State(router): State<Arc<ChatRouter>>) -> Json<Value> {
    let registry = router.registry();
    Json(json!({
        "status": "ok",
        "connections": registry.total_connections(),
        "users": registry.connected_users().len(),
    }))
}
