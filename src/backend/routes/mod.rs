//! Route Configuration Module
//!
//! HTTP and WebSocket routes of the chat server.
//!
//! # Architecture
//!
//! - **`router`** - Main router creation and middleware
//! - **`api_routes`** - Versioned API endpoints and the WebSocket upgrade
//!
//! # Module Structure
//!
//! ```text
//! routes/
//! ├── mod.rs        - Module exports and documentation
//! ├── router.rs     - Main router creation
//! └── api_routes.rs - API endpoint registration
//! ```
//!
//! # Route Types
//!
//! ## Real-time
//!
//! - `GET /api/v1/ws/chat` - WebSocket upgrade (authenticated)
//!
//! ## API Routes
//!
//! - `POST /api/v1/conversations` - Get or create a conversation
//! - `GET /api/v1/conversations/{conversation_id}/messages` - History page
//! - `GET /api/v1/chat/pending` - Queued deliveries of the caller
//! - `GET /api/v1/users/{user_id}/status` - Presence status
//!
//! ## Operational
//!
//! - `GET /health` - Liveness with live connection count

/// Main router creation
pub mod router;

/// API endpoint registration
pub mod api_routes;

pub use router::create_router;
