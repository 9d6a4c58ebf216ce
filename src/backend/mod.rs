//! Backend Module
//!
//! All server-side code of xfchat. Only compiled when the `ssr` feature is
//! enabled.
//!
//! # Architecture
//!
//! - **`server`** - Server initialization, application state, configuration
//! - **`routes`** - HTTP route configuration and router assembly
//! - **`chat`** - Sequencer, Chat Router, Reconciliation, HTTP handlers
//! - **`realtime`** - Connection Registry and the WebSocket handler
//! - **`presence`** - Presence Store over Redis or memory
//! - **`delivery`** - Delivery Queue for unreachable recipients
//! - **`storage`** - Durable conversations and messages
//! - **`auth`** - Bearer token verification
//! - **`middleware`** - Request extractors
//! - **`error`** - Chat error types and conversions
//!
//! # Module Structure
//!
//! ```text
//! backend/
//! ├── mod.rs      - Module exports and documentation
//! ├── main.rs     - Server binary
//! ├── server/     - Server initialization and state
//! ├── routes/     - Route configuration
//! ├── chat/       - Chat core
//! ├── realtime/   - Live connections
//! ├── presence/   - Presence tracking
//! ├── delivery/   - Delivery queue
//! ├── storage/    - Persistence
//! ├── auth/       - Authentication
//! ├── middleware/ - Request extractors
//! └── error/      - Error types
//! ```
//!
//! # Request Flow
//!
//! A client frame arrives on the connection task in `realtime::socket`, is
//! decoded into a `ClientEvent` and handed to `ChatRouter::dispatch`. The
//! router takes the conversation's sequence guard, persists through
//! `ChatStorage`, and fans the result out through the `ConnectionRegistry`,
//! queueing it in the `DeliveryQueue` for anyone it cannot reach.

/// Server setup and configuration
#[cfg(feature = "ssr")]
pub mod server;

/// Route configuration
#[cfg(feature = "ssr")]
pub mod routes;

/// Chat core
#[cfg(feature = "ssr")]
pub mod chat;

/// Live connections
#[cfg(feature = "ssr")]
pub mod realtime;

/// Presence tracking
#[cfg(feature = "ssr")]
pub mod presence;

/// Delivery queue
#[cfg(feature = "ssr")]
pub mod delivery;

/// Conversation and message storage
#[cfg(feature = "ssr")]
pub mod storage;

/// Backend error types
#[cfg(feature = "ssr")]
pub mod error;

/// Authentication
#[cfg(feature = "ssr")]
pub mod auth;

/// Middleware for request processing
#[cfg(feature = "ssr")]
pub mod middleware;

/// Re-export commonly used types
#[cfg(feature = "ssr")]
pub use chat::ChatRouter;
#[cfg(feature = "ssr")]
pub use error::ChatError;
#[cfg(feature = "ssr")]
pub use server::{create_app, AppState};
