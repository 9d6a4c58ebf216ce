//! xfchat - Real-time Chat Delivery
//!
//! Server-side delivery core for one-to-one and small-group chat: every
//! message gets a gap-free per-conversation sequence, is persisted before it
//! is fanned out, and reaches recipients either live over WebSocket or
//! through the delivery queue and reconciliation when they come back.
//!
//! # Module Structure
//!
//! - **`shared`** - Types meaningful on both ends of a connection
//!   - Conversations, messages and message references
//!   - Wire envelopes (`ClientEvent`, `ServerEvent`)
//!   - Configuration and shared errors
//!
//! - **`backend`** - Server-side code (only compiled with the `ssr` feature)
//!   - Sequencer, Chat Router and Reconciliation
//!   - Connection Registry and Presence Store
//!   - Delivery Queue
//!   - Storage (PostgreSQL or in-memory), JWT auth, axum server
//!
//! # Feature Flags
//!
//! - **`ssr`** (default) - Enables the backend: axum, sqlx, redis,
//!   jsonwebtoken and the server binary
//!
//! # Usage
//!
//! ```rust,no_run
//! use xfchat::backend::server::{config::load_config, create_app};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config()?;
//! let bind_address = config.bind_address.clone();
//! let app = create_app(config).await;
//! let listener = tokio::net::TcpListener::bind(bind_address).await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Ordering and Delivery
//!
//! - Messages of one conversation are seen by every participant in one
//!   order, the order of their sequence numbers
//! - A sequence is never reused; a message that could not be stored leaves
//!   a tombstone in its place
//! - Delivery is at-least-once: clients deduplicate by
//!   `(conversation_id, sequence)`

/// Shared types and data structures
pub mod shared;

/// Backend server-side code
#[cfg(feature = "ssr")]
pub mod backend;
