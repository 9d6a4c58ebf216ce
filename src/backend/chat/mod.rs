//! Chat Backend Module
//!
//! Server-side chat core: ordering, persistence, fan-out and catch-up.
//!
//! # Architecture
//!
//! - **`sequencer`** - Per-conversation sequence allocation and locking
//! - **`router`** - Send, edit, delete, heartbeat and fan-out
//! - **`reconcile`** - Catch-up for reconnecting clients
//! - **`handlers`** - HTTP endpoints (conversations, history, pending, status)
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use xfchat::backend::auth::Identity;
//! use xfchat::backend::chat::ChatRouter;
//! use xfchat::backend::presence::MemoryPresenceBackend;
//! use xfchat::backend::storage::MemoryStorage;
//! use xfchat::shared::ChatConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let router = ChatRouter::new(
//!     Arc::new(ChatConfig::default()),
//!     Arc::new(MemoryStorage::new()),
//!     Arc::new(MemoryPresenceBackend::new()),
//! );
//! let alice = Identity::user(uuid::Uuid::new_v4());
//! let bob = Identity::user(uuid::Uuid::new_v4());
//! let conversation = router.create_conversation(alice.user_id, vec![bob.user_id]).await?;
//! router.send(alice, conversation.id, "hello").await?;
//! # Ok(())
//! # }
//! ```

/// Per-conversation sequencing
pub mod sequencer;

/// Chat router
pub mod router;

/// Reconciliation
pub mod reconcile;

/// HTTP handlers
pub mod handlers;

pub use reconcile::ReconcileSummary;
pub use router::{ChatRouter, FanOut};
pub use sequencer::{SequenceGuard, Sequencer};
