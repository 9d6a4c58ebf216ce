//! Presence Module
//!
//! Best-effort online/offline tracking with a TTL.
//!
//! # Module Structure
//!
//! ```text
//! presence/
//! ├── mod.rs      - Module exports
//! ├── backend.rs  - PresenceBackend trait and in-memory backend
//! ├── redis_backend.rs - Redis backend
//! └── store.rs    - PresenceStore (connection counters, last seen)
//! ```

pub mod backend;
pub mod redis_backend;
pub mod store;

pub use backend::{MemoryPresenceBackend, PresenceBackend, PresenceError};
pub use redis_backend::RedisPresenceBackend;
pub use store::{PresenceStatus, PresenceStore};
