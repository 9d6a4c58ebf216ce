//! Real-time Connection Module
//!
//! Live client connections over WebSocket.
//!
//! # Architecture
//!
//! - **`registry`** - Live connections per user and their presence coupling
//! - **`socket`** - WebSocket upgrade, read loop and writer task
//!
//! # Module Structure
//!
//! ```text
//! realtime/
//! ├── mod.rs      - Module exports and documentation
//! ├── registry.rs - Connection Registry
//! └── socket.rs   - WebSocket handler
//! ```

/// Connection registry
pub mod registry;

/// WebSocket handler
pub mod socket;

pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, DeliveryError, PresenceTransition};
pub use socket::{run_connection, ws_handler};
