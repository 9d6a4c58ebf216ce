//! Backend Error Module
//!
//! Error types of the chat core and their conversions.
//!
//! # Architecture
//!
//! - **`types`** - `ChatError` and its mapping from storage failures
//! - **`conversion`** - `IntoResponse` and `ServerEvent` conversions
//!
//! Storage, presence and auth keep their own error enums
//! (`StorageError`, `PresenceError`, `AuthError`) next to the code that
//! raises them; `ChatError` is what crosses the router boundary.

/// Error type definitions
pub mod types;

/// Error conversion implementations
pub mod conversion;

// Re-export commonly used types
pub use types::ChatError;
