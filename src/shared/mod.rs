//! Shared Module
//!
//! Types that are meaningful on both sides of a chat connection: the data
//! model, the wire envelopes, configuration, and the errors they can raise.
//! Nothing in here touches the network, storage or the async runtime.

/// Conversations, messages and message references
pub mod messaging;

/// Inbound and outbound wire envelopes
pub mod event;

/// Shared error types
pub mod error;

/// Chat core configuration
pub mod config;

/// Re-export commonly used types for convenience
pub use config::{ChatConfig, ChatConfigBuilder, ConfigError};
pub use error::SharedError;
pub use event::{ClientEvent, DeleteMode, MessageEnvelope, PendingConversation, ServerEvent};
pub use messaging::{Conversation, Message, MessageRef, MessageState};
