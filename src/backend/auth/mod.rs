//! Authentication Module
//!
//! The chat core does not issue identities. It consumes a verified user id
//! (plus a moderator flag) through the `Authenticator` trait, attached to
//! each connection when it is accepted.
//!
//! # Module Structure
//!
//! ```text
//! auth/
//! ├── mod.rs       - Identity, AuthError, Authenticator
//! └── sessions.rs  - JWT (HS256) authenticator and token issuing
//! ```
//!
//! # Token Sources
//!
//! Handled by `backend::middleware::auth`, in this order:
//!
//! 1. `Authorization: Bearer <token>` header
//! 2. `token` query parameter (browsers cannot set headers on a WebSocket upgrade)
//! 3. `refresh_token` cookie

use thiserror::Error;

use crate::shared::messaging::UserId;

/// JWT token generation and validation
pub mod sessions;

pub use sessions::{Claims, JwtAuthenticator};

/// Verified identity of a connection or request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    /// May delete messages of other senders
    pub moderator: bool,
}

impl Identity {
    pub fn user(user_id: UserId) -> Self {
        Self {
            user_id,
            moderator: false,
        }
    }

    pub fn moderator(user_id: UserId) -> Self {
        Self {
            user_id,
            moderator: true,
        }
    }
}

/// Authentication failures
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing credentials")]
    MissingCredentials,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("invalid subject in token: {0}")]
    InvalidSubject(String),
}

/// Turns a bearer token into a verified identity
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Result<Identity, AuthError>;
}
