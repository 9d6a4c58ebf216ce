//! Middleware Module
//!
//! Request processing shared by the chat routes.
//!
//! - **`auth`** - `AuthenticatedUser` extractor (header, query, or cookie token)

pub mod auth;

pub use auth::{extract_token, AuthenticatedUser};
