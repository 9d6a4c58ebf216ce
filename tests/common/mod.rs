//! Common test utilities and helpers
//!
//! This module provides shared utilities for all tests including:
//! - An in-process chat harness with connected test clients
//! - Storage that fails on demand
//! - Token helpers
//! - Custom assertion macros

pub mod assertions;
#[cfg(feature = "ssr")]
pub mod flaky_storage;
#[cfg(feature = "ssr")]
pub mod harness;

// Re-export commonly used utilities
#[cfg(feature = "ssr")]
pub use auth_helpers::*;
#[cfg(feature = "ssr")]
pub use flaky_storage::*;
#[cfg(feature = "ssr")]
pub use harness::*;
