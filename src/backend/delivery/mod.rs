//! Delivery Module
//!
//! Store-and-forward for recipients that no live connection reached.

pub mod queue;

pub use queue::{DeliveryQueue, Drain};
