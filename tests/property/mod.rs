//! Property-based tests
//!
//! Uses proptest to generate random inputs and verify invariants of the
//! delivery queue and the message state machine

pub mod message_proptest;
pub mod queue_proptest;
