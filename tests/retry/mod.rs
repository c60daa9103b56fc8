//! Tests for the retry manager.
//!
//! Test organization:
//! - retry_behavior.rs: attempt counting, retryability, exhaustion
//! - retry_events.rs: event callbacks and listeners
//! - retry_backoff.rs: delays observed between attempts

mod retry_backoff;
mod retry_behavior;
mod retry_events;
