//! Wall-clock helpers.
//!
//! Breaker snapshots and cache envelopes outlive the process, so their
//! timestamps are Unix epoch milliseconds rather than [`std::time::Instant`].

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current time as milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Adds a duration to an epoch-millisecond timestamp, saturating on overflow.
pub fn millis_after(base: u64, duration: Duration) -> u64 {
    base.saturating_add(duration.as_millis() as u64)
}
