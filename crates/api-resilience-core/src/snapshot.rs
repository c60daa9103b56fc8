//! Circuit breaker snapshot types.
//!
//! These live in core because they cross three boundaries: the retry
//! manager produces them, persistence backends store them, and
//! [`ApiError::CircuitOpen`](crate::ApiError::CircuitOpen) carries them to callers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the state of a circuit breaker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls pass through and outcomes are counted.
    #[default]
    Closed,
    /// Calls are rejected without reaching the operation.
    Open,
    /// A single trial call is probing for recovery.
    HalfOpen,
}

impl CircuitState {
    /// Stable upper-case label, matching the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of one circuit breaker.
///
/// All timestamps are Unix epoch milliseconds. `total_requests` always
/// equals `failure_count + success_count` for the current monitoring window.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerStats {
    /// Current state.
    pub state: CircuitState,
    /// Failures recorded in the current window.
    pub failure_count: u32,
    /// Successes recorded in the current window.
    pub success_count: u32,
    /// Outcomes recorded in the current window.
    pub total_requests: u32,
    /// When the most recent failure was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_time: Option<u64>,
    /// When an open circuit admits its next trial call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_time: Option<u64>,
    /// When this snapshot was written to a persistence backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persisted_at: Option<u64>,
}

impl CircuitBreakerStats {
    /// Failure rate of the current window (0.0 when no calls were recorded).
    pub fn failure_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            f64::from(self.failure_count) / f64::from(self.total_requests)
        }
    }

    /// Returns true if the snapshot was persisted within `max_age_ms` of `now`.
    pub fn is_fresh(&self, now: u64, max_age_ms: u64) -> bool {
        match self.persisted_at {
            Some(at) => now.saturating_sub(at) < max_age_ms,
            None => false,
        }
    }
}
