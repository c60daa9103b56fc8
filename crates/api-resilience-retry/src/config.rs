use api_resilience_core::ApiError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry behaviour for [`RetryManager`](crate::RetryManager).
///
/// Defaults:
/// - enabled: true
/// - max_attempts: 3 (the first call plus two retries)
/// - initial_delay_ms: 1000, max_delay_ms: 30000
/// - backoff_multiplier: 2.0, jitter_factor: 0.1
/// - retryable_status_codes: 408, 429, 500, 502, 503, 504
/// - retryable_errors: `NETWORK_ERROR`, `TIMEOUT_ERROR`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Random spread applied to each delay, as a fraction of the delay.
    pub jitter_factor: f64,
    pub retryable_status_codes: Vec<u16>,
    /// Error codes (see [`ErrorCode::as_str`](api_resilience_core::ErrorCode::as_str))
    /// that are retried in addition to network and timeout errors.
    pub retryable_errors: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            retryable_status_codes: vec![408, 429, 500, 502, 503, 504],
            retryable_errors: vec!["NETWORK_ERROR".to_string(), "TIMEOUT_ERROR".to_string()],
        }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Returns true if `error` may succeed on another attempt.
    ///
    /// Network and timeout errors always qualify, HTTP errors qualify by
    /// status, and every other kind qualifies when its code is listed in
    /// `retryable_errors`.
    pub fn is_retryable(&self, error: &ApiError) -> bool {
        match error {
            ApiError::Network { .. } | ApiError::Timeout { .. } => true,
            ApiError::Http(http) => self.retryable_status_codes.contains(&http.status),
            other => {
                let code = other.code();
                self.retryable_errors.iter().any(|c| c == code.as_str())
            }
        }
    }
}

/// Circuit breaker thresholds, shared by every key of one manager.
///
/// Defaults:
/// - enabled: true
/// - failure_threshold: 5
/// - recovery_timeout_ms: 30000
/// - monitoring_window_ms: 60000
/// - minimum_request_threshold: 5
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    /// Failures within one window that open the circuit.
    pub failure_threshold: u32,
    /// Time an open circuit waits before admitting a trial call.
    pub recovery_timeout_ms: u64,
    /// Length of the counting window in the closed state.
    pub monitoring_window_ms: u64,
    /// Calls a window must see before the failure threshold is evaluated.
    pub minimum_request_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
            monitoring_window_ms: 60_000,
            minimum_request_threshold: 5,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    pub fn monitoring_window(&self) -> Duration {
        Duration::from_millis(self.monitoring_window_ms)
    }
}
