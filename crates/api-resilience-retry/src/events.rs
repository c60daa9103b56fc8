use api_resilience_core::events::ResilienceEvent;
use api_resilience_core::CircuitState;
use std::time::{Duration, Instant};

/// Events emitted by the retry loop.
///
/// `key` is the circuit key (`"<endpoint>:<method>"`) of the call.
#[derive(Debug, Clone)]
pub enum RetryEvent {
    /// A retry attempt is about to be made.
    Retry {
        name: String,
        key: String,
        timestamp: Instant,
        /// The attempt that will run after the delay (1-indexed).
        attempt: u32,
        delay: Duration,
    },
    /// The operation succeeded (either on first try or after retries).
    Success {
        name: String,
        key: String,
        timestamp: Instant,
        attempts: u32,
    },
    /// The operation failed after exhausting all retry attempts.
    Exhausted {
        name: String,
        key: String,
        timestamp: Instant,
        attempts: u32,
    },
    /// An error occurred but was not retried.
    IgnoredError {
        name: String,
        key: String,
        timestamp: Instant,
        attempt: u32,
    },
}

impl ResilienceEvent for RetryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RetryEvent::Retry { .. } => "retry",
            RetryEvent::Success { .. } => "success",
            RetryEvent::Exhausted { .. } => "exhausted",
            RetryEvent::IgnoredError { .. } => "ignored_error",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            RetryEvent::Retry { timestamp, .. }
            | RetryEvent::Success { timestamp, .. }
            | RetryEvent::Exhausted { timestamp, .. }
            | RetryEvent::IgnoredError { timestamp, .. } => *timestamp,
        }
    }

    fn source_name(&self) -> &str {
        match self {
            RetryEvent::Retry { name, .. }
            | RetryEvent::Success { name, .. }
            | RetryEvent::Exhausted { name, .. }
            | RetryEvent::IgnoredError { name, .. } => name,
        }
    }
}

/// Events emitted by the per-key circuit breakers.
#[derive(Debug, Clone)]
pub enum CircuitBreakerEvent {
    /// A call was permitted through the circuit breaker.
    CallPermitted {
        name: String,
        key: String,
        timestamp: Instant,
        state: CircuitState,
    },
    /// A call was rejected because the circuit is open or a trial is running.
    CallRejected {
        name: String,
        key: String,
        timestamp: Instant,
        next_retry_time: u64,
    },
    /// The circuit breaker transitioned between states.
    StateTransition {
        name: String,
        key: String,
        timestamp: Instant,
        from_state: CircuitState,
        to_state: CircuitState,
    },
    /// A successful call was recorded.
    SuccessRecorded {
        name: String,
        key: String,
        timestamp: Instant,
        state: CircuitState,
    },
    /// A failed call was recorded.
    FailureRecorded {
        name: String,
        key: String,
        timestamp: Instant,
        state: CircuitState,
    },
}

impl CircuitBreakerEvent {
    /// Circuit key the event belongs to.
    pub fn key(&self) -> &str {
        match self {
            CircuitBreakerEvent::CallPermitted { key, .. }
            | CircuitBreakerEvent::CallRejected { key, .. }
            | CircuitBreakerEvent::StateTransition { key, .. }
            | CircuitBreakerEvent::SuccessRecorded { key, .. }
            | CircuitBreakerEvent::FailureRecorded { key, .. } => key,
        }
    }
}

impl ResilienceEvent for CircuitBreakerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CircuitBreakerEvent::CallPermitted { .. } => "call_permitted",
            CircuitBreakerEvent::CallRejected { .. } => "call_rejected",
            CircuitBreakerEvent::StateTransition { .. } => "state_transition",
            CircuitBreakerEvent::SuccessRecorded { .. } => "success_recorded",
            CircuitBreakerEvent::FailureRecorded { .. } => "failure_recorded",
        }
    }

    fn timestamp(&self) -> Instant {
        match self {
            CircuitBreakerEvent::CallPermitted { timestamp, .. }
            | CircuitBreakerEvent::CallRejected { timestamp, .. }
            | CircuitBreakerEvent::StateTransition { timestamp, .. }
            | CircuitBreakerEvent::SuccessRecorded { timestamp, .. }
            | CircuitBreakerEvent::FailureRecorded { timestamp, .. } => *timestamp,
        }
    }

    fn source_name(&self) -> &str {
        match self {
            CircuitBreakerEvent::CallPermitted { name, .. }
            | CircuitBreakerEvent::CallRejected { name, .. }
            | CircuitBreakerEvent::StateTransition { name, .. }
            | CircuitBreakerEvent::SuccessRecorded { name, .. }
            | CircuitBreakerEvent::FailureRecorded { name, .. } => name,
        }
    }
}
