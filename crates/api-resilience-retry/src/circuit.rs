//! Per-key circuit breaker state machine.
//!
//! `Circuit` holds no clock and emits nothing. Callers pass the current
//! epoch-millisecond time in and receive the resulting [`Transition`], so
//! the manager can emit events and persist snapshots after releasing its
//! lock.

use crate::config::CircuitBreakerConfig;
use api_resilience_core::clock::millis_after;
use api_resilience_core::{CircuitBreakerStats, CircuitState};

/// A state change produced by a circuit operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Transition {
    pub from: CircuitState,
    pub to: CircuitState,
}

/// Outcome of asking a circuit for permission to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// The call may proceed. `trial` marks the single half-open probe.
    Permitted {
        trial: bool,
        transition: Option<Transition>,
    },
    /// The call must fail fast.
    Rejected { next_retry_time: u64 },
}

#[derive(Debug, Clone)]
pub(crate) struct Circuit {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    window_start: u64,
    last_failure_time: Option<u64>,
    next_retry_time: Option<u64>,
    trial_in_flight: bool,
}

impl Circuit {
    pub fn new(now: u64) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            window_start: now,
            last_failure_time: None,
            next_retry_time: None,
            trial_in_flight: false,
        }
    }

    /// Rebuilds a circuit from a persisted snapshot.
    ///
    /// A restored half-open circuit has no trial in flight, so the next call
    /// becomes the probe.
    pub fn from_stats(stats: &CircuitBreakerStats, now: u64) -> Self {
        Self {
            state: stats.state,
            failure_count: stats.failure_count,
            success_count: stats.success_count,
            window_start: now,
            last_failure_time: stats.last_failure_time,
            next_retry_time: stats.next_retry_time,
            trial_in_flight: false,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            state: self.state,
            failure_count: self.failure_count,
            success_count: self.success_count,
            total_requests: self.failure_count.saturating_add(self.success_count),
            last_failure_time: self.last_failure_time,
            next_retry_time: self.next_retry_time,
            persisted_at: None,
        }
    }

    pub fn try_acquire(&mut self, config: &CircuitBreakerConfig, now: u64) -> Admission {
        match self.state {
            CircuitState::Closed => {
                self.roll_window(config, now);
                Admission::Permitted {
                    trial: false,
                    transition: None,
                }
            }
            CircuitState::Open => {
                let next_retry_time = self.next_retry_time.unwrap_or(now);
                if now >= next_retry_time {
                    let transition = self.transition_to(CircuitState::HalfOpen, config, now);
                    self.trial_in_flight = true;
                    Admission::Permitted {
                        trial: true,
                        transition,
                    }
                } else {
                    Admission::Rejected { next_retry_time }
                }
            }
            CircuitState::HalfOpen => {
                if self.trial_in_flight {
                    // The trial decides the next state; a failed trial
                    // reopens for a full recovery timeout.
                    Admission::Rejected {
                        next_retry_time: millis_after(now, config.recovery_timeout()),
                    }
                } else {
                    self.trial_in_flight = true;
                    Admission::Permitted {
                        trial: true,
                        transition: None,
                    }
                }
            }
        }
    }

    /// Frees the half-open trial slot without recording an outcome.
    pub fn abandon_trial(&mut self) {
        if self.state == CircuitState::HalfOpen {
            self.trial_in_flight = false;
        }
    }

    pub fn record_success(
        &mut self,
        config: &CircuitBreakerConfig,
        trial: bool,
        now: u64,
    ) -> Option<Transition> {
        match self.state {
            CircuitState::HalfOpen if trial => {
                self.trial_in_flight = false;
                self.transition_to(CircuitState::Closed, config, now)
            }
            CircuitState::Closed => {
                self.roll_window(config, now);
                self.success_count = self.success_count.saturating_add(1);
                None
            }
            // Outcome of a call admitted before the circuit opened.
            _ => None,
        }
    }

    pub fn record_failure(
        &mut self,
        config: &CircuitBreakerConfig,
        trial: bool,
        now: u64,
    ) -> Option<Transition> {
        match self.state {
            CircuitState::HalfOpen if trial => {
                self.last_failure_time = Some(now);
                self.trial_in_flight = false;
                self.failure_count = self.failure_count.saturating_add(1);
                self.transition_to(CircuitState::Open, config, now)
            }
            CircuitState::Closed => {
                self.roll_window(config, now);
                self.last_failure_time = Some(now);
                self.failure_count = self.failure_count.saturating_add(1);
                let total = self.failure_count.saturating_add(self.success_count);
                if total >= config.minimum_request_threshold
                    && self.failure_count >= config.failure_threshold
                {
                    self.transition_to(CircuitState::Open, config, now)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn roll_window(&mut self, config: &CircuitBreakerConfig, now: u64) {
        if now.saturating_sub(self.window_start) >= config.monitoring_window_ms {
            self.failure_count = 0;
            self.success_count = 0;
            self.window_start = now;
        }
    }

    fn transition_to(
        &mut self,
        state: CircuitState,
        config: &CircuitBreakerConfig,
        now: u64,
    ) -> Option<Transition> {
        if self.state == state {
            return None;
        }
        let from = self.state;
        self.state = state;
        match state {
            CircuitState::Open => {
                self.next_retry_time = Some(millis_after(now, config.recovery_timeout()));
            }
            CircuitState::Closed => {
                self.failure_count = 0;
                self.success_count = 0;
                self.window_start = now;
                self.next_retry_time = None;
            }
            CircuitState::HalfOpen => {}
        }
        Some(Transition { from, to: state })
    }
}
