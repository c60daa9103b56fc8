use crate::config::RetryConfig;
use rand::Rng;
use std::time::Duration;

/// Abstraction for computing retry intervals.
///
/// This trait allows for flexible backoff strategies including fixed delays,
/// exponential backoff, randomized backoff, and custom implementations.
pub trait IntervalFunction: Send + Sync {
    /// Computes the delay before the next retry attempt.
    ///
    /// # Arguments
    /// * `retry` - The retry number (0-indexed, so the delay before the
    ///   second attempt is `next_interval(0)`)
    fn next_interval(&self, retry: u32) -> Duration;
}

/// Fixed interval backoff - returns the same duration for every retry.
#[derive(Debug, Clone)]
pub struct FixedInterval {
    duration: Duration,
}

impl FixedInterval {
    /// Creates a new fixed interval backoff.
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

impl IntervalFunction for FixedInterval {
    fn next_interval(&self, _retry: u32) -> Duration {
        self.duration
    }
}

/// Exponential backoff with configurable multiplier.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial_interval: Duration,
    multiplier: f64,
    max_interval: Option<Duration>,
}

impl ExponentialBackoff {
    /// Creates a new exponential backoff with default multiplier of 2.0.
    pub fn new(initial_interval: Duration) -> Self {
        Self {
            initial_interval,
            multiplier: 2.0,
            max_interval: None,
        }
    }

    /// Sets the multiplier for exponential growth.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets the maximum interval to cap exponential growth.
    pub fn max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = Some(max_interval);
        self
    }
}

fn grow(initial: Duration, multiplier: f64, retry: u32, max: Option<Duration>) -> Duration {
    let factor = multiplier.powi(retry.min(i32::MAX as u32) as i32);
    let nanos = initial.as_nanos() as f64 * factor;
    let interval = if nanos.is_finite() && nanos < u64::MAX as f64 {
        Duration::from_nanos(nanos.max(0.0).round() as u64)
    } else {
        Duration::MAX
    };
    match max {
        Some(max) => interval.min(max),
        None => interval,
    }
}

impl IntervalFunction for ExponentialBackoff {
    fn next_interval(&self, retry: u32) -> Duration {
        grow(
            self.initial_interval,
            self.multiplier,
            retry,
            self.max_interval,
        )
    }
}

/// Exponential backoff with jitter to prevent thundering herd.
///
/// The capped exponential interval is scaled by a random factor in
/// `[1 - jitter, 1 + jitter]` and clamped back into `[0, max_interval]`.
#[derive(Debug, Clone)]
pub struct ExponentialRandomBackoff {
    initial_interval: Duration,
    multiplier: f64,
    jitter_factor: f64,
    max_interval: Option<Duration>,
}

impl ExponentialRandomBackoff {
    /// Creates a new exponential random backoff.
    ///
    /// # Arguments
    /// * `initial_interval` - The base interval
    /// * `jitter_factor` - Factor for randomization (0.0 to 1.0).
    ///   A factor of 0.1 means the interval lands between 90% and 110% of
    ///   the calculated value.
    pub fn new(initial_interval: Duration, jitter_factor: f64) -> Self {
        Self {
            initial_interval,
            multiplier: 2.0,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
            max_interval: None,
        }
    }

    /// Builds the default strategy described by a [`RetryConfig`].
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.initial_delay(), config.jitter_factor)
            .multiplier(config.backoff_multiplier)
            .max_interval(config.max_delay())
    }

    /// Sets the multiplier for exponential growth.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets the maximum interval to cap exponential growth.
    pub fn max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = Some(max_interval);
        self
    }

    fn randomize(&self, duration: Duration) -> Duration {
        if self.jitter_factor == 0.0 || duration.is_zero() {
            return duration;
        }
        let base = duration.as_nanos() as f64;
        let delta = base * self.jitter_factor;
        let randomized = rand::rng().random_range((base - delta)..=(base + delta));
        let randomized = if randomized < u64::MAX as f64 {
            Duration::from_nanos(randomized.max(0.0).round() as u64)
        } else {
            Duration::MAX
        };
        match self.max_interval {
            Some(max) => randomized.min(max),
            None => randomized,
        }
    }
}

impl IntervalFunction for ExponentialRandomBackoff {
    fn next_interval(&self, retry: u32) -> Duration {
        let capped = grow(
            self.initial_interval,
            self.multiplier,
            retry,
            self.max_interval,
        );
        self.randomize(capped)
    }
}

/// Function-based interval implementation.
pub struct FnInterval<F> {
    f: F,
}

impl<F> FnInterval<F>
where
    F: Fn(u32) -> Duration + Send + Sync,
{
    /// Creates a new function-based interval.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> IntervalFunction for FnInterval<F>
where
    F: Fn(u32) -> Duration + Send + Sync,
{
    fn next_interval(&self, retry: u32) -> Duration {
        (self.f)(retry)
    }
}
