//! Property tests for backoff intervals.
//!
//! Invariants tested:
//! - Jittered delays stay within the jitter band of the base delay
//! - Delays never exceed the configured maximum
//! - Un-jittered delays never decrease as retries grow

use api_resilience::retry::{
    ExponentialBackoff, ExponentialRandomBackoff, IntervalFunction, RetryConfig,
};
use proptest::prelude::*;
use std::time::Duration;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    /// Property: the first delay is within `initial * (1 ± jitter)`
    #[test]
    fn first_delay_within_jitter_band(
        initial_ms in 1u64..=5_000,
        jitter in 0.0f64..=0.5,
    ) {
        let backoff = ExponentialRandomBackoff::new(Duration::from_millis(initial_ms), jitter);
        let delay = backoff.next_interval(0).as_secs_f64() * 1000.0;
        let low = initial_ms as f64 * (1.0 - jitter) - 1.0;
        let high = initial_ms as f64 * (1.0 + jitter) + 1.0;
        prop_assert!(delay >= low && delay <= high, "delay {delay} outside [{low}, {high}]");
    }

    /// Property: delays derived from a config never exceed max_delay
    #[test]
    fn delays_never_exceed_max(
        initial_ms in 1u64..=2_000,
        max_ms in 1u64..=30_000,
        multiplier in 1.0f64..=4.0,
        jitter in 0.0f64..=1.0,
        retry in 0u32..=40,
    ) {
        let config = RetryConfig {
            initial_delay_ms: initial_ms,
            max_delay_ms: max_ms,
            backoff_multiplier: multiplier,
            jitter_factor: jitter,
            ..RetryConfig::default()
        };
        let delay = ExponentialRandomBackoff::from_config(&config).next_interval(retry);
        prop_assert!(delay <= Duration::from_millis(max_ms));
    }

    /// Property: without jitter, each delay is at least the previous one
    #[test]
    fn plain_exponential_is_monotonic(
        initial_ms in 1u64..=1_000,
        multiplier in 1.0f64..=3.0,
        max_ms in 1u64..=60_000,
    ) {
        let backoff = ExponentialBackoff::new(Duration::from_millis(initial_ms))
            .multiplier(multiplier)
            .max_interval(Duration::from_millis(max_ms));
        let mut previous = Duration::ZERO;
        for retry in 0..20 {
            let delay = backoff.next_interval(retry);
            prop_assert!(delay >= previous);
            prop_assert!(delay <= Duration::from_millis(max_ms));
            previous = delay;
        }
    }
}
