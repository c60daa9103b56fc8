//! Delays observed between attempts.

use api_resilience::retry::{
    CircuitBreakerConfig, ExponentialBackoff, FixedInterval, FnInterval, RetryConfig,
    RetryManager,
};
use api_resilience::{ApiError, HttpMethod, RequestContext};
use std::sync::{Arc, Mutex};
use std::time::Duration;

async fn record_delays(builder: api_resilience::retry::RetryManagerBuilder) -> Vec<Duration> {
    let delays = Arc::new(Mutex::new(Vec::new()));
    let d = Arc::clone(&delays);

    let manager = builder
        .on_retry(move |_, _, delay| d.lock().unwrap().push(delay))
        .build();

    let _ = manager
        .execute(
            || async { Err::<(), _>(ApiError::network("down")) },
            &RequestContext::new("/slow", HttpMethod::Get),
        )
        .await;

    let recorded = delays.lock().unwrap().clone();
    recorded
}

fn retry(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        ..RetryConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn fixed_interval_delays_are_constant() {
    let delays = record_delays(
        RetryManager::builder()
            .retry_config(retry(4))
            .backoff(FixedInterval::new(Duration::from_millis(100))),
    )
    .await;

    assert_eq!(delays, vec![Duration::from_millis(100); 3]);
}

#[tokio::test(start_paused = true)]
async fn exponential_delays_double_up_to_the_cap() {
    let delays = record_delays(
        RetryManager::builder()
            .retry_config(retry(5))
            .circuit_breaker_config(CircuitBreakerConfig {
                enabled: false,
                ..CircuitBreakerConfig::default()
            })
            .backoff(
                ExponentialBackoff::new(Duration::from_millis(100))
                    .multiplier(2.0)
                    .max_interval(Duration::from_millis(300)),
            ),
    )
    .await;

    assert_eq!(
        delays,
        vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(300),
            Duration::from_millis(300),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn default_backoff_follows_config_with_jitter() {
    let delays = record_delays(RetryManager::builder().retry_config(RetryConfig {
        max_attempts: 3,
        initial_delay_ms: 1000,
        jitter_factor: 0.1,
        ..RetryConfig::default()
    }))
    .await;

    assert_eq!(delays.len(), 2);
    assert!(delays[0] >= Duration::from_millis(900) && delays[0] <= Duration::from_millis(1100));
    assert!(delays[1] >= Duration::from_millis(1800) && delays[1] <= Duration::from_millis(2200));
}

#[tokio::test(start_paused = true)]
async fn custom_interval_function_receives_retry_index() {
    let delays = record_delays(
        RetryManager::builder()
            .retry_config(retry(4))
            .backoff(FnInterval::new(|retry| Duration::from_millis(10 * u64::from(retry + 1)))),
    )
    .await;

    assert_eq!(
        delays,
        vec![
            Duration::from_millis(10),
            Duration::from_millis(20),
            Duration::from_millis(30),
        ]
    );
}
