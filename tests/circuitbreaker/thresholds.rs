//! Opening rules: failure threshold, minimum request volume and window.

use super::{breaker, builder, fail, succeed};
use api_resilience::retry::CircuitBreakerConfig;
use api_resilience::{ApiError, CircuitState};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[tokio::test]
async fn opens_after_failure_threshold_and_fails_fast() {
    let manager = builder(breaker(3, 2)).build();
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let err = fail(&manager, "/users", &calls).await;
        assert_eq!(err.status(), Some(500));
    }
    assert_eq!(
        manager.circuit_breaker_stats("/users:GET").unwrap().state,
        CircuitState::Open
    );

    let err = fail(&manager, "/users", &calls).await;
    match err {
        ApiError::CircuitOpen {
            key,
            next_retry_time,
            stats,
        } => {
            assert_eq!(key, "/users:GET");
            assert!(next_retry_time > 0);
            assert_eq!(stats.failure_count, 3);
        }
        other => panic!("expected CircuitOpen, got {other:?}"),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3, "rejected call must not run");
}

#[tokio::test]
async fn minimum_request_threshold_delays_opening() {
    let manager = builder(breaker(1, 4)).build();
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        fail(&manager, "/users", &calls).await;
    }
    assert_eq!(
        manager.circuit_breaker_stats("/users:GET").unwrap().state,
        CircuitState::Closed
    );

    fail(&manager, "/users", &calls).await;
    assert_eq!(
        manager.circuit_breaker_stats("/users:GET").unwrap().state,
        CircuitState::Open
    );
}

#[tokio::test]
async fn successes_count_toward_volume_but_not_failures() {
    let manager = builder(breaker(2, 3)).build();
    let calls = Arc::new(AtomicUsize::new(0));

    succeed(&manager, "/users", &calls).await.unwrap();
    fail(&manager, "/users", &calls).await;

    let stats = manager.circuit_breaker_stats("/users:GET").unwrap();
    assert_eq!(stats.success_count, 1);
    assert_eq!(stats.failure_count, 1);
    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.state, CircuitState::Closed);

    fail(&manager, "/users", &calls).await;
    assert_eq!(
        manager.circuit_breaker_stats("/users:GET").unwrap().state,
        CircuitState::Open
    );
}

#[tokio::test]
async fn counters_restart_after_monitoring_window() {
    let manager = builder(CircuitBreakerConfig {
        monitoring_window_ms: 40,
        ..breaker(3, 1)
    })
    .build();
    let calls = Arc::new(AtomicUsize::new(0));

    fail(&manager, "/users", &calls).await;
    fail(&manager, "/users", &calls).await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    fail(&manager, "/users", &calls).await;

    let stats = manager.circuit_breaker_stats("/users:GET").unwrap();
    assert_eq!(stats.state, CircuitState::Closed);
    assert_eq!(stats.failure_count, 1);
}

#[tokio::test]
async fn retry_exhaustion_counts_as_one_failure() {
    use api_resilience::retry::{FixedInterval, RetryConfig};

    let manager = api_resilience::retry::RetryManager::builder()
        .retry_config(RetryConfig {
            max_attempts: 3,
            ..RetryConfig::default()
        })
        .backoff(FixedInterval::new(Duration::from_millis(1)))
        .circuit_breaker_config(breaker(2, 1))
        .build();
    let calls = Arc::new(AtomicUsize::new(0));

    let err = fail(&manager, "/users", &calls).await;
    assert!(err.is_retry_exhausted());
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let stats = manager.circuit_breaker_stats("/users:GET").unwrap();
    assert_eq!(stats.failure_count, 1);
    assert_eq!(stats.state, CircuitState::Closed);
}

#[tokio::test]
async fn disabled_breaker_never_rejects() {
    let manager = builder(CircuitBreakerConfig {
        enabled: false,
        ..breaker(1, 1)
    })
    .build();
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..10 {
        let err = fail(&manager, "/users", &calls).await;
        assert!(!err.is_circuit_open());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 10);
    assert!(manager.circuit_breaker_stats("/users:GET").is_none());
}
