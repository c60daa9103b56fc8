//! Core retry behavior tests.
//!
//! Tests core retry logic including:
//! - Success on first attempt (no retries)
//! - Success after transient failures
//! - Exhausting all attempts
//! - Stopping on non-retryable errors
//! - Concurrent execution with `execute_all`

use api_resilience::retry::{CircuitBreakerConfig, FixedInterval, RetryConfig, RetryManager};
use api_resilience::{ApiError, HttpMethod, RequestContext};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn manager(max_attempts: u32) -> RetryManager {
    RetryManager::builder()
        .retry_config(RetryConfig {
            max_attempts,
            ..RetryConfig::default()
        })
        .circuit_breaker_config(CircuitBreakerConfig {
            enabled: false,
            ..CircuitBreakerConfig::default()
        })
        .backoff(FixedInterval::new(Duration::from_millis(5)))
        .build()
}

fn context() -> RequestContext {
    RequestContext::new("/users", HttpMethod::Get)
}

#[tokio::test]
async fn success_on_first_attempt_no_retry() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);

    let result = manager(3)
        .execute(
            move || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ApiError>("ok")
                }
            },
            &context(),
        )
        .await;

    assert_eq!(result.unwrap(), "ok");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn server_errors_are_retried_until_success() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);

    let result = manager(3)
        .execute(
            move || {
                let c = Arc::clone(&c);
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ApiError::http(500, "Internal Server Error"))
                    } else {
                        Ok(42)
                    }
                }
            },
            &context(),
        )
        .await;

    assert_eq!(result.unwrap(), 42);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);

    let err = manager(5)
        .execute(
            move || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(ApiError::http(404, "Not Found"))
                }
            },
            &context(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(404));
    assert!(!err.is_retry_exhausted());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn exhausting_attempts_wraps_last_error() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);

    let err = manager(3)
        .execute(
            move || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(ApiError::network("connection reset"))
                }
            },
            &context(),
        )
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    match err {
        ApiError::RetryExhausted {
            source,
            context,
            attempts,
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(context.endpoint, "/users");
            assert!(matches!(*source, ApiError::Network { .. }));
        }
        other => panic!("expected RetryExhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn disabled_retry_makes_a_single_attempt() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);

    let manager = RetryManager::new(
        RetryConfig {
            enabled: false,
            ..RetryConfig::default()
        },
        CircuitBreakerConfig::default(),
    );

    let err = manager
        .execute(
            move || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(ApiError::http(503, "Service Unavailable"))
                }
            },
            &context(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(503));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retryable_error_codes_extend_the_default_set() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);

    let manager = RetryManager::builder()
        .retry_config(RetryConfig {
            max_attempts: 2,
            retryable_errors: vec!["VALIDATION_ERROR".to_string()],
            ..RetryConfig::default()
        })
        .backoff(FixedInterval::new(Duration::from_millis(1)))
        .build();

    let err = manager
        .execute(
            move || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(ApiError::validation("stale form"))
                }
            },
            &context(),
        )
        .await
        .unwrap_err();

    assert!(err.is_retry_exhausted());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn execute_all_preserves_input_order() {
    let manager = manager(2);

    let operations: Vec<_> = (0..4u32)
        .map(|i| {
            let op = move || async move {
                tokio::time::sleep(Duration::from_millis(u64::from(4 - i) * 5)).await;
                if i == 2 {
                    Err(ApiError::http(400, "Bad Request"))
                } else {
                    Ok(i)
                }
            };
            (op, RequestContext::new(format!("/items/{i}"), HttpMethod::Get))
        })
        .collect();

    let results = manager.execute_all(operations).await;

    assert_eq!(results.len(), 4);
    assert_eq!(results[0].as_ref().unwrap(), &0);
    assert_eq!(results[1].as_ref().unwrap(), &1);
    assert_eq!(results[2].as_ref().unwrap_err().status(), Some(400));
    assert_eq!(results[3].as_ref().unwrap(), &3);
}
