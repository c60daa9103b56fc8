//! Event system tests for the retry manager.

use api_resilience::retry::{FixedInterval, RetryConfig, RetryEvent, RetryManager};
use api_resilience::{ApiError, HttpMethod, RequestContext};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

fn context() -> RequestContext {
    RequestContext::new("/orders", HttpMethod::Post)
}

fn config() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        ..RetryConfig::default()
    }
}

#[tokio::test]
async fn on_retry_reports_key_and_attempt() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);

    let manager = RetryManager::builder()
        .retry_config(config())
        .backoff(FixedInterval::new(Duration::from_millis(1)))
        .on_retry(move |key, attempt, _| s.lock().unwrap().push((key.to_string(), attempt)))
        .build();

    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    let _ = manager
        .execute(
            move || {
                let c = Arc::clone(&c);
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(ApiError::http(502, "Bad Gateway"))
                    } else {
                        Ok(())
                    }
                }
            },
            &context(),
        )
        .await;

    let seen = seen.lock().unwrap();
    assert_eq!(*seen, vec![("/orders:POST".to_string(), 2)]);
}

#[tokio::test]
async fn on_success_reports_attempts_taken() {
    let attempts = Arc::new(AtomicU32::new(0));
    let a = Arc::clone(&attempts);

    let manager = RetryManager::builder()
        .retry_config(config())
        .backoff(FixedInterval::new(Duration::from_millis(1)))
        .on_success(move |_, n| a.store(n, Ordering::SeqCst))
        .build();

    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    manager
        .execute(
            move || {
                let c = Arc::clone(&c);
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ApiError::timeout(Duration::from_millis(10)))
                    } else {
                        Ok(())
                    }
                }
            },
            &context(),
        )
        .await
        .unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn on_exhausted_and_on_ignored_error_fire_once() {
    let exhausted = Arc::new(AtomicUsize::new(0));
    let ignored = Arc::new(AtomicUsize::new(0));
    let e = Arc::clone(&exhausted);
    let i = Arc::clone(&ignored);

    let manager = RetryManager::builder()
        .retry_config(config())
        .backoff(FixedInterval::new(Duration::from_millis(1)))
        .on_exhausted(move |_, attempts| {
            assert_eq!(attempts, 3);
            e.fetch_add(1, Ordering::SeqCst);
        })
        .on_ignored_error(move |_| {
            i.fetch_add(1, Ordering::SeqCst);
        })
        .build();

    let _ = manager
        .execute(
            || async { Err::<(), _>(ApiError::network("offline")) },
            &context(),
        )
        .await;
    let _ = manager
        .execute(
            || async { Err::<(), _>(ApiError::http(422, "Unprocessable Entity")) },
            &RequestContext::new("/forms", HttpMethod::Put),
        )
        .await;

    assert_eq!(exhausted.load(Ordering::SeqCst), 1);
    assert_eq!(ignored.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn generic_listener_sees_every_event_in_order() {
    let types = Arc::new(Mutex::new(Vec::new()));
    let t = Arc::clone(&types);

    let manager = RetryManager::builder()
        .name("orders")
        .retry_config(config())
        .backoff(FixedInterval::new(Duration::from_millis(1)))
        .retry_listener(move |event| {
            let label = match event {
                RetryEvent::Retry { name, .. } => format!("{name}:retry"),
                RetryEvent::Success { name, .. } => format!("{name}:success"),
                RetryEvent::Exhausted { name, .. } => format!("{name}:exhausted"),
                RetryEvent::IgnoredError { name, .. } => format!("{name}:ignored"),
            };
            t.lock().unwrap().push(label);
        })
        .build();

    let _ = manager
        .execute(
            || async { Err::<(), _>(ApiError::http(503, "Service Unavailable")) },
            &context(),
        )
        .await;

    assert_eq!(
        *types.lock().unwrap(),
        vec!["orders:retry", "orders:retry", "orders:exhausted"]
    );
}

#[tokio::test]
async fn panicking_listener_does_not_break_the_call() {
    let after = Arc::new(AtomicUsize::new(0));
    let a = Arc::clone(&after);

    let manager = RetryManager::builder()
        .retry_config(config())
        .on_success(|_, _| panic!("listener bug"))
        .on_success(move |_, _| {
            a.fetch_add(1, Ordering::SeqCst);
        })
        .build();

    let value = manager
        .execute(|| async { Ok::<_, ApiError>(7) }, &context())
        .await
        .unwrap();

    assert_eq!(value, 7);
    assert_eq!(after.load(Ordering::SeqCst), 1);
}
