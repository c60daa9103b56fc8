//! Retries, breakers and breaker persistence through the client.

use super::transport;
use api_resilience::retry::{FixedInterval, MemoryPersistence, RetryManager};
use api_resilience::{CircuitState, RequestOptions, ResilienceConfig, ResilientClient};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn config() -> ResilienceConfig {
    let mut config = ResilienceConfig::from_json(
        r#"{
            "retry": { "max_attempts": 2, "initial_delay_ms": 1, "max_delay_ms": 2 },
            "circuit_breaker": { "failure_threshold": 2, "minimum_request_threshold": 1, "recovery_timeout_ms": 60000 }
        }"#,
    )
    .unwrap();
    config.cache.enabled = false;
    config
}

#[tokio::test]
async fn open_breakers_are_restored_by_a_new_client() {
    let persistence = MemoryPersistence::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let first = ResilientClient::builder(transport(Arc::clone(&calls), Some(503)))
        .config(config())
        .persistence(persistence.clone())
        .build()
        .unwrap();
    for _ in 0..2 {
        let err = first.execute("/billing", RequestOptions::get()).await.unwrap_err();
        assert!(err.is_retry_exhausted());
    }
    assert!(first
        .execute("/billing", RequestOptions::get())
        .await
        .unwrap_err()
        .is_circuit_open());
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    let healthy = Arc::new(AtomicUsize::new(0));
    let second = ResilientClient::builder(transport(Arc::clone(&healthy), None))
        .config(config())
        .persistence(persistence)
        .build()
        .unwrap();

    let err = second
        .execute("/billing", RequestOptions::get())
        .await
        .unwrap_err();
    assert!(err.is_circuit_open());
    assert_eq!(healthy.load(Ordering::SeqCst), 0);

    let stats = second.stats().await;
    assert_eq!(stats.circuit_breakers["/billing:GET"].state, CircuitState::Open);

    assert!(second.retry_manager().reset_circuit_breaker("/billing:GET").await);
    second.execute("/billing", RequestOptions::get()).await.unwrap();
    assert_eq!(healthy.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn preconfigured_retry_manager_receives_client_traffic() {
    let retries = Arc::new(AtomicUsize::new(0));
    let r = Arc::clone(&retries);
    let retry = RetryManager::builder()
        .backoff(FixedInterval::new(Duration::from_millis(1)))
        .on_retry(move |key, _, _| {
            assert_eq!(key, "/flaky:GET");
            r.fetch_add(1, Ordering::SeqCst);
        })
        .build();

    let calls = Arc::new(AtomicUsize::new(0));
    let client = ResilientClient::builder(transport(Arc::clone(&calls), Some(502)))
        .config(config())
        .retry_manager(retry)
        .build()
        .unwrap();

    let err = client.execute("/flaky", RequestOptions::get()).await.unwrap_err();

    assert!(err.is_retry_exhausted());
    // The injected manager keeps its own default of three attempts.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(retries.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn timeouts_are_retried_per_attempt() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    let slow_then_fast = api_resilience::executor_fn(move |_endpoint: String, _options: RequestOptions| {
        let n = c.fetch_add(1, Ordering::SeqCst);
        async move {
            if n == 0 {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            Ok::<_, api_resilience::ApiError>(serde_json::json!({ "attempt": n }))
        }
    });

    let client = ResilientClient::builder(slow_then_fast)
        .config(config())
        .build()
        .unwrap();

    let value = client
        .execute(
            "/slow",
            RequestOptions::get().timeout(Duration::from_millis(20)),
        )
        .await
        .unwrap();

    assert_eq!(value["attempt"], 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
