//! Walks a flaky transport through the resilient client.
//! Run with: cargo run --example resilient_client
//! With tracing: RUST_LOG=debug cargo run --example resilient_client

use api_resilience::retry::MemoryPersistence;
use api_resilience::{
    executor_fn, ApiError, HttpMethod, RequestOptions, ResilienceConfig, ResilientClient,
    StaticHeaders,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    tracing_subscriber::fmt::init();

    // Every third call fails with a 503; /billing always fails.
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let transport = executor_fn(move |endpoint: String, options: RequestOptions| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if endpoint == "/billing" || n % 3 == 2 {
                return Err(ApiError::http(503, "Service Unavailable"));
            }
            Ok::<Value, ApiError>(json!({
                "endpoint": endpoint,
                "method": options.method.as_str(),
                "call": n,
            }))
        }
    });

    let config = ResilienceConfig::from_json(
        r#"{
            "retry": { "max_attempts": 3, "initial_delay_ms": 50 },
            "circuit_breaker": { "failure_threshold": 2, "minimum_request_threshold": 2, "recovery_timeout_ms": 1000 },
            "batching": { "batch_timeout_ms": 20, "batchable_endpoints": ["/audit/*"] },
            "cache": { "default_ttl_ms": 60000 }
        }"#,
    )?;

    let persistence = MemoryPersistence::new();
    let client = ResilientClient::builder(transport)
        .name("demo")
        .config(config)
        .auth_provider(StaticHeaders::bearer("demo-token"))
        .persistence(persistence.clone())
        .build()?;

    // Cached reads: the second call never reaches the transport.
    for _ in 0..2 {
        let users = client
            .execute("/users", RequestOptions::get().query("page", "1"))
            .await?;
        println!("users: {users}");
    }

    // Identical audit events in one batch window collapse into one call.
    let event = || RequestOptions::with_method(HttpMethod::Post).body(json!({ "event": "login" }));
    let results = futures::future::join_all((0..3).map(|_| client.execute("/audit/events", event()))).await;
    println!("audit results: {}", results.iter().filter(|r| r.is_ok()).count());

    // A failing endpoint exhausts its retries, then trips its breaker.
    for i in 1..=3 {
        match client.execute("/billing", RequestOptions::get()).await {
            Ok(value) => println!("billing #{i}: {value}"),
            Err(e) => println!("billing #{i}: {} ({})", e, e.code()),
        }
    }

    let stats = client.stats().await;
    println!("transport calls: {}", calls.load(Ordering::SeqCst));
    println!("persisted breakers: {}", persistence.len());
    for (key, breaker) in &stats.circuit_breakers {
        println!("breaker {key}: {} ({} failures)", breaker.state, breaker.failure_count);
    }
    println!(
        "cache: {} hits, {} misses; batch: {} deduplicated",
        stats.cache.hits, stats.cache.misses, stats.batch.deduplicated_requests
    );
    Ok(())
}
