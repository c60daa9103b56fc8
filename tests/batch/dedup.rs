//! Collapsing identical pending requests.

use super::counting_executor;
use api_resilience::batch::{dedup_key, BatchManager, BatchingConfig};
use api_resilience::{HttpMethod, RequestOptions};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn manager(calls: &Arc<AtomicUsize>, dedups: &Arc<AtomicUsize>) -> BatchManager<serde_json::Value> {
    let d = Arc::clone(dedups);
    BatchManager::builder(counting_executor(Arc::clone(calls)))
        .config(BatchingConfig {
            max_batch_size: 10,
            batch_timeout_ms: 20,
            batchable_endpoints: vec!["/search".to_string()],
            ..BatchingConfig::default()
        })
        .on_deduplicated(move |_, _| {
            d.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap()
}

#[tokio::test]
async fn identical_concurrent_requests_share_one_call() {
    let calls = Arc::new(AtomicUsize::new(0));
    let dedups = Arc::new(AtomicUsize::new(0));
    let manager = manager(&calls, &dedups);

    let request = || RequestOptions::get().query("q", "rust").query("page", "1");
    let results = futures::future::join_all((0..5).map(|_| manager.add_to_batch("/search", request()))).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(dedups.load(Ordering::SeqCst), 4);
    let first = results[0].as_ref().unwrap();
    assert!(results.iter().all(|r| r.as_ref().unwrap() == first));

    let stats = manager.stats();
    assert_eq!(stats.deduplicated_requests, 4);
    assert_eq!(stats.dispatched_entries, 1);
}

#[tokio::test]
async fn differing_bodies_are_not_collapsed() {
    let calls = Arc::new(AtomicUsize::new(0));
    let dedups = Arc::new(AtomicUsize::new(0));
    let manager = manager(&calls, &dedups);

    let (a, b) = tokio::join!(
        manager.add_to_batch(
            "/search",
            RequestOptions::with_method(HttpMethod::Post).body(json!({"q": "a"}))
        ),
        manager.add_to_batch(
            "/search",
            RequestOptions::with_method(HttpMethod::Post).body(json!({"q": "b"}))
        ),
    );

    assert!(a.is_ok() && b.is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(dedups.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn later_requests_after_flush_run_again() {
    let calls = Arc::new(AtomicUsize::new(0));
    let dedups = Arc::new(AtomicUsize::new(0));
    let manager = manager(&calls, &dedups);

    manager.add_to_batch("/search", RequestOptions::get()).await.unwrap();
    manager.add_to_batch("/search", RequestOptions::get()).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn dedup_key_depends_on_method_body_and_query_only() {
    let base = RequestOptions::get().query("a", "1").query("b", "2");
    let reordered = RequestOptions::get().query("b", "2").query("a", "1");
    let with_header = base.clone().header("x-trace", "abc");

    assert_eq!(dedup_key("/x", &base), dedup_key("/x", &reordered));
    assert_eq!(dedup_key("/x", &base), dedup_key("/x", &with_header));
    assert_ne!(dedup_key("/x", &base), dedup_key("/y", &base));
    assert_ne!(
        dedup_key("/x", &base),
        dedup_key("/x", &RequestOptions::with_method(HttpMethod::Delete).query("a", "1").query("b", "2"))
    );
}
