//! Batch metrics regression tests

use super::helpers::*;
use api_resilience::batch::{BatchManager, BatchingConfig};
use api_resilience::{executor_fn, ApiError, RequestOptions};
use serial_test::serial;

#[tokio::test]
#[serial]
async fn batch_metrics_exist() {
    init_recorder();

    let manager = BatchManager::new(
        executor_fn(|endpoint: String, _options: RequestOptions| async move {
            Ok::<_, ApiError>(endpoint)
        }),
        BatchingConfig {
            max_batch_size: 2,
            batch_timeout_ms: 10,
            batchable_endpoints: vec!["/audit/*".to_string()],
            ..BatchingConfig::default()
        },
    )
    .unwrap();

    let _ = manager.add_to_batch("/users", RequestOptions::get()).await;
    let _ = tokio::join!(
        manager.add_to_batch("/audit/a", RequestOptions::get()),
        manager.add_to_batch("/audit/a", RequestOptions::get()),
    );

    assert_counter_exists("batch_requests_total");
    assert_metric_has_label("batch_requests_total", "outcome", "immediate");
    assert_metric_has_label("batch_requests_total", "outcome", "batched");
    assert_metric_has_label("batch_requests_total", "outcome", "deduplicated");

    assert_counter_exists("batch_flushes_total");
    assert_metric_has_label("batch_flushes_total", "reason", "timeout");
}
