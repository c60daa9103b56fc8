//! Snapshot persistence across manager instances.

use super::{breaker, builder, fail, succeed};
use api_resilience::retry::{
    CircuitBreakerPersistence, MemoryPersistence, StoragePersistence, MAX_SNAPSHOT_AGE,
};
use api_resilience::{
    now_millis, CircuitBreakerStats, CircuitState, FileKeyValueStore, KeyValueStore,
    MemoryKeyValueStore,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[tokio::test]
async fn open_circuit_survives_a_restart() {
    let persistence = MemoryPersistence::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let first = builder(breaker(2, 1))
        .persistence(persistence.clone())
        .build();
    fail(&first, "/payments", &calls).await;
    fail(&first, "/payments", &calls).await;
    assert_eq!(persistence.len(), 1);

    let second = builder(breaker(2, 1))
        .persistence(persistence.clone())
        .build();
    assert_eq!(second.load_persisted_state().await, 1);

    let stats = second.circuit_breaker_stats("/payments:GET").unwrap();
    assert_eq!(stats.state, CircuitState::Open);
    assert_eq!(stats.failure_count, 2);

    let err = succeed(&second, "/payments", &calls).await.unwrap_err();
    assert!(err.is_circuit_open());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn stale_snapshots_are_discarded_and_cleared() {
    let persistence = MemoryPersistence::new();
    let two_hours_ago = now_millis() - 2 * MAX_SNAPSHOT_AGE.as_millis() as u64;
    persistence
        .save(
            "/payments:GET",
            &CircuitBreakerStats {
                state: CircuitState::Open,
                failure_count: 9,
                total_requests: 9,
                next_retry_time: Some(now_millis() + 60_000),
                persisted_at: Some(two_hours_ago),
                ..CircuitBreakerStats::default()
            },
        )
        .await
        .unwrap();

    let manager = builder(breaker(2, 1))
        .persistence(persistence.clone())
        .build();
    assert_eq!(manager.load_persisted_state().await, 0);
    assert!(manager.circuit_breaker_stats("/payments:GET").is_none());
    assert!(persistence.is_empty());

    let calls = Arc::new(AtomicUsize::new(0));
    succeed(&manager, "/payments", &calls).await.unwrap();
}

#[tokio::test]
async fn snapshots_without_timestamp_are_not_restored() {
    let persistence = MemoryPersistence::new();
    persistence
        .save(
            "/payments:GET",
            &CircuitBreakerStats {
                state: CircuitState::Open,
                ..CircuitBreakerStats::default()
            },
        )
        .await
        .unwrap();

    let manager = builder(breaker(2, 1)).persistence(persistence).build();
    assert_eq!(manager.load_persisted_state().await, 0);
}

#[tokio::test]
async fn loading_runs_only_once() {
    let persistence = MemoryPersistence::new();
    persistence
        .save(
            "/a:GET",
            &CircuitBreakerStats {
                persisted_at: Some(now_millis()),
                ..CircuitBreakerStats::default()
            },
        )
        .await
        .unwrap();

    let manager = builder(breaker(2, 1))
        .persistence(persistence.clone())
        .build();
    assert_eq!(manager.load_persisted_state().await, 1);

    persistence
        .save(
            "/b:GET",
            &CircuitBreakerStats {
                persisted_at: Some(now_millis()),
                ..CircuitBreakerStats::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(manager.load_persisted_state().await, 1);
    assert!(manager.circuit_breaker_stats("/b:GET").is_none());
}

#[tokio::test]
async fn file_backed_state_is_shared_between_managers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("breakers.json");
    let calls = Arc::new(AtomicUsize::new(0));

    {
        let store: Arc<dyn KeyValueStore> = Arc::new(FileKeyValueStore::open(&path).unwrap());
        let manager = builder(breaker(1, 1))
            .persistence(StoragePersistence::new(store))
            .build();
        fail(&manager, "/reports", &calls).await;
    }

    let store = FileKeyValueStore::open(&path).unwrap();
    assert_eq!(store.keys().unwrap(), vec!["circuit_breaker:/reports:GET".to_string()]);

    let manager = builder(breaker(1, 1))
        .persistence(StoragePersistence::new(Arc::new(store)))
        .build();
    let err = succeed(&manager, "/reports", &calls).await.unwrap_err();
    assert!(err.is_circuit_open());
}

#[tokio::test]
async fn storage_persistence_leaves_foreign_keys_alone() {
    let store = Arc::new(MemoryKeyValueStore::new());
    store.set_item("api_cache:/users:abc", "{}").unwrap();
    store.set_item("circuit_breaker:/bad:GET", "not json").unwrap();

    let persistence = StoragePersistence::new(store.clone());
    let loaded = persistence.load_all().await.unwrap();
    assert!(loaded.is_empty());

    assert_eq!(store.keys().unwrap(), vec!["api_cache:/users:abc".to_string()]);
}
