//! Expiry and cleanup.

use super::memory_cache;
use api_resilience::cache::{CacheConfig, CacheManager};
use serde_json::{json, Value};
use std::time::Duration;

#[tokio::test]
async fn entries_expire_after_their_ttl() {
    let cache = memory_cache(10);
    cache
        .set("user:1", &json!({"name": "Ada"}), Some(Duration::from_millis(100)))
        .await;

    assert_eq!(
        cache.get::<Value>("user:1").await,
        Some(json!({"name": "Ada"}))
    );
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(cache.get::<Value>("user:1").await, None);
    assert!(!cache.has("user:1").await);

    let stats = cache.stats().await;
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hit_rate, 0.5);
}

#[tokio::test]
async fn default_ttl_applies_when_none_is_given() {
    let cache = CacheManager::new(CacheConfig {
        default_ttl_ms: 50,
        ..CacheConfig::default()
    })
    .unwrap();

    cache.set("k", &1u32, None).await;
    assert_eq!(cache.get::<u32>("k").await, Some(1));
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(cache.get::<u32>("k").await, None);
}

#[tokio::test]
async fn cleanup_purges_only_expired_entries() {
    let cache = memory_cache(10);
    cache.set("short", &"a", Some(Duration::from_millis(20))).await;
    cache.set("long", &"b", Some(Duration::from_secs(60))).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(cache.stats().await.size, 2);

    assert_eq!(cache.cleanup().await, 1);
    assert!(cache.has("long").await);

    let stats = cache.stats().await;
    assert_eq!(stats.size, 1);
    assert_eq!(stats.expired_purged, 1);
}

#[tokio::test]
async fn periodic_cleanup_runs_in_the_background() {
    let cache = memory_cache(10);
    cache.set("gone", &true, Some(Duration::from_millis(10))).await;

    let handle = cache.spawn_cleanup(Duration::from_millis(25));
    tokio::time::sleep(Duration::from_millis(120)).await;
    handle.abort();

    assert_eq!(cache.stats().await.size, 0);
}

#[tokio::test]
async fn get_or_insert_with_loads_once() {
    let cache = memory_cache(10);
    let mut loads = 0;

    for _ in 0..3 {
        let value: Result<String, std::io::Error> = cache
            .get_or_insert_with("greeting", None, || {
                loads += 1;
                async { Ok("hello".to_string()) }
            })
            .await;
        assert_eq!(value.unwrap(), "hello");
    }
    assert_eq!(loads, 1);
}
