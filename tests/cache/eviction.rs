//! Size bound of the memory backend.

use super::memory_cache;
use api_resilience::cache::{CacheConfig, CacheManager};
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn sixth_entry_evicts_the_oldest() {
    let evicted = Arc::new(Mutex::new(Vec::new()));
    let e = Arc::clone(&evicted);
    let cache = CacheManager::builder()
        .config(CacheConfig {
            max_size: 5,
            ..CacheConfig::default()
        })
        .on_eviction(move |key| e.lock().unwrap().push(key.to_string()))
        .build()
        .unwrap();

    for i in 0..6 {
        cache.set(&format!("key{i}"), &i, None).await;
    }

    assert_eq!(cache.get::<i32>("key0").await, None);
    for i in 1..6 {
        assert_eq!(cache.get::<i32>(&format!("key{i}")).await, Some(i));
    }
    assert_eq!(*evicted.lock().unwrap(), vec!["key0".to_string()]);

    let stats = cache.stats().await;
    assert_eq!(stats.size, 5);
    assert_eq!(stats.evictions, 1);
}

#[tokio::test]
async fn reads_protect_entries_from_eviction() {
    let cache = memory_cache(2);
    cache.set("a", &1, None).await;
    cache.set("b", &2, None).await;
    assert_eq!(cache.get::<i32>("a").await, Some(1));

    cache.set("c", &3, None).await;

    assert!(cache.has("a").await);
    assert!(!cache.has("b").await);
    assert!(cache.has("c").await);
}

#[tokio::test]
async fn overwriting_a_key_does_not_evict() {
    let cache = memory_cache(2);
    cache.set("a", &1, None).await;
    cache.set("b", &2, None).await;
    cache.set("a", &10, None).await;

    assert_eq!(cache.get::<i32>("a").await, Some(10));
    assert_eq!(cache.get::<i32>("b").await, Some(2));
    assert_eq!(cache.stats().await.evictions, 0);
}
