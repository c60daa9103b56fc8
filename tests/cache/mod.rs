//! Tests for the cache manager.
//!
//! Test organization:
//! - ttl.rs: expiry and cleanup
//! - eviction.rs: size bound of the memory backend
//! - invalidation.rs: pattern, prefix and tag invalidation
//! - backends.rs: session, local and custom storage

mod eviction;
mod ttl;

use api_resilience::cache::{CacheConfig, CacheManager};

pub(crate) fn memory_cache(max_size: usize) -> CacheManager {
    CacheManager::new(CacheConfig {
        max_size,
        ..CacheConfig::default()
    })
    .unwrap()
}
