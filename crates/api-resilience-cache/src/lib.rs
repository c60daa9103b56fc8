//! Response cache for HTTP API clients.
//!
//! [`CacheManager`] stores serializable values with a TTL and optional tags
//! in a pluggable [`CacheStorage`] backend:
//!
//! - [`MemoryStorage`]: bounded LRU in process memory (default)
//! - [`WebStorage`]: a prefixed key-value store, either session scoped
//!   (in memory) or persistent (a JSON file on disk)
//! - any caller-supplied [`CacheStorage`]
//!
//! Expired entries read as misses and are purged by [`CacheManager::cleanup`],
//! which can run periodically via [`CacheManager::spawn_cleanup`]. Entries
//! can be invalidated by key regex, key prefix or tag. With compression
//! enabled, large values are stored zstd-compressed.
//!
//! Caching is best-effort. Backend failures are logged and counted but never
//! returned from cache operations.
//!
//! # Examples
//!
//! ```
//! use api_resilience_cache::{CacheConfig, CacheManager};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), api_resilience_cache::CacheError> {
//! let cache = CacheManager::new(CacheConfig::default())?;
//! let key = CacheManager::generate_key("/users", &json!({"page": 1}));
//!
//! cache
//!     .set_tagged(&key, &json!([{"id": 1}]), Some(Duration::from_secs(30)), ["user"])
//!     .await;
//! assert!(cache.has(&key).await);
//!
//! cache.invalidate_by_tags(["user"]).await;
//! assert_eq!(cache.get::<serde_json::Value>(&key).await, None);
//! # Ok(())
//! # }
//! ```

mod config;
mod envelope;
mod error;
mod events;
mod manager;
mod storage;

pub use config::{CacheConfig, StorageKind};
pub use envelope::COMPRESSION_THRESHOLD;
pub use error::CacheError;
pub use events::CacheEvent;
pub use manager::{CacheManager, CacheManagerBuilder, CacheStats};
pub use storage::{CacheStorage, MemoryStorage, WebStorage};
