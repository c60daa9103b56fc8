//! Cache storage backends.
//!
//! Every backend stores opaque strings (serialized entry envelopes) and
//! implements [`CacheStorage`]. The manager picks one at construction time
//! from [`StorageKind`](crate::StorageKind).

use crate::error::CacheError;
use api_resilience_core::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Uniform contract over cache backends.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Stores `value` under `key`.
    ///
    /// Returns the key the backend evicted to make room, if any.
    async fn set(&self, key: &str, value: String) -> Result<Option<String>, CacheError>;

    /// Removes `key`. Returns whether it was present.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    async fn clear(&self) -> Result<(), CacheError>;

    /// Number of stored entries, expired ones included.
    async fn size(&self) -> Result<usize, CacheError>;

    async fn keys(&self) -> Result<Vec<String>, CacheError>;
}

#[async_trait]
impl<S: CacheStorage + ?Sized> CacheStorage for Arc<S> {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: String) -> Result<Option<String>, CacheError> {
        (**self).set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        (**self).delete(key).await
    }

    async fn clear(&self) -> Result<(), CacheError> {
        (**self).clear().await
    }

    async fn size(&self) -> Result<usize, CacheError> {
        (**self).size().await
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        (**self).keys().await
    }
}

/// In-process LRU bounded by entry count.
///
/// Reads refresh recency, so the entry evicted on overflow is the one read
/// or written longest ago.
pub struct MemoryStorage {
    cache: Mutex<LruCache<String, String>>,
    evictions: AtomicU64,
}

impl MemoryStorage {
    /// A zero capacity is treated as one.
    pub fn new(max_size: usize) -> Self {
        let cap = NonZeroUsize::new(max_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(cap)),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.cache.lock().cap().get()
    }

    /// Entries dropped by the LRU policy so far.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cache = self.cache.lock();
        f.debug_struct("MemoryStorage")
            .field("len", &cache.len())
            .field("capacity", &cache.cap())
            .finish()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.cache.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<Option<String>, CacheError> {
        // `push` also returns the old pair when the key was already present.
        let displaced = self.cache.lock().push(key.to_string(), value);
        match displaced {
            Some((old_key, _)) if old_key != key => {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                Ok(Some(old_key))
            }
            _ => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.cache.lock().pop(key).is_some())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.cache.lock().clear();
        Ok(())
    }

    async fn size(&self) -> Result<usize, CacheError> {
        Ok(self.cache.lock().len())
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.cache.lock().iter().map(|(k, _)| k.clone()).collect())
    }
}

/// A namespaced view over a [`KeyValueStore`].
///
/// Keys are written as `prefix + key`. `keys`, `size` and `clear` only see
/// keys under the prefix, so the store can be shared with other users such
/// as circuit breaker persistence.
#[derive(Clone)]
pub struct WebStorage {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl WebStorage {
    pub fn new(store: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    /// Session-scoped storage backed by a fresh in-memory store.
    pub fn session(prefix: impl Into<String>) -> Self {
        Self::new(Arc::new(MemoryKeyValueStore::new()), prefix)
    }

    /// Persistent storage backed by a JSON file at `path`.
    pub fn persistent(path: impl AsRef<Path>, prefix: impl Into<String>) -> Result<Self, CacheError> {
        let store = FileKeyValueStore::open(path)?;
        Ok(Self::new(Arc::new(store), prefix))
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn own_keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self
            .store
            .keys()?
            .into_iter()
            .filter_map(|k| k.strip_prefix(&self.prefix).map(str::to_string))
            .collect())
    }
}

impl std::fmt::Debug for WebStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebStorage")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CacheStorage for WebStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.store.get_item(&self.storage_key(key))?)
    }

    async fn set(&self, key: &str, value: String) -> Result<Option<String>, CacheError> {
        self.store.set_item(&self.storage_key(key), &value)?;
        Ok(None)
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.store.remove_item(&self.storage_key(key))?)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        for key in self.own_keys()? {
            self.store.remove_item(&self.storage_key(&key))?;
        }
        Ok(())
    }

    async fn size(&self) -> Result<usize, CacheError> {
        Ok(self.own_keys()?.len())
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        self.own_keys()
    }
}
