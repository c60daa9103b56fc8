//! Durable storage for circuit breaker snapshots.
//!
//! [`RetryManager`](crate::RetryManager) writes a snapshot on every state
//! transition and reset, and restores fresh snapshots once on first use.
//! Failures here are logged by the manager and never reach callers.

use api_resilience_core::{CircuitBreakerStats, KeyValueStore, StorageError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Key prefix used by [`StoragePersistence`].
pub const DEFAULT_KEY_PREFIX: &str = "circuit_breaker:";

/// Errors returned by a persistence backend.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("invalid circuit breaker snapshot for '{key}': {message}")]
    InvalidSnapshot { key: String, message: String },
}

/// Backend storing one [`CircuitBreakerStats`] per circuit key.
#[async_trait]
pub trait CircuitBreakerPersistence: Send + Sync {
    async fn save(&self, key: &str, stats: &CircuitBreakerStats) -> Result<(), PersistenceError>;

    async fn load(&self, key: &str) -> Result<Option<CircuitBreakerStats>, PersistenceError>;

    async fn load_all(&self) -> Result<HashMap<String, CircuitBreakerStats>, PersistenceError>;

    async fn clear(&self, key: &str) -> Result<(), PersistenceError>;

    async fn clear_all(&self) -> Result<(), PersistenceError>;
}

#[async_trait]
impl<P: CircuitBreakerPersistence + ?Sized> CircuitBreakerPersistence for Arc<P> {
    async fn save(&self, key: &str, stats: &CircuitBreakerStats) -> Result<(), PersistenceError> {
        (**self).save(key, stats).await
    }

    async fn load(&self, key: &str) -> Result<Option<CircuitBreakerStats>, PersistenceError> {
        (**self).load(key).await
    }

    async fn load_all(&self) -> Result<HashMap<String, CircuitBreakerStats>, PersistenceError> {
        (**self).load_all().await
    }

    async fn clear(&self, key: &str) -> Result<(), PersistenceError> {
        (**self).clear(key).await
    }

    async fn clear_all(&self) -> Result<(), PersistenceError> {
        (**self).clear_all().await
    }
}

/// Process-local persistence, mostly useful in tests and for sharing state
/// between managers in one process.
#[derive(Debug, Clone, Default)]
pub struct MemoryPersistence {
    snapshots: Arc<Mutex<HashMap<String, CircuitBreakerStats>>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored snapshots.
    pub fn len(&self) -> usize {
        self.snapshots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.lock().is_empty()
    }
}

#[async_trait]
impl CircuitBreakerPersistence for MemoryPersistence {
    async fn save(&self, key: &str, stats: &CircuitBreakerStats) -> Result<(), PersistenceError> {
        self.snapshots.lock().insert(key.to_string(), stats.clone());
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<CircuitBreakerStats>, PersistenceError> {
        Ok(self.snapshots.lock().get(key).cloned())
    }

    async fn load_all(&self) -> Result<HashMap<String, CircuitBreakerStats>, PersistenceError> {
        Ok(self.snapshots.lock().clone())
    }

    async fn clear(&self, key: &str) -> Result<(), PersistenceError> {
        self.snapshots.lock().remove(key);
        Ok(())
    }

    async fn clear_all(&self) -> Result<(), PersistenceError> {
        self.snapshots.lock().clear();
        Ok(())
    }
}

/// Persistence over a prefixed [`KeyValueStore`], one JSON document per key.
///
/// Only keys under the prefix are touched, so the store can be shared with
/// other users such as a cache.
#[derive(Clone)]
pub struct StoragePersistence {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl StoragePersistence {
    /// Uses the [`DEFAULT_KEY_PREFIX`].
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_prefix(store, DEFAULT_KEY_PREFIX)
    }

    pub fn with_prefix(store: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn decode(key: &str, raw: &str) -> Result<CircuitBreakerStats, PersistenceError> {
        serde_json::from_str(raw).map_err(|e| PersistenceError::InvalidSnapshot {
            key: key.to_string(),
            message: e.to_string(),
        })
    }
}

impl std::fmt::Debug for StoragePersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoragePersistence")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CircuitBreakerPersistence for StoragePersistence {
    async fn save(&self, key: &str, stats: &CircuitBreakerStats) -> Result<(), PersistenceError> {
        let raw = serde_json::to_string(stats).map_err(|e| PersistenceError::InvalidSnapshot {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        self.store.set_item(&self.storage_key(key), &raw)?;
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<CircuitBreakerStats>, PersistenceError> {
        match self.store.get_item(&self.storage_key(key))? {
            Some(raw) => Self::decode(key, &raw).map(Some),
            None => Ok(None),
        }
    }

    /// Loads every snapshot under the prefix.
    ///
    /// Undecodable entries are removed and skipped rather than failing the
    /// whole load.
    async fn load_all(&self) -> Result<HashMap<String, CircuitBreakerStats>, PersistenceError> {
        let mut out = HashMap::new();
        for storage_key in self.store.keys()? {
            let Some(key) = storage_key.strip_prefix(&self.prefix) else {
                continue;
            };
            let Some(raw) = self.store.get_item(&storage_key)? else {
                continue;
            };
            match Self::decode(key, &raw) {
                Ok(stats) => {
                    out.insert(key.to_string(), stats);
                }
                Err(e) => {
                    tracing::warn!(key, error = %e, "discarding corrupt circuit breaker snapshot");
                    self.store.remove_item(&storage_key)?;
                }
            }
        }
        Ok(out)
    }

    async fn clear(&self, key: &str) -> Result<(), PersistenceError> {
        self.store.remove_item(&self.storage_key(key))?;
        Ok(())
    }

    async fn clear_all(&self) -> Result<(), PersistenceError> {
        for storage_key in self.store.keys()? {
            if storage_key.starts_with(&self.prefix) {
                self.store.remove_item(&storage_key)?;
            }
        }
        Ok(())
    }
}
