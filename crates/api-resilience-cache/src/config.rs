use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Which backend a [`CacheManager`](crate::CacheManager) stores entries in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// Bounded in-process LRU.
    #[default]
    Memory,
    /// Prefixed in-memory key-value store, gone when the process exits.
    SessionStorage,
    /// Prefixed file-backed key-value store at `persistent_path`.
    LocalStorage,
    /// A caller-supplied [`CacheStorage`](crate::CacheStorage).
    Custom,
}

/// Cache configuration.
///
/// Defaults: enabled, 5 minute TTL, 100 entries, in-memory LRU storage,
/// `"api_cache:"` key prefix, no compression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// TTL applied by `set` when none is given.
    pub default_ttl_ms: u64,
    /// Capacity of the in-memory LRU backend.
    pub max_size: usize,
    pub storage: StorageKind,
    /// Namespace for keys in the session and local storage backends.
    pub key_prefix: String,
    /// Compress serialized values larger than 1 KiB.
    pub compression_enabled: bool,
    /// File used by [`StorageKind::LocalStorage`].
    pub persistent_path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_ms: 300_000,
            max_size: 100,
            storage: StorageKind::Memory,
            key_prefix: "api_cache:".to_string(),
            compression_enabled: false,
            persistent_path: None,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }
}
