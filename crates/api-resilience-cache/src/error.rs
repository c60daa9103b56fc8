//! Error types for the cache.

use api_resilience_core::{ApiError, StorageError};
use thiserror::Error;

/// Errors raised by cache backends and envelope handling.
///
/// [`CacheManager`](crate::CacheManager) swallows these during normal
/// operation (logging and counting them); they only reach callers from
/// construction and from direct use of a [`CacheStorage`](crate::CacheStorage).
#[derive(Debug, Error)]
pub enum CacheError {
    /// The underlying key-value store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A stored entry could not be decoded.
    #[error("corrupt cache entry '{key}': {message}")]
    Corrupt { key: String, message: String },

    #[error("cache value serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("cache compression failed: {0}")]
    Compression(String),

    /// The configuration cannot produce a backend.
    #[error("invalid cache configuration: {0}")]
    Config(String),
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        ApiError::Cache {
            message: err.to_string(),
        }
    }
}
