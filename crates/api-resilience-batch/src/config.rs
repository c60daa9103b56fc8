use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Batching behaviour for [`BatchManager`](crate::BatchManager).
///
/// Defaults:
/// - enabled: true
/// - max_batch_size: 10
/// - batch_timeout_ms: 50
/// - batchable_endpoints: none
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    pub enabled: bool,
    /// Distinct pending entries that trigger an immediate flush.
    pub max_batch_size: usize,
    /// Time after a group's first entry at which it flushes regardless of size.
    pub batch_timeout_ms: u64,
    /// Exact endpoints or `*` globs eligible for batching.
    pub batchable_endpoints: Vec<String>,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_batch_size: 10,
            batch_timeout_ms: 50,
            batchable_endpoints: Vec::new(),
        }
    }
}

impl BatchingConfig {
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    /// Returns a copy with every field set in `update` replaced.
    pub fn merged(&self, update: &BatchConfigUpdate) -> Self {
        Self {
            enabled: update.enabled.unwrap_or(self.enabled),
            max_batch_size: update.max_batch_size.unwrap_or(self.max_batch_size),
            batch_timeout_ms: update.batch_timeout_ms.unwrap_or(self.batch_timeout_ms),
            batchable_endpoints: update
                .batchable_endpoints
                .clone()
                .unwrap_or_else(|| self.batchable_endpoints.clone()),
        }
    }
}

/// A partial [`BatchingConfig`]; unset fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfigUpdate {
    pub enabled: Option<bool>,
    pub max_batch_size: Option<usize>,
    pub batch_timeout_ms: Option<u64>,
    pub batchable_endpoints: Option<Vec<String>>,
}

impl BatchConfigUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = Some(size);
        self
    }

    pub fn batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn batchable_endpoints<I, S>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.batchable_endpoints = Some(endpoints.into_iter().map(Into::into).collect());
        self
    }
}
