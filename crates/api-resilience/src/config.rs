use api_resilience_batch::BatchingConfig;
use api_resilience_cache::CacheConfig;
use api_resilience_core::ApiError;
use api_resilience_retry::{CircuitBreakerConfig, RetryConfig};
use serde::{Deserialize, Serialize};

/// Configuration for every manager behind a [`ResilientClient`](crate::ResilientClient).
///
/// Missing sections and fields take their defaults, so `{}` is a valid
/// document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub batching: BatchingConfig,
    pub cache: CacheConfig,
}

impl ResilienceConfig {
    /// Parses a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ApiError> {
        serde_json::from_str(json).map_err(|e| ApiError::Validation {
            message: format!("invalid resilience configuration: {e}"),
            field: None,
        })
    }

    pub fn to_json(&self) -> Result<String, ApiError> {
        serde_json::to_string_pretty(self).map_err(|e| ApiError::Validation {
            message: format!("unserializable resilience configuration: {e}"),
            field: None,
        })
    }
}
