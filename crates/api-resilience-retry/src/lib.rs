//! Retry and circuit breaking for HTTP API calls.
//!
//! [`RetryManager`] wraps an async operation with two layers:
//!
//! - **Retry**: retryable failures (network, timeout, configured HTTP
//!   statuses and error codes) are retried with jittered exponential
//!   backoff up to `max_attempts`.
//! - **Circuit breaking**: one breaker per `"<endpoint>:<method>"` key
//!   counts final outcomes and fails fast while the endpoint is unhealthy.
//!
//! Breaker snapshots can be written to a [`CircuitBreakerPersistence`]
//! backend so that an open circuit survives a restart. Snapshots older than
//! [`MAX_SNAPSHOT_AGE`] are discarded when the manager loads.
//!
//! # Features
//!
//! - **IntervalFunction abstraction**: pluggable backoff strategies
//!   - Fixed interval
//!   - Exponential backoff with configurable multiplier
//!   - Exponential backoff with jitter (the default)
//!   - Custom function-based backoff
//! - **Event system**: retry and circuit breaker events through listeners
//! - **Persistence**: in-memory and key-value-store backed snapshots
//!
//! # Examples
//!
//! ```
//! use api_resilience_core::{ApiError, HttpMethod, MemoryKeyValueStore, RequestContext};
//! use api_resilience_retry::{RetryConfig, RetryManager, StoragePersistence};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), ApiError> {
//! let store = Arc::new(MemoryKeyValueStore::new());
//! let manager = RetryManager::builder()
//!     .name("orders-api")
//!     .retry_config(RetryConfig { initial_delay_ms: 50, ..RetryConfig::default() })
//!     .persistence(StoragePersistence::new(store))
//!     .build();
//!
//! let context = RequestContext::new("/orders", HttpMethod::Post);
//! let id = manager.execute(|| async { Ok(42u64) }, &context).await?;
//! assert_eq!(id, 42);
//! # Ok(())
//! # }
//! ```

mod backoff;
mod circuit;
mod config;
mod events;
mod manager;
pub mod persistence;

pub use backoff::{
    ExponentialBackoff, ExponentialRandomBackoff, FixedInterval, FnInterval, IntervalFunction,
};
pub use config::{CircuitBreakerConfig, RetryConfig};
pub use events::{CircuitBreakerEvent, RetryEvent};
pub use manager::{RetryManager, RetryManagerBuilder, MAX_SNAPSHOT_AGE};
pub use persistence::{
    CircuitBreakerPersistence, MemoryPersistence, PersistenceError, StoragePersistence,
};
