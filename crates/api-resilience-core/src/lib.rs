//! Core infrastructure for api-resilience.
//!
//! This crate provides the pieces shared by every manager in the workspace:
//! - Request model and the [`RequestExecutor`] seam to the HTTP transport
//! - The [`ApiError`] taxonomy with its shared [`ErrorEnvelope`]
//! - Event system for observability
//! - Circuit breaker snapshot types used by persistence backends
//! - Browser-`Storage`-like key-value stores (session and persistent scope)
//! - Order-independent hashing used for dedup and cache keys

pub mod clock;
pub mod error;
pub mod events;
pub mod hash;
pub mod request;
pub mod snapshot;
pub mod storage;

pub use clock::now_millis;
pub use error::{ApiError, BatchError, ErrorCode, ErrorEnvelope, HttpError};
pub use events::{EventListener, EventListeners, FnListener, ResilienceEvent};
pub use hash::stable_hash;
pub use request::{
    executor_fn, AuthHeaderProvider, FnExecutor, HttpMethod, RequestContext, RequestExecutor,
    RequestOptions, StaticHeaders,
};
pub use snapshot::{CircuitBreakerStats, CircuitState};
pub use storage::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, StorageError};
