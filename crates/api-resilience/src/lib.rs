//! Resilience and efficiency layer for HTTP API clients.
//!
//! `api-resilience` wraps a caller-supplied transport (a
//! [`RequestExecutor`]) with:
//!
//! - **Retry** with jittered exponential backoff for transient failures
//! - **Circuit breaking** per `"<endpoint>:<method>"`, with optional
//!   snapshot persistence across restarts
//! - **Batching and deduplication** of concurrent requests to configured
//!   endpoints
//! - **Caching** of safe requests with TTL, tags and pluggable storage
//!
//! Each concern lives in its own crate and can be used alone; this crate
//! re-exports them and composes them in [`ResilientClient`].
//!
//! # Example
//!
//! ```rust,no_run
//! use api_resilience::{
//!     executor_fn, ApiError, RequestOptions, ResilienceConfig, ResilientClient, StaticHeaders,
//! };
//! use serde_json::{json, Value};
//!
//! # async fn example() -> Result<(), ApiError> {
//! let transport = executor_fn(|endpoint: String, _options: RequestOptions| async move {
//!     // Call the real HTTP stack here.
//!     Ok::<Value, ApiError>(json!({ "endpoint": endpoint }))
//! });
//!
//! let config = ResilienceConfig::from_json(
//!     r#"{ "retry": { "max_attempts": 4 }, "batching": { "batchable_endpoints": ["/audit/*"] } }"#,
//! )?;
//!
//! let client = ResilientClient::builder(transport)
//!     .name("orders-api")
//!     .config(config)
//!     .auth_provider(StaticHeaders::bearer("secret"))
//!     .build()?;
//!
//! let orders = client.execute("/orders", RequestOptions::get().query("page", "1")).await?;
//! println!("{orders}");
//! # Ok(())
//! # }
//! ```

mod client;
mod config;

pub use client::{ApiRequest, ClientStats, ResilientClient, ResilientClientBuilder};
pub use config::ResilienceConfig;

pub use api_resilience_core::{
    executor_fn, now_millis, ApiError, AuthHeaderProvider, BatchError, CircuitBreakerStats,
    CircuitState, ErrorCode, ErrorEnvelope, FileKeyValueStore, HttpError, HttpMethod,
    KeyValueStore, MemoryKeyValueStore, RequestContext, RequestExecutor, RequestOptions,
    StaticHeaders,
};

pub use api_resilience_batch as batch;
pub use api_resilience_cache as cache;
pub use api_resilience_retry as retry;
