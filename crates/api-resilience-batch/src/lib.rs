//! Request batching and deduplication for HTTP API clients.
//!
//! [`BatchManager`] holds requests to configured endpoints for a short
//! window and dispatches them together, collapsing identical requests into
//! one executor call whose result is shared by every caller.
//!
//! - Endpoints opt in through `batchable_endpoints` patterns where `*`
//!   matches any run of characters (`"/users/*"`).
//! - A group flushes when it holds `max_batch_size` distinct requests or
//!   `batch_timeout_ms` after its first request, whichever comes first.
//! - Requests are identical when endpoint, method, body and query match.
//!   Headers are ignored.
//!
//! # Examples
//!
//! ```
//! use api_resilience_batch::{BatchManager, BatchingConfig};
//! use api_resilience_core::{executor_fn, ApiError, RequestOptions};
//!
//! # async fn example() -> Result<(), ApiError> {
//! let executor = executor_fn(|endpoint: String, _options: RequestOptions| async move {
//!     Ok::<_, ApiError>(format!("fetched {endpoint}"))
//! });
//! let batcher = BatchManager::new(
//!     executor,
//!     BatchingConfig {
//!         batchable_endpoints: vec!["/users/*".to_string()],
//!         ..BatchingConfig::default()
//!     },
//! )?;
//!
//! let (a, b) = tokio::join!(
//!     batcher.add_to_batch("/users/7", RequestOptions::get()),
//!     batcher.add_to_batch("/users/7", RequestOptions::get()),
//! );
//! assert_eq!(a?, b?);
//! assert_eq!(batcher.stats().deduplicated_requests, 1);
//! # Ok(())
//! # }
//! ```

mod config;
mod events;
mod manager;
mod pattern;

pub use config::{BatchConfigUpdate, BatchingConfig};
pub use events::{BatchEvent, FlushReason};
pub use manager::{dedup_key, BatchManager, BatchManagerBuilder, BatchStats};
pub use pattern::EndpointPattern;
