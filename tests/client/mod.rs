//! End-to-end tests of [`ResilientClient`](api_resilience::ResilientClient).
//!
//! Test organization:
//! - pipeline.rs: caching, batching and error surfacing through the client
//! - recovery.rs: retries, breakers and breaker persistence

mod recovery;

use api_resilience::{executor_fn, ApiError, RequestExecutor, RequestOptions};
use serde_json::{json, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Transport stub answering with the request it saw.
///
/// `status` is returned as an HTTP error for every call when set.
pub(crate) fn transport(
    calls: Arc<AtomicUsize>,
    status: Option<u16>,
) -> impl RequestExecutor<Response = Value> + 'static {
    executor_fn(move |endpoint: String, options: RequestOptions| {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        async move {
            if let Some(status) = status {
                return Err(ApiError::http(status, "stubbed failure"));
            }
            Ok(json!({
                "endpoint": endpoint,
                "method": options.method.as_str(),
                "query": options.query,
                "auth": options.headers.get("Authorization"),
                "call": n,
            }))
        }
    })
}
