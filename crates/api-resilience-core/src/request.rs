//! Request model and the seams to the outside world.
//!
//! The managers never speak HTTP themselves. They hand an endpoint and a
//! [`RequestOptions`] to a [`RequestExecutor`] supplied by the caller, and
//! optionally ask an [`AuthHeaderProvider`] for headers to attach.

use crate::error::ApiError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    /// Upper-case method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }

    /// Safe methods have no side effects and may be served from cache.
    pub fn is_safe(&self) -> bool {
        matches!(self, HttpMethod::Get | HttpMethod::Head | HttpMethod::Options)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for a single request.
///
/// `query` and `headers` are ordered maps so that two logically identical
/// requests always serialize the same way, which the dedup and cache keys
/// rely on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
    /// Per-attempt timeout applied by the client pipeline.
    #[serde(skip)]
    pub timeout: Option<Duration>,
    /// Cache TTL override for this request (safe methods only).
    #[serde(skip)]
    pub cache_ttl: Option<Duration>,
    /// Tags stored alongside a cached response.
    pub cache_tags: Vec<String>,
    /// Bypass the cache for this request.
    pub skip_cache: bool,
    pub correlation_id: Option<String>,
}

impl RequestOptions {
    /// Options for a GET request.
    pub fn get() -> Self {
        Self::default()
    }

    /// Options for a request with the given method.
    pub fn with_method(method: HttpMethod) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    /// Sets a JSON body.
    pub fn body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Adds a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Adds a header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Sets the per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the correlation id propagated into errors.
    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Sets a cache TTL override.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Adds a cache tag.
    pub fn cache_tag(mut self, tag: impl Into<String>) -> Self {
        self.cache_tags.push(tag.into());
        self
    }

    /// Marks the request as uncacheable.
    pub fn skip_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }

    /// Builds the context used for breaker keys and error reporting.
    pub fn context_for(&self, endpoint: &str) -> RequestContext {
        RequestContext {
            endpoint: endpoint.to_string(),
            method: self.method,
            correlation_id: self.correlation_id.clone(),
        }
    }
}

/// Identifies the logical call an error or breaker belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestContext {
    pub endpoint: String,
    pub method: HttpMethod,
    pub correlation_id: Option<String>,
}

impl RequestContext {
    pub fn new(endpoint: impl Into<String>, method: HttpMethod) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            correlation_id: None,
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Circuit breaker key: `"<endpoint>:<method>"`.
    pub fn circuit_key(&self) -> String {
        format!("{}:{}", self.endpoint, self.method)
    }
}

/// Executes one request against the real transport.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    /// Response type produced by the transport.
    type Response: Send + 'static;

    /// Performs the request.
    async fn execute(
        &self,
        endpoint: &str,
        options: &RequestOptions,
    ) -> Result<Self::Response, ApiError>;
}

/// Adapter turning a closure into a [`RequestExecutor`].
///
/// Created by [`executor_fn`].
pub struct FnExecutor<F> {
    f: F,
}

/// Wraps an async closure `Fn(String, RequestOptions) -> Future<Output = Result<R, ApiError>>`
/// as a [`RequestExecutor`].
pub fn executor_fn<F, Fut, R>(f: F) -> FnExecutor<F>
where
    F: Fn(String, RequestOptions) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, ApiError>> + Send,
    R: Send + 'static,
{
    FnExecutor { f }
}

#[async_trait]
impl<F, Fut, R> RequestExecutor for FnExecutor<F>
where
    F: Fn(String, RequestOptions) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, ApiError>> + Send,
    R: Send + 'static,
{
    type Response = R;

    async fn execute(&self, endpoint: &str, options: &RequestOptions) -> Result<R, ApiError> {
        (self.f)(endpoint.to_string(), options.clone()).await
    }
}

/// Supplies authentication headers for outgoing requests.
#[async_trait]
pub trait AuthHeaderProvider: Send + Sync {
    async fn headers(&self) -> Result<HashMap<String, String>, ApiError>;
}

/// An [`AuthHeaderProvider`] returning a fixed header map.
#[derive(Debug, Clone, Default)]
pub struct StaticHeaders {
    headers: HashMap<String, String>,
}

impl StaticHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bearer(token: impl AsRef<str>) -> Self {
        Self::new().with("Authorization", format!("Bearer {}", token.as_ref()))
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl AuthHeaderProvider for StaticHeaders {
    async fn headers(&self) -> Result<HashMap<String, String>, ApiError> {
        Ok(self.headers.clone())
    }
}
