use crate::config::ResilienceConfig;
use api_resilience_batch::{BatchManager, BatchStats};
use api_resilience_cache::{CacheManager, CacheStats, CacheStorage};
use api_resilience_core::{
    ApiError, AuthHeaderProvider, CircuitBreakerStats, RequestExecutor, RequestOptions,
};
use api_resilience_retry::{CircuitBreakerPersistence, RetryManager};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;

/// Executor wrapper adding the per-attempt timeout, retries and circuit
/// breaking. The batch manager dispatches through it, so a batched request
/// is retried on its own without holding back the rest of its batch.
struct GuardedExecutor<R> {
    executor: Arc<dyn RequestExecutor<Response = R>>,
    retry: RetryManager,
}

async fn attempt<R: Send + 'static>(
    executor: &dyn RequestExecutor<Response = R>,
    endpoint: &str,
    options: &RequestOptions,
) -> Result<R, ApiError> {
    let call = executor.execute(endpoint, options);
    match options.timeout {
        Some(limit) => tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
            Err(ApiError::timeout(limit).with_correlation_id(options.correlation_id.as_deref()))
        }),
        None => call.await,
    }
}

#[async_trait]
impl<R: Send + 'static> RequestExecutor for GuardedExecutor<R> {
    type Response = R;

    async fn execute(&self, endpoint: &str, options: &RequestOptions) -> Result<R, ApiError> {
        let context = options.context_for(endpoint);
        self.retry
            .execute(|| attempt(self.executor.as_ref(), endpoint, options), &context)
            .await
    }
}

/// Headers that identify the caller. Their values are part of the cache
/// key, so a response cached for one credential is never served to another.
const CREDENTIAL_HEADERS: &[&str] = &["authorization", "cookie", "x-api-key"];

/// Aggregated statistics of every manager behind a client.
#[derive(Debug, Clone)]
pub struct ClientStats {
    pub circuit_breakers: HashMap<String, CircuitBreakerStats>,
    pub batch: BatchStats,
    pub cache: CacheStats,
}

/// An API client front end composing every resilience manager.
///
/// A request goes through these stages in order:
///
/// 1. headers from the [`AuthHeaderProvider`] are merged in (headers already
///    on the request win);
/// 2. safe methods (`GET`, `HEAD`, `OPTIONS`) are answered from the cache
///    unless the request sets `skip_cache`;
/// 3. the batch manager groups and deduplicates batchable endpoints;
/// 4. the retry manager retries transient failures behind the endpoint's
///    circuit breaker;
/// 5. the executor performs the call, bounded by the request timeout.
///
/// Successful cacheable responses are stored with the request's TTL and tags.
/// The client is cheap to clone and implements [`tower::Service`] for
/// [`ApiRequest`].
pub struct ResilientClient<R> {
    inner: Arc<ClientInner<R>>,
}

struct ClientInner<R> {
    name: String,
    guarded: Arc<GuardedExecutor<R>>,
    auth: Option<Arc<dyn AuthHeaderProvider>>,
    batch: BatchManager<R>,
    cache: CacheManager,
}

impl<R> Clone for ResilientClient<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R> std::fmt::Debug for ResilientClient<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl<R> ResilientClient<R>
where
    R: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn builder<E>(executor: E) -> ResilientClientBuilder<R>
    where
        E: RequestExecutor<Response = R> + 'static,
    {
        ResilientClientBuilder::new(Arc::new(executor))
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Executes a request through the full pipeline.
    pub async fn execute(&self, endpoint: &str, mut options: RequestOptions) -> Result<R, ApiError> {
        if let Some(auth) = &self.inner.auth {
            for (key, value) in auth.headers().await? {
                options.headers.entry(key).or_insert(value);
            }
        }

        let cache_key = self.cache_key(endpoint, &options);
        if let Some(key) = &cache_key {
            if let Some(hit) = self.inner.cache.get::<R>(key).await {
                return Ok(hit);
            }
        }

        let ttl = options.cache_ttl;
        let tags = options.cache_tags.clone();
        let correlation_id = options.correlation_id.clone();
        let result = if self.inner.batch.config().enabled {
            self.inner.batch.add_to_batch(endpoint, options).await
        } else {
            self.inner.guarded.execute(endpoint, &options).await
        }
        .map_err(|e| e.with_correlation_id(correlation_id.as_deref()));

        if let (Ok(response), Some(key)) = (&result, &cache_key) {
            self.inner.cache.set_tagged(key, response, ttl, tags).await;
        }
        result
    }

    /// Cache key for a cacheable request, `None` otherwise.
    fn cache_key(&self, endpoint: &str, options: &RequestOptions) -> Option<String> {
        if !self.inner.cache.is_enabled() || options.skip_cache || !options.method.is_safe() {
            return None;
        }
        let query: Map<String, Value> = options
            .query
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        let mut params = Map::new();
        params.insert(
            "method".to_string(),
            Value::String(options.method.as_str().to_string()),
        );
        params.insert("query".to_string(), Value::Object(query));
        params.insert(
            "body".to_string(),
            options.body.clone().unwrap_or(Value::Null),
        );
        let credentials: Map<String, Value> = options
            .headers
            .iter()
            .filter_map(|(name, value)| {
                let name = name.to_ascii_lowercase();
                CREDENTIAL_HEADERS
                    .contains(&name.as_str())
                    .then(|| (name, Value::String(value.clone())))
            })
            .collect();
        if !credentials.is_empty() {
            params.insert("credentials".to_string(), Value::Object(credentials));
        }
        Some(CacheManager::generate_key(endpoint, &Value::Object(params)))
    }

    pub fn retry_manager(&self) -> &RetryManager {
        &self.inner.guarded.retry
    }

    pub fn batch_manager(&self) -> &BatchManager<R> {
        &self.inner.batch
    }

    pub fn cache_manager(&self) -> &CacheManager {
        &self.inner.cache
    }

    pub async fn stats(&self) -> ClientStats {
        ClientStats {
            circuit_breakers: self.inner.guarded.retry.all_circuit_breaker_stats(),
            batch: self.inner.batch.stats(),
            cache: self.inner.cache.stats().await,
        }
    }
}

/// A request as seen by the [`tower::Service`] impl of [`ResilientClient`].
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub endpoint: String,
    pub options: RequestOptions,
}

impl ApiRequest {
    pub fn new(endpoint: impl Into<String>, options: RequestOptions) -> Self {
        Self {
            endpoint: endpoint.into(),
            options,
        }
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(endpoint, RequestOptions::get())
    }
}

impl<R> Service<ApiRequest> for ResilientClient<R>
where
    R: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Response = R;
    type Error = ApiError;
    type Future = BoxFuture<'static, Result<R, ApiError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: ApiRequest) -> Self::Future {
        let client = self.clone();
        Box::pin(async move { client.execute(&request.endpoint, request.options).await })
    }
}

/// Builder for [`ResilientClient`].
pub struct ResilientClientBuilder<R> {
    executor: Arc<dyn RequestExecutor<Response = R>>,
    config: ResilienceConfig,
    name: String,
    auth: Option<Arc<dyn AuthHeaderProvider>>,
    persistence: Option<Arc<dyn CircuitBreakerPersistence>>,
    cache_storage: Option<Arc<dyn CacheStorage>>,
    retry: Option<RetryManager>,
}

impl<R> ResilientClientBuilder<R>
where
    R: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn new(executor: Arc<dyn RequestExecutor<Response = R>>) -> Self {
        Self {
            executor,
            config: ResilienceConfig::default(),
            name: String::from("<unnamed>"),
            auth: None,
            persistence: None,
            cache_storage: None,
            retry: None,
        }
    }

    pub fn config(mut self, config: ResilienceConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the name passed to every manager (used in events, logs and metrics).
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    pub fn auth_provider<A>(mut self, provider: A) -> Self
    where
        A: AuthHeaderProvider + 'static,
    {
        self.auth = Some(Arc::new(provider));
        self
    }

    /// Persists circuit breaker snapshots to `persistence`.
    pub fn persistence<P>(mut self, persistence: P) -> Self
    where
        P: CircuitBreakerPersistence + 'static,
    {
        self.persistence = Some(Arc::new(persistence));
        self
    }

    /// Stores cache entries in a custom backend instead of the configured one.
    pub fn cache_storage<S>(mut self, storage: S) -> Self
    where
        S: CacheStorage + 'static,
    {
        self.cache_storage = Some(Arc::new(storage));
        self
    }

    /// Uses a preconfigured retry manager, for example one with event
    /// callbacks. Its own retry and breaker configuration take precedence
    /// over `config.retry` and `config.circuit_breaker`, and the
    /// `persistence` setting is ignored.
    pub fn retry_manager(mut self, retry: RetryManager) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn build(self) -> Result<ResilientClient<R>, ApiError> {
        let ResilienceConfig {
            retry: retry_config,
            circuit_breaker,
            batching,
            cache: cache_config,
        } = self.config;

        let retry = match self.retry {
            Some(retry) => retry,
            None => {
                let mut builder = RetryManager::builder()
                    .name(self.name.clone())
                    .retry_config(retry_config)
                    .circuit_breaker_config(circuit_breaker);
                if let Some(persistence) = self.persistence {
                    builder = builder.shared_persistence(persistence);
                }
                builder.build()
            }
        };

        let guarded = Arc::new(GuardedExecutor {
            executor: self.executor,
            retry,
        });
        let dispatch: Arc<dyn RequestExecutor<Response = R>> = guarded.clone();
        let batch = BatchManager::builder_shared(dispatch)
            .name(self.name.clone())
            .config(batching)
            .build()?;

        let mut cache = CacheManager::builder()
            .name(self.name.clone())
            .config(cache_config);
        if let Some(storage) = self.cache_storage {
            cache = cache.storage(storage);
        }
        let cache = cache.build()?;

        tracing::debug!(client = %self.name, "resilient client created");
        Ok(ResilientClient {
            inner: Arc::new(ClientInner {
                name: self.name,
                guarded,
                auth: self.auth,
                batch,
                cache,
            }),
        })
    }
}
