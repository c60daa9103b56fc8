use crate::config::{BatchConfigUpdate, BatchingConfig};
use crate::events::{BatchEvent, FlushReason};
use crate::pattern::{compile_all, EndpointPattern};
use api_resilience_core::events::{EventListeners, FnListener};
use api_resilience_core::{stable_hash, ApiError, BatchError, RequestExecutor, RequestOptions};
use futures::future::join_all;
use hashbrown::HashMap;
#[cfg(feature = "metrics")]
use metrics::{counter, describe_counter};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

type Outcome<R> = Result<R, ApiError>;

/// Dedup key of a request: SHA-256 over endpoint, method, body and query.
///
/// Headers are not part of the key.
pub fn dedup_key(endpoint: &str, options: &RequestOptions) -> String {
    let query: Map<String, Value> = options
        .query
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    let mut fingerprint = Map::new();
    fingerprint.insert("endpoint".to_string(), Value::String(endpoint.to_string()));
    fingerprint.insert(
        "method".to_string(),
        Value::String(options.method.as_str().to_string()),
    );
    fingerprint.insert(
        "body".to_string(),
        options.body.clone().unwrap_or(Value::Null),
    );
    fingerprint.insert("query".to_string(), Value::Object(query));
    stable_hash(&Value::Object(fingerprint))
}

#[cfg(feature = "metrics")]
fn describe_metrics() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        describe_counter!(
            "batch_requests_total",
            "Requests handled by the batch manager, by outcome"
        );
        describe_counter!("batch_flushes_total", "Batch groups dispatched, by reason");
    });
}

/// Point-in-time counters for a [`BatchManager`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchStats {
    /// Requests accepted by `add_to_batch` while enabled.
    pub total_requests: u64,
    /// Requests that created a new pending entry.
    pub batched_requests: u64,
    /// Requests that joined an identical pending entry.
    pub deduplicated_requests: u64,
    /// Requests for non-batchable endpoints, executed directly.
    pub immediate_requests: u64,
    pub size_flushes: u64,
    pub timeout_flushes: u64,
    /// Distinct entries handed to the executor by flushes.
    pub dispatched_entries: u64,
    pub pending_groups: usize,
    pub pending_entries: usize,
    /// Mean number of entries per flush (0.0 before the first flush).
    pub average_batch_size: f64,
}

#[derive(Default)]
struct Counters {
    total: AtomicU64,
    batched: AtomicU64,
    deduplicated: AtomicU64,
    immediate: AtomicU64,
    size_flushes: AtomicU64,
    timeout_flushes: AtomicU64,
    dispatched_entries: AtomicU64,
}

struct PendingEntry<R> {
    dedup_key: String,
    endpoint: String,
    options: RequestOptions,
    sender: broadcast::Sender<Outcome<R>>,
    waiters: usize,
    enqueued_at: Instant,
}

struct BatchGroup<R> {
    generation: u64,
    entries: Vec<PendingEntry<R>>,
}

struct Settings {
    config: BatchingConfig,
    patterns: Vec<EndpointPattern>,
}

impl Settings {
    fn new(config: BatchingConfig) -> Result<Self, ApiError> {
        let patterns = compile_patterns(&config.batchable_endpoints)?;
        Ok(Self { config, patterns })
    }
}

fn compile_patterns(endpoints: &[String]) -> Result<Vec<EndpointPattern>, ApiError> {
    compile_all(endpoints).map_err(|(pattern, e)| ApiError::Validation {
        message: format!("invalid batchable endpoint '{pattern}': {e}"),
        field: Some("batchable_endpoints".to_string()),
    })
}

/// Groups requests to batchable endpoints and collapses identical ones.
///
/// Requests whose endpoint matches a `batchable_endpoints` pattern wait in
/// that pattern's group until it holds `max_batch_size` distinct entries or
/// `batch_timeout_ms` has passed since its first entry. A flush sends every
/// distinct entry to the executor concurrently. Identical requests (same
/// endpoint, method, body and query) arriving while an entry is pending
/// share that entry's outcome, so the executor runs once for all of them.
///
/// Flushes run on spawned tokio tasks, so a caller that stops waiting does
/// not cancel the executor call other waiters depend on.
pub struct BatchManager<R> {
    inner: Arc<Inner<R>>,
}

struct Inner<R> {
    name: String,
    executor: Arc<dyn RequestExecutor<Response = R>>,
    settings: RwLock<Settings>,
    groups: Mutex<HashMap<String, BatchGroup<R>>>,
    generation: AtomicU64,
    counters: Counters,
    listeners: EventListeners<BatchEvent>,
}

impl<R> Clone for BatchManager<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R> std::fmt::Debug for BatchManager<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchManager")
            .field("name", &self.inner.name)
            .field("config", &self.inner.settings.read().config)
            .finish_non_exhaustive()
    }
}

impl<R> BatchManager<R>
where
    R: Clone + Send + Sync + 'static,
{
    /// Creates a manager without listeners.
    pub fn new<E>(executor: E, config: BatchingConfig) -> Result<Self, ApiError>
    where
        E: RequestExecutor<Response = R> + 'static,
    {
        Self::builder(executor).config(config).build()
    }

    pub fn builder<E>(executor: E) -> BatchManagerBuilder<R>
    where
        E: RequestExecutor<Response = R> + 'static,
    {
        BatchManagerBuilder::new(Arc::new(executor))
    }

    /// Builder over an executor that is shared with other components.
    pub fn builder_shared(executor: Arc<dyn RequestExecutor<Response = R>>) -> BatchManagerBuilder<R> {
        BatchManagerBuilder::new(executor)
    }

    /// The current configuration.
    pub fn config(&self) -> BatchingConfig {
        self.inner.settings.read().config.clone()
    }

    /// Returns true if `endpoint` matches a batchable pattern.
    pub fn is_batchable(&self, endpoint: &str) -> bool {
        self.inner
            .settings
            .read()
            .patterns
            .iter()
            .any(|p| p.matches(endpoint))
    }

    /// Sends a request through the batcher.
    ///
    /// Fails immediately with [`BatchError::Disabled`] when batching is off,
    /// and with [`BatchError::Cleared`] if [`clear`](Self::clear) runs while
    /// the request is pending. Otherwise the result is the executor's outcome
    /// for this request (or the identical request it was collapsed into).
    pub async fn add_to_batch(&self, endpoint: &str, options: RequestOptions) -> Result<R, ApiError> {
        let (enabled, pattern, max_batch_size, timeout) = {
            let settings = self.inner.settings.read();
            (
                settings.config.enabled,
                settings
                    .patterns
                    .iter()
                    .find(|p| p.matches(endpoint))
                    .map(|p| p.as_str().to_string()),
                settings.config.max_batch_size.max(1),
                settings.config.batch_timeout(),
            )
        };

        if !enabled {
            return Err(BatchError::Disabled.into());
        }
        self.inner.counters.total.fetch_add(1, Ordering::Relaxed);

        let Some(pattern) = pattern else {
            self.inner.counters.immediate.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(endpoint, "endpoint not batchable; executing immediately");
            #[cfg(feature = "metrics")]
            counter!("batch_requests_total", "batch" => self.inner.name.clone(), "outcome" => "immediate").increment(1);
            return self.inner.executor.execute(endpoint, &options).await;
        };

        let key = dedup_key(endpoint, &options);
        let mut start_timer = None;
        let mut flush = None;
        let (mut receiver, event) = {
            let mut groups = self.inner.groups.lock();
            let group = groups.entry(pattern.clone()).or_insert_with(|| {
                let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
                start_timer = Some(generation);
                BatchGroup {
                    generation,
                    entries: Vec::new(),
                }
            });

            let joined = match group.entries.iter_mut().find(|e| e.dedup_key == key) {
                Some(entry) => {
                    entry.waiters += 1;
                    Some((entry.sender.subscribe(), entry.waiters))
                }
                None => None,
            };

            match joined {
                Some((receiver, waiters)) => (
                    receiver,
                    BatchEvent::Deduplicated {
                        name: self.inner.name.clone(),
                        timestamp: Instant::now(),
                        pattern: pattern.clone(),
                        dedup_key: key,
                        waiters,
                    },
                ),
                None => {
                    let (sender, receiver) = broadcast::channel(1);
                    group.entries.push(PendingEntry {
                        dedup_key: key.clone(),
                        endpoint: endpoint.to_string(),
                        options,
                        sender,
                        waiters: 1,
                        enqueued_at: Instant::now(),
                    });
                    if group.entries.len() >= max_batch_size {
                        flush = groups.remove(&pattern);
                    }
                    (
                        receiver,
                        BatchEvent::Enqueued {
                            name: self.inner.name.clone(),
                            timestamp: Instant::now(),
                            pattern: pattern.clone(),
                            dedup_key: key,
                        },
                    )
                }
            }
        };

        match &event {
            BatchEvent::Deduplicated { waiters, .. } => {
                self.inner.counters.deduplicated.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(endpoint, pattern = %pattern, waiters, "request deduplicated");
                #[cfg(feature = "metrics")]
                counter!("batch_requests_total", "batch" => self.inner.name.clone(), "outcome" => "deduplicated").increment(1);
            }
            _ => {
                self.inner.counters.batched.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(endpoint, pattern = %pattern, "request enqueued");
                #[cfg(feature = "metrics")]
                counter!("batch_requests_total", "batch" => self.inner.name.clone(), "outcome" => "batched").increment(1);
            }
        }
        self.inner.listeners.emit(&event);

        if let Some(group) = flush {
            self.dispatch(pattern, group, FlushReason::Size);
        } else if let Some(generation) = start_timer {
            self.schedule_flush(pattern, generation, timeout);
        }

        match receiver.recv().await {
            Ok(outcome) => outcome,
            Err(_) => Err(BatchError::Abandoned.into()),
        }
    }

    /// Rejects every pending request with [`BatchError::Cleared`].
    ///
    /// Executor calls already dispatched keep running. Returns the number of
    /// distinct entries rejected.
    pub fn clear(&self) -> usize {
        let drained: Vec<BatchGroup<R>> = {
            let mut groups = self.inner.groups.lock();
            groups.drain().map(|(_, group)| group).collect()
        };

        let mut rejected = 0;
        for group in drained {
            for entry in group.entries {
                rejected += 1;
                let _ = entry.sender.send(Err(BatchError::Cleared.into()));
            }
        }

        tracing::debug!(rejected, "batch manager cleared");
        self.inner.listeners.emit(&BatchEvent::Cleared {
            name: self.inner.name.clone(),
            timestamp: Instant::now(),
            rejected_entries: rejected,
        });
        rejected
    }

    /// Applies a partial configuration update.
    ///
    /// Patterns are recompiled when `batchable_endpoints` is set. Pending
    /// groups keep their timers and are flushed under the new size limit on
    /// their next enqueue.
    pub fn update_config(&self, update: BatchConfigUpdate) -> Result<(), ApiError> {
        let mut settings = self.inner.settings.write();
        let config = settings.config.merged(&update);
        if update.batchable_endpoints.is_some() {
            settings.patterns = compile_patterns(&config.batchable_endpoints)?;
        }
        tracing::debug!(?config, "batch configuration updated");
        settings.config = config;
        Ok(())
    }

    pub fn stats(&self) -> BatchStats {
        let (pending_groups, pending_entries) = {
            let groups = self.inner.groups.lock();
            (
                groups.len(),
                groups.values().map(|g| g.entries.len()).sum(),
            )
        };
        let c = &self.inner.counters;
        let size_flushes = c.size_flushes.load(Ordering::Relaxed);
        let timeout_flushes = c.timeout_flushes.load(Ordering::Relaxed);
        let dispatched_entries = c.dispatched_entries.load(Ordering::Relaxed);
        let flushes = size_flushes + timeout_flushes;
        BatchStats {
            total_requests: c.total.load(Ordering::Relaxed),
            batched_requests: c.batched.load(Ordering::Relaxed),
            deduplicated_requests: c.deduplicated.load(Ordering::Relaxed),
            immediate_requests: c.immediate.load(Ordering::Relaxed),
            size_flushes,
            timeout_flushes,
            dispatched_entries,
            pending_groups,
            pending_entries,
            average_batch_size: if flushes == 0 {
                0.0
            } else {
                dispatched_entries as f64 / flushes as f64
            },
        }
    }

    fn schedule_flush(&self, pattern: String, generation: u64, timeout: Duration) {
        let manager = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let group = {
                let mut groups = manager.inner.groups.lock();
                let current = groups.get(&pattern).map(|g| g.generation);
                if current == Some(generation) {
                    groups.remove(&pattern)
                } else {
                    None
                }
            };
            if let Some(group) = group {
                manager.dispatch(pattern, group, FlushReason::Timeout);
            }
        });
    }

    fn dispatch(&self, pattern: String, group: BatchGroup<R>, reason: FlushReason) {
        let size = group.entries.len();
        let counters = &self.inner.counters;
        match reason {
            FlushReason::Size => counters.size_flushes.fetch_add(1, Ordering::Relaxed),
            FlushReason::Timeout => counters.timeout_flushes.fetch_add(1, Ordering::Relaxed),
        };
        counters
            .dispatched_entries
            .fetch_add(size as u64, Ordering::Relaxed);

        let oldest_wait = group
            .entries
            .iter()
            .map(|e| e.enqueued_at.elapsed())
            .max()
            .unwrap_or_default();
        tracing::debug!(
            pattern = %pattern,
            size,
            reason = reason.as_str(),
            ?oldest_wait,
            "flushing batch"
        );
        #[cfg(feature = "metrics")]
        counter!("batch_flushes_total", "batch" => self.inner.name.clone(), "reason" => reason.as_str()).increment(1);

        self.inner.listeners.emit(&BatchEvent::Flushed {
            name: self.inner.name.clone(),
            timestamp: Instant::now(),
            pattern,
            size,
            reason,
        });

        let executor = Arc::clone(&self.inner.executor);
        tokio::spawn(async move {
            join_all(group.entries.into_iter().map(|entry| {
                let executor = Arc::clone(&executor);
                async move {
                    let outcome = executor.execute(&entry.endpoint, &entry.options).await;
                    let _ = entry.sender.send(outcome);
                }
            }))
            .await;
        });
    }
}

/// Builder for [`BatchManager`].
pub struct BatchManagerBuilder<R> {
    executor: Arc<dyn RequestExecutor<Response = R>>,
    config: BatchingConfig,
    name: String,
    listeners: EventListeners<BatchEvent>,
}

impl<R> BatchManagerBuilder<R>
where
    R: Clone + Send + Sync + 'static,
{
    fn new(executor: Arc<dyn RequestExecutor<Response = R>>) -> Self {
        Self {
            executor,
            config: BatchingConfig::default(),
            name: "<unnamed>".to_string(),
            listeners: EventListeners::new(),
        }
    }

    pub fn config(mut self, config: BatchingConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the name for this manager (used in events and metrics).
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    /// Registers a callback when a group is flushed.
    ///
    /// # Callback Signature
    /// `Fn(&str, usize, FlushReason)` - the matched pattern, the number of
    /// distinct entries dispatched and why the flush happened.
    pub fn on_flush<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, usize, FlushReason) + Send + Sync + 'static,
    {
        self.listeners.add(FnListener::new(move |event: &BatchEvent| {
            if let BatchEvent::Flushed {
                pattern,
                size,
                reason,
                ..
            } = event
            {
                f(pattern, *size, *reason);
            }
        }));
        self
    }

    /// Registers a callback when a request is collapsed into a pending one.
    pub fn on_deduplicated<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, usize) + Send + Sync + 'static,
    {
        self.listeners.add(FnListener::new(move |event: &BatchEvent| {
            if let BatchEvent::Deduplicated {
                pattern, waiters, ..
            } = event
            {
                f(pattern, *waiters);
            }
        }));
        self
    }

    /// Registers a listener for every batch event.
    pub fn listener<F>(mut self, f: F) -> Self
    where
        F: Fn(&BatchEvent) + Send + Sync + 'static,
    {
        self.listeners.add(FnListener::new(f));
        self
    }

    /// Builds the manager, failing if a batchable pattern does not compile.
    pub fn build(self) -> Result<BatchManager<R>, ApiError> {
        #[cfg(feature = "metrics")]
        describe_metrics();

        Ok(BatchManager {
            inner: Arc::new(Inner {
                name: self.name,
                executor: self.executor,
                settings: RwLock::new(Settings::new(self.config)?),
                groups: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                counters: Counters::default(),
                listeners: self.listeners,
            }),
        })
    }
}
