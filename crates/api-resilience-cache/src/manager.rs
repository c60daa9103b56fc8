use crate::config::{CacheConfig, StorageKind};
use crate::envelope::Envelope;
use crate::error::CacheError;
use crate::events::CacheEvent;
use crate::storage::{CacheStorage, MemoryStorage, WebStorage};
use api_resilience_core::clock::millis_after;
use api_resilience_core::events::{EventListeners, FnListener};
use api_resilience_core::{now_millis, stable_hash};
#[cfg(feature = "metrics")]
use metrics::{counter, describe_counter};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

#[cfg(feature = "metrics")]
fn describe_metrics() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        describe_counter!(
            "cache_requests_total",
            "Total number of cache requests (hits and misses)"
        );
        describe_counter!(
            "cache_errors_total",
            "Cache storage failures swallowed by the cache manager"
        );
    });
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    /// Entries removed by the pattern, prefix and tag helpers.
    pub invalidations: u64,
    /// Expired entries removed by `cleanup`.
    pub expired_purged: u64,
    /// Entries dropped by the backend's size bound.
    pub evictions: u64,
    /// Storage failures that were logged and swallowed.
    pub errors: u64,
    /// `hits / (hits + misses)`, 0.0 before the first lookup.
    pub hit_rate: f64,
    /// Entries currently stored, expired ones included.
    pub size: usize,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    invalidations: AtomicU64,
    expired_purged: AtomicU64,
    evictions: AtomicU64,
    errors: AtomicU64,
}

/// TTL and tag aware cache over a pluggable [`CacheStorage`].
///
/// Values are stored as JSON envelopes, so any `Serialize` type can be
/// cached and read back as any compatible `DeserializeOwned` type. The
/// cache is best-effort: backend failures are logged with `tracing`,
/// counted in [`CacheStats::errors`] and reported to the caller as a miss
/// or a no-op.
///
/// Clones share the same storage and counters.
#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    config: CacheConfig,
    storage: Arc<dyn CacheStorage>,
    counters: Counters,
    listeners: EventListeners<CacheEvent>,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("name", &self.inner.name)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl CacheManager {
    /// Creates a manager with the backend named by `config.storage`.
    ///
    /// Fails for [`StorageKind::LocalStorage`] without a usable
    /// `persistent_path`, and for [`StorageKind::Custom`] (use
    /// [`with_storage`](Self::with_storage)).
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        Self::builder().config(config).build()
    }

    /// Creates a manager over a caller-supplied backend.
    pub fn with_storage<S>(config: CacheConfig, storage: S) -> Self
    where
        S: CacheStorage + 'static,
    {
        Self::from_parts(
            "<unnamed>".to_string(),
            CacheConfig {
                storage: StorageKind::Custom,
                ..config
            },
            Arc::new(storage),
            EventListeners::new(),
        )
    }

    pub fn builder() -> CacheManagerBuilder {
        CacheManagerBuilder::new()
    }

    fn from_parts(
        name: String,
        config: CacheConfig,
        storage: Arc<dyn CacheStorage>,
        listeners: EventListeners<CacheEvent>,
    ) -> Self {
        #[cfg(feature = "metrics")]
        describe_metrics();

        Self {
            inner: Arc::new(Inner {
                name,
                config,
                storage,
                counters: Counters::default(),
                listeners,
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.config.enabled
    }

    /// Deterministic key for an endpoint and its parameters.
    ///
    /// Object keys in `params` are sorted before hashing, so parameter
    /// order does not change the key.
    pub fn generate_key(endpoint: &str, params: &serde_json::Value) -> String {
        format!("{}:{}", endpoint, stable_hash(params))
    }

    /// Returns the live value under `key`.
    ///
    /// Expired entries read as `None` but stay stored until
    /// [`cleanup`](Self::cleanup) or an overwrite removes them.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.is_enabled() {
            return None;
        }

        let value = match self.read_envelope("get", key).await {
            Some(envelope) if !envelope.is_expired(now_millis()) => {
                match envelope.into_value(key) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        self.record_error("get", Some(key), &e);
                        None
                    }
                }
            }
            _ => None,
        };

        self.record_lookup(key, value.is_some());
        value
    }

    /// Stores `value` under `key` for `ttl`, or the default TTL.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        self.set_tagged(key, value, ttl, Vec::<String>::new()).await;
    }

    /// Stores `value` under `key` with tags for [`invalidate_by_tags`](Self::invalidate_by_tags).
    pub async fn set_tagged<T, I, S>(&self, key: &str, value: &T, ttl: Option<Duration>, tags: I)
    where
        T: Serialize,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if !self.is_enabled() {
            return;
        }

        let ttl = ttl.unwrap_or_else(|| self.inner.config.default_ttl());
        let expires_at = millis_after(now_millis(), ttl);
        let tags = tags.into_iter().map(Into::into).collect();
        let encoded = Envelope::new(value, expires_at, tags, self.inner.config.compression_enabled)
            .and_then(|envelope| envelope.encode());
        let raw = match encoded {
            Ok(raw) => raw,
            Err(e) => {
                self.record_error("set", Some(key), &e);
                return;
            }
        };

        match self.inner.storage.set(key, raw).await {
            Ok(evicted) => {
                self.inner.counters.sets.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(cache = %self.inner.name, key, ?ttl, "cache set");
                self.emit(CacheEvent::Set {
                    name: self.inner.name.clone(),
                    timestamp: Instant::now(),
                    key: key.to_string(),
                    ttl,
                });
                if let Some(evicted) = evicted {
                    self.inner.counters.evictions.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(cache = %self.inner.name, key = %evicted, "cache eviction");
                    self.emit(CacheEvent::Eviction {
                        name: self.inner.name.clone(),
                        timestamp: Instant::now(),
                        key: evicted,
                    });
                }
            }
            Err(e) => self.record_error("set", Some(key), &e),
        }
    }

    /// Removes `key`. Returns whether an entry was removed.
    pub async fn delete(&self, key: &str) -> bool {
        if !self.is_enabled() {
            return false;
        }
        match self.inner.storage.delete(key).await {
            Ok(removed) => {
                if removed {
                    self.inner.counters.deletes.fetch_add(1, Ordering::Relaxed);
                }
                removed
            }
            Err(e) => {
                self.record_error("delete", Some(key), &e);
                false
            }
        }
    }

    /// Returns true if a live entry exists. Does not count as a hit or miss.
    pub async fn has(&self, key: &str) -> bool {
        if !self.is_enabled() {
            return false;
        }
        self.read_envelope("has", key)
            .await
            .is_some_and(|envelope| !envelope.is_expired(now_millis()))
    }

    pub async fn clear(&self) {
        if !self.is_enabled() {
            return;
        }
        match self.inner.storage.clear().await {
            Ok(()) => tracing::debug!(cache = %self.inner.name, "cache cleared"),
            Err(e) => self.record_error("clear", None, &e),
        }
    }

    /// Removes every entry whose key matches `pattern`.
    pub async fn invalidate_by_pattern(&self, pattern: &Regex) -> usize {
        let removed = self
            .remove_where("pattern", |key, _| pattern.is_match(key), false)
            .await;
        self.inner
            .counters
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Removes every entry whose key starts with `prefix`.
    pub async fn invalidate_by_prefix(&self, prefix: &str) -> usize {
        let removed = self
            .remove_where("prefix", |key, _| key.starts_with(prefix), false)
            .await;
        self.inner
            .counters
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Removes every entry carrying at least one of `tags`.
    pub async fn invalidate_by_tags<I, S>(&self, tags: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags: Vec<String> = tags.into_iter().map(Into::into).collect();
        let removed = self
            .remove_where(
                "tags",
                |_, envelope| envelope.is_some_and(|e| e.has_any_tag(&tags)),
                true,
            )
            .await;
        self.inner
            .counters
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Purges expired entries. Unreadable entries are purged as well.
    pub async fn cleanup(&self) -> usize {
        let now = now_millis();
        let removed = self
            .remove_where(
                "expired",
                |_, envelope| envelope.map_or(true, |e| e.is_expired(now)),
                true,
            )
            .await;
        self.inner
            .counters
            .expired_purged
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Returns the cached value, or runs `loader` and caches its result.
    ///
    /// Loader errors are returned unchanged and nothing is cached.
    pub async fn get_or_insert_with<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        loader: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }
        let value = loader().await?;
        self.set(key, &value, ttl).await;
        Ok(value)
    }

    /// Runs [`cleanup`](Self::cleanup) every `interval` on the current
    /// tokio runtime until the handle is aborted.
    pub fn spawn_cleanup(&self, interval: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = manager.cleanup().await;
                if purged > 0 {
                    tracing::debug!(cache = %manager.inner.name, purged, "periodic cache cleanup");
                }
            }
        })
    }

    pub async fn stats(&self) -> CacheStats {
        let size = match self.inner.storage.size().await {
            Ok(size) => size,
            Err(e) => {
                self.record_error("size", None, &e);
                0
            }
        };
        let c = &self.inner.counters;
        let hits = c.hits.load(Ordering::Relaxed);
        let misses = c.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            hits,
            misses,
            sets: c.sets.load(Ordering::Relaxed),
            deletes: c.deletes.load(Ordering::Relaxed),
            invalidations: c.invalidations.load(Ordering::Relaxed),
            expired_purged: c.expired_purged.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            errors: c.errors.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            size,
        }
    }

    async fn read_envelope(&self, operation: &'static str, key: &str) -> Option<Envelope> {
        let raw = match self.inner.storage.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                self.record_error(operation, Some(key), &e);
                return None;
            }
        };
        match Envelope::decode(key, &raw) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                self.record_error(operation, Some(key), &e);
                None
            }
        }
    }

    /// Deletes every key for which `predicate` holds and returns the count.
    ///
    /// The envelope is only read when `needs_envelope` is set; unreadable
    /// entries are passed as `None`.
    async fn remove_where<P>(&self, reason: &'static str, predicate: P, needs_envelope: bool) -> usize
    where
        P: Fn(&str, Option<&Envelope>) -> bool,
    {
        if !self.is_enabled() {
            return 0;
        }
        let keys = match self.inner.storage.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                self.record_error(reason, None, &e);
                return 0;
            }
        };

        let mut removed = 0;
        for key in keys {
            let envelope = if needs_envelope {
                match self.inner.storage.get(&key).await {
                    Ok(Some(raw)) => Envelope::decode(&key, &raw).ok(),
                    // Gone since the key scan.
                    Ok(None) => continue,
                    Err(e) => {
                        self.record_error(reason, Some(&key), &e);
                        continue;
                    }
                }
            } else {
                None
            };
            if !predicate(&key, envelope.as_ref()) {
                continue;
            }
            match self.inner.storage.delete(&key).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => self.record_error(reason, Some(&key), &e),
            }
        }

        if removed > 0 {
            tracing::debug!(cache = %self.inner.name, reason, removed, "cache entries invalidated");
            self.emit(CacheEvent::Invalidated {
                name: self.inner.name.clone(),
                timestamp: Instant::now(),
                reason,
                count: removed,
            });
        }
        removed
    }

    fn record_lookup(&self, key: &str, hit: bool) {
        let name = &self.inner.name;
        if hit {
            self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(cache = %name, key, "cache hit");
            #[cfg(feature = "metrics")]
            counter!("cache_requests_total", "cache" => name.clone(), "result" => "hit").increment(1);
            self.emit(CacheEvent::Hit {
                name: name.clone(),
                timestamp: Instant::now(),
                key: key.to_string(),
            });
        } else {
            self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(cache = %name, key, "cache miss");
            #[cfg(feature = "metrics")]
            counter!("cache_requests_total", "cache" => name.clone(), "result" => "miss").increment(1);
            self.emit(CacheEvent::Miss {
                name: name.clone(),
                timestamp: Instant::now(),
                key: key.to_string(),
            });
        }
    }

    fn record_error(&self, operation: &'static str, key: Option<&str>, error: &CacheError) {
        self.inner.counters.errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            cache = %self.inner.name,
            operation,
            key,
            error = %error,
            "cache storage operation failed"
        );
        #[cfg(feature = "metrics")]
        counter!("cache_errors_total", "cache" => self.inner.name.clone(), "operation" => operation).increment(1);
    }

    fn emit(&self, event: CacheEvent) {
        self.inner.listeners.emit(&event);
    }
}

/// Builder for [`CacheManager`].
pub struct CacheManagerBuilder {
    config: CacheConfig,
    storage: Option<Arc<dyn CacheStorage>>,
    name: String,
    listeners: EventListeners<CacheEvent>,
}

impl Default for CacheManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheManagerBuilder {
    pub fn new() -> Self {
        Self {
            config: CacheConfig::default(),
            storage: None,
            name: String::from("<unnamed>"),
            listeners: EventListeners::new(),
        }
    }

    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses a caller-supplied backend regardless of `config.storage`.
    pub fn storage<S>(mut self, storage: S) -> Self
    where
        S: CacheStorage + 'static,
    {
        self.storage = Some(Arc::new(storage));
        self
    }

    /// Sets the name for this cache (used in events, logs and metrics).
    pub fn name<N: Into<String>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    /// Registers a callback on cache hits.
    ///
    /// # Callback Signature
    /// `Fn(&str)` - called with the key that was found.
    pub fn on_hit<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.listeners.add(FnListener::new(move |event: &CacheEvent| {
            if let CacheEvent::Hit { key, .. } = event {
                f(key);
            }
        }));
        self
    }

    /// Registers a callback on cache misses.
    pub fn on_miss<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.listeners.add(FnListener::new(move |event: &CacheEvent| {
            if let CacheEvent::Miss { key, .. } = event {
                f(key);
            }
        }));
        self
    }

    /// Registers a callback when the backend evicts an entry.
    pub fn on_eviction<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.listeners.add(FnListener::new(move |event: &CacheEvent| {
            if let CacheEvent::Eviction { key, .. } = event {
                f(key);
            }
        }));
        self
    }

    /// Registers a listener for every cache event.
    pub fn listener<F>(mut self, f: F) -> Self
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        self.listeners.add(FnListener::new(f));
        self
    }

    pub fn build(self) -> Result<CacheManager, CacheError> {
        let mut config = self.config;
        let storage: Arc<dyn CacheStorage> = match self.storage {
            Some(storage) => {
                config.storage = StorageKind::Custom;
                storage
            }
            None => match config.storage {
                StorageKind::Memory => Arc::new(MemoryStorage::new(config.max_size)),
                StorageKind::SessionStorage => {
                    Arc::new(WebStorage::session(config.key_prefix.clone()))
                }
                StorageKind::LocalStorage => {
                    let path = config.persistent_path.as_ref().ok_or_else(|| {
                        CacheError::Config("local_storage requires persistent_path".to_string())
                    })?;
                    Arc::new(WebStorage::persistent(path, config.key_prefix.clone())?)
                }
                StorageKind::Custom => {
                    return Err(CacheError::Config(
                        "custom storage selected but no backend was supplied".to_string(),
                    ))
                }
            },
        };

        tracing::debug!(cache = %self.name, storage = ?config.storage, "cache manager created");
        Ok(CacheManager::from_parts(
            self.name,
            config,
            storage,
            self.listeners,
        ))
    }
}
