use crate::backoff::{ExponentialRandomBackoff, IntervalFunction};
use crate::circuit::{Admission, Circuit, Transition};
use crate::config::{CircuitBreakerConfig, RetryConfig};
use crate::events::{CircuitBreakerEvent, RetryEvent};
use crate::persistence::CircuitBreakerPersistence;
use api_resilience_core::clock::now_millis;
use api_resilience_core::events::{EventListeners, FnListener};
use api_resilience_core::{ApiError, CircuitBreakerStats, CircuitState, RequestContext};
use futures::future::join_all;
#[cfg(feature = "metrics")]
use metrics::{counter, describe_counter};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

/// Snapshots persisted longer ago than this are discarded on load.
pub const MAX_SNAPSHOT_AGE: Duration = Duration::from_secs(60 * 60);

#[cfg(feature = "metrics")]
fn describe_metrics() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        describe_counter!(
            "retry_calls_total",
            "Calls completed by the retry manager, by outcome"
        );
        describe_counter!(
            "circuitbreaker_transitions_total",
            "Circuit breaker state transitions"
        );
    });
}

/// Retries operations with jittered backoff behind per-endpoint circuit breakers.
///
/// Each distinct `"<endpoint>:<method>"` key gets its own breaker, created
/// on first use. The manager is a cheap handle: clones share breakers,
/// listeners and the persistence backend.
///
/// # Examples
///
/// ```
/// use api_resilience_core::{ApiError, HttpMethod, RequestContext};
/// use api_resilience_retry::{CircuitBreakerConfig, RetryConfig, RetryManager};
///
/// # async fn example() -> Result<(), ApiError> {
/// let manager = RetryManager::builder()
///     .retry_config(RetryConfig { max_attempts: 5, ..RetryConfig::default() })
///     .circuit_breaker_config(CircuitBreakerConfig::default())
///     .on_state_transition(|key, from, to| println!("{key}: {from} -> {to}"))
///     .build();
///
/// let context = RequestContext::new("/users", HttpMethod::Get);
/// let users: Vec<String> = manager
///     .execute(|| async { Ok(vec!["ada".to_string()]) }, &context)
///     .await?;
/// # let _ = users;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RetryManager {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    retry: RetryConfig,
    breaker: CircuitBreakerConfig,
    backoff: Arc<dyn IntervalFunction>,
    circuits: Mutex<HashMap<String, Circuit>>,
    persistence: Option<Arc<dyn CircuitBreakerPersistence>>,
    loaded: OnceCell<usize>,
    retry_listeners: EventListeners<RetryEvent>,
    breaker_listeners: EventListeners<CircuitBreakerEvent>,
}

impl RetryManager {
    /// Creates a manager without persistence or listeners.
    pub fn new(retry: RetryConfig, breaker: CircuitBreakerConfig) -> Self {
        Self::builder()
            .retry_config(retry)
            .circuit_breaker_config(breaker)
            .build()
    }

    pub fn builder() -> RetryManagerBuilder {
        RetryManagerBuilder::new()
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.inner.retry
    }

    pub fn circuit_breaker_config(&self) -> &CircuitBreakerConfig {
        &self.inner.breaker
    }

    /// Runs `operation` with retries, guarded by the breaker for `context`.
    ///
    /// An open breaker fails with [`ApiError::CircuitOpen`] without calling
    /// `operation`. Otherwise the operation is retried while its error is
    /// retryable, and the final outcome is recorded on the breaker once.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: F,
        context: &RequestContext,
    ) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        self.load_persisted_state().await;

        if !self.inner.breaker.enabled {
            return self.run_with_retry(operation, context).await;
        }

        let key = context.circuit_key();
        let (mut guard, transition_snapshot) = self.acquire(&key)?;
        if let Some(snapshot) = transition_snapshot {
            self.persist(&key, snapshot).await;
        }
        let result = self.run_with_retry(operation, context).await;
        let trial = guard.disarm();
        self.record(&key, trial, result.is_ok()).await;
        result
    }

    /// Runs every operation concurrently and returns all outcomes in input order.
    pub async fn execute_all<T, F, Fut>(
        &self,
        operations: Vec<(F, RequestContext)>,
    ) -> Vec<Result<T, ApiError>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        join_all(
            operations
                .into_iter()
                .map(|(operation, context)| async move { self.execute(operation, &context).await }),
        )
        .await
    }

    /// Stats for one circuit key, if that breaker exists.
    pub fn circuit_breaker_stats(&self, key: &str) -> Option<CircuitBreakerStats> {
        self.inner.circuits.lock().get(key).map(Circuit::stats)
    }

    /// Stats for every breaker this manager has created or restored.
    pub fn all_circuit_breaker_stats(&self) -> HashMap<String, CircuitBreakerStats> {
        self.inner
            .circuits
            .lock()
            .iter()
            .map(|(key, circuit)| (key.clone(), circuit.stats()))
            .collect()
    }

    /// Closes the breaker for `key` and clears its counters.
    ///
    /// Returns false if no breaker exists for `key`.
    pub async fn reset_circuit_breaker(&self, key: &str) -> bool {
        self.load_persisted_state().await;
        let now = now_millis();
        let (previous, snapshot) = {
            let mut circuits = self.inner.circuits.lock();
            let Some(circuit) = circuits.get_mut(key) else {
                return false;
            };
            let previous = circuit.state();
            *circuit = Circuit::new(now);
            (previous, circuit.stats())
        };
        tracing::debug!(key, "circuit breaker reset");
        if previous != CircuitState::Closed {
            self.emit_transition(
                key,
                Transition {
                    from: previous,
                    to: CircuitState::Closed,
                },
            );
        }
        self.persist(key, snapshot).await;
        true
    }

    /// Resets every breaker.
    pub async fn reset_all_circuit_breakers(&self) {
        let keys: Vec<String> = {
            self.load_persisted_state().await;
            self.inner.circuits.lock().keys().cloned().collect()
        };
        for key in keys {
            self.reset_circuit_breaker(&key).await;
        }
    }

    /// Restores fresh snapshots from the persistence backend.
    ///
    /// Runs at most once per manager; later calls (including the implicit
    /// one at the start of every [`execute`](Self::execute)) return the count
    /// restored by the first run. Stale snapshots are cleared from the
    /// backend.
    pub async fn load_persisted_state(&self) -> usize {
        *self
            .inner
            .loaded
            .get_or_init(|| self.restore_from_backend())
            .await
    }

    async fn restore_from_backend(&self) -> usize {
        let Some(persistence) = self.inner.persistence.as_ref() else {
            return 0;
        };
        let snapshots = match persistence.load_all().await {
            Ok(snapshots) => snapshots,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load circuit breaker state; continuing in memory");
                return 0;
            }
        };

        let now = now_millis();
        let max_age = MAX_SNAPSHOT_AGE.as_millis() as u64;
        let mut restored = 0;
        for (key, stats) in snapshots {
            if stats.is_fresh(now, max_age) {
                let mut circuits = self.inner.circuits.lock();
                circuits
                    .entry(key)
                    .or_insert_with(|| Circuit::from_stats(&stats, now));
                restored += 1;
            } else {
                tracing::debug!(key = %key, "discarding stale circuit breaker snapshot");
                if let Err(e) = persistence.clear(&key).await {
                    tracing::warn!(key = %key, error = %e, "failed to clear stale circuit breaker snapshot");
                }
            }
        }
        tracing::debug!(restored, "circuit breaker state loaded");
        restored
    }

    /// Admits or rejects a call on `key`.
    ///
    /// When admission moved the circuit to half-open, the snapshot to
    /// persist is returned alongside the guard. It must be saved before the
    /// trial runs so the trial's own outcome is always written after it.
    fn acquire<'a>(
        &'a self,
        key: &'a str,
    ) -> Result<(TrialGuard<'a>, Option<CircuitBreakerStats>), ApiError> {
        let now = now_millis();
        let (admission, stats) = {
            let mut circuits = self.inner.circuits.lock();
            let circuit = circuits
                .entry(key.to_string())
                .or_insert_with(|| Circuit::new(now));
            let admission = circuit.try_acquire(&self.inner.breaker, now);
            (admission, circuit.stats())
        };

        match admission {
            Admission::Permitted { trial, transition } => {
                let transition_snapshot = transition.map(|transition| {
                    self.emit_transition(key, transition);
                    stats.clone()
                });
                tracing::trace!(key, state = %stats.state, trial, "call permitted");
                self.inner
                    .breaker_listeners
                    .emit(&CircuitBreakerEvent::CallPermitted {
                        name: self.inner.name.clone(),
                        key: key.to_string(),
                        timestamp: Instant::now(),
                        state: stats.state,
                    });
                Ok((
                    TrialGuard {
                        manager: self,
                        key,
                        armed: trial,
                    },
                    transition_snapshot,
                ))
            }
            Admission::Rejected { next_retry_time } => {
                tracing::debug!(key, next_retry_time, "call rejected by open circuit");
                self.inner
                    .breaker_listeners
                    .emit(&CircuitBreakerEvent::CallRejected {
                        name: self.inner.name.clone(),
                        key: key.to_string(),
                        timestamp: Instant::now(),
                        next_retry_time,
                    });
                Err(ApiError::CircuitOpen {
                    key: key.to_string(),
                    next_retry_time,
                    stats,
                })
            }
        }
    }

    async fn record(&self, key: &str, trial: bool, success: bool) {
        let now = now_millis();
        let breaker = &self.inner.breaker;
        let (transition, stats) = {
            let mut circuits = self.inner.circuits.lock();
            let circuit = circuits
                .entry(key.to_string())
                .or_insert_with(|| Circuit::new(now));
            let transition = if success {
                circuit.record_success(breaker, trial, now)
            } else {
                circuit.record_failure(breaker, trial, now)
            };
            (transition, circuit.stats())
        };

        let event = if success {
            CircuitBreakerEvent::SuccessRecorded {
                name: self.inner.name.clone(),
                key: key.to_string(),
                timestamp: Instant::now(),
                state: stats.state,
            }
        } else {
            CircuitBreakerEvent::FailureRecorded {
                name: self.inner.name.clone(),
                key: key.to_string(),
                timestamp: Instant::now(),
                state: stats.state,
            }
        };
        self.inner.breaker_listeners.emit(&event);

        if let Some(transition) = transition {
            self.emit_transition(key, transition);
            self.persist(key, stats).await;
        }
    }

    async fn run_with_retry<T, F, Fut>(
        &self,
        mut operation: F,
        context: &RequestContext,
    ) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let config = &self.inner.retry;
        if !config.enabled {
            return operation().await;
        }

        let max_attempts = config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => {
                    self.emit_retry(RetryEvent::Success {
                        name: self.inner.name.clone(),
                        key: context.circuit_key(),
                        timestamp: Instant::now(),
                        attempts: attempt,
                    });
                    #[cfg(feature = "metrics")]
                    counter!("retry_calls_total", "retry" => self.inner.name.clone(), "outcome" => "success").increment(1);
                    return Ok(value);
                }
                Err(error) => {
                    if !config.is_retryable(&error) {
                        tracing::debug!(
                            endpoint = %context.endpoint,
                            code = %error.code(),
                            attempt,
                            "error is not retryable"
                        );
                        self.emit_retry(RetryEvent::IgnoredError {
                            name: self.inner.name.clone(),
                            key: context.circuit_key(),
                            timestamp: Instant::now(),
                            attempt,
                        });
                        #[cfg(feature = "metrics")]
                        counter!("retry_calls_total", "retry" => self.inner.name.clone(), "outcome" => "ignored").increment(1);
                        return Err(error);
                    }

                    if attempt >= max_attempts {
                        tracing::debug!(
                            endpoint = %context.endpoint,
                            attempts = attempt,
                            "retry attempts exhausted"
                        );
                        self.emit_retry(RetryEvent::Exhausted {
                            name: self.inner.name.clone(),
                            key: context.circuit_key(),
                            timestamp: Instant::now(),
                            attempts: attempt,
                        });
                        #[cfg(feature = "metrics")]
                        counter!("retry_calls_total", "retry" => self.inner.name.clone(), "outcome" => "exhausted").increment(1);
                        return Err(ApiError::RetryExhausted {
                            source: Box::new(error),
                            context: context.clone(),
                            attempts: attempt,
                        });
                    }

                    let delay = self.inner.backoff.next_interval(attempt - 1);
                    tracing::debug!(
                        endpoint = %context.endpoint,
                        next_attempt = attempt + 1,
                        ?delay,
                        error = %error,
                        "retrying request"
                    );
                    self.emit_retry(RetryEvent::Retry {
                        name: self.inner.name.clone(),
                        key: context.circuit_key(),
                        timestamp: Instant::now(),
                        attempt: attempt + 1,
                        delay,
                    });
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn emit_retry(&self, event: RetryEvent) {
        self.inner.retry_listeners.emit(&event);
    }

    fn emit_transition(&self, key: &str, transition: Transition) {
        tracing::info!(
            key,
            from = %transition.from,
            to = %transition.to,
            "circuit breaker state transition"
        );
        #[cfg(feature = "metrics")]
        counter!(
            "circuitbreaker_transitions_total",
            "circuitbreaker" => self.inner.name.clone(),
            "from" => transition.from.as_str(),
            "to" => transition.to.as_str()
        )
        .increment(1);
        self.inner
            .breaker_listeners
            .emit(&CircuitBreakerEvent::StateTransition {
                name: self.inner.name.clone(),
                key: key.to_string(),
                timestamp: Instant::now(),
                from_state: transition.from,
                to_state: transition.to,
            });
    }

    async fn persist(&self, key: &str, mut snapshot: CircuitBreakerStats) {
        let Some(persistence) = self.inner.persistence.as_ref() else {
            return;
        };
        snapshot.persisted_at = Some(now_millis());
        if let Err(e) = persistence.save(key, &snapshot).await {
            tracing::warn!(key, error = %e, "failed to persist circuit breaker state");
        }
    }

    fn abandon_trial(&self, key: &str) {
        if let Some(circuit) = self.inner.circuits.lock().get_mut(key) {
            circuit.abandon_trial();
        }
        tracing::debug!(key, "half-open trial abandoned");
    }
}

impl std::fmt::Debug for RetryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryManager")
            .field("name", &self.inner.name)
            .field("retry", &self.inner.retry)
            .field("circuit_breaker", &self.inner.breaker)
            .field("persistence", &self.inner.persistence.is_some())
            .finish()
    }
}

/// Frees the half-open trial slot if the call is dropped before completing.
struct TrialGuard<'a> {
    manager: &'a RetryManager,
    key: &'a str,
    armed: bool,
}

impl TrialGuard<'_> {
    /// Marks the call as completed and returns whether it was the trial.
    fn disarm(&mut self) -> bool {
        std::mem::replace(&mut self.armed, false)
    }
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.manager.abandon_trial(self.key);
        }
    }
}

/// Builder for [`RetryManager`].
pub struct RetryManagerBuilder {
    name: String,
    retry: RetryConfig,
    breaker: CircuitBreakerConfig,
    backoff: Option<Arc<dyn IntervalFunction>>,
    persistence: Option<Arc<dyn CircuitBreakerPersistence>>,
    retry_listeners: EventListeners<RetryEvent>,
    breaker_listeners: EventListeners<CircuitBreakerEvent>,
}

impl Default for RetryManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryManagerBuilder {
    /// Creates a new builder with default configs and no persistence.
    pub fn new() -> Self {
        Self {
            name: "<unnamed>".to_string(),
            retry: RetryConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            backoff: None,
            persistence: None,
            retry_listeners: EventListeners::new(),
            breaker_listeners: EventListeners::new(),
        }
    }

    /// Sets the name for this manager (used in events and metrics).
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    pub fn retry_config(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    pub fn circuit_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = config;
        self
    }

    /// Replaces the jittered exponential backoff derived from the retry config.
    pub fn backoff<I>(mut self, interval_fn: I) -> Self
    where
        I: IntervalFunction + 'static,
    {
        self.backoff = Some(Arc::new(interval_fn));
        self
    }

    /// Sets the backend breaker snapshots are written to and restored from.
    pub fn persistence<P>(mut self, persistence: P) -> Self
    where
        P: CircuitBreakerPersistence + 'static,
    {
        self.persistence = Some(Arc::new(persistence));
        self
    }

    /// Like [`persistence`](Self::persistence), for an already shared backend.
    pub fn shared_persistence(mut self, persistence: Arc<dyn CircuitBreakerPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Registers a callback when a retry is about to be made.
    ///
    /// # Callback Signature
    /// `Fn(&str, u32, Duration)` - the circuit key, the attempt about to run
    /// (2 for the first retry) and the delay before it.
    pub fn on_retry<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, u32, Duration) + Send + Sync + 'static,
    {
        self.retry_listeners.add(FnListener::new(move |event| {
            if let RetryEvent::Retry {
                key,
                attempt,
                delay,
                ..
            } = event
            {
                f(key, *attempt, *delay);
            }
        }));
        self
    }

    /// Registers a callback when an operation succeeds, with the attempts it took.
    pub fn on_success<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, u32) + Send + Sync + 'static,
    {
        self.retry_listeners.add(FnListener::new(move |event| {
            if let RetryEvent::Success { key, attempts, .. } = event {
                f(key, *attempts);
            }
        }));
        self
    }

    /// Registers a callback when all attempts fail with retryable errors.
    pub fn on_exhausted<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, u32) + Send + Sync + 'static,
    {
        self.retry_listeners.add(FnListener::new(move |event| {
            if let RetryEvent::Exhausted { key, attempts, .. } = event {
                f(key, *attempts);
            }
        }));
        self
    }

    /// Registers a callback when a non-retryable error ends the retry loop.
    pub fn on_ignored_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.retry_listeners.add(FnListener::new(move |event| {
            if let RetryEvent::IgnoredError { key, .. } = event {
                f(key);
            }
        }));
        self
    }

    /// Registers a callback on every breaker state transition.
    pub fn on_state_transition<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.breaker_listeners.add(FnListener::new(move |event| {
            if let CircuitBreakerEvent::StateTransition {
                key,
                from_state,
                to_state,
                ..
            } = event
            {
                f(key, *from_state, *to_state);
            }
        }));
        self
    }

    /// Registers a callback when a breaker rejects a call.
    pub fn on_call_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.breaker_listeners.add(FnListener::new(move |event| {
            if let CircuitBreakerEvent::CallRejected { key, .. } = event {
                f(key);
            }
        }));
        self
    }

    /// Registers a listener for every retry event.
    pub fn retry_listener<F>(mut self, f: F) -> Self
    where
        F: Fn(&RetryEvent) + Send + Sync + 'static,
    {
        self.retry_listeners.add(FnListener::new(f));
        self
    }

    /// Registers a listener for every circuit breaker event.
    pub fn circuit_breaker_listener<F>(mut self, f: F) -> Self
    where
        F: Fn(&CircuitBreakerEvent) + Send + Sync + 'static,
    {
        self.breaker_listeners.add(FnListener::new(f));
        self
    }

    pub fn build(self) -> RetryManager {
        #[cfg(feature = "metrics")]
        describe_metrics();

        let backoff = self
            .backoff
            .unwrap_or_else(|| Arc::new(ExponentialRandomBackoff::from_config(&self.retry)));

        RetryManager {
            inner: Arc::new(Inner {
                name: self.name,
                retry: self.retry,
                breaker: self.breaker,
                backoff,
                circuits: Mutex::new(HashMap::new()),
                persistence: self.persistence,
                loaded: OnceCell::new(),
                retry_listeners: self.retry_listeners,
                breaker_listeners: self.breaker_listeners,
            }),
        }
    }
}
