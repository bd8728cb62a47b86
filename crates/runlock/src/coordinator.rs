//! The lock coordinator: the public façade that orchestrates reentrancy,
//! acquisition retries, auto-extension, and guaranteed release.

use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::RngCore;
use runlock_core::events::EventListeners;
use runlock_core::{LockError, RetryConfig, RetryConfigBuilder};
use runlock_redis::{AcquireOutcome, ExtendOutcome, LeaseStore};
#[cfg(feature = "metrics")]
use metrics::{counter, describe_counter, describe_histogram, histogram};
#[cfg(feature = "tracing")]
use tracing::{debug, info, warn};

use crate::canonical::{canonical_form, store_key};
use crate::error::LockOrBodyError;
use crate::events::CoordinatorEvent;
use crate::reentrancy;

const TOKEN_LEN: usize = 20;

/// Configuration for a [`RunLocker`].
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    /// Lease TTL granted per acquisition.
    pub duration: Duration,
    /// How long before lease expiry the auto-extension task refreshes it.
    pub automatic_extension_threshold: Duration,
    /// Governs the acquisition retry loop's backoff and budget.
    pub retry_config: RetryConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_millis(5000),
            automatic_extension_threshold: Duration::from_millis(500),
            retry_config: RetryConfig::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), LockError> {
        if self.duration.is_zero() {
            return Err(LockError::InvalidConfig(
                "duration must be positive".to_string(),
            ));
        }
        if self.automatic_extension_threshold >= self.duration {
            return Err(LockError::InvalidConfig(
                "automatic_extension_threshold must be less than duration".to_string(),
            ));
        }
        self.retry_config.validate()
    }
}

/// Builder for [`CoordinatorConfig`].
#[derive(Debug, Clone)]
pub struct CoordinatorConfigBuilder {
    config: CoordinatorConfig,
}

impl Default for CoordinatorConfigBuilder {
    fn default() -> Self {
        Self {
            config: CoordinatorConfig::default(),
        }
    }
}

impl CoordinatorConfigBuilder {
    /// Creates a new builder seeded with the spec defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the lease TTL granted per acquisition.
    pub fn duration(mut self, duration: Duration) -> Self {
        self.config.duration = duration;
        self
    }

    /// Sets the auto-extension refresh lead-time.
    pub fn automatic_extension_threshold(mut self, threshold: Duration) -> Self {
        self.config.automatic_extension_threshold = threshold;
        self
    }

    /// Sets the retry configuration wholesale.
    pub fn retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.config.retry_config = retry_config;
        self
    }

    /// Configures the retry policy via its own builder.
    pub fn with_retry_config<F>(mut self, f: F) -> Self
    where
        F: FnOnce(RetryConfigBuilder) -> RetryConfigBuilder,
    {
        // `RetryConfig` has no infallible default builder seed beyond
        // `RetryConfigBuilder::new`, so route through it and fall back to
        // spec defaults if the caller-supplied closure yields an invalid
        // config -- `build()` is still called at `CoordinatorConfigBuilder::build`.
        if let Ok(retry_config) = f(RetryConfigBuilder::new()).build() {
            self.config.retry_config = retry_config;
        }
        self
    }

    /// Validates and returns the configured [`CoordinatorConfig`].
    pub fn build(self) -> Result<CoordinatorConfig, LockError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

struct ExtensionGuard<S: LeaseStore + 'static> {
    store: Arc<S>,
    keys: Vec<String>,
    token: Vec<u8>,
    abort_handle: Option<tokio::task::AbortHandle>,
    released: bool,
}

impl<S: LeaseStore + 'static> ExtensionGuard<S> {
    async fn cleanup(mut self) {
        if let Some(handle) = self.abort_handle.take() {
            handle.abort();
        }
        self.store.release(&self.keys, &self.token).await;
        self.released = true;
    }
}

impl<S: LeaseStore + 'static> Drop for ExtensionGuard<S> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Some(handle) = self.abort_handle.take() {
            handle.abort();
        }
        let store = Arc::clone(&self.store);
        let keys = std::mem::take(&mut self.keys);
        let token = std::mem::take(&mut self.token);
        tokio::spawn(async move {
            store.release(&keys, &token).await;
        });
    }
}

/// The distributed mutual-exclusion façade.
///
/// Generic over the [`LeaseStore`] backing it, so production code and
/// tests can share the same coordinator logic against a real
/// Redis-compatible server or an in-memory fake.
pub struct RunLocker<S: LeaseStore + 'static> {
    store: Arc<S>,
    config: CoordinatorConfig,
    listeners: EventListeners<CoordinatorEvent>,
    extension_tasks: Mutex<Vec<tokio::task::AbortHandle>>,
}

impl<S: LeaseStore + 'static> RunLocker<S> {
    /// Creates a new coordinator backed by `store`, rejecting an invalid
    /// `config`.
    pub fn new(store: Arc<S>, config: CoordinatorConfig) -> Result<Self, LockError> {
        config.validate()?;

        #[cfg(feature = "metrics")]
        {
            describe_counter!(
                "runlock_acquire_attempts_total",
                "Total number of acquisition attempts made against the store"
            );
            describe_histogram!(
                "runlock_acquire_duration_seconds",
                "Total time spent waiting until a lease was acquired or the retry budget was exhausted"
            );
            describe_counter!(
                "runlock_acquisitions_total",
                "Total number of lock() calls, by result (acquired, timed_out, reentrant)"
            );
            describe_counter!(
                "runlock_extensions_total",
                "Total number of auto-extension refreshes, by result (extended, lost)"
            );
        }

        Ok(Self {
            store,
            config,
            listeners: EventListeners::new(),
            extension_tasks: Mutex::new(Vec::new()),
        })
    }

    /// Registers an event listener for coordinator-level observability.
    pub fn add_listener<L>(&mut self, listener: L)
    where
        L: runlock_core::EventListener<CoordinatorEvent> + 'static,
    {
        self.listeners.add(listener);
    }

    /// The configured lease TTL per grant.
    pub fn get_duration(&self) -> Duration {
        self.config.duration
    }

    /// The configured auto-extension lead-time.
    pub fn get_automatic_extension_threshold(&self) -> Duration {
        self.config.automatic_extension_threshold
    }

    /// The configured retry policy.
    pub fn get_retry_config(&self) -> &RetryConfig {
        &self.config.retry_config
    }

    /// Acquires `(name, resources)`, runs `body` inside the held lease,
    /// and releases on every exit path.
    ///
    /// If the current task already holds a frame for this exact canonical
    /// resource set, the store is bypassed entirely and `body` runs
    /// immediately (reentrant acquisition).
    pub async fn lock<R, B, Fut, T, E>(
        &self,
        name: &str,
        resources: &[R],
        body: B,
    ) -> Result<T, LockOrBodyError<E>>
    where
        R: AsRef<str>,
        B: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let canonical = canonical_form(resources);

        if reentrancy::current_resources().as_deref() == Some(canonical.as_str()) {
            #[cfg(feature = "tracing")]
            debug!(lock = name, resources = %canonical, "reentrant acquisition, bypassing store");

            #[cfg(feature = "metrics")]
            counter!("runlock_acquisitions_total", "lock" => name.to_string(), "result" => "reentrant")
                .increment(1);

            self.listeners.emit(&CoordinatorEvent::Reentered {
                lock_name: name.to_string(),
                resources: canonical.clone(),
                timestamp: Instant::now(),
            });
            return body().await.map_err(LockOrBodyError::Body);
        }

        let keys: Vec<String> = resources
            .iter()
            .map(|r| store_key(name, r.as_ref()))
            .collect();

        let (token, attempts, total_waited) = self.acquire_with_retry(name, &canonical, &keys).await?;

        let interval = self
            .config
            .duration
            .saturating_sub(self.config.automatic_extension_threshold);

        let join_handle = self.spawn_extension_task(name, &canonical, &keys, &token, interval);
        let abort_handle = join_handle.abort_handle();
        self.track(abort_handle.clone());

        let guard = ExtensionGuard {
            store: Arc::clone(&self.store),
            keys: keys.clone(),
            token: token.clone(),
            abort_handle: Some(abort_handle),
            released: false,
        };

        #[cfg(feature = "tracing")]
        info!(lock = name, resources = %canonical, attempts, wait_ms = total_waited.as_millis() as u64, "lock acquired");

        #[cfg(feature = "metrics")]
        {
            counter!("runlock_acquisitions_total", "lock" => name.to_string(), "result" => "acquired")
                .increment(1);
            histogram!("runlock_acquire_duration_seconds", "lock" => name.to_string())
                .record(total_waited.as_secs_f64());
        }

        self.listeners.emit(&CoordinatorEvent::Acquired {
            lock_name: name.to_string(),
            resources: canonical.clone(),
            attempts,
            total_wait_time: total_waited,
            timestamp: Instant::now(),
        });

        let result = reentrancy::run_with_frame(canonical.clone(), body()).await;

        guard.cleanup().await;

        #[cfg(feature = "tracing")]
        debug!(lock = name, resources = %canonical, "lock released");

        self.listeners.emit(&CoordinatorEvent::Released {
            lock_name: name.to_string(),
            resources: canonical,
            timestamp: Instant::now(),
        });

        result.map_err(LockOrBodyError::Body)
    }

    /// If `condition` is true, delegates to [`RunLocker::lock`]. Otherwise
    /// runs `body` directly with no frame established.
    pub async fn lock_if<R, B, Fut, T, E>(
        &self,
        condition: bool,
        name: &str,
        resources: &[R],
        body: B,
    ) -> Result<T, LockOrBodyError<E>>
    where
        R: AsRef<str>,
        B: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if condition {
            self.lock(name, resources, body).await
        } else {
            body().await.map_err(LockOrBodyError::Body)
        }
    }

    /// Cancels every outstanding auto-extension task this coordinator has
    /// spawned. Does not touch leases already released normally; callers
    /// still holding a lease when this is called should expect their
    /// lease to stop refreshing.
    pub fn quit(&self) {
        let mut tasks = self.extension_tasks.lock().unwrap();
        for handle in tasks.drain(..) {
            handle.abort();
        }
    }

    /// Alias for [`RunLocker::quit`], matching the "graceful shutdown"
    /// vocabulary used elsewhere in this crate's ambient stack.
    pub fn shutdown(&self) {
        self.quit();
    }

    async fn acquire_with_retry(
        &self,
        name: &str,
        canonical: &str,
        keys: &[String],
    ) -> Result<(Vec<u8>, usize, Duration), LockError> {
        let retry_config = &self.config.retry_config;
        let mut attempts = 0usize;
        let mut total_waited = Duration::ZERO;

        loop {
            attempts += 1;
            let token = random_token();

            #[cfg(feature = "metrics")]
            counter!("runlock_acquire_attempts_total", "lock" => name.to_string()).increment(1);

            let outcome = self
                .store
                .try_acquire(keys, &token, self.config.duration)
                .await?;

            match outcome {
                AcquireOutcome::Acquired => return Ok((token, attempts, total_waited)),
                AcquireOutcome::Unavailable => {
                    let budget_exhausted = !retry_config.budget_remaining(total_waited);
                    if attempts > retry_config.max_attempts || budget_exhausted {
                        #[cfg(feature = "tracing")]
                        warn!(lock = name, resources = canonical, attempts, wait_ms = total_waited.as_millis() as u64, "acquisition retry budget exhausted");

                        #[cfg(feature = "metrics")]
                        {
                            counter!("runlock_acquisitions_total", "lock" => name.to_string(), "result" => "timed_out")
                                .increment(1);
                            histogram!("runlock_acquire_duration_seconds", "lock" => name.to_string())
                                .record(total_waited.as_secs_f64());
                        }

                        self.listeners.emit(&CoordinatorEvent::TimedOut {
                            lock_name: name.to_string(),
                            resources: canonical.to_string(),
                            attempts,
                            total_wait_time: total_waited,
                            timestamp: Instant::now(),
                        });
                        return Err(LockError::AcquisitionTimeout {
                            resources: canonical.to_string(),
                            attempts,
                            total_wait_time: total_waited,
                        });
                    }

                    let raw_delay = retry_config.compute_delay(attempts - 1);
                    let delay = retry_config.cap_to_budget(total_waited, raw_delay);

                    #[cfg(feature = "tracing")]
                    debug!(lock = name, resources = canonical, attempt = attempts, delay_ms = delay.as_millis() as u64, "resources unavailable, backing off");

                    self.listeners.emit(&CoordinatorEvent::Retrying {
                        lock_name: name.to_string(),
                        resources: canonical.to_string(),
                        attempt: attempts,
                        delay,
                        timestamp: Instant::now(),
                    });

                    tokio::time::sleep(delay).await;
                    total_waited += delay;
                }
            }
        }
    }

    fn spawn_extension_task(
        &self,
        name: &str,
        canonical: &str,
        keys: &[String],
        token: &[u8],
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let keys = keys.to_vec();
        let token = token.to_vec();
        let listeners = self.listeners.clone();
        let lock_name = name.to_string();
        let resources = canonical.to_string();
        let duration = self.config.duration;

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                match store.extend(&keys, &token, duration).await {
                    ExtendOutcome::Extended => {
                        #[cfg(feature = "tracing")]
                        debug!(lock = %lock_name, resources = %resources, "lease extended");

                        #[cfg(feature = "metrics")]
                        counter!("runlock_extensions_total", "lock" => lock_name.clone(), "result" => "extended")
                            .increment(1);

                        listeners.emit(&CoordinatorEvent::Extended {
                            lock_name: lock_name.clone(),
                            resources: resources.clone(),
                            timestamp: Instant::now(),
                        });
                    }
                    ExtendOutcome::Lost => {
                        #[cfg(feature = "tracing")]
                        warn!(lock = %lock_name, resources = %resources, "lease lost during auto-extension");

                        #[cfg(feature = "metrics")]
                        counter!("runlock_extensions_total", "lock" => lock_name.clone(), "result" => "lost")
                            .increment(1);

                        listeners.emit(&CoordinatorEvent::ExtensionLost {
                            lock_name: lock_name.clone(),
                            resources: resources.clone(),
                            timestamp: Instant::now(),
                        });
                        break;
                    }
                }
            }
        });

        handle
    }

    fn track(&self, abort_handle: tokio::task::AbortHandle) {
        let mut tasks = self.extension_tasks.lock().unwrap();
        tasks.retain(|h| !h.is_finished());
        tasks.push(abort_handle);
    }
}

fn random_token() -> Vec<u8> {
    let mut token = vec![0u8; TOKEN_LEN];
    rand::rng().fill_bytes(&mut token);
    token
}

#[cfg(test)]
mod tests {
    use super::*;
    use runlock_redis::FakeLeaseStore;
    use std::sync::atomic::Ordering;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.duration, Duration::from_millis(5000));
        assert_eq!(
            config.automatic_extension_threshold,
            Duration::from_millis(500)
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_duration() {
        let config = CoordinatorConfigBuilder::new()
            .duration(Duration::ZERO)
            .build();
        assert!(matches!(config, Err(LockError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_threshold_at_or_above_duration() {
        let config = CoordinatorConfigBuilder::new()
            .duration(Duration::from_millis(500))
            .automatic_extension_threshold(Duration::from_millis(500))
            .build();
        assert!(matches!(config, Err(LockError::InvalidConfig(_))));

        let config = CoordinatorConfigBuilder::new()
            .duration(Duration::from_millis(500))
            .automatic_extension_threshold(Duration::from_millis(600))
            .build();
        assert!(matches!(config, Err(LockError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_invalid_nested_retry_config() {
        let err = CoordinatorConfigBuilder::new()
            .retry_config(RetryConfig {
                max_attempts: 3,
                base_delay: Duration::from_millis(100),
                max_delay: Duration::from_millis(50),
                backoff_multiplier: 1.5,
                jitter_factor: 0.1,
                max_total_wait_time: Duration::from_millis(1000),
            })
            .build()
            .unwrap_err();
        assert!(matches!(err, LockError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn new_rejects_invalid_config() {
        let store = Arc::new(FakeLeaseStore::new());
        let bad_config = CoordinatorConfig {
            duration: Duration::ZERO,
            ..CoordinatorConfig::default()
        };
        assert!(RunLocker::new(store, bad_config).is_err());
    }

    #[tokio::test]
    async fn quit_aborts_outstanding_extension_tasks() {
        let store = Arc::new(FakeLeaseStore::new());
        let config = CoordinatorConfigBuilder::new()
            .duration(Duration::from_millis(300))
            .automatic_extension_threshold(Duration::from_millis(100))
            .build()
            .unwrap();
        let locker = Arc::new(RunLocker::new(store, config).unwrap());

        let held = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let held_clone = Arc::clone(&held);
        let locker_clone = Arc::clone(&locker);

        let handle = tokio::spawn(async move {
            locker_clone
                .lock("L", &["r"], || async move {
                    held_clone.store(true, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2000)).await;
                    Ok::<(), std::convert::Infallible>(())
                })
                .await
        });

        while !held.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }

        locker.quit();
        assert!(locker.extension_tasks.lock().unwrap().is_empty());

        handle.abort();
    }

    #[cfg(feature = "metrics")]
    #[tokio::test]
    async fn acquisition_records_metrics() {
        use metrics::set_global_recorder;
        use metrics_util::debugging::DebuggingRecorder;
        use std::sync::LazyLock;

        static RECORDER: LazyLock<DebuggingRecorder> = LazyLock::new(DebuggingRecorder::default);
        let _ = set_global_recorder(&*RECORDER);

        let store = Arc::new(FakeLeaseStore::new());
        let locker = RunLocker::new(store, CoordinatorConfig::default()).unwrap();

        let result: Result<(), LockOrBodyError<std::convert::Infallible>> =
            locker.lock("metrics-test", &["r"], || async { Ok(()) }).await;
        assert!(result.is_ok());

        let snapshot = RECORDER.snapshotter().snapshot().into_vec();
        let acquired = snapshot.iter().any(|(key, _, _, _)| {
            key.key().name() == "runlock_acquisitions_total"
                && key
                    .key()
                    .labels()
                    .any(|label| label.key() == "lock" && label.value() == "metrics-test")
                && key
                    .key()
                    .labels()
                    .any(|label| label.key() == "result" && label.value() == "acquired")
        });
        assert!(acquired, "expected an acquired counter for metrics-test");
    }
}
