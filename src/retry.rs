//! The retry engine.
//!
//! A [`Retryer`] executes one attempt-with-retry lifecycle: it runs the
//! attempt future produced by a factory, retries failures under a
//! [`RetryPolicy`] with a [`RetryDelay`] between attempts, and pauses the
//! whole loop while the [`NetworkMode`] disallows execution. The driver future
//! is boxed and shared so every caller of the same fetch joins one promise.
//!
//! Cancellation has two strengths: [`Retryer::cancel`] rejects the shared
//! promise right away and drops the in-flight attempt, while
//! [`Retryer::cancel_retry`] lets the active attempt settle (so its result can
//! still be cached) and only suppresses further retries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::{Notify, watch};

use crate::error::QueryError;
use crate::tracker::OnlineTracker;

/// Whether and how often a failed attempt is retried.
///
/// The policy is consulted with the number of failures recorded *before* the
/// current one, mirroring the delay schedule: the first retry sees `0`.
#[derive(Clone)]
pub enum RetryPolicy {
    /// Never retry.
    Never,
    /// Retry up to this many times.
    Count(u32),
    /// Retry until cancelled.
    Infinite,
    /// Ask a predicate `(failure_count, error)`.
    Predicate(Arc<dyn Fn(u32, &QueryError) -> bool + Send + Sync>),
}

impl RetryPolicy {
    pub(crate) fn should_retry(&self, failure_count: u32, error: &QueryError) -> bool {
        match self {
            Self::Never => false,
            Self::Count(limit) => failure_count < *limit,
            Self::Infinite => true,
            Self::Predicate(predicate) => predicate(failure_count, error),
        }
    }
}

impl Default for RetryPolicy {
    /// Three retries, the default for queries.
    fn default() -> Self {
        Self::Count(3)
    }
}

impl From<bool> for RetryPolicy {
    fn from(retry: bool) -> Self {
        if retry { Self::Infinite } else { Self::Never }
    }
}

impl From<u32> for RetryPolicy {
    fn from(count: u32) -> Self {
        Self::Count(count)
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Never => f.write_str("Never"),
            Self::Count(n) => f.debug_tuple("Count").field(n).finish(),
            Self::Infinite => f.write_str("Infinite"),
            Self::Predicate(_) => f.write_str("Predicate"),
        }
    }
}

/// Delay before the next retry attempt.
#[derive(Clone)]
pub enum RetryDelay {
    /// The same delay every time.
    Fixed(Duration),
    /// `base * 2^failure_count`, capped at `max`.
    Exponential { base: Duration, max: Duration },
    /// Ask a function `(failure_count, error)`.
    Custom(Arc<dyn Fn(u32, &QueryError) -> Duration + Send + Sync>),
}

impl RetryDelay {
    pub(crate) fn duration_for(&self, failure_count: u32, error: &QueryError) -> Duration {
        match self {
            Self::Fixed(delay) => *delay,
            Self::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(failure_count.min(31));
                base.checked_mul(factor).map_or(*max, |d| d.min(*max))
            }
            Self::Custom(f) => f(failure_count, error),
        }
    }
}

impl Default for RetryDelay {
    /// Exponential backoff from one second, capped at thirty seconds.
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(1000),
            max: Duration::from_millis(30000),
        }
    }
}

impl std::fmt::Debug for RetryDelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed(d) => f.debug_tuple("Fixed").field(d).finish(),
            Self::Exponential { base, max } => f
                .debug_struct("Exponential")
                .field("base", base)
                .field("max", max)
                .finish(),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// How a fetch behaves with respect to network reachability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkMode {
    /// Do not attempt while offline; pause instead.
    #[default]
    Online,
    /// Ignore the network state entirely.
    Always,
    /// The first attempt always runs; retries are gated on being online.
    OfflineFirst,
}

/// `true` when a fetch may start under the given mode.
pub(crate) fn can_fetch(mode: NetworkMode, online: bool) -> bool {
    match mode {
        NetworkMode::Online => online,
        NetworkMode::Always | NetworkMode::OfflineFirst => true,
    }
}

/// `true` when a paused or retrying fetch may proceed.
pub(crate) fn can_continue(mode: NetworkMode, online: bool) -> bool {
    mode == NetworkMode::Always || online
}

/// Options attached to a cancellation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CancelOptions {
    /// Roll the query state back to the snapshot taken at fetch start.
    pub revert: bool,
    /// Suppress error dispatch and logging.
    pub silent: bool,
}

impl CancelOptions {
    #[must_use]
    pub const fn revert() -> Self {
        Self {
            revert: true,
            silent: false,
        }
    }

    #[must_use]
    pub const fn silent() -> Self {
        Self {
            revert: false,
            silent: true,
        }
    }
}

pub(crate) type AttemptFn<V> =
    Arc<dyn Fn() -> BoxFuture<'static, Result<V, QueryError>> + Send + Sync>;

pub(crate) type SharedResult<V> = Shared<BoxFuture<'static, Result<V, QueryError>>>;

pub(crate) struct RetryerConfig<V> {
    pub attempt: AttemptFn<V>,
    pub retry: RetryPolicy,
    pub retry_delay: RetryDelay,
    pub network_mode: NetworkMode,
    pub online: OnlineTracker,
    /// Whether a paused loop wakes itself when the network comes back.
    /// Queries do; mutations only move on an explicit [`Retryer::resume`] so
    /// the cache can replay them strictly in insertion order.
    pub wake_on_online: bool,
    pub on_fail: Option<Box<dyn Fn(u32, &QueryError) + Send + Sync>>,
    pub on_pause: Option<Box<dyn Fn() + Send + Sync>>,
    pub on_continue: Option<Box<dyn Fn() + Send + Sync>>,
}

#[derive(Debug)]
pub(crate) struct RetryerShared {
    cancel: watch::Sender<Option<CancelOptions>>,
    continue_notify: Notify,
    retry_cancelled: AtomicBool,
    paused: AtomicBool,
}

impl RetryerShared {
    fn new() -> Self {
        let (cancel, _) = watch::channel(None);
        Self {
            cancel,
            continue_notify: Notify::new(),
            retry_cancelled: AtomicBool::new(false),
            paused: AtomicBool::new(false),
        }
    }
}

/// Drives one fetch with retry, pause and cancellation.
pub(crate) struct Retryer<V: Clone> {
    shared: Arc<RetryerShared>,
    future: SharedResult<V>,
}

impl<V> Retryer<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(config: RetryerConfig<V>) -> Self {
        let shared = Arc::new(RetryerShared::new());
        let future = drive(config, shared.clone()).boxed().shared();
        Self { shared, future }
    }

    /// The shared promise; every clone resolves to the same result.
    pub fn promise(&self) -> SharedResult<V> {
        self.future.clone()
    }

    /// Rejects the promise with a cancellation marker and drops the in-flight
    /// attempt. Only the first cancellation wins.
    pub fn cancel(&self, options: CancelOptions) {
        self.shared.cancel.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(options);
                true
            } else {
                false
            }
        });
    }

    /// Quietly drops the retry loop; the active attempt settles normally.
    pub fn cancel_retry(&self) {
        self.shared.retry_cancelled.store(true, Ordering::SeqCst);
    }

    /// Undoes a prior [`Self::cancel_retry`].
    pub fn continue_retry(&self) {
        self.shared.retry_cancelled.store(false, Ordering::SeqCst);
    }

    /// Wakes a paused loop; it proceeds only if the network policy allows.
    pub fn resume(&self) {
        self.shared.continue_notify.notify_one();
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }
}

impl<V: Clone> std::fmt::Debug for Retryer<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retryer")
            .field("paused", &self.shared.paused.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

async fn drive<V>(config: RetryerConfig<V>, shared: Arc<RetryerShared>) -> Result<V, QueryError>
where
    V: Clone + Send + 'static,
{
    let mut cancel_rx = shared.cancel.subscribe();
    let cancelled = async {
        loop {
            let pending = cancel_rx.borrow().clone();
            if let Some(options) = pending {
                return options;
            }
            if cancel_rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        options = cancelled => Err(QueryError::Cancelled {
            revert: options.revert,
            silent: options.silent,
        }),
        result = attempt_loop(&config, &shared) => result,
    }
}

async fn attempt_loop<V>(
    config: &RetryerConfig<V>,
    shared: &RetryerShared,
) -> Result<V, QueryError>
where
    V: Clone + Send + 'static,
{
    let mut failure_count: u32 = 0;

    if !can_fetch(config.network_mode, config.online.is_online()) {
        pause_until_continue(config, shared).await;
    }

    loop {
        match (config.attempt)().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                let delay = config.retry_delay.duration_for(failure_count, &error);
                let should_retry = !shared.retry_cancelled.load(Ordering::SeqCst)
                    && config.retry.should_retry(failure_count, &error);
                if !should_retry {
                    return Err(error);
                }

                failure_count += 1;
                if let Some(on_fail) = &config.on_fail {
                    on_fail(failure_count, &error);
                }

                tokio::time::sleep(delay).await;

                if !can_continue(config.network_mode, config.online.is_online()) {
                    pause_until_continue(config, shared).await;
                }
                if shared.retry_cancelled.load(Ordering::SeqCst) {
                    return Err(error);
                }
            }
        }
    }
}

async fn pause_until_continue<V>(config: &RetryerConfig<V>, shared: &RetryerShared) {
    shared.paused.store(true, Ordering::SeqCst);
    if let Some(on_pause) = &config.on_pause {
        on_pause();
    }

    let mut online_rx = config.online.receiver();
    loop {
        if config.wake_on_online {
            tokio::select! {
                () = shared.continue_notify.notified() => {}
                changed = online_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        } else {
            shared.continue_notify.notified().await;
        }
        if can_continue(config.network_mode, config.online.is_online()) {
            break;
        }
    }

    shared.paused.store(false, Ordering::SeqCst);
    if let Some(on_continue) = &config.on_continue {
        on_continue();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio::time::timeout;

    fn flaky_attempt(failures_before_success: u32) -> (AttemptFn<i32>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let attempt: AttemptFn<i32> = Arc::new(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < failures_before_success {
                    Err(QueryError::fetch_failed(format!("e{}", n + 1)))
                } else {
                    Ok(42)
                }
            }
            .boxed()
        });
        (attempt, calls)
    }

    fn config(attempt: AttemptFn<i32>, online: OnlineTracker) -> RetryerConfig<i32> {
        RetryerConfig {
            attempt,
            retry: RetryPolicy::Count(3),
            retry_delay: RetryDelay::Fixed(Duration::from_millis(1)),
            network_mode: NetworkMode::Online,
            online,
            wake_on_online: true,
            on_fail: None,
            on_pause: None,
            on_continue: None,
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let (attempt, calls) = flaky_attempt(2);
        let retryer = Retryer::new(config(attempt, OnlineTracker::new()));

        let result = retryer.promise().await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_policy_exhaustion_returns_last_error() {
        let (attempt, calls) = flaky_attempt(10);
        let mut cfg = config(attempt, OnlineTracker::new());
        cfg.retry = RetryPolicy::Count(2);
        let retryer = Retryer::new(cfg);

        let result = retryer.promise().await;
        assert_eq!(result, Err(QueryError::FetchFailed("e3".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_result() {
        let (attempt, calls) = flaky_attempt(0);
        let retryer = Retryer::new(config(attempt, OnlineTracker::new()));

        let (a, b) = tokio::join!(retryer.promise(), retryer.promise());
        assert_eq!(a, Ok(42));
        assert_eq!(b, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pauses_offline_and_resumes_online() {
        let online = OnlineTracker::new();
        online.set_online(false);

        let (attempt, calls) = flaky_attempt(0);
        let retryer = Retryer::new(config(attempt, online.clone()));
        let promise = retryer.promise();
        let task = tokio::spawn(promise);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(retryer.is_paused());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        online.set_online(true);
        let result = timeout(Duration::from_millis(200), task).await.unwrap();
        assert_eq!(result.unwrap(), Ok(42));
    }

    #[tokio::test]
    async fn test_always_mode_ignores_network() {
        let online = OnlineTracker::new();
        online.set_online(false);

        let (attempt, _) = flaky_attempt(0);
        let mut cfg = config(attempt, online);
        cfg.network_mode = NetworkMode::Always;
        let retryer = Retryer::new(cfg);

        let result = timeout(Duration::from_millis(100), retryer.promise())
            .await
            .unwrap();
        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn test_offline_first_runs_first_attempt_then_pauses() {
        let online = OnlineTracker::new();
        online.set_online(false);

        let (attempt, calls) = flaky_attempt(2);
        let mut cfg = config(attempt, online.clone());
        cfg.network_mode = NetworkMode::OfflineFirst;
        let retryer = Retryer::new(cfg);
        let task = tokio::spawn(retryer.promise());

        tokio::time::sleep(Duration::from_millis(20)).await;
        // First attempt ran offline; the retry is gated.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(retryer.is_paused());

        online.set_online(true);
        let result = timeout(Duration::from_millis(200), task).await.unwrap();
        assert_eq!(result.unwrap(), Ok(42));
    }

    #[tokio::test]
    async fn test_cancel_rejects_promise() {
        let attempt: AttemptFn<i32> = Arc::new(|| {
            async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(1)
            }
            .boxed()
        });
        let retryer = Retryer::new(config(attempt, OnlineTracker::new()));
        let promise = retryer.promise();
        let task = tokio::spawn(promise);

        tokio::time::sleep(Duration::from_millis(10)).await;
        retryer.cancel(CancelOptions::revert());

        let result = timeout(Duration::from_millis(100), task).await.unwrap();
        assert_eq!(
            result.unwrap(),
            Err(QueryError::Cancelled {
                revert: true,
                silent: false
            })
        );
    }

    #[tokio::test]
    async fn test_cancel_retry_lets_attempt_settle() {
        let (attempt, calls) = flaky_attempt(0);
        let retryer = Retryer::new(config(attempt, OnlineTracker::new()));
        retryer.cancel_retry();

        let result = retryer.promise().await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_retry_suppresses_retries() {
        let (attempt, calls) = flaky_attempt(10);
        let retryer = Retryer::new(config(attempt, OnlineTracker::new()));
        retryer.cancel_retry();

        let result = retryer.promise().await;
        assert_eq!(result, Err(QueryError::FetchFailed("e1".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_default_delay_is_capped_exponential() {
        let delay = RetryDelay::default();
        let err = QueryError::fetch_failed("x");
        assert_eq!(delay.duration_for(0, &err), Duration::from_millis(1000));
        assert_eq!(delay.duration_for(1, &err), Duration::from_millis(2000));
        assert_eq!(delay.duration_for(4, &err), Duration::from_millis(16000));
        assert_eq!(delay.duration_for(10, &err), Duration::from_millis(30000));
        assert_eq!(delay.duration_for(63, &err), Duration::from_millis(30000));
    }

    #[test]
    fn test_retry_policy_conversions() {
        let err = QueryError::fetch_failed("x");
        assert!(!RetryPolicy::from(false).should_retry(0, &err));
        assert!(RetryPolicy::from(true).should_retry(1000, &err));
        assert!(RetryPolicy::from(2u32).should_retry(1, &err));
        assert!(!RetryPolicy::from(2u32).should_retry(2, &err));
    }
}
