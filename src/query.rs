//! Cached queries.
//!
//! A [`Query`] is the per-key cache record: the state of one request, the set
//! of observers deriving results from it, and the fetch state machine driving
//! retries, pauses and cancellation. All state changes flow through a small
//! reducer; observers and cache listeners are notified after every transition.
//!
//! Concurrent fetches for the same query share one promise. A second caller
//! joins the in-flight fetch unless it requests `cancel_refetch` while data
//! already exists, in which case the first fetch is silently cancelled and a
//! fresh one starts.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::runtime::Handle;

use crate::abort::{AbortController, AbortSignal};
use crate::client::CoreContext;
use crate::error::QueryError;
use crate::key::QueryKey;
use crate::options::{
    FetchOptions, QueryData, QueryFn, QueryFnContext, QueryFuture, QueryOptions, replace_data,
};
use crate::query_cache::QueryCache;
use crate::removable::Removable;
use crate::retry::{CancelOptions, Retryer, RetryerConfig, SharedResult, can_fetch};
use crate::time::{millis, now_millis};

/// Result status of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    /// No data and no terminal error yet.
    Loading,
    /// At least one successful set.
    Success,
    /// A terminal failure with no prior data update in this cycle.
    Error,
}

/// Fetch activity of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchStatus {
    /// A fetch is in flight.
    Fetching,
    /// A fetch is withheld by the network policy.
    Paused,
    Idle,
}

/// The state tuple of one cached query.
#[derive(Clone)]
pub struct QueryState<T> {
    pub data: Option<Arc<T>>,
    /// Milliseconds since epoch of the last successful set; `0` means never.
    pub data_updated_at: u64,
    pub data_update_count: u32,
    pub error: Option<QueryError>,
    pub error_updated_at: u64,
    pub error_update_count: u32,
    pub fetch_failure_count: u32,
    pub fetch_failure_reason: Option<QueryError>,
    /// Opaque fetch marker, compared by identity when deciding whether a
    /// joined fetch needs a fresh `fetch` transition.
    pub fetch_meta: Option<Arc<Value>>,
    pub is_invalidated: bool,
    pub status: QueryStatus,
    pub fetch_status: FetchStatus,
}

impl<T> QueryState<T> {
    /// The state of a query that has never fetched.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            data: None,
            data_updated_at: 0,
            data_update_count: 0,
            error: None,
            error_updated_at: 0,
            error_update_count: 0,
            fetch_failure_count: 0,
            fetch_failure_reason: None,
            fetch_meta: None,
            is_invalidated: false,
            status: QueryStatus::Loading,
            fetch_status: FetchStatus::Idle,
        }
    }

    #[must_use]
    pub const fn is_fetching(&self) -> bool {
        matches!(self.fetch_status, FetchStatus::Fetching)
    }

    #[must_use]
    pub const fn is_paused(&self) -> bool {
        matches!(self.fetch_status, FetchStatus::Paused)
    }

    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self.status, QueryStatus::Loading)
    }

    #[must_use]
    pub const fn is_fetched(&self) -> bool {
        self.data_update_count + self.error_update_count > 0
    }
}

impl<T> std::fmt::Debug for QueryState<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryState")
            .field("has_data", &self.data.is_some())
            .field("data_updated_at", &self.data_updated_at)
            .field("status", &self.status)
            .field("fetch_status", &self.fetch_status)
            .field("error", &self.error)
            .field("is_invalidated", &self.is_invalidated)
            .finish_non_exhaustive()
    }
}

/// Owned mirror of [`QueryState`] used for dehydration snapshots.
#[derive(Serialize, Deserialize)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: serde::de::DeserializeOwned"))]
struct SerializedQueryState<T> {
    data: Option<T>,
    data_updated_at: u64,
    data_update_count: u32,
    error: Option<QueryError>,
    error_updated_at: u64,
    error_update_count: u32,
    fetch_failure_count: u32,
    fetch_failure_reason: Option<QueryError>,
    is_invalidated: bool,
    status: QueryStatus,
    fetch_status: FetchStatus,
}

impl<T: QueryData> QueryState<T> {
    pub(crate) fn to_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(SerializedQueryState {
            data: self.data.as_ref().map(|d| (**d).clone()),
            data_updated_at: self.data_updated_at,
            data_update_count: self.data_update_count,
            error: self.error.clone(),
            error_updated_at: self.error_updated_at,
            error_update_count: self.error_update_count,
            fetch_failure_count: self.fetch_failure_count,
            fetch_failure_reason: self.fetch_failure_reason.clone(),
            is_invalidated: self.is_invalidated,
            status: self.status,
            fetch_status: self.fetch_status,
        })
    }

    pub(crate) fn from_json(value: &Value) -> Result<Self, serde_json::Error> {
        let parsed: SerializedQueryState<T> = serde_json::from_value(value.clone())?;
        Ok(Self {
            data: parsed.data.map(Arc::new),
            data_updated_at: parsed.data_updated_at,
            data_update_count: parsed.data_update_count,
            error: parsed.error,
            error_updated_at: parsed.error_updated_at,
            error_update_count: parsed.error_update_count,
            fetch_failure_count: parsed.fetch_failure_count,
            fetch_failure_reason: parsed.fetch_failure_reason,
            fetch_meta: None,
            is_invalidated: parsed.is_invalidated,
            status: parsed.status,
            fetch_status: parsed.fetch_status,
        })
    }
}

/// Reducer actions over [`QueryState`].
pub(crate) enum QueryAction<T> {
    Fetch {
        meta: Option<Arc<Value>>,
    },
    Failed {
        failure_count: u32,
        error: QueryError,
    },
    Pause,
    Continue,
    Success {
        data: Arc<T>,
        updated_at: Option<u64>,
        manual: bool,
    },
    Error {
        error: QueryError,
    },
    Invalidate,
    SetState {
        state: QueryState<T>,
    },
}

impl<T> QueryAction<T> {
    pub(crate) const fn kind(&self) -> QueryActionKind {
        match self {
            Self::Fetch { .. } => QueryActionKind::Fetch,
            Self::Failed { .. } => QueryActionKind::Failed,
            Self::Pause => QueryActionKind::Pause,
            Self::Continue => QueryActionKind::Continue,
            Self::Success { .. } => QueryActionKind::Success,
            Self::Error { .. } => QueryActionKind::Error,
            Self::Invalidate => QueryActionKind::Invalidate,
            Self::SetState { .. } => QueryActionKind::SetState,
        }
    }
}

/// Untyped tag of a state transition, carried by cache events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryActionKind {
    Fetch,
    Failed,
    Pause,
    Continue,
    Success,
    Error,
    Invalidate,
    SetState,
}

/// Nullary fetch attempt installed on a [`FetchContext`].
pub type FetchFn<T> = Arc<dyn Fn() -> QueryFuture<T> + Send + Sync>;

/// Context handed to a [`QueryBehavior`] before a fetch starts.
///
/// The behavior may replace [`FetchContext::fetch_fn`] wholesale; the infinite
/// query behavior uses this to substitute a page loop for the single-shot
/// fetch.
pub struct FetchContext<T: QueryData> {
    pub fetch_fn: FetchFn<T>,
    pub fetch_options: FetchOptions,
    pub options: QueryOptions<T>,
    /// Snapshot of the query state at fetch start.
    pub state: QueryState<T>,
    pub key: QueryKey,
    pub(crate) signal: AbortSignal,
    pub(crate) signal_consumed: Arc<AtomicBool>,
}

impl<T: QueryData> FetchContext<T> {
    /// The raw abort signal, for behaviors that check cancellation at their
    /// own boundaries without consuming it on the user's behalf.
    #[must_use]
    pub fn signal(&self) -> &AbortSignal {
        &self.signal
    }

    /// Builds the context passed to the user's query function for one
    /// attempt. Reading the signal off this context marks it consumed.
    #[must_use]
    pub fn query_fn_context(&self, page_param: Option<Value>) -> QueryFnContext {
        QueryFnContext::new(
            self.key.clone(),
            self.options.meta.clone(),
            page_param,
            self.signal.clone(),
            self.signal_consumed.clone(),
        )
    }
}

/// Hook allowing a fetch to be reshaped before it runs.
pub trait QueryBehavior<T: QueryData>: Send + Sync {
    fn on_fetch(&self, context: &mut FetchContext<T>);
}

/// Query-side interface of an observer.
pub(crate) trait QueryObserverBase<T: QueryData>: Send + Sync {
    fn id(&self) -> u64;
    fn on_query_update(&self, action: &QueryAction<T>);
    fn should_fetch_on_window_focus(&self) -> bool;
    fn should_fetch_on_reconnect(&self) -> bool;
    fn is_enabled(&self) -> bool;
    fn current_result_is_stale(&self) -> bool;
    fn query_fn(&self) -> Option<QueryFn<T>>;
    /// Refetch without cancelling an in-flight fetch, fire-and-forget.
    fn trigger_refetch(&self);
}

struct ActiveFetch<T: QueryData> {
    id: u64,
    promise: SharedResult<Arc<T>>,
    retryer: Retryer<T>,
    controller: Arc<AbortController>,
    signal_consumed: Arc<AtomicBool>,
}

/// One cached request: state, observers and the fetch state machine.
pub struct Query<T: QueryData> {
    self_weak: Weak<Self>,
    core: CoreContext,
    cache: Weak<QueryCache>,
    key: QueryKey,
    hash: String,
    initial_state: QueryState<T>,
    state: Mutex<QueryState<T>>,
    revert_state: Mutex<Option<QueryState<T>>>,
    options: Mutex<QueryOptions<T>>,
    observers: Mutex<Vec<Arc<dyn QueryObserverBase<T>>>>,
    active: Mutex<Option<ActiveFetch<T>>>,
    fetch_seq: AtomicU64,
    removable: Removable,
}

impl<T: QueryData> Query<T> {
    pub(crate) fn new(
        core: CoreContext,
        cache: Weak<QueryCache>,
        options: QueryOptions<T>,
        seeded_state: Option<QueryState<T>>,
    ) -> Arc<Self> {
        let hash = options.hash();
        let key = options.key.clone();
        let initial_state = seeded_state.unwrap_or_else(|| initial_state_from(&options));
        let removable = Removable::new();
        removable.update_cache_time(options.cache_time);

        Arc::new_cyclic(|self_weak| Self {
            self_weak: self_weak.clone(),
            core,
            cache,
            key,
            hash,
            initial_state: initial_state.clone(),
            state: Mutex::new(initial_state),
            revert_state: Mutex::new(None),
            options: Mutex::new(options),
            observers: Mutex::new(Vec::new()),
            active: Mutex::new(None),
            fetch_seq: AtomicU64::new(0),
            removable,
        })
    }

    #[must_use]
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    #[must_use]
    pub fn query_hash(&self) -> &str {
        &self.hash
    }

    /// A snapshot of the current state. Data is shared, so the snapshot is
    /// cheap.
    #[must_use]
    pub fn state(&self) -> QueryState<T> {
        self.state.lock().clone()
    }

    pub(crate) fn options(&self) -> QueryOptions<T> {
        self.options.lock().clone()
    }

    pub(crate) fn meta(&self) -> Option<Arc<Value>> {
        self.options.lock().meta.clone()
    }

    /// Merges replacement options into the query, widening the retention
    /// window if requested.
    pub(crate) fn set_options(&self, options: QueryOptions<T>) {
        self.removable.update_cache_time(options.cache_time);
        *self.options.lock() = options;
    }

    pub(crate) fn cache_time(&self) -> Duration {
        self.removable.cache_time()
    }

    pub(crate) fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    pub(crate) fn is_active(&self) -> bool {
        self.observers.lock().iter().any(|o| o.is_enabled())
    }

    pub(crate) fn is_disabled(&self) -> bool {
        self.observer_count() > 0 && !self.is_active()
    }

    /// Stale when invalidated, never fetched, or any observer derives a stale
    /// result.
    pub(crate) fn is_stale(&self) -> bool {
        let state = self.state.lock();
        if state.is_invalidated || state.data_updated_at == 0 {
            return true;
        }
        drop(state);
        self.observers
            .lock()
            .iter()
            .any(|o| o.current_result_is_stale())
    }

    /// Stale when invalidated, never fetched, or older than `stale_time`.
    /// `Duration::MAX` means never stale by time.
    pub(crate) fn is_stale_by_time(&self, stale_time: Duration) -> bool {
        let state = self.state.lock();
        state.is_invalidated
            || state.data_updated_at == 0
            || (stale_time != Duration::MAX
                && now_millis() >= state.data_updated_at.saturating_add(millis(stale_time)))
    }

    /// Marks the data as needing a refetch. Idempotent: an already
    /// invalidated query is not re-notified.
    pub(crate) fn invalidate(&self) {
        if !self.state.lock().is_invalidated {
            self.dispatch(QueryAction::Invalidate);
        }
    }

    /// Applies structural sharing and records a successful set.
    ///
    /// A manual set (hydration, `set_query_data`) leaves the fetch machinery
    /// untouched.
    pub(crate) fn set_data(&self, data: T, updated_at: Option<u64>, manual: bool) -> Arc<T> {
        let prev = self.state.lock().data.clone();
        let shared = {
            let options = self.options.lock();
            replace_data(
                prev.as_ref(),
                data,
                options.is_data_equal.as_ref(),
                &options.structural_sharing,
            )
        };
        self.dispatch(QueryAction::Success {
            data: shared.clone(),
            updated_at,
            manual,
        });
        shared
    }

    /// Replaces the state wholesale; used by hydration and tooling.
    pub(crate) fn set_state(&self, state: QueryState<T>) {
        self.dispatch(QueryAction::SetState { state });
    }

    /// Cancels the in-flight fetch, if any. The returned future resolves once
    /// the fetch has settled and the state reflects the cancellation.
    pub(crate) fn cancel(&self, options: CancelOptions) -> BoxFuture<'static, ()> {
        let promise = {
            let active = self.active.lock();
            active.as_ref().map(|active| {
                active.controller.abort();
                active.retryer.cancel(options);
                active.promise.clone()
            })
        };
        async move {
            if let Some(promise) = promise {
                let _ = promise.await;
            }
        }
        .boxed()
    }

    /// Cancels silently and restores the initial state.
    pub(crate) fn reset(&self) {
        self.destroy();
        self.set_state(self.initial_state.clone());
    }

    /// Clears timers and silently cancels any in-flight work.
    pub(crate) fn destroy(&self) {
        self.removable.clear_gc();
        let _ = self.cancel(CancelOptions::silent());
    }

    pub(crate) fn add_observer(&self, observer: Arc<dyn QueryObserverBase<T>>) {
        let added = {
            let mut observers = self.observers.lock();
            if observers.iter().any(|o| o.id() == observer.id()) {
                false
            } else {
                observers.push(observer);
                true
            }
        };
        if added {
            self.removable.clear_gc();
            if let Some(cache) = self.cache.upgrade() {
                cache.notify_observer_added(&self.hash, &self.key);
            }
        }
    }

    pub(crate) fn remove_observer(&self, observer_id: u64) {
        let (removed, empty) = {
            let mut observers = self.observers.lock();
            let before = observers.len();
            observers.retain(|o| o.id() != observer_id);
            (observers.len() != before, observers.is_empty())
        };
        if !removed {
            return;
        }
        if empty {
            {
                let active = self.active.lock();
                if let Some(active) = active.as_ref() {
                    if active.signal_consumed.load(Ordering::SeqCst) {
                        active.controller.abort();
                        active.retryer.cancel(CancelOptions::revert());
                    } else {
                        active.retryer.cancel_retry();
                    }
                }
            }
            if self.removable.cache_time().is_zero() {
                self.remove_from_cache();
            } else {
                self.schedule_gc();
            }
        }
        if let Some(cache) = self.cache.upgrade() {
            cache.notify_observer_removed(&self.hash, &self.key);
        }
    }

    /// Wakes a paused fetch and lets the first willing observer refetch.
    pub(crate) fn on_focus(&self) {
        let observer = {
            let observers = self.observers.lock();
            observers
                .iter()
                .find(|o| o.should_fetch_on_window_focus())
                .cloned()
        };
        if let Some(observer) = observer {
            observer.trigger_refetch();
        }
        if let Some(active) = self.active.lock().as_ref() {
            active.retryer.resume();
        }
    }

    pub(crate) fn on_online(&self) {
        let observer = {
            let observers = self.observers.lock();
            observers
                .iter()
                .find(|o| o.should_fetch_on_reconnect())
                .cloned()
        };
        if let Some(observer) = observer {
            observer.trigger_refetch();
        }
        if let Some(active) = self.active.lock().as_ref() {
            active.retryer.resume();
        }
    }

    /// Starts or joins a fetch, returning the shared promise.
    pub(crate) fn fetch(
        &self,
        options: Option<QueryOptions<T>>,
        fetch_options: FetchOptions,
    ) -> SharedResult<Arc<T>> {
        {
            let active = self.active.lock();
            let fetch_status = self.state.lock().fetch_status;
            if fetch_status != FetchStatus::Idle {
                if let Some(active) = active.as_ref() {
                    let has_data = self.state.lock().data_updated_at > 0;
                    if has_data && fetch_options.cancel_refetch {
                        // Silently drop the in-flight fetch and start over.
                        active.controller.abort();
                        active.retryer.cancel(CancelOptions::silent());
                    } else {
                        // Join the in-flight fetch, undoing an unmount-cancel.
                        active.retryer.continue_retry();
                        return active.promise.clone();
                    }
                }
            }
        }

        if let Some(options) = options {
            self.set_options(options);
        }
        let options = self.options();

        // Fall back to an observer's fetcher; a hydrated query has none of
        // its own until an observer mounts.
        let query_fn = options
            .query_fn
            .clone()
            .or_else(|| self.observers.lock().iter().find_map(|o| o.query_fn()));
        if query_fn.is_none() && options.behavior.is_none() {
            self.core
                .logger
                .error(&format!("missing query function for key {}", self.key));
        }

        let controller = Arc::new(AbortController::new());
        let signal_consumed = Arc::new(AtomicBool::new(false));
        let state_snapshot = self.state();

        let mut context = FetchContext {
            fetch_fn: default_fetch_fn(
                query_fn,
                self.key.clone(),
                options.meta.clone(),
                controller.signal(),
                signal_consumed.clone(),
            ),
            fetch_options: fetch_options.clone(),
            options: options.clone(),
            state: state_snapshot.clone(),
            key: self.key.clone(),
            signal: controller.signal(),
            signal_consumed: signal_consumed.clone(),
        };
        if let Some(behavior) = options.behavior.clone() {
            behavior.on_fetch(&mut context);
        }

        *self.revert_state.lock() = Some(state_snapshot);

        let needs_dispatch = {
            let state = self.state.lock();
            state.fetch_status == FetchStatus::Idle
                || !meta_ptr_eq(&state.fetch_meta, &fetch_options.meta)
        };
        if needs_dispatch {
            self.dispatch(QueryAction::Fetch {
                meta: fetch_options.meta.clone(),
            });
        }

        let weak = self.self_weak.clone();
        let on_fail_weak = weak.clone();
        let on_pause_weak = weak.clone();
        let on_continue_weak = weak.clone();
        let fetch_fn = context.fetch_fn.clone();
        let retryer = Retryer::new(RetryerConfig {
            attempt: Arc::new(move || fetch_fn()),
            retry: options.retry.clone().unwrap_or_default(),
            retry_delay: options.retry_delay.clone().unwrap_or_default(),
            network_mode: options.network_mode.unwrap_or_default(),
            online: self.core.online.clone(),
            wake_on_online: true,
            on_fail: Some(Box::new(move |failure_count, error| {
                if let Some(query) = on_fail_weak.upgrade() {
                    query.dispatch(QueryAction::Failed {
                        failure_count,
                        error: error.clone(),
                    });
                }
            })),
            on_pause: Some(Box::new(move || {
                if let Some(query) = on_pause_weak.upgrade() {
                    query.dispatch(QueryAction::Pause);
                }
            })),
            on_continue: Some(Box::new(move || {
                if let Some(query) = on_continue_weak.upgrade() {
                    query.dispatch(QueryAction::Continue);
                }
            })),
        });

        let fetch_id = self.fetch_seq.fetch_add(1, Ordering::SeqCst);
        let retry_promise = retryer.promise();
        let settle_weak = weak;
        let promise = async move {
            let result = retry_promise.await;
            match result {
                Ok(value) => match settle_weak.upgrade() {
                    Some(query) => Ok(query.on_fetch_success(value, fetch_id)),
                    None => Ok(Arc::new(value)),
                },
                Err(error) => {
                    if let Some(query) = settle_weak.upgrade() {
                        query.on_fetch_error(error.clone(), fetch_id);
                    }
                    Err(error)
                }
            }
        }
        .boxed()
        .shared();

        *self.active.lock() = Some(ActiveFetch {
            id: fetch_id,
            promise: promise.clone(),
            retryer,
            controller,
            signal_consumed,
        });

        // Drive the fetch to completion even if no caller awaits it.
        if let Ok(handle) = Handle::try_current() {
            let pump = promise.clone();
            handle.spawn(pump.map(|_| ()));
        }

        promise
    }

    fn on_fetch_success(&self, value: T, fetch_id: u64) -> Arc<T> {
        let shared = self.set_data(value, None, false);
        if let Some(cache) = self.cache.upgrade() {
            cache.run_success_hook(&self.hash);
        }
        self.settle(fetch_id);
        shared
    }

    fn on_fetch_error(&self, error: QueryError, fetch_id: u64) {
        if !error.is_silent() {
            self.dispatch(QueryAction::Error {
                error: error.clone(),
            });
        }
        if !error.is_cancelled() {
            self.core
                .logger
                .error(&format!("query {} failed: {error}", self.key));
            if let Some(cache) = self.cache.upgrade() {
                cache.run_error_hook(&self.hash, &error);
            }
        }
        self.settle(fetch_id);
    }

    fn settle(&self, fetch_id: u64) {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|a| a.id == fetch_id) {
            *active = None;
        }
        drop(active);
        self.schedule_gc();
    }

    pub(crate) fn schedule_gc(&self) {
        let weak = self.self_weak.clone();
        self.removable.schedule_gc(move || {
            if let Some(query) = weak.upgrade() {
                query.optional_remove();
            }
        });
    }

    fn optional_remove(&self) {
        let idle = self.state.lock().fetch_status == FetchStatus::Idle;
        if idle && self.observers.lock().is_empty() {
            self.remove_from_cache();
        }
    }

    fn remove_from_cache(&self) {
        if let Some(cache) = self.cache.upgrade() {
            cache.remove_by_hash(&self.hash);
        }
    }

    pub(crate) fn dispatch(&self, action: QueryAction<T>) {
        let kind = action.kind();
        {
            let mut state = self.state.lock();
            *state = self.reduce(&state, &action);
        }
        self.core.notify.batch(|| {
            let observers = self.observers.lock().clone();
            for observer in observers {
                observer.on_query_update(&action);
            }
            if let Some(cache) = self.cache.upgrade() {
                cache.notify_query_updated(&self.hash, &self.key, kind);
            }
        });
    }

    fn reduce(&self, state: &QueryState<T>, action: &QueryAction<T>) -> QueryState<T> {
        match action {
            QueryAction::Fetch { meta } => {
                let online = self.core.online.is_online();
                let mode = self.options.lock().network_mode.unwrap_or_default();
                let mut next = state.clone();
                next.fetch_failure_count = 0;
                next.fetch_failure_reason = None;
                next.fetch_meta = meta.clone();
                next.fetch_status = if can_fetch(mode, online) {
                    FetchStatus::Fetching
                } else {
                    FetchStatus::Paused
                };
                if state.data_updated_at == 0 {
                    next.status = QueryStatus::Loading;
                    next.error = None;
                }
                next
            }
            QueryAction::Failed {
                failure_count,
                error,
            } => {
                let mut next = state.clone();
                next.fetch_failure_count = *failure_count;
                next.fetch_failure_reason = Some(error.clone());
                next
            }
            QueryAction::Pause => {
                let mut next = state.clone();
                next.fetch_status = FetchStatus::Paused;
                next
            }
            QueryAction::Continue => {
                let mut next = state.clone();
                next.fetch_status = FetchStatus::Fetching;
                next
            }
            QueryAction::Success {
                data,
                updated_at,
                manual,
            } => {
                let mut next = state.clone();
                next.data = Some(data.clone());
                next.data_update_count = state.data_update_count + 1;
                next.data_updated_at = updated_at.unwrap_or_else(now_millis);
                next.error = None;
                next.is_invalidated = false;
                next.status = QueryStatus::Success;
                if !manual {
                    next.fetch_status = FetchStatus::Idle;
                    next.fetch_failure_count = 0;
                    next.fetch_failure_reason = None;
                }
                next
            }
            QueryAction::Error { error } => {
                if error.should_revert() {
                    if let Some(reverted) = self.revert_state.lock().clone() {
                        let mut next = reverted;
                        next.fetch_status = FetchStatus::Idle;
                        return next;
                    }
                }
                let mut next = state.clone();
                next.error = Some(error.clone());
                next.error_update_count = state.error_update_count + 1;
                next.error_updated_at = now_millis();
                next.fetch_failure_count = state.fetch_failure_count + 1;
                next.fetch_failure_reason = Some(error.clone());
                next.fetch_status = FetchStatus::Idle;
                next.status = QueryStatus::Error;
                next
            }
            QueryAction::Invalidate => {
                let mut next = state.clone();
                next.is_invalidated = true;
                next
            }
            QueryAction::SetState { state } => state.clone(),
        }
    }

    pub(crate) fn serialize_state(&self) -> Option<Value> {
        match self.state().to_json() {
            Ok(value) => Some(value),
            Err(error) => {
                self.core
                    .logger
                    .warn(&format!("failed to dehydrate query {}: {error}", self.key));
                None
            }
        }
    }

    /// Applies a hydrated state if it is fresher than the current one.
    pub(crate) fn hydrate_state(&self, state_json: &Value) -> bool {
        let Ok(mut hydrated) = QueryState::<T>::from_json(state_json) else {
            self.core
                .logger
                .warn(&format!("failed to hydrate query {}", self.key));
            return false;
        };
        hydrated.fetch_status = FetchStatus::Idle;
        if self.state.lock().data_updated_at >= hydrated.data_updated_at {
            return false;
        }
        self.set_state(hydrated);
        true
    }
}

impl<T: QueryData> std::fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("key", &self.key)
            .field("state", &*self.state.lock())
            .field("observers", &self.observers.lock().len())
            .finish_non_exhaustive()
    }
}

/// Type-erased cache entry interface.
///
/// The cache indexes queries of heterogeneous data types; filter-driven
/// operations (invalidate, refetch, cancel, dehydrate) run through this
/// object-safe surface while typed access goes through a downcast.
pub(crate) trait AnyQuery: Send + Sync + 'static {
    fn query_hash(&self) -> &str;
    fn query_key(&self) -> &QueryKey;
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
    fn status(&self) -> QueryStatus;
    fn fetch_status(&self) -> FetchStatus;
    fn data_updated_at(&self) -> u64;
    fn is_active(&self) -> bool;
    fn is_disabled(&self) -> bool;
    fn is_stale(&self) -> bool;
    fn is_stale_by_time(&self, stale_time: Duration) -> bool;
    fn observer_count(&self) -> usize;
    fn invalidate(&self);
    fn refetch(&self, fetch_options: FetchOptions) -> BoxFuture<'static, ()>;
    fn cancel_fetch(&self, options: CancelOptions) -> BoxFuture<'static, ()>;
    fn reset(&self);
    fn destroy(&self);
    fn on_focus(&self);
    fn on_online(&self);
    fn serialize_state(&self) -> Option<Value>;
    fn hydrate_state(&self, state: &Value) -> bool;
}

impl<T: QueryData> AnyQuery for Query<T> {
    fn query_hash(&self) -> &str {
        &self.hash
    }

    fn query_key(&self) -> &QueryKey {
        &self.key
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn status(&self) -> QueryStatus {
        self.state.lock().status
    }

    fn fetch_status(&self) -> FetchStatus {
        self.state.lock().fetch_status
    }

    fn data_updated_at(&self) -> u64 {
        self.state.lock().data_updated_at
    }

    fn is_active(&self) -> bool {
        Query::is_active(self)
    }

    fn is_disabled(&self) -> bool {
        Query::is_disabled(self)
    }

    fn is_stale(&self) -> bool {
        Query::is_stale(self)
    }

    fn is_stale_by_time(&self, stale_time: Duration) -> bool {
        Query::is_stale_by_time(self, stale_time)
    }

    fn observer_count(&self) -> usize {
        Query::observer_count(self)
    }

    fn invalidate(&self) {
        Query::invalidate(self);
    }

    fn refetch(&self, fetch_options: FetchOptions) -> BoxFuture<'static, ()> {
        let promise = self.fetch(None, fetch_options);
        async move {
            let _ = promise.await;
        }
        .boxed()
    }

    fn cancel_fetch(&self, options: CancelOptions) -> BoxFuture<'static, ()> {
        self.cancel(options)
    }

    fn reset(&self) {
        Query::reset(self);
    }

    fn destroy(&self) {
        Query::destroy(self);
    }

    fn on_focus(&self) {
        Query::on_focus(self);
    }

    fn on_online(&self) {
        Query::on_online(self);
    }

    fn serialize_state(&self) -> Option<Value> {
        Query::serialize_state(self)
    }

    fn hydrate_state(&self, state: &Value) -> bool {
        Query::hydrate_state(self, state)
    }
}

fn initial_state_from<T: QueryData>(options: &QueryOptions<T>) -> QueryState<T> {
    if let Some(initial) = &options.initial_data {
        if let Some(data) = initial.resolve() {
            let mut state = QueryState::empty();
            state.data = Some(Arc::new(data));
            state.data_updated_at = options.initial_data_updated_at.unwrap_or_else(now_millis);
            state.data_update_count = 1;
            state.status = QueryStatus::Success;
            return state;
        }
    }
    QueryState::empty()
}

fn default_fetch_fn<T: QueryData>(
    query_fn: Option<QueryFn<T>>,
    key: QueryKey,
    meta: Option<Arc<Value>>,
    signal: AbortSignal,
    signal_consumed: Arc<AtomicBool>,
) -> FetchFn<T> {
    match query_fn {
        Some(query_fn) => Arc::new(move || {
            let context = QueryFnContext::new(
                key.clone(),
                meta.clone(),
                None,
                signal.clone(),
                signal_consumed.clone(),
            );
            query_fn(context)
        }),
        None => Arc::new(|| async { Err::<T, _>(QueryError::MissingQueryFn) }.boxed()),
    }
}

fn meta_ptr_eq(a: &Option<Arc<Value>>, b: &Option<Arc<Value>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NotifyManager;
    use crate::tracker::{FocusTracker, OnlineTracker};
    use serde_json::json;

    fn core() -> CoreContext {
        CoreContext {
            notify: Arc::new(NotifyManager::new()),
            logger: Arc::new(crate::logger::TracingLogger),
            focus: FocusTracker::new(),
            online: OnlineTracker::new(),
        }
    }

    fn bare_query(options: QueryOptions<i32>) -> Arc<Query<i32>> {
        Query::new(core(), Weak::new(), options, None)
    }

    #[test]
    fn test_initial_state_is_loading_idle() {
        let query = bare_query(QueryOptions::new(json!(["k"])));
        let state = query.state();
        assert_eq!(state.status, QueryStatus::Loading);
        assert_eq!(state.fetch_status, FetchStatus::Idle);
        assert_eq!(state.data_updated_at, 0);
        assert!(!state.is_fetched());
    }

    #[test]
    fn test_initial_data_seeds_success() {
        let options = QueryOptions::new(json!(["k"]))
            .initial_data(7)
            .initial_data_updated_at(1000);
        let query = bare_query(options);
        let state = query.state();
        assert_eq!(state.status, QueryStatus::Success);
        assert_eq!(state.data.as_deref(), Some(&7));
        assert_eq!(state.data_updated_at, 1000);
    }

    #[test]
    fn test_success_action_resets_failures() {
        let query = bare_query(QueryOptions::new(json!(["k"])));
        query.dispatch(QueryAction::Failed {
            failure_count: 2,
            error: QueryError::fetch_failed("e"),
        });
        assert_eq!(query.state().fetch_failure_count, 2);

        query.set_data(5, None, false);
        let state = query.state();
        assert_eq!(state.status, QueryStatus::Success);
        assert_eq!(state.fetch_failure_count, 0);
        assert_eq!(state.fetch_status, FetchStatus::Idle);
        assert!(state.error.is_none());
        assert!(state.data_updated_at > 0);
    }

    #[test]
    fn test_manual_set_keeps_fetch_status() {
        let query = bare_query(QueryOptions::new(json!(["k"])));
        query.dispatch(QueryAction::Fetch { meta: None });
        assert_eq!(query.state().fetch_status, FetchStatus::Fetching);

        query.set_data(5, None, true);
        assert_eq!(query.state().fetch_status, FetchStatus::Fetching);
    }

    #[test]
    fn test_error_action_is_terminal() {
        let query = bare_query(QueryOptions::new(json!(["k"])));
        query.dispatch(QueryAction::Error {
            error: QueryError::fetch_failed("boom"),
        });
        let state = query.state();
        assert_eq!(state.status, QueryStatus::Error);
        assert_eq!(state.error_update_count, 1);
        assert_eq!(state.fetch_failure_count, 1);
        assert_eq!(state.fetch_status, FetchStatus::Idle);
    }

    #[test]
    fn test_invalidate_is_idempotent() {
        let query = bare_query(QueryOptions::new(json!(["k"])));
        query.set_data(1, None, false);
        assert!(!query.state().is_invalidated);

        query.invalidate();
        assert!(query.state().is_invalidated);
        // Second call must not dispatch again; state is unchanged either way.
        query.invalidate();
        assert!(query.state().is_invalidated);
    }

    #[test]
    fn test_structural_sharing_preserves_identity() {
        let query: Arc<Query<Value>> = Query::new(
            core(),
            Weak::new(),
            QueryOptions::new(json!(["k"])),
            None,
        );
        let first = query.set_data(json!({"a": [1, 2, {"b": 3}]}), None, false);
        let second = query.set_data(json!({"a": [1, 2, {"b": 3}]}), None, false);
        assert!(Arc::ptr_eq(&first, &second));

        let third = query.set_data(json!({"a": [1, 2, {"b": 4}]}), None, false);
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn test_is_stale_by_time() {
        let query = bare_query(QueryOptions::new(json!(["k"])));
        assert!(query.is_stale_by_time(Duration::ZERO));

        query.set_data(1, None, false);
        assert!(query.is_stale_by_time(Duration::ZERO));
        assert!(!query.is_stale_by_time(Duration::from_secs(60)));
        assert!(!query.is_stale_by_time(Duration::MAX));

        query.invalidate();
        assert!(query.is_stale_by_time(Duration::MAX));
    }

    #[test]
    fn test_state_serialization_round_trip() {
        let query = bare_query(QueryOptions::new(json!(["k"])));
        query.set_data(42, Some(123_456), false);

        let json = query.state().to_json().unwrap();
        let restored = QueryState::<i32>::from_json(&json).unwrap();
        assert_eq!(restored.data.as_deref(), Some(&42));
        assert_eq!(restored.data_updated_at, 123_456);
        assert_eq!(restored.status, QueryStatus::Success);
    }

    #[test]
    fn test_hydrate_skips_older_snapshot() {
        let query = bare_query(QueryOptions::new(json!(["k"])));
        query.set_data(1, Some(2000), false);

        let mut older = QueryState::empty();
        older.data = Some(Arc::new(9));
        older.data_updated_at = 1000;
        older.status = QueryStatus::Success;
        let older_json = older.to_json().unwrap();

        assert!(!query.hydrate_state(&older_json));
        assert_eq!(query.state().data.as_deref(), Some(&1));
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let query = bare_query(QueryOptions::new(json!(["k"])));
        query.set_data(9, None, false);
        assert_eq!(query.state().status, QueryStatus::Success);

        query.reset();
        let state = query.state();
        assert_eq!(state.status, QueryStatus::Loading);
        assert!(state.data.is_none());
    }
}
