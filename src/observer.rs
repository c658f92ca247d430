//! Query observers.
//!
//! A [`QueryObserver`] derives a per-subscriber result from a cached query:
//! it layers an optimistic fetching overlay, previous-data carryover, a
//! memoized `select` projection and placeholder data over the raw query
//! state, then notifies listeners when — and only when — something they
//! subscribed to actually changed. Observers also own the staleness timeout
//! and the periodic refetch timer for their query.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::client::QueryClient;
use crate::error::QueryError;
use crate::options::{
    FetchOptions, NotifyOnChangeProps, QueryData, QueryFn, QueryObserverOptions, RefetchBehavior,
    ResultData, ResultProp, SelectFn,
};
use crate::query::{
    FetchStatus, Query, QueryAction, QueryObserverBase, QueryState, QueryStatus,
};
use crate::retry::can_fetch;
use crate::time::{millis, now_millis};

static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

/// The derived result an observer exposes to its listeners.
#[derive(Clone)]
pub struct QueryObserverResult<S> {
    pub data: Option<Arc<S>>,
    pub data_updated_at: u64,
    pub error: Option<QueryError>,
    pub error_updated_at: u64,
    pub failure_count: u32,
    pub failure_reason: Option<QueryError>,
    pub status: QueryStatus,
    pub fetch_status: FetchStatus,
    pub is_stale: bool,
    /// The data is placeholder data, not fetched data.
    pub is_placeholder_data: bool,
    /// The data was carried over from the previously observed query.
    pub is_previous_data: bool,
    pub is_fetched: bool,
    pub is_fetched_after_mount: bool,
}

impl<S> QueryObserverResult<S> {
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
    pub const fn is_success(&self) -> bool {
        matches!(self.status, QueryStatus::Success)
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self.status, QueryStatus::Error)
    }

    /// Loading with a fetch actually in flight.
    #[must_use]
    pub const fn is_initial_loading(&self) -> bool {
        self.is_loading() && self.is_fetching()
    }

    /// Fetching in the background of existing data.
    #[must_use]
    pub const fn is_refetching(&self) -> bool {
        self.is_fetching() && !self.is_loading()
    }

    /// Errored before ever receiving data.
    #[must_use]
    pub const fn is_loading_error(&self) -> bool {
        self.is_error() && self.data_updated_at == 0
    }

    /// Errored on a refetch of existing data.
    #[must_use]
    pub const fn is_refetch_error(&self) -> bool {
        self.is_error() && self.data_updated_at > 0
    }

    /// Identity-level comparison: data by pointer, the rest by value.
    pub(crate) fn shallow_eq(&self, other: &Self) -> bool {
        self.changed_props(other).is_empty()
    }

    /// Which fields differ between two results.
    pub(crate) fn changed_props(&self, other: &Self) -> Vec<ResultProp> {
        let mut changed = Vec::new();
        let data_eq = match (&self.data, &other.data) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if !data_eq {
            changed.push(ResultProp::Data);
        }
        if self.data_updated_at != other.data_updated_at {
            changed.push(ResultProp::DataUpdatedAt);
        }
        if self.error != other.error {
            changed.push(ResultProp::Error);
        }
        if self.error_updated_at != other.error_updated_at {
            changed.push(ResultProp::ErrorUpdatedAt);
        }
        if self.failure_count != other.failure_count {
            changed.push(ResultProp::FailureCount);
        }
        if self.failure_reason != other.failure_reason {
            changed.push(ResultProp::FailureReason);
        }
        if self.status != other.status {
            changed.push(ResultProp::Status);
        }
        if self.fetch_status != other.fetch_status {
            changed.push(ResultProp::FetchStatus);
        }
        if self.is_stale != other.is_stale {
            changed.push(ResultProp::IsStale);
        }
        if self.is_placeholder_data != other.is_placeholder_data {
            changed.push(ResultProp::IsPlaceholderData);
        }
        if self.is_previous_data != other.is_previous_data {
            changed.push(ResultProp::IsPreviousData);
        }
        changed
    }
}

impl<S> std::fmt::Debug for QueryObserverResult<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryObserverResult")
            .field("has_data", &self.data.is_some())
            .field("status", &self.status)
            .field("fetch_status", &self.fetch_status)
            .field("is_stale", &self.is_stale)
            .field("is_previous_data", &self.is_previous_data)
            .field("is_placeholder_data", &self.is_placeholder_data)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// Listener receiving result snapshots.
pub type ResultListener<S> = Arc<dyn Fn(QueryObserverResult<S>) + Send + Sync>;

/// Removes its listener on drop; the last one detaches the observer from the
/// query.
pub struct ObserverSubscription<T: QueryData, S: ResultData = T> {
    observer: Weak<QueryObserver<T, S>>,
    id: u64,
}

impl<T: QueryData, S: ResultData> Drop for ObserverSubscription<T, S> {
    fn drop(&mut self) {
        if let Some(observer) = self.observer.upgrade() {
            observer.remove_listener(self.id);
        }
    }
}

struct SelectCache<T, S> {
    input: Arc<T>,
    select: SelectFn<T, S>,
    result: Option<Arc<S>>,
    error: Option<QueryError>,
}

struct ObserverInner<T: QueryData, S: ResultData> {
    options: QueryObserverOptions<T, S>,
    query: Arc<Query<T>>,
    /// Query state snapshot taken when this observer last switched queries;
    /// `is_fetched_after_mount` counts against it.
    query_initial_state: QueryState<T>,
    current_result: QueryObserverResult<S>,
    /// Last result of the previously observed query, the source for
    /// `keep_previous_data` carryover.
    previous_result: Option<QueryObserverResult<S>>,
    select_cache: Option<SelectCache<T, S>>,
    stale_timer: Option<JoinHandle<()>>,
    refetch_timer: Option<JoinHandle<()>>,
    current_refetch_interval: Option<Duration>,
    mounted: bool,
}

/// Derives results from one cached query for one subscriber.
pub struct QueryObserver<T: QueryData, S: ResultData = T> {
    id: u64,
    client: QueryClient,
    self_weak: Weak<Self>,
    inner: Mutex<ObserverInner<T, S>>,
    listeners: Mutex<Vec<(u64, ResultListener<S>)>>,
    next_listener_id: AtomicU64,
}

impl<T: QueryData, S: ResultData> QueryObserver<T, S> {
    pub fn new(client: &QueryClient, options: QueryObserverOptions<T, S>) -> Arc<Self> {
        let options = client.defaulted_observer_options(options);
        let query = client
            .query_cache()
            .build(client.core().clone(), options.query.clone(), None);
        let query_initial_state = query.state();

        Arc::new_cyclic(|self_weak| {
            let mut inner = ObserverInner {
                options,
                query,
                query_initial_state,
                current_result: placeholder_empty_result(),
                previous_result: None,
                select_cache: None,
                stale_timer: None,
                refetch_timer: None,
                current_refetch_interval: None,
                mounted: false,
            };
            inner.current_result = derive_result(client, &mut inner);
            Self {
                id: NEXT_OBSERVER_ID.fetch_add(1, Ordering::SeqCst),
                client: client.clone(),
                self_weak: self_weak.clone(),
                inner: Mutex::new(inner),
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(1),
            }
        })
    }

    /// The latest derived result.
    #[must_use]
    pub fn current_result(&self) -> QueryObserverResult<S> {
        self.inner.lock().current_result.clone()
    }

    /// Registers a listener. The first listener attaches the observer to its
    /// query, runs a mount fetch if warranted and starts the timers.
    pub fn subscribe(
        &self,
        listener: impl Fn(QueryObserverResult<S>) + Send + Sync + 'static,
    ) -> ObserverSubscription<T, S> {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        let first = {
            let mut listeners = self.listeners.lock();
            listeners.push((id, Arc::new(listener)));
            listeners.len() == 1
        };
        if first {
            self.mount();
        }
        ObserverSubscription {
            observer: self.self_weak.clone(),
            id,
        }
    }

    /// Forces a refetch, cancelling an in-flight fetch when data exists. The
    /// returned future resolves to the settled result.
    pub fn refetch(&self) -> BoxFuture<'static, QueryObserverResult<S>> {
        let promise = self.execute_fetch(FetchOptions::default().cancel_refetch(true));
        let this = self.self_weak.upgrade().expect("observer alive");
        async move {
            let _ = promise.await;
            this.current_result()
        }
        .boxed()
    }

    /// Replaces the observer's options, switching queries when the key
    /// changed and refetching when the change warrants it.
    pub fn set_options(&self, options: QueryObserverOptions<T, S>) {
        let options = self.client.defaulted_observer_options(options);
        let (prev_query, next_query, query_changed, fetch_optionally) = {
            let mut inner = self.inner.lock();
            let prev_enabled = inner.options.enabled;
            let prev_query = inner.query.clone();
            let hash_changed = options.query.hash() != prev_query.query_hash().to_owned();

            let next_query = if hash_changed {
                let query = self.client.query_cache().build(
                    self.client.core().clone(),
                    options.query.clone(),
                    None,
                );
                inner.previous_result = Some(inner.current_result.clone());
                inner.query_initial_state = query.state();
                inner.select_cache = None;
                inner.query = query.clone();
                query
            } else {
                prev_query.clone()
            };
            inner.options = options.clone();

            let stale_time = inner.options.resolved_stale_time();
            let fetch_optionally = inner.mounted
                && inner.options.enabled
                && (hash_changed || !prev_enabled)
                && next_query.is_stale_by_time(stale_time);
            (prev_query, next_query, hash_changed, fetch_optionally)
        };

        if query_changed {
            let mounted = self.inner.lock().mounted;
            if mounted {
                prev_query.remove_observer(self.id);
                let this: Arc<dyn QueryObserverBase<T>> =
                    self.self_weak.upgrade().expect("observer alive");
                next_query.add_observer(this);
            }
        }
        self.client
            .query_cache()
            .notify_observer_options_updated(next_query.query_hash(), next_query.key());

        if fetch_optionally {
            let _ = self.execute_fetch(FetchOptions::default());
        }
        self.update_result(None);
        if self.has_listeners() {
            self.update_timers();
        }
    }

    #[must_use]
    pub fn has_listeners(&self) -> bool {
        !self.listeners.lock().is_empty()
    }

    fn mount(&self) {
        {
            self.inner.lock().mounted = true;
        }
        let (query, should_fetch) = {
            let inner = self.inner.lock();
            let should_fetch = should_fetch_on_mount(&inner.query, &inner.options);
            (inner.query.clone(), should_fetch)
        };
        let this: Arc<dyn QueryObserverBase<T>> =
            self.self_weak.upgrade().expect("observer alive");
        query.add_observer(this);
        if should_fetch {
            let _ = self.execute_fetch(FetchOptions::default());
        } else {
            self.update_result(None);
        }
        self.update_timers();
    }

    fn remove_listener(&self, id: u64) {
        let empty = {
            let mut listeners = self.listeners.lock();
            listeners.retain(|(listener_id, _)| *listener_id != id);
            listeners.is_empty()
        };
        if empty {
            self.destroy();
        }
    }

    fn destroy(&self) {
        let query = {
            let mut inner = self.inner.lock();
            inner.mounted = false;
            if let Some(timer) = inner.stale_timer.take() {
                timer.abort();
            }
            if let Some(timer) = inner.refetch_timer.take() {
                timer.abort();
            }
            inner.current_refetch_interval = None;
            inner.query.clone()
        };
        query.remove_observer(self.id);
    }

    fn execute_fetch(
        &self,
        fetch_options: FetchOptions,
    ) -> crate::retry::SharedResult<Arc<T>> {
        let (query, options) = {
            let inner = self.inner.lock();
            (inner.query.clone(), inner.options.query.clone())
        };
        query.fetch(Some(options), fetch_options)
    }

    /// Fetch with explicit options; used by the infinite overlay.
    pub(crate) fn fetch_with(
        &self,
        fetch_options: FetchOptions,
    ) -> crate::retry::SharedResult<Arc<T>> {
        self.execute_fetch(fetch_options)
    }

    /// The observed query's current fetch marker.
    pub(crate) fn query_fetch_meta(&self) -> Option<Arc<serde_json::Value>> {
        self.inner.lock().query.state().fetch_meta
    }

    pub(crate) fn observer_id(&self) -> u64 {
        self.id
    }

    /// Hash of the currently configured key.
    pub(crate) fn options_hash(&self) -> String {
        self.inner.lock().options.query.hash()
    }

    /// Re-derives the result; when it differs from the previous one, records
    /// it and notifies listeners whose subscribed fields changed.
    fn update_result(&self, action: Option<&QueryAction<T>>) {
        let notification = {
            let mut inner = self.inner.lock();
            let next = derive_result(&self.client, &mut inner);
            let prev = inner.current_result.clone();
            if next.shallow_eq(&prev) {
                None
            } else {
                let changed = next.changed_props(&prev);
                inner.current_result = next.clone();
                let should_notify = match &inner.options.notify_on_change_props {
                    NotifyOnChangeProps::All => true,
                    NotifyOnChangeProps::Props(props) => {
                        changed.iter().any(|prop| props.contains(prop))
                            || (inner.options.use_error_boundary
                                && changed.contains(&ResultProp::Error))
                    }
                };
                Some((next, should_notify, inner.options.callbacks.clone()))
            }
        };

        let Some((result, should_notify, callbacks)) = notification else {
            return;
        };

        // Lifecycle callbacks fire on real fetch settlements only.
        match action {
            Some(QueryAction::Success { manual: false, .. }) => {
                if let Some(data) = &result.data {
                    if let Some(on_success) = &callbacks.on_success {
                        on_success(data);
                    }
                }
                if let Some(on_settled) = &callbacks.on_settled {
                    on_settled(result.data.as_ref(), None);
                }
            }
            Some(QueryAction::Error { error }) if !error.is_cancelled() => {
                if let Some(on_error) = &callbacks.on_error {
                    on_error(error);
                }
                if let Some(on_settled) = &callbacks.on_settled {
                    on_settled(None, Some(error));
                }
            }
            _ => {}
        }

        if should_notify {
            self.notify_listeners(result);
        }
        let (hash, key) = {
            let inner = self.inner.lock();
            (
                inner.query.query_hash().to_owned(),
                inner.query.key().clone(),
            )
        };
        self.client
            .query_cache()
            .notify_observer_results_updated(&hash, &key);
    }

    fn notify_listeners(&self, result: QueryObserverResult<S>) {
        let listeners: Vec<ResultListener<S>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            let result = result.clone();
            self.client
                .core()
                .notify
                .schedule(Box::new(move || listener(result)));
        }
    }

    fn update_timers(&self) {
        self.update_stale_timer();
        self.update_refetch_timer();
    }

    fn update_stale_timer(&self) {
        let weak = self.self_weak.clone();
        let mut inner = self.inner.lock();
        if let Some(timer) = inner.stale_timer.take() {
            timer.abort();
        }
        let stale_time = inner.options.resolved_stale_time();
        if stale_time == Duration::MAX || inner.current_result.is_stale {
            return;
        }
        let data_updated_at = inner.current_result.data_updated_at;
        if data_updated_at == 0 {
            return;
        }
        let fire_at = data_updated_at.saturating_add(millis(stale_time)) + 1;
        let delay = Duration::from_millis(fire_at.saturating_sub(now_millis()));
        if let Ok(handle) = Handle::try_current() {
            inner.stale_timer = Some(handle.spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(observer) = weak.upgrade() {
                    observer.update_result(None);
                }
            }));
        }
    }

    fn update_refetch_timer(&self) {
        let weak = self.self_weak.clone();
        let focus = self.client.core().focus.clone();
        let mut inner = self.inner.lock();

        let interval = if inner.options.enabled {
            inner
                .options
                .refetch_interval
                .as_ref()
                .and_then(|interval| interval.resolve(&inner.query.state()))
        } else {
            None
        };
        if interval == inner.current_refetch_interval && inner.refetch_timer.is_some() {
            return;
        }

        if let Some(timer) = inner.refetch_timer.take() {
            timer.abort();
        }
        inner.current_refetch_interval = interval;
        let Some(interval) = interval else {
            return;
        };
        let in_background = inner.options.refetch_interval_in_background;
        if let Ok(handle) = Handle::try_current() {
            inner.refetch_timer = Some(handle.spawn(async move {
                loop {
                    tokio::time::sleep(interval).await;
                    let Some(observer) = weak.upgrade() else {
                        return;
                    };
                    if in_background || focus.is_focused() {
                        let _ = observer.execute_fetch(FetchOptions::default());
                    }
                }
            }));
        }
    }

    fn should_fetch_on(&self, behavior: RefetchBehavior) -> bool {
        let inner = self.inner.lock();
        if !inner.options.enabled {
            return false;
        }
        match behavior {
            RefetchBehavior::Never => false,
            RefetchBehavior::Always => true,
            RefetchBehavior::Stale => inner
                .query
                .is_stale_by_time(inner.options.resolved_stale_time()),
        }
    }
}

impl<T: QueryData, S: ResultData> QueryObserverBase<T> for QueryObserver<T, S> {
    fn id(&self) -> u64 {
        self.id
    }

    fn on_query_update(&self, action: &QueryAction<T>) {
        self.update_result(Some(action));
        if self.has_listeners() {
            self.update_timers();
        }
    }

    fn should_fetch_on_window_focus(&self) -> bool {
        let behavior = {
            let inner = self.inner.lock();
            inner
                .options
                .refetch_on_window_focus_policy()
                .evaluate(&inner.query.state())
        };
        self.should_fetch_on(behavior)
    }

    fn should_fetch_on_reconnect(&self) -> bool {
        let behavior = {
            let inner = self.inner.lock();
            inner
                .options
                .refetch_on_reconnect_policy()
                .evaluate(&inner.query.state())
        };
        self.should_fetch_on(behavior)
    }

    fn is_enabled(&self) -> bool {
        self.inner.lock().options.enabled
    }

    fn current_result_is_stale(&self) -> bool {
        self.inner.lock().current_result.is_stale
    }

    fn query_fn(&self) -> Option<QueryFn<T>> {
        self.inner.lock().options.query.query_fn.clone()
    }

    fn trigger_refetch(&self) {
        let _ = self.execute_fetch(FetchOptions::default());
    }
}

impl<T: QueryData, S: ResultData> std::fmt::Debug for QueryObserver<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryObserver")
            .field("id", &self.id)
            .field("listeners", &self.listeners.lock().len())
            .finish_non_exhaustive()
    }
}

/// Placeholder used only during construction, before the first derivation.
fn placeholder_empty_result<S>() -> QueryObserverResult<S> {
    QueryObserverResult {
        data: None,
        data_updated_at: 0,
        error: None,
        error_updated_at: 0,
        failure_count: 0,
        failure_reason: None,
        status: QueryStatus::Loading,
        fetch_status: FetchStatus::Idle,
        is_stale: true,
        is_placeholder_data: false,
        is_previous_data: false,
        is_fetched: false,
        is_fetched_after_mount: false,
    }
}

fn should_fetch_on_mount<T: QueryData, S: ResultData>(
    query: &Arc<Query<T>>,
    options: &QueryObserverOptions<T, S>,
) -> bool {
    if !options.enabled {
        return false;
    }
    let state = query.state();
    if state.data_updated_at == 0 {
        return !(state.status == QueryStatus::Error && !options.retry_on_mount);
    }
    match options.refetch_on_mount_policy().evaluate(&state) {
        RefetchBehavior::Never => false,
        RefetchBehavior::Always => true,
        RefetchBehavior::Stale => query.is_stale_by_time(options.resolved_stale_time()),
    }
}

/// The result pipeline: optimistic overlay, previous-data carryover, select,
/// placeholder.
fn derive_result<T: QueryData, S: ResultData>(
    client: &QueryClient,
    inner: &mut ObserverInner<T, S>,
) -> QueryObserverResult<S> {
    let state = inner.query.state();
    let options = inner.options.clone();

    let mut status = state.status;
    let mut fetch_status = state.fetch_status;
    let mut data: Option<Arc<S>> = None;
    let mut data_updated_at = state.data_updated_at;
    let mut error = state.error.clone();
    let mut error_updated_at = state.error_updated_at;
    let mut is_placeholder_data = false;
    let mut is_previous_data = false;

    // Optimistic overlay: a mount fetch that has not dispatched yet already
    // reads as in flight.
    if options.optimistic_results
        && !inner.mounted
        && should_fetch_on_mount(&inner.query, &options)
    {
        let core = client.core();
        let mode = options.query.network_mode.unwrap_or_default();
        fetch_status = if can_fetch(mode, core.online.is_online()) {
            FetchStatus::Fetching
        } else {
            FetchStatus::Paused
        };
        if state.data_updated_at == 0 {
            status = QueryStatus::Loading;
            error = None;
        }
    }

    let previous = inner.previous_result.clone();
    let keep_previous = options.keep_previous_data
        && state.data.is_none()
        && previous.as_ref().is_some_and(|p| p.is_success())
        && status != QueryStatus::Error;

    if keep_previous {
        let previous = previous.expect("checked above");
        data = previous.data;
        data_updated_at = previous.data_updated_at;
        status = previous.status;
        is_previous_data = true;
    } else if let Some(query_data) = &state.data {
        // Select, memoized on (input identity, selector identity).
        let cached = inner.select_cache.as_ref().is_some_and(|cache| {
            Arc::ptr_eq(&cache.input, query_data) && Arc::ptr_eq(&cache.select, &options.select)
        });
        if !cached {
            let (result, select_error) = match (options.select)(query_data) {
                Ok(selected) => {
                    // Structural sharing against the prior selected value.
                    let prior = inner.select_cache.as_ref().and_then(|c| c.result.clone());
                    let shared = match prior {
                        Some(prior) if *prior == selected => prior,
                        _ => Arc::new(selected),
                    };
                    (Some(shared), None)
                }
                Err(select_error) => {
                    let prior = inner.select_cache.as_ref().and_then(|c| c.result.clone());
                    (prior, Some(select_error))
                }
            };
            inner.select_cache = Some(SelectCache {
                input: query_data.clone(),
                select: options.select.clone(),
                result,
                error: select_error,
            });
        }
        let cache = inner.select_cache.as_ref().expect("cache just populated");
        data = cache.result.clone();
        if let Some(select_error) = &cache.error {
            error = Some(select_error.clone());
            error_updated_at = now_millis();
            status = QueryStatus::Error;
        }
    }

    // Placeholder shows while the first fetch is still out.
    if data.is_none() && status == QueryStatus::Loading {
        if let Some(placeholder) = &options.placeholder_data {
            if let Some(value) = placeholder.resolve() {
                match (options.select)(&value) {
                    Ok(selected) => {
                        data = Some(Arc::new(selected));
                        status = QueryStatus::Success;
                        is_placeholder_data = true;
                    }
                    Err(select_error) => {
                        error = Some(select_error);
                        error_updated_at = now_millis();
                    }
                }
            }
        }
    }

    let is_stale = inner
        .query
        .is_stale_by_time(options.resolved_stale_time());
    let initial = &inner.query_initial_state;

    QueryObserverResult {
        data,
        data_updated_at,
        error,
        error_updated_at,
        failure_count: state.fetch_failure_count,
        failure_reason: state.fetch_failure_reason.clone(),
        status,
        fetch_status,
        is_stale,
        is_placeholder_data,
        is_previous_data,
        is_fetched: state.is_fetched(),
        is_fetched_after_mount: state.data_update_count > initial.data_update_count
            || state.error_update_count > initial.error_update_count,
    }
}
