//! Query and observer options.
//!
//! [`QueryOptions`] configures the cached entry itself (fetcher, retry policy,
//! retention); [`QueryObserverOptions`] layers per-subscriber behavior on top
//! (staleness, automatic refetching, result shaping). Both are plain builder
//! structs; unset fields fall back to the client's defaults when the options
//! are resolved.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::abort::AbortSignal;
use crate::error::QueryError;
use crate::key::QueryKey;
use crate::query::QueryState;
use crate::retry::{NetworkMode, RetryDelay, RetryPolicy};

/// Bound for values a query observer can produce.
pub trait ResultData: Clone + PartialEq + Send + Sync + 'static {}
impl<T: Clone + PartialEq + Send + Sync + 'static> ResultData for T {}

/// Bound for values a query can cache.
///
/// Serialization is required so cached state can be dehydrated and restored;
/// equality powers structural sharing.
pub trait QueryData: ResultData + Serialize + DeserializeOwned {}
impl<T: ResultData + Serialize + DeserializeOwned> QueryData for T {}

/// The future a query function returns.
pub type QueryFuture<T> = BoxFuture<'static, Result<T, QueryError>>;

/// A query function: receives the fetch context, returns the data.
pub type QueryFn<T> = Arc<dyn Fn(QueryFnContext) -> QueryFuture<T> + Send + Sync>;

/// Context passed to a query function.
///
/// The abort signal is handed out through [`QueryFnContext::signal`], which
/// also records that the fetcher observed it; cancellation behavior differs
/// for fetches whose signal was never consumed.
#[derive(Clone)]
pub struct QueryFnContext {
    pub key: QueryKey,
    pub meta: Option<Arc<Value>>,
    /// Set for infinite queries: the parameter of the page being fetched.
    pub page_param: Option<Value>,
    signal: AbortSignal,
    signal_consumed: Arc<AtomicBool>,
}

impl QueryFnContext {
    pub(crate) fn new(
        key: QueryKey,
        meta: Option<Arc<Value>>,
        page_param: Option<Value>,
        signal: AbortSignal,
        signal_consumed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            key,
            meta,
            page_param,
            signal,
            signal_consumed,
        }
    }

    /// The abort signal for this fetch.
    ///
    /// Reading it marks the signal as consumed: once consumed, removing the
    /// last observer cancels the fetch outright instead of letting the
    /// in-flight attempt settle.
    #[must_use]
    pub fn signal(&self) -> AbortSignal {
        self.signal_consumed.store(true, Ordering::SeqCst);
        self.signal.clone()
    }
}

impl std::fmt::Debug for QueryFnContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryFnContext")
            .field("key", &self.key)
            .field("page_param", &self.page_param)
            .finish_non_exhaustive()
    }
}

/// Direction of an incremental page fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDirection {
    Forward,
    Backward,
}

/// Request for an incremental page fetch on an infinite query.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchMore {
    pub direction: FetchDirection,
    /// Overrides the computed page parameter when set.
    pub page_param: Option<Value>,
}

/// Per-call fetch options.
#[derive(Clone, Default)]
pub struct FetchOptions {
    /// Cancel an in-flight fetch (when data already exists) and start a new
    /// one instead of joining it.
    pub cancel_refetch: bool,
    /// Opaque marker stored as the entry's `fetch_meta`; compared by identity.
    pub meta: Option<Arc<Value>>,
    /// Set for incremental infinite fetches.
    pub fetch_more: Option<FetchMore>,
    /// Page selector for infinite refetches; downcast by the infinite
    /// behavior to its typed predicate.
    pub refetch_page: Option<Arc<dyn Any + Send + Sync>>,
}

impl FetchOptions {
    #[must_use]
    pub fn cancel_refetch(mut self, cancel_refetch: bool) -> Self {
        self.cancel_refetch = cancel_refetch;
        self
    }
}

impl std::fmt::Debug for FetchOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchOptions")
            .field("cancel_refetch", &self.cancel_refetch)
            .field("fetch_more", &self.fetch_more)
            .finish_non_exhaustive()
    }
}

/// Initial data seeded into a query at build time.
#[derive(Clone)]
pub enum InitialData<T> {
    Value(T),
    /// Computed lazily; returning `None` leaves the query empty.
    Computed(Arc<dyn Fn() -> Option<T> + Send + Sync>),
}

impl<T: Clone> InitialData<T> {
    pub(crate) fn resolve(&self) -> Option<T> {
        match self {
            Self::Value(value) => Some(value.clone()),
            Self::Computed(f) => f(),
        }
    }
}

impl<T> std::fmt::Debug for InitialData<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(_) => f.write_str("Value"),
            Self::Computed(_) => f.write_str("Computed"),
        }
    }
}

/// Equality hook short-circuiting data replacement.
pub type IsDataEqualFn<T> = Arc<dyn Fn(Option<&T>, &T) -> bool + Send + Sync>;

/// How new data replaces cached data on a successful set.
#[derive(Clone)]
pub enum StructuralSharing<T> {
    /// Always replace.
    Disabled,
    /// Keep the previous allocation when the new value is deep-equal,
    /// preserving identity across refetches.
    DeepEqual,
    /// Custom combiner.
    Custom(Arc<dyn Fn(Option<&Arc<T>>, T) -> Arc<T> + Send + Sync>),
}

impl<T> Default for StructuralSharing<T> {
    fn default() -> Self {
        Self::DeepEqual
    }
}

impl<T> std::fmt::Debug for StructuralSharing<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => f.write_str("Disabled"),
            Self::DeepEqual => f.write_str("DeepEqual"),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Applies the data-replacement pipeline for a successful set.
pub(crate) fn replace_data<T: ResultData>(
    prev: Option<&Arc<T>>,
    next: T,
    is_data_equal: Option<&IsDataEqualFn<T>>,
    sharing: &StructuralSharing<T>,
) -> Arc<T> {
    if let Some(equal) = is_data_equal {
        if equal(prev.map(|p| &**p), &next) {
            if let Some(prev) = prev {
                return prev.clone();
            }
        }
    }
    match sharing {
        StructuralSharing::Custom(combine) => combine(prev, next),
        StructuralSharing::DeepEqual => match prev {
            Some(prev) if **prev == next => prev.clone(),
            _ => Arc::new(next),
        },
        StructuralSharing::Disabled => Arc::new(next),
    }
}

/// Configuration of one cached query.
#[derive(Clone)]
pub struct QueryOptions<T: QueryData> {
    pub key: QueryKey,
    pub query_fn: Option<QueryFn<T>>,
    pub retry: Option<RetryPolicy>,
    pub retry_delay: Option<RetryDelay>,
    pub network_mode: Option<NetworkMode>,
    pub cache_time: Option<Duration>,
    pub meta: Option<Arc<Value>>,
    pub initial_data: Option<InitialData<T>>,
    pub initial_data_updated_at: Option<u64>,
    pub is_data_equal: Option<IsDataEqualFn<T>>,
    pub structural_sharing: StructuralSharing<T>,
    pub behavior: Option<Arc<dyn crate::query::QueryBehavior<T>>>,
    /// Overrides the computed key hash, e.g. for keys that are expensive to
    /// canonicalize repeatedly.
    pub query_hash: Option<String>,
}

impl<T: QueryData> QueryOptions<T> {
    #[must_use]
    pub fn new(key: impl Into<QueryKey>) -> Self {
        Self {
            key: key.into(),
            query_fn: None,
            retry: None,
            retry_delay: None,
            network_mode: None,
            cache_time: None,
            meta: None,
            initial_data: None,
            initial_data_updated_at: None,
            is_data_equal: None,
            structural_sharing: StructuralSharing::default(),
            behavior: None,
            query_hash: None,
        }
    }

    #[must_use]
    pub fn query_fn<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(QueryFnContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        self.query_fn = Some(Arc::new(move |ctx| f(ctx).boxed()));
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: impl Into<RetryPolicy>) -> Self {
        self.retry = Some(retry.into());
        self
    }

    #[must_use]
    pub fn retry_delay(mut self, delay: RetryDelay) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn network_mode(mut self, mode: NetworkMode) -> Self {
        self.network_mode = Some(mode);
        self
    }

    #[must_use]
    pub fn cache_time(mut self, cache_time: Duration) -> Self {
        self.cache_time = Some(cache_time);
        self
    }

    #[must_use]
    pub fn meta(mut self, meta: Value) -> Self {
        self.meta = Some(Arc::new(meta));
        self
    }

    #[must_use]
    pub fn initial_data(mut self, data: T) -> Self {
        self.initial_data = Some(InitialData::Value(data));
        self
    }

    #[must_use]
    pub fn initial_data_updated_at(mut self, at: u64) -> Self {
        self.initial_data_updated_at = Some(at);
        self
    }

    #[must_use]
    pub fn structural_sharing(mut self, sharing: StructuralSharing<T>) -> Self {
        self.structural_sharing = sharing;
        self
    }

    pub(crate) fn hash(&self) -> String {
        self.query_hash
            .clone()
            .unwrap_or_else(|| self.key.hash_string())
    }

    /// Fills unset policy fields from an untyped defaults layer.
    pub(crate) fn apply_defaults(&mut self, defaults: &DefaultQueryConfig) {
        if self.retry.is_none() {
            self.retry = defaults.retry.clone();
        }
        if self.retry_delay.is_none() {
            self.retry_delay = defaults.retry_delay.clone();
        }
        if self.network_mode.is_none() {
            self.network_mode = defaults.network_mode;
        }
        if self.cache_time.is_none() {
            self.cache_time = defaults.cache_time;
        }
    }
}

impl<T: QueryData> std::fmt::Debug for QueryOptions<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryOptions")
            .field("key", &self.key)
            .field("retry", &self.retry)
            .field("network_mode", &self.network_mode)
            .field("cache_time", &self.cache_time)
            .finish_non_exhaustive()
    }
}

/// Normalized decision of a refetch-on-event policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefetchBehavior {
    /// Never refetch on this event.
    Never,
    /// Refetch when the data is stale.
    Stale,
    /// Refetch unconditionally.
    Always,
}

/// Whether an observer refetches on focus, reconnect or mount.
///
/// The dynamic `boolean | 'always' | fn` option of the source system is a sum
/// type here; [`RefetchOn::evaluate`] normalizes the custom variant against
/// the current query state.
#[derive(Clone)]
pub enum RefetchOn<T> {
    Never,
    Stale,
    Always,
    Custom(Arc<dyn Fn(&QueryState<T>) -> RefetchBehavior + Send + Sync>),
}

impl<T> RefetchOn<T> {
    pub(crate) fn evaluate(&self, state: &QueryState<T>) -> RefetchBehavior {
        match self {
            Self::Never => RefetchBehavior::Never,
            Self::Stale => RefetchBehavior::Stale,
            Self::Always => RefetchBehavior::Always,
            Self::Custom(f) => f(state),
        }
    }
}

impl<T> From<RefetchBehavior> for RefetchOn<T> {
    fn from(behavior: RefetchBehavior) -> Self {
        match behavior {
            RefetchBehavior::Never => Self::Never,
            RefetchBehavior::Stale => Self::Stale,
            RefetchBehavior::Always => Self::Always,
        }
    }
}

impl<T> std::fmt::Debug for RefetchOn<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Never => f.write_str("Never"),
            Self::Stale => f.write_str("Stale"),
            Self::Always => f.write_str("Always"),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Automatic background refetch cadence.
#[derive(Clone)]
pub enum RefetchInterval<T> {
    Every(Duration),
    /// Computed from the current data and query state; `None` disables the
    /// timer until the next re-evaluation.
    Computed(Arc<dyn Fn(Option<&Arc<T>>, &QueryState<T>) -> Option<Duration> + Send + Sync>),
}

impl<T> RefetchInterval<T> {
    pub(crate) fn resolve(&self, state: &QueryState<T>) -> Option<Duration> {
        match self {
            Self::Every(interval) => Some(*interval),
            Self::Computed(f) => f(state.data.as_ref(), state),
        }
        .filter(|interval| !interval.is_zero() && *interval != Duration::MAX)
    }
}

impl<T> std::fmt::Debug for RefetchInterval<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Every(d) => f.debug_tuple("Every").field(d).finish(),
            Self::Computed(_) => f.write_str("Computed"),
        }
    }
}

/// Placeholder shown while a query has no data yet.
#[derive(Clone)]
pub enum PlaceholderData<T> {
    Value(T),
    Computed(Arc<dyn Fn() -> Option<T> + Send + Sync>),
}

impl<T: Clone> PlaceholderData<T> {
    pub(crate) fn resolve(&self) -> Option<T> {
        match self {
            Self::Value(value) => Some(value.clone()),
            Self::Computed(f) => f(),
        }
    }
}

impl<T> std::fmt::Debug for PlaceholderData<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Value(_) => f.write_str("Value"),
            Self::Computed(_) => f.write_str("Computed"),
        }
    }
}

/// Fallible projection from cached data to the observer's result data.
pub type SelectFn<T, S> = Arc<dyn Fn(&T) -> Result<S, QueryError> + Send + Sync>;

/// Fields of an observer result, for field-scoped change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultProp {
    Data,
    DataUpdatedAt,
    Error,
    ErrorUpdatedAt,
    FailureCount,
    FailureReason,
    Status,
    FetchStatus,
    IsStale,
    IsPlaceholderData,
    IsPreviousData,
}

/// Which result changes wake an observer's listeners.
///
/// This is the explicit subscribe-to-fields replacement for the source
/// system's property-access tracking: listeners fire only when a subscribed
/// field actually changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NotifyOnChangeProps {
    /// Notify on any result change.
    #[default]
    All,
    /// Notify only when one of these fields changed.
    Props(Vec<ResultProp>),
}

/// Lifecycle callbacks invoked as an observer's result settles.
pub struct ResultCallbacks<S> {
    pub on_success: Option<Arc<dyn Fn(&Arc<S>) + Send + Sync>>,
    pub on_error: Option<Arc<dyn Fn(&QueryError) + Send + Sync>>,
    pub on_settled: Option<Arc<dyn Fn(Option<&Arc<S>>, Option<&QueryError>) + Send + Sync>>,
}

impl<S> Clone for ResultCallbacks<S> {
    fn clone(&self) -> Self {
        Self {
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
            on_settled: self.on_settled.clone(),
        }
    }
}

impl<S> Default for ResultCallbacks<S> {
    fn default() -> Self {
        Self {
            on_success: None,
            on_error: None,
            on_settled: None,
        }
    }
}

/// Configuration of one query observer.
#[derive(Clone)]
pub struct QueryObserverOptions<T: QueryData, S: ResultData = T> {
    pub query: QueryOptions<T>,
    pub enabled: bool,
    pub stale_time: Option<Duration>,
    pub refetch_interval: Option<RefetchInterval<T>>,
    pub refetch_interval_in_background: bool,
    pub refetch_on_window_focus: Option<RefetchOn<T>>,
    pub refetch_on_reconnect: Option<RefetchOn<T>>,
    pub refetch_on_mount: Option<RefetchOn<T>>,
    pub retry_on_mount: bool,
    pub notify_on_change_props: NotifyOnChangeProps,
    /// Implicitly subscribes listeners to error changes even under a
    /// field-scoped notification list.
    pub use_error_boundary: bool,
    pub keep_previous_data: bool,
    pub placeholder_data: Option<PlaceholderData<T>>,
    pub select: SelectFn<T, S>,
    /// Overlay an optimistic fetching state on results while a mount-triggered
    /// fetch has not dispatched yet.
    pub optimistic_results: bool,
    pub callbacks: ResultCallbacks<S>,
}

impl<T: QueryData> QueryObserverOptions<T, T> {
    #[must_use]
    pub fn new(key: impl Into<QueryKey>) -> Self {
        Self::from_query(QueryOptions::new(key))
    }

    /// Wraps entry-level options with default observer behavior and an
    /// identity selection.
    #[must_use]
    pub fn from_query(query: QueryOptions<T>) -> Self {
        Self {
            query,
            enabled: true,
            stale_time: None,
            refetch_interval: None,
            refetch_interval_in_background: false,
            refetch_on_window_focus: None,
            refetch_on_reconnect: None,
            refetch_on_mount: None,
            retry_on_mount: true,
            notify_on_change_props: NotifyOnChangeProps::default(),
            use_error_boundary: false,
            keep_previous_data: false,
            placeholder_data: None,
            select: Arc::new(|data: &T| Ok(data.clone())),
            optimistic_results: true,
            callbacks: ResultCallbacks::default(),
        }
    }
}

impl<T: QueryData, S: ResultData> QueryObserverOptions<T, S> {
    /// Replaces the selection, possibly changing the derived data type.
    #[must_use]
    pub fn select<S2, F>(self, select: F) -> QueryObserverOptions<T, S2>
    where
        S2: ResultData,
        F: Fn(&T) -> Result<S2, QueryError> + Send + Sync + 'static,
    {
        QueryObserverOptions {
            query: self.query,
            enabled: self.enabled,
            stale_time: self.stale_time,
            refetch_interval: self.refetch_interval,
            refetch_interval_in_background: self.refetch_interval_in_background,
            refetch_on_window_focus: self.refetch_on_window_focus,
            refetch_on_reconnect: self.refetch_on_reconnect,
            refetch_on_mount: self.refetch_on_mount,
            retry_on_mount: self.retry_on_mount,
            notify_on_change_props: self.notify_on_change_props,
            use_error_boundary: self.use_error_boundary,
            keep_previous_data: self.keep_previous_data,
            placeholder_data: self.placeholder_data,
            select: Arc::new(select),
            optimistic_results: self.optimistic_results,
            callbacks: ResultCallbacks::default(),
        }
    }

    #[must_use]
    pub fn query_fn<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(QueryFnContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, QueryError>> + Send + 'static,
    {
        self.query = self.query.query_fn(f);
        self
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = Some(stale_time);
        self
    }

    #[must_use]
    pub fn refetch_interval(mut self, interval: Duration) -> Self {
        self.refetch_interval = Some(RefetchInterval::Every(interval));
        self
    }

    #[must_use]
    pub fn refetch_on_window_focus(mut self, refetch: RefetchOn<T>) -> Self {
        self.refetch_on_window_focus = Some(refetch);
        self
    }

    #[must_use]
    pub fn refetch_on_reconnect(mut self, refetch: RefetchOn<T>) -> Self {
        self.refetch_on_reconnect = Some(refetch);
        self
    }

    #[must_use]
    pub fn refetch_on_mount(mut self, refetch: RefetchOn<T>) -> Self {
        self.refetch_on_mount = Some(refetch);
        self
    }

    #[must_use]
    pub fn keep_previous_data(mut self, keep: bool) -> Self {
        self.keep_previous_data = keep;
        self
    }

    #[must_use]
    pub fn placeholder_data(mut self, data: T) -> Self {
        self.placeholder_data = Some(PlaceholderData::Value(data));
        self
    }

    #[must_use]
    pub fn notify_on_change_props(mut self, props: Vec<ResultProp>) -> Self {
        self.notify_on_change_props = NotifyOnChangeProps::Props(props);
        self
    }

    #[must_use]
    pub fn on_success(mut self, f: impl Fn(&Arc<S>) + Send + Sync + 'static) -> Self {
        self.callbacks.on_success = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_error(mut self, f: impl Fn(&QueryError) + Send + Sync + 'static) -> Self {
        self.callbacks.on_error = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_settled(
        mut self,
        f: impl Fn(Option<&Arc<S>>, Option<&QueryError>) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_settled = Some(Arc::new(f));
        self
    }

    pub(crate) fn resolved_stale_time(&self) -> Duration {
        self.stale_time.unwrap_or(Duration::ZERO)
    }

    pub(crate) fn refetch_on_window_focus_policy(&self) -> RefetchOn<T> {
        self.refetch_on_window_focus.clone().unwrap_or(RefetchOn::Stale)
    }

    pub(crate) fn refetch_on_reconnect_policy(&self) -> RefetchOn<T> {
        self.refetch_on_reconnect.clone().unwrap_or(RefetchOn::Stale)
    }

    pub(crate) fn refetch_on_mount_policy(&self) -> RefetchOn<T> {
        self.refetch_on_mount.clone().unwrap_or(RefetchOn::Stale)
    }

    /// Fills unset fields from an untyped defaults layer.
    pub(crate) fn apply_defaults(&mut self, defaults: &DefaultQueryConfig) {
        self.query.apply_defaults(defaults);
        if self.stale_time.is_none() {
            self.stale_time = defaults.stale_time;
        }
        if self.refetch_on_window_focus.is_none() {
            self.refetch_on_window_focus = defaults.refetch_on_window_focus.map(Into::into);
        }
        if self.refetch_on_reconnect.is_none() {
            self.refetch_on_reconnect = defaults.refetch_on_reconnect.map(Into::into);
        }
        if self.refetch_on_mount.is_none() {
            self.refetch_on_mount = defaults.refetch_on_mount.map(Into::into);
        }
    }
}

impl<T: QueryData, S: ResultData> std::fmt::Debug for QueryObserverOptions<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryObserverOptions")
            .field("key", &self.query.key)
            .field("enabled", &self.enabled)
            .field("stale_time", &self.stale_time)
            .field("keep_previous_data", &self.keep_previous_data)
            .finish_non_exhaustive()
    }
}

/// Untyped query defaults, applied globally or per key prefix.
#[derive(Debug, Clone, Default)]
pub struct DefaultQueryConfig {
    pub retry: Option<RetryPolicy>,
    pub retry_delay: Option<RetryDelay>,
    pub network_mode: Option<NetworkMode>,
    pub cache_time: Option<Duration>,
    pub stale_time: Option<Duration>,
    pub refetch_on_window_focus: Option<RefetchBehavior>,
    pub refetch_on_reconnect: Option<RefetchBehavior>,
    pub refetch_on_mount: Option<RefetchBehavior>,
}

impl DefaultQueryConfig {
    /// Overlays `other` on top of `self`, returning the merged layer.
    #[must_use]
    pub(crate) fn merged_with(&self, other: &Self) -> Self {
        Self {
            retry: other.retry.clone().or_else(|| self.retry.clone()),
            retry_delay: other.retry_delay.clone().or_else(|| self.retry_delay.clone()),
            network_mode: other.network_mode.or(self.network_mode),
            cache_time: other.cache_time.or(self.cache_time),
            stale_time: other.stale_time.or(self.stale_time),
            refetch_on_window_focus: other
                .refetch_on_window_focus
                .or(self.refetch_on_window_focus),
            refetch_on_reconnect: other.refetch_on_reconnect.or(self.refetch_on_reconnect),
            refetch_on_mount: other.refetch_on_mount.or(self.refetch_on_mount),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_data_keeps_identity_on_deep_equal() {
        let prev = Arc::new(vec![1, 2, 3]);
        let next = vec![1, 2, 3];
        let replaced = replace_data(Some(&prev), next, None, &StructuralSharing::DeepEqual);
        assert!(Arc::ptr_eq(&prev, &replaced));
    }

    #[test]
    fn test_replace_data_swaps_on_change() {
        let prev = Arc::new(vec![1, 2, 3]);
        let next = vec![1, 2, 4];
        let replaced = replace_data(Some(&prev), next, None, &StructuralSharing::DeepEqual);
        assert!(!Arc::ptr_eq(&prev, &replaced));
        assert_eq!(*replaced, vec![1, 2, 4]);
    }

    #[test]
    fn test_replace_data_disabled_always_swaps() {
        let prev = Arc::new(1);
        let replaced = replace_data(Some(&prev), 1, None, &StructuralSharing::Disabled);
        assert!(!Arc::ptr_eq(&prev, &replaced));
    }

    #[test]
    fn test_is_data_equal_short_circuits() {
        let prev = Arc::new(10);
        let equal: IsDataEqualFn<i32> = Arc::new(|_, _| true);
        let replaced = replace_data(Some(&prev), 99, Some(&equal), &StructuralSharing::Disabled);
        assert!(Arc::ptr_eq(&prev, &replaced));
    }

    #[test]
    fn test_default_config_merge_prefers_overlay() {
        let base = DefaultQueryConfig {
            retry: Some(RetryPolicy::Count(1)),
            stale_time: Some(Duration::from_secs(1)),
            ..Default::default()
        };
        let overlay = DefaultQueryConfig {
            stale_time: Some(Duration::from_secs(9)),
            ..Default::default()
        };
        let merged = base.merged_with(&overlay);
        assert_eq!(merged.stale_time, Some(Duration::from_secs(9)));
        assert!(matches!(merged.retry, Some(RetryPolicy::Count(1))));
    }

    #[test]
    fn test_refetch_interval_filters_degenerate_values() {
        let state = QueryState::<i32>::empty();
        let every = RefetchInterval::Every(Duration::ZERO);
        assert_eq!(every.resolve(&state), None);

        let every = RefetchInterval::Every(Duration::from_secs(1));
        assert_eq!(every.resolve(&state), Some(Duration::from_secs(1)));
    }
}
