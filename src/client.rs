//! The client facade.
//!
//! A [`QueryClient`] binds the query cache, the mutation cache and the two
//! environment trackers together and exposes the user-facing operations:
//! imperative fetching and prefetching, cached reads and writes, bulk
//! invalidation/refetch/cancel/reset by filter, mutation execution, and
//! default-option management. Clients are cheap to clone and share.
//!
//! # Example
//!
//! ```rust,ignore
//! use refetch::{QueryClient, QueryOptions};
//! use serde_json::json;
//!
//! let client = QueryClient::new();
//! client.mount();
//!
//! let todos: Vec<String> = (*client
//!     .fetch_query(QueryOptions::new(json!(["todos"])).query_fn(|_ctx| async {
//!         Ok(vec!["first".to_owned()])
//!     }))
//!     .await?)
//!     .clone();
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::runtime::Handle;

use crate::error::QueryError;
use crate::infinite::{InfiniteData, InfinitePageConfig};
use crate::key::QueryKey;
use crate::logger::{Logger, TracingLogger};
use crate::mutation::{MutationOptions, MutationState, MutationVariables};
use crate::mutation_cache::{
    MutationCache, MutationCacheConfig, MutationFilters, MutationResumer,
};
use crate::notify::NotifyManager;
use crate::options::{DefaultQueryConfig, QueryData, QueryObserverOptions, QueryOptions};
use crate::query::{FetchStatus, QueryState};
use crate::query_cache::{QueryCache, QueryCacheConfig, QueryFilters, QueryTypeFilter};
use crate::retry::{CancelOptions, NetworkMode, RetryDelay, RetryPolicy};
use crate::tracker::{FocusTracker, OnlineTracker, TrackerGuard};

/// Shared plumbing handed to every cache record.
#[derive(Clone)]
pub(crate) struct CoreContext {
    pub notify: Arc<NotifyManager>,
    pub logger: Arc<dyn Logger>,
    pub focus: FocusTracker,
    pub online: OnlineTracker,
}

impl std::fmt::Debug for CoreContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreContext")
            .field("focus", &self.focus)
            .field("online", &self.online)
            .finish_non_exhaustive()
    }
}

/// Untyped mutation defaults, applied globally.
#[derive(Debug, Clone, Default)]
pub struct DefaultMutationConfig {
    pub retry: Option<RetryPolicy>,
    pub retry_delay: Option<RetryDelay>,
    pub network_mode: Option<NetworkMode>,
    pub cache_time: Option<Duration>,
}

/// Global defaults applied before per-key defaults and caller options.
#[derive(Debug, Clone, Default)]
pub struct DefaultOptions {
    pub queries: DefaultQueryConfig,
    pub mutations: DefaultMutationConfig,
}

/// Which queries an invalidation refetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefetchType {
    #[default]
    Active,
    Inactive,
    All,
    /// Mark invalidated but do not refetch.
    None,
}

/// Options for [`QueryClient::invalidate_queries`].
#[derive(Debug, Clone, Copy)]
pub struct InvalidateOptions {
    pub refetch_type: RefetchType,
    pub cancel_refetch: bool,
}

impl Default for InvalidateOptions {
    fn default() -> Self {
        Self {
            refetch_type: RefetchType::Active,
            cancel_refetch: true,
        }
    }
}

/// Options for [`QueryClient::refetch_queries`].
#[derive(Debug, Clone, Copy)]
pub struct RefetchOptions {
    pub cancel_refetch: bool,
}

impl Default for RefetchOptions {
    fn default() -> Self {
        Self {
            cancel_refetch: true,
        }
    }
}

/// Options for the imperative fetch entry points.
pub struct FetchQueryOptions<T: QueryData> {
    pub query: QueryOptions<T>,
    /// Skip the fetch entirely when cached data is fresher than this.
    pub stale_time: Option<Duration>,
}

impl<T: QueryData> FetchQueryOptions<T> {
    #[must_use]
    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = Some(stale_time);
        self
    }
}

impl<T: QueryData> From<QueryOptions<T>> for FetchQueryOptions<T> {
    fn from(query: QueryOptions<T>) -> Self {
        Self {
            query,
            stale_time: None,
        }
    }
}

struct MutationDefaultsEntry {
    key: QueryKey,
    options: Arc<dyn std::any::Any + Send + Sync>,
    resumer: Arc<dyn MutationResumer>,
}

struct ClientInner {
    core: CoreContext,
    query_cache: Arc<QueryCache>,
    mutation_cache: Arc<MutationCache>,
    default_options: DefaultOptions,
    query_defaults: Mutex<Vec<(QueryKey, DefaultQueryConfig)>>,
    mutation_defaults: Mutex<Vec<MutationDefaultsEntry>>,
    mount_count: AtomicUsize,
    tracker_guards: Mutex<Vec<TrackerGuard>>,
}

/// Facade over the caches, trackers and defaults.
#[derive(Clone)]
pub struct QueryClient {
    inner: Arc<ClientInner>,
}

impl QueryClient {
    /// A client with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    #[must_use]
    pub fn builder() -> QueryClientBuilder {
        QueryClientBuilder::default()
    }

    pub(crate) fn core(&self) -> &CoreContext {
        &self.inner.core
    }

    #[must_use]
    pub fn query_cache(&self) -> &Arc<QueryCache> {
        &self.inner.query_cache
    }

    #[must_use]
    pub fn mutation_cache(&self) -> &Arc<MutationCache> {
        &self.inner.mutation_cache
    }

    #[must_use]
    pub fn logger(&self) -> Arc<dyn Logger> {
        self.inner.core.logger.clone()
    }

    #[must_use]
    pub fn focus_tracker(&self) -> &FocusTracker {
        &self.inner.core.focus
    }

    #[must_use]
    pub fn online_tracker(&self) -> &OnlineTracker {
        &self.inner.core.online
    }

    #[must_use]
    pub fn default_query_options(&self) -> &DefaultQueryConfig {
        &self.inner.default_options.queries
    }

    /// Subscribes to the trackers. Ref-counted: only the first `mount` (and
    /// the matching last [`Self::unmount`]) touches the subscriptions.
    ///
    /// On focus the client resumes paused mutations and fans the event out to
    /// the query cache; reconnecting does the same for the online event.
    pub fn mount(&self) {
        if self.inner.mount_count.fetch_add(1, Ordering::SeqCst) > 0 {
            return;
        }
        let focus_client = self.downgraded();
        let focus_guard = self.inner.core.focus.subscribe(Arc::new(move |focused| {
            if focused {
                if let Some(client) = focus_client.upgrade() {
                    spawn_on_runtime(async move {
                        client.resume_paused_mutations().await;
                        client.query_cache().on_focus();
                    });
                }
            }
        }));
        let online_client = self.downgraded();
        let online_guard = self.inner.core.online.subscribe(Arc::new(move |online| {
            if online {
                if let Some(client) = online_client.upgrade() {
                    spawn_on_runtime(async move {
                        client.resume_paused_mutations().await;
                        client.query_cache().on_online();
                    });
                }
            }
        }));
        let mut guards = self.inner.tracker_guards.lock();
        guards.push(focus_guard);
        guards.push(online_guard);
    }

    /// Releases one `mount`; the last caller drops the tracker subscriptions.
    pub fn unmount(&self) {
        let previous = self.inner.mount_count.load(Ordering::SeqCst);
        if previous == 0 {
            return;
        }
        if self.inner.mount_count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.tracker_guards.lock().clear();
        }
    }

    /// Fetches a query, skipping the fetch when cached data is fresh within
    /// the requested stale time. Imperative fetches do not retry unless the
    /// options say so.
    pub async fn fetch_query<T: QueryData>(
        &self,
        options: impl Into<FetchQueryOptions<T>>,
    ) -> Result<Arc<T>, QueryError> {
        let FetchQueryOptions { query, stale_time } = options.into();
        let mut defaulted = self.defaulted_query_options(query);
        if defaulted.retry.is_none() {
            defaulted.retry = Some(RetryPolicy::Never);
        }
        let query = self
            .query_cache()
            .build(self.core().clone(), defaulted.clone(), None);
        if query.is_stale_by_time(stale_time.unwrap_or(Duration::ZERO)) {
            query.fetch(Some(defaulted), Default::default()).await
        } else {
            query
                .state()
                .data
                .ok_or_else(|| QueryError::fetch_failed("fresh query has no data"))
        }
    }

    /// Like [`Self::fetch_query`] but swallows the outcome.
    pub async fn prefetch_query<T: QueryData>(&self, options: impl Into<FetchQueryOptions<T>>) {
        let _ = self.fetch_query(options.into()).await;
    }

    /// Returns cached data when present, fetching otherwise.
    pub async fn ensure_query_data<T: QueryData>(
        &self,
        options: impl Into<FetchQueryOptions<T>>,
    ) -> Result<Arc<T>, QueryError> {
        let options = options.into();
        if let Some(data) = self.get_query_data::<T>(options.query.key.clone()) {
            return Ok(data);
        }
        self.fetch_query(options).await
    }

    /// Cached data for a key, if any.
    #[must_use]
    pub fn get_query_data<T: QueryData>(&self, key: impl Into<QueryKey>) -> Option<Arc<T>> {
        self.get_query_state::<T>(key).and_then(|state| state.data)
    }

    /// Full cached state for a key, if any. A dehydrated snapshot under this
    /// key is adopted on first typed access.
    #[must_use]
    pub fn get_query_state<T: QueryData>(
        &self,
        key: impl Into<QueryKey>,
    ) -> Option<QueryState<T>> {
        let key = key.into();
        let hash = key.hash_string();
        if let Some(query) = self.query_cache().get_typed::<T>(&hash) {
            return Some(query.state());
        }
        if self.query_cache().has_hydrated(&hash) {
            let options = self.defaulted_query_options(QueryOptions::<T>::new(key));
            let query = self
                .query_cache()
                .build(self.core().clone(), options, None);
            return Some(query.state());
        }
        None
    }

    /// Writes data for a key through an updater of the previous value.
    /// Returning `None` from the updater is a no-op.
    pub fn set_query_data<T: QueryData>(
        &self,
        key: impl Into<QueryKey>,
        updater: impl FnOnce(Option<&T>) -> Option<T>,
        updated_at: Option<u64>,
    ) -> Option<Arc<T>> {
        let key = key.into();
        let previous = self.get_query_data::<T>(key.clone());
        let next = updater(previous.as_deref())?;
        let options = self.defaulted_query_options(QueryOptions::<T>::new(key));
        let query = self
            .query_cache()
            .build(self.core().clone(), options, None);
        Some(query.set_data(next, updated_at, true))
    }

    /// Reads data for every query matching the filters.
    #[must_use]
    pub fn get_queries_data<T: QueryData>(
        &self,
        filters: &QueryFilters,
    ) -> Vec<(QueryKey, Option<Arc<T>>)> {
        self.query_cache()
            .find_all(filters)
            .into_iter()
            .filter_map(|query| {
                let key = query.query_key().clone();
                query
                    .as_any()
                    .downcast::<crate::query::Query<T>>()
                    .ok()
                    .map(|typed| (key, typed.state().data))
            })
            .collect()
    }

    /// Maps an updater over every matching query, returning the new data per
    /// key.
    pub fn set_queries_data<T: QueryData>(
        &self,
        filters: &QueryFilters,
        updater: impl Fn(Option<&T>) -> Option<T>,
        updated_at: Option<u64>,
    ) -> Vec<(QueryKey, Option<Arc<T>>)> {
        self.core().notify.batch(|| {
            self.query_cache()
                .find_all(filters)
                .into_iter()
                .filter_map(|query| {
                    let key = query.query_key().clone();
                    let typed = query.as_any().downcast::<crate::query::Query<T>>().ok()?;
                    let next = updater(typed.state().data.as_deref());
                    let written = next.map(|next| typed.set_data(next, updated_at, true));
                    Some((key, written))
                })
                .collect()
        })
    }

    /// Marks matching queries invalidated and refetches per `refetch_type`.
    pub fn invalidate_queries(
        &self,
        filters: QueryFilters,
        options: InvalidateOptions,
    ) -> BoxFuture<'static, ()> {
        self.core().notify.batch(|| {
            for query in self.query_cache().find_all(&filters) {
                query.invalidate();
            }
        });
        let query_type = match options.refetch_type {
            RefetchType::None => return async {}.boxed(),
            RefetchType::Active => QueryTypeFilter::Active,
            RefetchType::Inactive => QueryTypeFilter::Inactive,
            RefetchType::All => QueryTypeFilter::All,
        };
        self.refetch_matching(filters.query_type(query_type), options.cancel_refetch)
    }

    /// Refetches matching non-disabled queries.
    pub fn refetch_queries(
        &self,
        filters: QueryFilters,
        options: RefetchOptions,
    ) -> BoxFuture<'static, ()> {
        self.refetch_matching(filters, options.cancel_refetch)
    }

    /// Cancels in-flight fetches on matching queries. By default the state is
    /// reverted to the snapshot taken at fetch start.
    pub fn cancel_queries(
        &self,
        filters: &QueryFilters,
        options: Option<CancelOptions>,
    ) -> BoxFuture<'static, ()> {
        let options = options.unwrap_or(CancelOptions::revert());
        let futures: Vec<_> = self
            .query_cache()
            .find_all(filters)
            .into_iter()
            .map(|query| query.cancel_fetch(options))
            .collect();
        async move {
            futures::future::join_all(futures).await;
        }
        .boxed()
    }

    /// Removes matching queries from the cache.
    pub fn remove_queries(&self, filters: &QueryFilters) {
        let cache = self.query_cache().clone();
        self.core().notify.batch(|| {
            for query in cache.find_all(filters) {
                cache.remove(&query);
            }
        });
    }

    /// Resets matching queries to their initial state, then refetches the
    /// active ones.
    pub fn reset_queries(&self, filters: QueryFilters) -> BoxFuture<'static, ()> {
        self.core().notify.batch(|| {
            for query in self.query_cache().find_all(&filters) {
                query.reset();
            }
        });
        self.refetch_matching(filters.query_type(QueryTypeFilter::Active), true)
    }

    /// Number of queries currently fetching.
    #[must_use]
    pub fn is_fetching(&self, filters: Option<QueryFilters>) -> usize {
        let filters = filters
            .unwrap_or_default()
            .fetch_status(FetchStatus::Fetching);
        self.query_cache().find_all(&filters).len()
    }

    /// Number of mutations currently running (paused included).
    #[must_use]
    pub fn is_mutating(&self, filters: Option<MutationFilters>) -> usize {
        let filters = filters.unwrap_or_default().fetching(true);
        self.mutation_cache().find_all(&filters).len()
    }

    /// Fetches an infinite query, installing the page behavior.
    pub async fn fetch_infinite_query<TPage: QueryData>(
        &self,
        options: impl Into<FetchQueryOptions<InfiniteData<TPage>>>,
        pages: InfinitePageConfig<TPage>,
    ) -> Result<Arc<InfiniteData<TPage>>, QueryError> {
        let mut options = options.into();
        options.query = pages.install(options.query);
        self.fetch_query(options).await
    }

    /// Like [`Self::fetch_infinite_query`] but swallows the outcome.
    pub async fn prefetch_infinite_query<TPage: QueryData>(
        &self,
        options: impl Into<FetchQueryOptions<InfiniteData<TPage>>>,
        pages: InfinitePageConfig<TPage>,
    ) {
        let _ = self.fetch_infinite_query(options, pages).await;
    }

    /// Runs a mutation through the cache.
    pub fn mutate<V, D, C>(
        &self,
        options: MutationOptions<V, D, C>,
        variables: V,
    ) -> BoxFuture<'static, Result<Arc<D>, QueryError>>
    where
        V: MutationVariables,
        D: Clone + Send + Sync + 'static,
        C: Clone + Send + Sync + 'static,
    {
        let options = self.defaulted_mutation_options(options);
        let mutation = self
            .mutation_cache()
            .build(self.core().clone(), options, None);
        mutation.execute(variables).boxed()
    }

    /// Replays paused mutations in insertion order.
    pub fn resume_paused_mutations(&self) -> BoxFuture<'static, ()> {
        self.mutation_cache().resume_paused_mutations(self)
    }

    /// Registers defaults for keys matching this prefix.
    pub fn set_query_defaults(&self, key: impl Into<QueryKey>, config: DefaultQueryConfig) {
        let key = key.into();
        let mut defaults = self.inner.query_defaults.lock();
        if let Some(entry) = defaults.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = config;
        } else {
            defaults.push((key, config));
        }
    }

    /// The defaults layer for a key: global defaults overlaid with the first
    /// partially-matching registration. Multiple matches warn.
    #[must_use]
    pub fn get_query_defaults(&self, key: Option<&QueryKey>) -> DefaultQueryConfig {
        let mut config = self.inner.default_options.queries.clone();
        if let Some(key) = key {
            let defaults = self.inner.query_defaults.lock();
            let mut matches = defaults.iter().filter(|(k, _)| key.partially_matches(k));
            if let Some((_, first)) = matches.next() {
                if matches.next().is_some() {
                    self.core().logger.warn(&format!(
                        "multiple query defaults match key {key}; using the first registration"
                    ));
                }
                config = config.merged_with(first);
            }
        }
        config
    }

    /// Registers defaults (including the mutation function) for mutations
    /// whose key matches this prefix. Required to replay dehydrated paused
    /// mutations.
    pub fn set_mutation_defaults<V, D, C>(
        &self,
        key: impl Into<QueryKey>,
        options: MutationOptions<V, D, C>,
    ) where
        V: MutationVariables,
        D: Clone + Send + Sync + 'static,
        C: Clone + Send + Sync + 'static,
    {
        let key = key.into();
        let resumer = Arc::new(TypedMutationResumer::<V, D, C> {
            options: options.clone(),
        });
        let entry = MutationDefaultsEntry {
            key: key.clone(),
            options: Arc::new(options),
            resumer,
        };
        let mut defaults = self.inner.mutation_defaults.lock();
        if let Some(existing) = defaults.iter_mut().find(|e| e.key == key) {
            *existing = entry;
        } else {
            defaults.push(entry);
        }
    }

    /// The first registered mutation defaults whose key partially matches.
    #[must_use]
    pub fn get_mutation_defaults<V, D, C>(&self, key: &QueryKey) -> Option<MutationOptions<V, D, C>>
    where
        V: MutationVariables,
        D: Clone + Send + Sync + 'static,
        C: Clone + Send + Sync + 'static,
    {
        let defaults = self.inner.mutation_defaults.lock();
        let mut matches = defaults.iter().filter(|e| key.partially_matches(&e.key));
        let first = matches.next()?;
        if matches.next().is_some() {
            self.core().logger.warn(&format!(
                "multiple mutation defaults match key {key}; using the first registration"
            ));
        }
        first
            .options
            .clone()
            .downcast::<MutationOptions<V, D, C>>()
            .ok()
            .map(|options| (*options).clone())
    }

    pub(crate) fn mutation_resumer_for(
        &self,
        key: Option<&QueryKey>,
    ) -> Option<Arc<dyn MutationResumer>> {
        let key = key?;
        let defaults = self.inner.mutation_defaults.lock();
        defaults
            .iter()
            .find(|e| key.partially_matches(&e.key))
            .map(|e| e.resumer.clone())
    }

    /// Drops everything from both caches.
    pub fn clear(&self) {
        self.query_cache().clear();
        self.mutation_cache().clear();
    }

    pub(crate) fn defaulted_query_options<T: QueryData>(
        &self,
        mut options: QueryOptions<T>,
    ) -> QueryOptions<T> {
        let config = self.get_query_defaults(Some(&options.key.clone()));
        options.apply_defaults(&config);
        options
    }

    pub(crate) fn defaulted_observer_options<T: QueryData, S: crate::options::ResultData>(
        &self,
        mut options: QueryObserverOptions<T, S>,
    ) -> QueryObserverOptions<T, S> {
        let config = self.get_query_defaults(Some(&options.query.key.clone()));
        options.apply_defaults(&config);
        options
    }

    pub(crate) fn defaulted_mutation_options<V, D, C>(
        &self,
        mut options: MutationOptions<V, D, C>,
    ) -> MutationOptions<V, D, C>
    where
        V: MutationVariables,
        D: Clone + Send + Sync + 'static,
        C: Clone + Send + Sync + 'static,
    {
        if let Some(key) = options.key.clone() {
            if let Some(registered) = self.get_mutation_defaults::<V, D, C>(&key) {
                if options.mutation_fn.is_none() {
                    options.mutation_fn = registered.mutation_fn;
                }
                if options.on_mutate.is_none() {
                    options.on_mutate = registered.on_mutate;
                }
                if options.on_success.is_none() {
                    options.on_success = registered.on_success;
                }
                if options.on_error.is_none() {
                    options.on_error = registered.on_error;
                }
                if options.on_settled.is_none() {
                    options.on_settled = registered.on_settled;
                }
                if options.retry.is_none() {
                    options.retry = registered.retry;
                }
                if options.retry_delay.is_none() {
                    options.retry_delay = registered.retry_delay;
                }
                if options.network_mode.is_none() {
                    options.network_mode = registered.network_mode;
                }
            }
        }
        let global = &self.inner.default_options.mutations;
        if options.retry.is_none() {
            options.retry = global.retry.clone();
        }
        if options.retry_delay.is_none() {
            options.retry_delay = global.retry_delay.clone();
        }
        if options.network_mode.is_none() {
            options.network_mode = global.network_mode;
        }
        if options.cache_time.is_none() {
            options.cache_time = global.cache_time;
        }
        options
    }

    fn refetch_matching(
        &self,
        filters: QueryFilters,
        cancel_refetch: bool,
    ) -> BoxFuture<'static, ()> {
        let futures: Vec<_> = self
            .query_cache()
            .find_all(&filters)
            .into_iter()
            .filter(|query| !query.is_disabled())
            .map(|query| {
                query.refetch(crate::options::FetchOptions {
                    cancel_refetch,
                    ..Default::default()
                })
            })
            .collect();
        async move {
            futures::future::join_all(futures).await;
        }
        .boxed()
    }

    fn downgraded(&self) -> WeakClient {
        WeakClient {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryClient")
            .field("query_cache", &self.inner.query_cache)
            .field("mutation_cache", &self.inner.mutation_cache)
            .field("mounted", &self.inner.mount_count.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

struct WeakClient {
    inner: std::sync::Weak<ClientInner>,
}

impl WeakClient {
    fn upgrade(&self) -> Option<QueryClient> {
        self.inner.upgrade().map(|inner| QueryClient { inner })
    }
}

struct TypedMutationResumer<V, D, C>
where
    V: MutationVariables,
    D: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    options: MutationOptions<V, D, C>,
}

impl<V, D, C> MutationResumer for TypedMutationResumer<V, D, C>
where
    V: MutationVariables,
    D: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    fn resume(&self, client: &QueryClient, state: &Value) -> BoxFuture<'static, ()> {
        let state = match MutationState::<V, D, C>::from_json(state) {
            Ok(state) => state,
            Err(error) => {
                client
                    .core()
                    .logger
                    .warn(&format!("failed to hydrate mutation: {error}"));
                return async {}.boxed();
            }
        };
        let options = client.defaulted_mutation_options(self.options.clone());
        let mutation = client
            .mutation_cache()
            .build(client.core().clone(), options, Some(state));
        mutation.resume()
    }
}

/// Runs a future on the current runtime; without a runtime (synchronous
/// tests) tracker events have nothing to resume and are dropped.
fn spawn_on_runtime(future: impl Future<Output = ()> + Send + 'static) {
    if let Ok(handle) = Handle::try_current() {
        handle.spawn(future);
    }
}

/// Configures and builds a [`QueryClient`].
#[derive(Default)]
pub struct QueryClientBuilder {
    query_cache: Option<Arc<QueryCache>>,
    mutation_cache: Option<Arc<MutationCache>>,
    logger: Option<Arc<dyn Logger>>,
    focus: Option<FocusTracker>,
    online: Option<OnlineTracker>,
    default_options: DefaultOptions,
}

impl QueryClientBuilder {
    #[must_use]
    pub fn query_cache(mut self, cache: Arc<QueryCache>) -> Self {
        self.query_cache = Some(cache);
        self
    }

    #[must_use]
    pub fn mutation_cache(mut self, cache: Arc<MutationCache>) -> Self {
        self.mutation_cache = Some(cache);
        self
    }

    #[must_use]
    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    #[must_use]
    pub fn focus_tracker(mut self, tracker: FocusTracker) -> Self {
        self.focus = Some(tracker);
        self
    }

    #[must_use]
    pub fn online_tracker(mut self, tracker: OnlineTracker) -> Self {
        self.online = Some(tracker);
        self
    }

    #[must_use]
    pub fn default_options(mut self, default_options: DefaultOptions) -> Self {
        self.default_options = default_options;
        self
    }

    #[must_use]
    pub fn build(self) -> QueryClient {
        let core = CoreContext {
            notify: Arc::new(NotifyManager::new()),
            logger: self.logger.unwrap_or_else(|| Arc::new(TracingLogger)),
            focus: self.focus.unwrap_or_default(),
            online: self.online.unwrap_or_default(),
        };
        let query_cache = self
            .query_cache
            .unwrap_or_else(|| QueryCache::new(QueryCacheConfig::default()));
        let mutation_cache = self
            .mutation_cache
            .unwrap_or_else(|| MutationCache::new(MutationCacheConfig::default()));
        query_cache.attach(core.clone());
        mutation_cache.attach(core.clone());
        QueryClient {
            inner: Arc::new(ClientInner {
                core,
                query_cache,
                mutation_cache,
                default_options: self.default_options,
                query_defaults: Mutex::new(Vec::new()),
                mutation_defaults: Mutex::new(Vec::new()),
                mount_count: AtomicUsize::new(0),
                tracker_guards: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl std::fmt::Debug for QueryClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryClientBuilder").finish_non_exhaustive()
    }
}
