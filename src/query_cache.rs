//! The keyed query cache.
//!
//! A [`QueryCache`] owns every [`Query`] record, indexed by canonical key hash
//! with insertion order preserved for iteration. Lifecycle events (`added`,
//! `removed`, `updated`, observer changes) fan out to subscribers through the
//! client's notification batching. Filter-driven lookups power the bulk
//! client operations: invalidate, refetch, cancel, remove and count.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;

use crate::client::CoreContext;
use crate::key::QueryKey;
use crate::options::{QueryData, QueryOptions};
use crate::query::{AnyQuery, FetchStatus, Query, QueryActionKind, QueryState, QueryStatus};

/// What kind of cache transition an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryCacheEventKind {
    Added,
    Removed,
    Updated,
    ObserverAdded,
    ObserverRemoved,
    ObserverResultsUpdated,
    ObserverOptionsUpdated,
}

/// A cache lifecycle event.
#[derive(Debug, Clone)]
pub struct QueryCacheEvent {
    pub kind: QueryCacheEventKind,
    pub query_hash: String,
    pub query_key: QueryKey,
    /// Set for `Updated` events: which state transition occurred.
    pub action: Option<QueryActionKind>,
}

/// Listener for cache events.
pub type QueryCacheListener = Arc<dyn Fn(&QueryCacheEvent) + Send + Sync>;

/// Snapshot handed to a filter predicate.
#[derive(Debug, Clone)]
pub struct QueryPredicateContext {
    pub key: QueryKey,
    pub hash: String,
    pub status: QueryStatus,
    pub fetch_status: FetchStatus,
    pub is_active: bool,
    pub is_stale: bool,
    pub observer_count: usize,
}

/// Which queries a filter targets by activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryTypeFilter {
    #[default]
    All,
    /// At least one enabled observer.
    Active,
    Inactive,
}

/// Conjunction of optional criteria selecting queries.
#[derive(Clone, Default)]
pub struct QueryFilters {
    /// Key to match; partial structural-subset match unless `exact`.
    pub key: Option<QueryKey>,
    pub exact: bool,
    pub query_type: QueryTypeFilter,
    pub stale: Option<bool>,
    pub fetch_status: Option<FetchStatus>,
    pub predicate: Option<Arc<dyn Fn(&QueryPredicateContext) -> bool + Send + Sync>>,
}

impl QueryFilters {
    #[must_use]
    pub fn key(key: impl Into<QueryKey>) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn exact(mut self) -> Self {
        self.exact = true;
        self
    }

    #[must_use]
    pub fn query_type(mut self, query_type: QueryTypeFilter) -> Self {
        self.query_type = query_type;
        self
    }

    #[must_use]
    pub fn stale(mut self, stale: bool) -> Self {
        self.stale = Some(stale);
        self
    }

    #[must_use]
    pub fn fetch_status(mut self, fetch_status: FetchStatus) -> Self {
        self.fetch_status = Some(fetch_status);
        self
    }

    pub(crate) fn matches(&self, query: &dyn AnyQuery) -> bool {
        if let Some(key) = &self.key {
            if self.exact {
                if query.query_hash() != key.hash_string() {
                    return false;
                }
            } else if !query.query_key().partially_matches(key) {
                return false;
            }
        }
        match self.query_type {
            QueryTypeFilter::All => {}
            QueryTypeFilter::Active => {
                if !query.is_active() {
                    return false;
                }
            }
            QueryTypeFilter::Inactive => {
                if query.is_active() {
                    return false;
                }
            }
        }
        if let Some(stale) = self.stale {
            if query.is_stale() != stale {
                return false;
            }
        }
        if let Some(fetch_status) = self.fetch_status {
            if query.fetch_status() != fetch_status {
                return false;
            }
        }
        if let Some(predicate) = &self.predicate {
            let context = QueryPredicateContext {
                key: query.query_key().clone(),
                hash: query.query_hash().to_owned(),
                status: query.status(),
                fetch_status: query.fetch_status(),
                is_active: query.is_active(),
                is_stale: query.is_stale(),
                observer_count: query.observer_count(),
            };
            if !predicate(&context) {
                return false;
            }
        }
        true
    }
}

impl std::fmt::Debug for QueryFilters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryFilters")
            .field("key", &self.key)
            .field("exact", &self.exact)
            .field("query_type", &self.query_type)
            .field("stale", &self.stale)
            .field("fetch_status", &self.fetch_status)
            .finish_non_exhaustive()
    }
}

/// Hooks invoked as queries settle anywhere in the cache.
#[derive(Clone, Default)]
pub struct QueryCacheConfig {
    pub on_success: Option<Arc<dyn Fn(&QueryKey) + Send + Sync>>,
    pub on_error: Option<Arc<dyn Fn(&crate::error::QueryError, &QueryKey) + Send + Sync>>,
}

impl std::fmt::Debug for QueryCacheConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCacheConfig").finish_non_exhaustive()
    }
}

/// Unsubscribes the associated cache listener on drop.
pub struct QueryCacheSubscription {
    cache: std::sync::Weak<QueryCache>,
    id: u64,
}

impl Drop for QueryCacheSubscription {
    fn drop(&mut self) {
        if let Some(cache) = self.cache.upgrade() {
            cache.listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

/// A hydrated query snapshot waiting for its first typed access.
pub(crate) struct HydratedQuery {
    pub key: QueryKey,
    pub state: Value,
}

/// Keyed index of cached queries.
pub struct QueryCache {
    self_weak: std::sync::Weak<QueryCache>,
    config: QueryCacheConfig,
    queries: DashMap<String, Arc<dyn AnyQuery>>,
    order: Mutex<Vec<String>>,
    hydrated: DashMap<String, HydratedQuery>,
    listeners: Mutex<Vec<(u64, QueryCacheListener)>>,
    next_listener_id: Mutex<u64>,
    core: Mutex<Option<CoreContext>>,
}

impl QueryCache {
    #[must_use]
    pub fn new(config: QueryCacheConfig) -> Arc<Self> {
        Arc::new_cyclic(|self_weak| Self {
            self_weak: self_weak.clone(),
            config,
            queries: DashMap::new(),
            order: Mutex::new(Vec::new()),
            hydrated: DashMap::new(),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: Mutex::new(0),
            core: Mutex::new(None),
        })
    }

    /// Number of cached queries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    /// Registers a listener for cache events; the guard unsubscribes on drop.
    pub fn subscribe(&self, listener: QueryCacheListener) -> QueryCacheSubscription {
        let id = {
            let mut next = self.next_listener_id.lock();
            *next += 1;
            *next
        };
        self.listeners.lock().push((id, listener));
        QueryCacheSubscription {
            cache: self.self_weak.clone(),
            id,
        }
    }

    /// Destroys and removes every query.
    pub fn clear(&self) {
        let queries = self.all();
        self.hydrated.clear();
        for query in queries {
            self.remove(&query);
        }
    }

    pub(crate) fn attach(&self, core: CoreContext) {
        *self.core.lock() = Some(core);
    }

    fn core(&self) -> Option<CoreContext> {
        self.core.lock().clone()
    }

    /// Returns the existing query for these options or builds a new one,
    /// adopting any hydrated snapshot stored under the same hash.
    pub(crate) fn build<T: QueryData>(
        &self,
        core: CoreContext,
        options: QueryOptions<T>,
        state: Option<QueryState<T>>,
    ) -> Arc<Query<T>> {
        let hash = options.hash();
        if let Some(existing) = self.get_typed::<T>(&hash) {
            return existing;
        }
        if self.queries.contains_key(&hash) {
            // Same key, different data type: the old record is unusable.
            core.logger.warn(&format!(
                "query {hash} rebuilt with a different data type; dropping the old record"
            ));
            self.remove_by_hash(&hash);
        }

        let seeded = state.or_else(|| {
            self.hydrated.remove(&hash).and_then(|(_, hydrated)| {
                match QueryState::<T>::from_json(&hydrated.state) {
                    Ok(mut state) => {
                        state.fetch_status = FetchStatus::Idle;
                        Some(state)
                    }
                    Err(error) => {
                        core.logger
                            .warn(&format!("failed to hydrate query {hash}: {error}"));
                        None
                    }
                }
            })
        });

        let query = Query::new(core, self.self_weak.clone(), options, seeded);
        self.queries
            .insert(hash.clone(), query.clone() as Arc<dyn AnyQuery>);
        self.order.lock().push(hash.clone());
        self.notify(QueryCacheEvent {
            kind: QueryCacheEventKind::Added,
            query_hash: hash,
            query_key: query.key().clone(),
            action: None,
        });
        query
    }

    pub(crate) fn get(&self, hash: &str) -> Option<Arc<dyn AnyQuery>> {
        self.queries.get(hash).map(|entry| entry.value().clone())
    }

    pub(crate) fn get_typed<T: QueryData>(&self, hash: &str) -> Option<Arc<Query<T>>> {
        self.get(hash)
            .and_then(|query| query.as_any().downcast::<Query<T>>().ok())
    }

    pub(crate) fn has_hydrated(&self, hash: &str) -> bool {
        self.hydrated.contains_key(hash)
    }

    pub(crate) fn store_hydrated(&self, hash: String, key: QueryKey, state: Value) {
        self.hydrated.insert(hash, HydratedQuery { key, state });
    }

    pub(crate) fn hydrated_snapshots(&self) -> Vec<(String, QueryKey, Value)> {
        self.hydrated
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    entry.value().key.clone(),
                    entry.value().state.clone(),
                )
            })
            .collect()
    }

    /// All queries in insertion order.
    pub(crate) fn all(&self) -> Vec<Arc<dyn AnyQuery>> {
        let order = self.order.lock();
        order
            .iter()
            .filter_map(|hash| self.get(hash.as_str()))
            .collect()
    }

    pub(crate) fn find(&self, filters: &QueryFilters) -> Option<Arc<dyn AnyQuery>> {
        self.all()
            .into_iter()
            .find(|query| filters.matches(query.as_ref()))
    }

    pub(crate) fn find_all(&self, filters: &QueryFilters) -> Vec<Arc<dyn AnyQuery>> {
        self.all()
            .into_iter()
            .filter(|query| filters.matches(query.as_ref()))
            .collect()
    }

    pub(crate) fn remove(&self, query: &Arc<dyn AnyQuery>) {
        let hash = query.query_hash().to_owned();
        let in_map = self
            .queries
            .get(&hash)
            .is_some_and(|entry| Arc::ptr_eq(entry.value(), query));
        query.destroy();
        if in_map {
            self.queries.remove(&hash);
            self.order.lock().retain(|h| h != &hash);
            self.notify(QueryCacheEvent {
                kind: QueryCacheEventKind::Removed,
                query_hash: hash,
                query_key: query.query_key().clone(),
                action: None,
            });
        }
    }

    pub(crate) fn remove_by_hash(&self, hash: &str) {
        if let Some(query) = self.get(hash) {
            self.remove(&query);
        }
    }

    /// Fans a focus event out to every query.
    pub(crate) fn on_focus(&self) {
        let queries = self.all();
        if let Some(core) = self.core() {
            core.notify.batch(|| {
                for query in &queries {
                    query.on_focus();
                }
            });
        } else {
            for query in &queries {
                query.on_focus();
            }
        }
    }

    /// Fans a reconnect event out to every query.
    pub(crate) fn on_online(&self) {
        let queries = self.all();
        if let Some(core) = self.core() {
            core.notify.batch(|| {
                for query in &queries {
                    query.on_online();
                }
            });
        } else {
            for query in &queries {
                query.on_online();
            }
        }
    }

    pub(crate) fn notify_query_updated(
        &self,
        hash: &str,
        key: &QueryKey,
        action: QueryActionKind,
    ) {
        self.notify(QueryCacheEvent {
            kind: QueryCacheEventKind::Updated,
            query_hash: hash.to_owned(),
            query_key: key.clone(),
            action: Some(action),
        });
    }

    pub(crate) fn notify_observer_added(&self, hash: &str, key: &QueryKey) {
        self.notify(QueryCacheEvent {
            kind: QueryCacheEventKind::ObserverAdded,
            query_hash: hash.to_owned(),
            query_key: key.clone(),
            action: None,
        });
    }

    pub(crate) fn notify_observer_removed(&self, hash: &str, key: &QueryKey) {
        self.notify(QueryCacheEvent {
            kind: QueryCacheEventKind::ObserverRemoved,
            query_hash: hash.to_owned(),
            query_key: key.clone(),
            action: None,
        });
    }

    pub(crate) fn notify_observer_results_updated(&self, hash: &str, key: &QueryKey) {
        self.notify(QueryCacheEvent {
            kind: QueryCacheEventKind::ObserverResultsUpdated,
            query_hash: hash.to_owned(),
            query_key: key.clone(),
            action: None,
        });
    }

    pub(crate) fn notify_observer_options_updated(&self, hash: &str, key: &QueryKey) {
        self.notify(QueryCacheEvent {
            kind: QueryCacheEventKind::ObserverOptionsUpdated,
            query_hash: hash.to_owned(),
            query_key: key.clone(),
            action: None,
        });
    }

    pub(crate) fn run_success_hook(&self, hash: &str) {
        if let (Some(on_success), Some(query)) = (&self.config.on_success, self.get(hash)) {
            on_success(query.query_key());
        }
    }

    pub(crate) fn run_error_hook(&self, hash: &str, error: &crate::error::QueryError) {
        if let (Some(on_error), Some(query)) = (&self.config.on_error, self.get(hash)) {
            on_error(error, query.query_key());
        }
    }

    fn notify(&self, event: QueryCacheEvent) {
        let listeners: Vec<QueryCacheListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        if listeners.is_empty() {
            return;
        }
        if let Some(core) = self.core() {
            let event = Arc::new(event);
            for listener in listeners {
                let event = event.clone();
                core.notify.schedule(Box::new(move || listener(event.as_ref())));
            }
        } else {
            for listener in listeners {
                listener(&event);
            }
        }
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("queries", &self.queries.len())
            .field("listeners", &self.listeners.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::TracingLogger;
    use crate::notify::NotifyManager;
    use crate::tracker::{FocusTracker, OnlineTracker};
    use serde_json::json;

    fn core() -> CoreContext {
        CoreContext {
            notify: Arc::new(NotifyManager::new()),
            logger: Arc::new(TracingLogger),
            focus: FocusTracker::new(),
            online: OnlineTracker::new(),
        }
    }

    fn cache() -> Arc<QueryCache> {
        QueryCache::new(QueryCacheConfig::default())
    }

    #[test]
    fn test_build_reuses_existing_entry() {
        let cache = cache();
        let a = cache.build::<i32>(core(), QueryOptions::new(json!(["k"])), None);
        let b = cache.build::<i32>(core(), QueryOptions::new(json!(["k"])), None);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_build_distinct_keys() {
        let cache = cache();
        cache.build::<i32>(core(), QueryOptions::new(json!(["a"])), None);
        cache.build::<i32>(core(), QueryOptions::new(json!(["b"])), None);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_remove_deletes_entry() {
        let cache = cache();
        let query = cache.build::<i32>(core(), QueryOptions::new(json!(["k"])), None);
        let erased: Arc<dyn AnyQuery> = query;
        cache.remove(&erased);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_find_all_partial_match() {
        let cache = cache();
        cache.build::<i32>(core(), QueryOptions::new(json!(["todos", 1])), None);
        cache.build::<i32>(core(), QueryOptions::new(json!(["todos", 2])), None);
        cache.build::<i32>(core(), QueryOptions::new(json!(["users"])), None);

        let matched = cache.find_all(&QueryFilters::key(json!(["todos"])));
        assert_eq!(matched.len(), 2);

        let exact = cache.find_all(&QueryFilters::key(json!(["todos"])).exact());
        assert!(exact.is_empty());

        let exact = cache.find_all(&QueryFilters::key(json!(["todos", 1])).exact());
        assert_eq!(exact.len(), 1);
    }

    #[test]
    fn test_find_all_stale_filter() {
        let cache = cache();
        let fresh = cache.build::<i32>(core(), QueryOptions::new(json!(["fresh"])), None);
        fresh.set_data(1, None, false);
        let stale = cache.build::<i32>(core(), QueryOptions::new(json!(["stale"])), None);
        stale.set_data(1, None, false);
        stale.invalidate();

        let stale_matches = cache.find_all(&QueryFilters::default().stale(true));
        assert_eq!(stale_matches.len(), 1);
        assert_eq!(stale_matches[0].query_key(), stale.key());
    }

    #[test]
    fn test_insertion_order_iteration() {
        let cache = cache();
        for name in ["a", "b", "c"] {
            cache.build::<i32>(core(), QueryOptions::new(json!([name])), None);
        }
        let keys: Vec<String> = cache
            .all()
            .iter()
            .map(|q| q.query_key().hash_string())
            .collect();
        assert_eq!(keys, vec![r#"["a"]"#, r#"["b"]"#, r#"["c"]"#]);
    }

    #[test]
    fn test_listeners_receive_added_event() {
        let cache = cache();
        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = events.clone();
        let _sub = cache.subscribe(Arc::new(move |event| {
            seen.lock().push(event.kind);
        }));

        cache.build::<i32>(core(), QueryOptions::new(json!(["k"])), None);
        assert_eq!(events.lock().as_slice(), &[QueryCacheEventKind::Added]);
    }

    #[test]
    fn test_hydrated_snapshot_adopted_on_build() {
        let cache = cache();
        let key = QueryKey::from(json!(["k"]));
        let hash = key.hash_string();

        let mut state = QueryState::<i32>::empty();
        state.data = Some(Arc::new(42));
        state.data_updated_at = 1000;
        state.status = QueryStatus::Success;
        cache.store_hydrated(hash.clone(), key, state.to_json().unwrap());

        let query = cache.build::<i32>(core(), QueryOptions::new(json!(["k"])), None);
        let state = query.state();
        assert_eq!(state.data.as_deref(), Some(&42));
        assert_eq!(state.status, QueryStatus::Success);
        assert_eq!(state.fetch_status, FetchStatus::Idle);
        assert!(!cache.has_hydrated(&hash));
    }

    #[test]
    fn test_clear_removes_everything() {
        let cache = cache();
        cache.build::<i32>(core(), QueryOptions::new(json!(["a"])), None);
        cache.build::<i32>(core(), QueryOptions::new(json!(["b"])), None);
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.all().is_empty());
    }
}
