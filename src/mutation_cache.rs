//! The mutation cache.
//!
//! An insertion-ordered set of mutations. Unlike queries, mutations are not
//! deduplicated: every `mutate` call builds a fresh record. The cache drives
//! the pause/resume pipeline — paused mutations replay strictly sequentially
//! in insertion order when the network comes back — and re-registers
//! dehydrated mutations until their typed defaults resume them.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;

use crate::client::{CoreContext, QueryClient};
use crate::error::QueryError;
use crate::key::QueryKey;
use crate::mutation::{
    Mutation, MutationOptions, MutationState, MutationStatus, MutationVariables,
};

/// A mutation cache lifecycle event.
#[derive(Debug, Clone)]
pub struct MutationCacheEvent {
    pub kind: MutationCacheEventKind,
    pub mutation_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationCacheEventKind {
    Added,
    Removed,
    Updated,
}

pub type MutationCacheListener = Arc<dyn Fn(&MutationCacheEvent) + Send + Sync>;

/// Snapshot handed to a mutation filter predicate.
#[derive(Debug, Clone)]
pub struct MutationPredicateContext {
    pub key: Option<QueryKey>,
    pub status: MutationStatus,
    pub is_paused: bool,
}

/// Conjunction of optional criteria selecting mutations.
#[derive(Clone, Default)]
pub struct MutationFilters {
    pub key: Option<QueryKey>,
    pub exact: bool,
    /// Matches mutations whose status is `loading` (paused included).
    pub fetching: Option<bool>,
    pub predicate: Option<Arc<dyn Fn(&MutationPredicateContext) -> bool + Send + Sync>>,
}

impl MutationFilters {
    #[must_use]
    pub fn key(key: impl Into<QueryKey>) -> Self {
        Self {
            key: Some(key.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn fetching(mut self, fetching: bool) -> Self {
        self.fetching = Some(fetching);
        self
    }

    pub(crate) fn matches(&self, mutation: &dyn AnyMutation) -> bool {
        if let Some(filter_key) = &self.key {
            match mutation.mutation_key() {
                Some(key) if self.exact => {
                    if key.hash_string() != filter_key.hash_string() {
                        return false;
                    }
                }
                Some(key) => {
                    if !key.partially_matches(filter_key) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        if let Some(fetching) = self.fetching {
            if (mutation.status() == MutationStatus::Loading) != fetching {
                return false;
            }
        }
        if let Some(predicate) = &self.predicate {
            let context = MutationPredicateContext {
                key: mutation.mutation_key(),
                status: mutation.status(),
                is_paused: mutation.is_paused(),
            };
            if !predicate(&context) {
                return false;
            }
        }
        true
    }
}

impl std::fmt::Debug for MutationFilters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationFilters")
            .field("key", &self.key)
            .field("exact", &self.exact)
            .field("fetching", &self.fetching)
            .finish_non_exhaustive()
    }
}

/// Hooks invoked as any mutation in the cache progresses.
#[derive(Clone, Default)]
pub struct MutationCacheConfig {
    pub on_mutate: Option<Arc<dyn Fn(Option<&QueryKey>) + Send + Sync>>,
    pub on_success: Option<Arc<dyn Fn(Option<&QueryKey>) + Send + Sync>>,
    pub on_error: Option<Arc<dyn Fn(&QueryError, Option<&QueryKey>) + Send + Sync>>,
    pub on_settled: Option<Arc<dyn Fn(Option<&QueryKey>) + Send + Sync>>,
}

impl std::fmt::Debug for MutationCacheConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationCacheConfig").finish_non_exhaustive()
    }
}

/// Type-erased mutation interface for the cache.
pub(crate) trait AnyMutation: Send + Sync + 'static {
    fn mutation_id(&self) -> u64;
    fn mutation_key(&self) -> Option<QueryKey>;
    fn status(&self) -> MutationStatus;
    fn is_paused(&self) -> bool;
    fn resume(&self) -> BoxFuture<'static, ()>;
    fn destroy(&self);
    fn serialize_state(&self) -> Option<Value>;
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<V, D, C> AnyMutation for Mutation<V, D, C>
where
    V: MutationVariables,
    D: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    fn mutation_id(&self) -> u64 {
        Mutation::mutation_id(self)
    }

    fn mutation_key(&self) -> Option<QueryKey> {
        Mutation::mutation_key(self)
    }

    fn status(&self) -> MutationStatus {
        self.state().status
    }

    fn is_paused(&self) -> bool {
        self.state().is_paused
    }

    fn resume(&self) -> BoxFuture<'static, ()> {
        Mutation::resume(self)
    }

    fn destroy(&self) {
        // Nothing beyond dropping timers; mutations cannot be cancelled.
    }

    fn serialize_state(&self) -> Option<Value> {
        Mutation::serialize_state(self)
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A dehydrated mutation waiting for typed defaults to replay it.
#[derive(Debug, Clone)]
pub(crate) struct PendingHydratedMutation {
    pub key: Option<QueryKey>,
    pub state: Value,
}

/// Replays a dehydrated mutation once its typed defaults are known.
pub(crate) trait MutationResumer: Send + Sync {
    fn resume(&self, client: &QueryClient, state: &Value) -> BoxFuture<'static, ()>;
}

/// Unsubscribes the associated cache listener on drop.
pub struct MutationCacheSubscription {
    cache: std::sync::Weak<MutationCache>,
    id: u64,
}

impl Drop for MutationCacheSubscription {
    fn drop(&mut self) {
        if let Some(cache) = self.cache.upgrade() {
            cache.listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

/// Ordered set of mutations with the pause/resume pipeline.
pub struct MutationCache {
    self_weak: std::sync::Weak<MutationCache>,
    config: MutationCacheConfig,
    mutations: Mutex<Vec<Arc<dyn AnyMutation>>>,
    hydrated: Mutex<Vec<PendingHydratedMutation>>,
    next_mutation_id: AtomicU64,
    listeners: Mutex<Vec<(u64, MutationCacheListener)>>,
    next_listener_id: AtomicU64,
    core: Mutex<Option<CoreContext>>,
}

impl MutationCache {
    #[must_use]
    pub fn new(config: MutationCacheConfig) -> Arc<Self> {
        Arc::new_cyclic(|self_weak| Self {
            self_weak: self_weak.clone(),
            config,
            mutations: Mutex::new(Vec::new()),
            hydrated: Mutex::new(Vec::new()),
            next_mutation_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            core: Mutex::new(None),
        })
    }

    /// Number of live mutations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mutations.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mutations.lock().is_empty()
    }

    /// Registers a listener for cache events; the guard unsubscribes on drop.
    pub fn subscribe(&self, listener: MutationCacheListener) -> MutationCacheSubscription {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().push((id, listener));
        MutationCacheSubscription {
            cache: self.self_weak.clone(),
            id,
        }
    }

    /// Drops every mutation.
    pub fn clear(&self) {
        let drained: Vec<Arc<dyn AnyMutation>> = std::mem::take(&mut *self.mutations.lock());
        self.hydrated.lock().clear();
        for mutation in drained {
            mutation.destroy();
            self.notify(MutationCacheEvent {
                kind: MutationCacheEventKind::Removed,
                mutation_id: mutation.mutation_id(),
            });
        }
    }

    pub(crate) fn attach(&self, core: CoreContext) {
        *self.core.lock() = Some(core);
    }

    fn core(&self) -> Option<CoreContext> {
        self.core.lock().clone()
    }

    /// Builds a new mutation and appends it in insertion order.
    pub(crate) fn build<V, D, C>(
        &self,
        core: CoreContext,
        options: MutationOptions<V, D, C>,
        state: Option<MutationState<V, D, C>>,
    ) -> Arc<Mutation<V, D, C>>
    where
        V: MutationVariables,
        D: Clone + Send + Sync + 'static,
        C: Clone + Send + Sync + 'static,
    {
        let id = self.next_mutation_id.fetch_add(1, Ordering::SeqCst);
        let mutation = Mutation::new(id, core, self.self_weak.clone(), options, state);
        self.mutations
            .lock()
            .push(mutation.clone() as Arc<dyn AnyMutation>);
        self.notify(MutationCacheEvent {
            kind: MutationCacheEventKind::Added,
            mutation_id: id,
        });
        mutation
    }

    pub(crate) fn remove_by_id(&self, mutation_id: u64) {
        let removed = {
            let mut mutations = self.mutations.lock();
            let before = mutations.len();
            mutations.retain(|m| m.mutation_id() != mutation_id);
            mutations.len() != before
        };
        if removed {
            self.notify(MutationCacheEvent {
                kind: MutationCacheEventKind::Removed,
                mutation_id,
            });
        }
    }

    pub(crate) fn all(&self) -> Vec<Arc<dyn AnyMutation>> {
        self.mutations.lock().clone()
    }

    pub(crate) fn find_all(&self, filters: &MutationFilters) -> Vec<Arc<dyn AnyMutation>> {
        self.all()
            .into_iter()
            .filter(|mutation| filters.matches(mutation.as_ref()))
            .collect()
    }

    pub(crate) fn store_hydrated(&self, key: Option<QueryKey>, state: Value) {
        self.hydrated
            .lock()
            .push(PendingHydratedMutation { key, state });
    }

    pub(crate) fn hydrated_snapshots(&self) -> Vec<PendingHydratedMutation> {
        self.hydrated.lock().clone()
    }

    /// Replays paused mutations sequentially in insertion order, then
    /// resumes dehydrated mutations through their registered defaults.
    pub(crate) fn resume_paused_mutations(
        &self,
        client: &QueryClient,
    ) -> BoxFuture<'static, ()> {
        let paused: Vec<Arc<dyn AnyMutation>> = self
            .all()
            .into_iter()
            .filter(|mutation| mutation.is_paused())
            .collect();
        let pending: Vec<PendingHydratedMutation> =
            std::mem::take(&mut *self.hydrated.lock());
        let client = client.clone();
        async move {
            for mutation in paused {
                mutation.resume().await;
            }
            for shell in pending {
                match client.mutation_resumer_for(shell.key.as_ref()) {
                    Some(resumer) => resumer.resume(&client, &shell.state).await,
                    None => client.core().logger.warn(
                        "dropping dehydrated mutation with no registered mutation defaults",
                    ),
                }
            }
        }
        .boxed()
    }

    pub(crate) fn notify_mutation_updated(&self, mutation_id: u64) {
        self.notify(MutationCacheEvent {
            kind: MutationCacheEventKind::Updated,
            mutation_id,
        });
    }

    pub(crate) fn run_mutate_hook(&self, key: Option<&QueryKey>) {
        if let Some(on_mutate) = &self.config.on_mutate {
            on_mutate(key);
        }
    }

    pub(crate) fn run_mutation_success_hook(&self, key: Option<&QueryKey>) {
        if let Some(on_success) = &self.config.on_success {
            on_success(key);
        }
    }

    pub(crate) fn run_mutation_error_hook(&self, error: &QueryError, key: Option<&QueryKey>) {
        if let Some(on_error) = &self.config.on_error {
            on_error(error, key);
        }
    }

    pub(crate) fn run_mutation_settled_hook(&self, key: Option<&QueryKey>) {
        if let Some(on_settled) = &self.config.on_settled {
            on_settled(key);
        }
    }

    fn notify(&self, event: MutationCacheEvent) {
        let listeners: Vec<MutationCacheListener> = self
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

impl std::fmt::Debug for MutationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationCache")
            .field("mutations", &self.mutations.lock().len())
            .field("pending_hydrated", &self.hydrated.lock().len())
            .finish_non_exhaustive()
    }
}
