//! Mutation observers.
//!
//! A [`MutationObserver`] projects one mutation's state for a subscriber and
//! carries the `mutate`/`reset` entry points. Each `mutate` call builds a
//! fresh mutation in the cache and re-points the observer at it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::client::QueryClient;
use crate::error::QueryError;
use crate::mutation::{
    Mutation, MutationObserverBase, MutationOptions, MutationStatus, MutationVariables,
};

static NEXT_MUTATION_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

/// The derived result a mutation observer exposes.
#[derive(Clone)]
pub struct MutationObserverResult<V, D> {
    pub data: Option<Arc<D>>,
    pub error: Option<QueryError>,
    pub variables: Option<V>,
    pub status: MutationStatus,
    pub is_paused: bool,
    pub failure_count: u32,
    pub failure_reason: Option<QueryError>,
    pub submitted_at: u64,
}

impl<V, D> MutationObserverResult<V, D> {
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self.status, MutationStatus::Idle)
    }

    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self.status, MutationStatus::Loading)
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.status, MutationStatus::Success)
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self.status, MutationStatus::Error)
    }

    fn idle() -> Self {
        Self {
            data: None,
            error: None,
            variables: None,
            status: MutationStatus::Idle,
            is_paused: false,
            failure_count: 0,
            failure_reason: None,
            submitted_at: 0,
        }
    }
}

impl<V, D> std::fmt::Debug for MutationObserverResult<V, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationObserverResult")
            .field("status", &self.status)
            .field("is_paused", &self.is_paused)
            .field("failure_count", &self.failure_count)
            .field("has_data", &self.data.is_some())
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

pub type MutationResultListener<V, D> =
    Arc<dyn Fn(MutationObserverResult<V, D>) + Send + Sync>;

/// Removes its listener on drop; the last one detaches the observer from its
/// mutation.
pub struct MutationSubscription<V, D, C = ()>
where
    V: MutationVariables,
    D: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    observer: Weak<MutationObserver<V, D, C>>,
    id: u64,
}

impl<V, D, C> Drop for MutationSubscription<V, D, C>
where
    V: MutationVariables,
    D: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if let Some(observer) = self.observer.upgrade() {
            observer.remove_listener(self.id);
        }
    }
}

struct MutationObserverInner<V, D, C>
where
    V: MutationVariables,
    D: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    options: MutationOptions<V, D, C>,
    mutation: Option<Arc<Mutation<V, D, C>>>,
    current_result: MutationObserverResult<V, D>,
}

/// Derives per-subscriber results from one mutation.
pub struct MutationObserver<V, D, C = ()>
where
    V: MutationVariables,
    D: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    id: u64,
    client: QueryClient,
    self_weak: Weak<Self>,
    inner: Mutex<MutationObserverInner<V, D, C>>,
    listeners: Mutex<Vec<(u64, MutationResultListener<V, D>)>>,
    next_listener_id: AtomicU64,
}

impl<V, D, C> MutationObserver<V, D, C>
where
    V: MutationVariables,
    D: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    pub fn new(client: &QueryClient, options: MutationOptions<V, D, C>) -> Arc<Self> {
        let options = client.defaulted_mutation_options(options);
        Arc::new_cyclic(|self_weak| Self {
            id: NEXT_MUTATION_OBSERVER_ID.fetch_add(1, Ordering::SeqCst),
            client: client.clone(),
            self_weak: self_weak.clone(),
            inner: Mutex::new(MutationObserverInner {
                options,
                mutation: None,
                current_result: MutationObserverResult::idle(),
            }),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
        })
    }

    #[must_use]
    pub fn current_result(&self) -> MutationObserverResult<V, D> {
        self.inner.lock().current_result.clone()
    }

    pub fn set_options(&self, options: MutationOptions<V, D, C>) {
        let options = self.client.defaulted_mutation_options(options);
        self.inner.lock().options = options;
    }

    /// Starts a new mutation with these variables and observes it.
    pub fn mutate(
        &self,
        variables: V,
    ) -> BoxFuture<'static, Result<Arc<D>, QueryError>> {
        let (previous, options) = {
            let inner = self.inner.lock();
            (inner.mutation.clone(), inner.options.clone())
        };
        if let Some(previous) = previous {
            previous.remove_observer(self.id);
        }

        let mutation = self.client.mutation_cache().build(
            self.client.core().clone(),
            options,
            None,
        );
        let this: Arc<dyn MutationObserverBase<V, D, C>> =
            self.self_weak.upgrade().expect("observer alive");
        mutation.add_observer(this);
        self.inner.lock().mutation = Some(mutation.clone());
        self.refresh_result();

        mutation.execute(variables).boxed()
    }

    /// Detaches from the current mutation and returns to the idle result.
    pub fn reset(&self) {
        let previous = {
            let mut inner = self.inner.lock();
            let previous = inner.mutation.take();
            inner.current_result = MutationObserverResult::idle();
            previous
        };
        if let Some(previous) = previous {
            previous.remove_observer(self.id);
        }
        self.notify_listeners(self.current_result());
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(MutationObserverResult<V, D>) + Send + Sync + 'static,
    ) -> MutationSubscription<V, D, C> {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().push((id, Arc::new(listener)));
        MutationSubscription {
            observer: self.self_weak.clone(),
            id,
        }
    }

    fn remove_listener(&self, id: u64) {
        let empty = {
            let mut listeners = self.listeners.lock();
            listeners.retain(|(listener_id, _)| *listener_id != id);
            listeners.is_empty()
        };
        if empty {
            let mutation = self.inner.lock().mutation.take();
            if let Some(mutation) = mutation {
                mutation.remove_observer(self.id);
            }
        }
    }

    fn refresh_result(&self) {
        let result = {
            let mut inner = self.inner.lock();
            let result = match &inner.mutation {
                Some(mutation) => {
                    let state = mutation.state();
                    MutationObserverResult {
                        data: state.data,
                        error: state.error,
                        variables: state.variables,
                        status: state.status,
                        is_paused: state.is_paused,
                        failure_count: state.failure_count,
                        failure_reason: state.failure_reason,
                        submitted_at: state.submitted_at,
                    }
                }
                None => MutationObserverResult::idle(),
            };
            inner.current_result = result.clone();
            result
        };
        self.notify_listeners(result);
    }

    fn notify_listeners(&self, result: MutationObserverResult<V, D>) {
        let listeners: Vec<MutationResultListener<V, D>> = self
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
}

impl<V, D, C> MutationObserverBase<V, D, C> for MutationObserver<V, D, C>
where
    V: MutationVariables,
    D: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    fn id(&self) -> u64 {
        self.id
    }

    fn on_mutation_update(&self) {
        self.refresh_result();
    }
}

impl<V, D, C> std::fmt::Debug for MutationObserver<V, D, C>
where
    V: MutationVariables,
    D: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationObserver")
            .field("id", &self.id)
            .field("listeners", &self.listeners.lock().len())
            .finish_non_exhaustive()
    }
}
