//! Mutations.
//!
//! A [`Mutation`] is a one-shot write: it runs `on_mutate` to capture an
//! optimistic context, executes the mutation function under the same retry
//! engine queries use, and mirrors its settlement through observer and
//! cache-level hooks. A mutation that would start while offline parks itself
//! with `is_paused = true` and resumes when the cache replays paused
//! mutations in insertion order.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::runtime::Handle;

use crate::client::CoreContext;
use crate::error::QueryError;
use crate::key::QueryKey;
use crate::mutation_cache::MutationCache;
use crate::removable::Removable;
use crate::retry::{NetworkMode, RetryDelay, RetryPolicy, Retryer, RetryerConfig, SharedResult};
use crate::time::now_millis;

/// Bound for mutation variables: they must survive dehydration so paused
/// mutations can be replayed after a restart.
pub trait MutationVariables:
    Clone + Send + Sync + Serialize + DeserializeOwned + 'static
{
}
impl<V: Clone + Send + Sync + Serialize + DeserializeOwned + 'static> MutationVariables for V {}

/// Status of a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationStatus {
    /// Not started.
    Idle,
    /// Running, or paused while offline.
    Loading,
    Success,
    Error,
}

/// The state of one mutation.
#[derive(Clone)]
pub struct MutationState<V, D, C> {
    pub variables: Option<V>,
    /// Result of `on_mutate`, threaded through the lifecycle hooks.
    pub context: Option<C>,
    pub data: Option<Arc<D>>,
    pub error: Option<QueryError>,
    pub failure_count: u32,
    pub failure_reason: Option<QueryError>,
    pub is_paused: bool,
    pub status: MutationStatus,
    pub submitted_at: u64,
}

impl<V, D, C> MutationState<V, D, C> {
    #[must_use]
    pub fn idle() -> Self {
        Self {
            variables: None,
            context: None,
            data: None,
            error: None,
            failure_count: 0,
            failure_reason: None,
            is_paused: false,
            status: MutationStatus::Idle,
            submitted_at: 0,
        }
    }

    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self.status, MutationStatus::Loading)
    }
}

impl<V, D, C> std::fmt::Debug for MutationState<V, D, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationState")
            .field("status", &self.status)
            .field("is_paused", &self.is_paused)
            .field("failure_count", &self.failure_count)
            .field("has_data", &self.data.is_some())
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// Dehydrated mirror of a mutation state.
///
/// Only the replayable parts survive: variables, failure bookkeeping and the
/// paused flag. Data and the optimistic context are dropped — the default
/// dehydration filter keeps paused mutations, which have neither.
#[derive(Serialize, Deserialize)]
#[serde(bound(serialize = "V: Serialize", deserialize = "V: DeserializeOwned"))]
pub(crate) struct SerializedMutationState<V> {
    pub variables: Option<V>,
    pub error: Option<QueryError>,
    pub failure_count: u32,
    pub failure_reason: Option<QueryError>,
    pub is_paused: bool,
    pub status: MutationStatus,
    pub submitted_at: u64,
}

impl<V: MutationVariables, D, C> MutationState<V, D, C> {
    pub(crate) fn to_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(SerializedMutationState {
            variables: self.variables.clone(),
            error: self.error.clone(),
            failure_count: self.failure_count,
            failure_reason: self.failure_reason.clone(),
            is_paused: self.is_paused,
            status: self.status,
            submitted_at: self.submitted_at,
        })
    }

    pub(crate) fn from_json(value: &Value) -> Result<Self, serde_json::Error> {
        let parsed: SerializedMutationState<V> = serde_json::from_value(value.clone())?;
        Ok(Self {
            variables: parsed.variables,
            context: None,
            data: None,
            error: parsed.error,
            failure_count: parsed.failure_count,
            failure_reason: parsed.failure_reason,
            is_paused: parsed.is_paused,
            status: parsed.status,
            submitted_at: parsed.submitted_at,
        })
    }
}

pub type MutationFn<V, D> = Arc<dyn Fn(V) -> BoxFuture<'static, Result<D, QueryError>> + Send + Sync>;

pub type OnMutateFn<V, C> =
    Arc<dyn Fn(V) -> BoxFuture<'static, Result<Option<C>, QueryError>> + Send + Sync>;

pub type OnMutationSuccessFn<V, D, C> =
    Arc<dyn Fn(Arc<D>, V, Option<C>) -> BoxFuture<'static, ()> + Send + Sync>;

pub type OnMutationErrorFn<V, C> =
    Arc<dyn Fn(QueryError, V, Option<C>) -> BoxFuture<'static, ()> + Send + Sync>;

pub type OnMutationSettledFn<V, D, C> = Arc<
    dyn Fn(Option<Arc<D>>, Option<QueryError>, V, Option<C>) -> BoxFuture<'static, ()>
        + Send
        + Sync,
>;

/// Configuration of one mutation.
pub struct MutationOptions<V, D, C = ()> {
    pub key: Option<QueryKey>,
    pub mutation_fn: Option<MutationFn<V, D>>,
    pub retry: Option<RetryPolicy>,
    pub retry_delay: Option<RetryDelay>,
    pub network_mode: Option<NetworkMode>,
    pub cache_time: Option<Duration>,
    pub meta: Option<Arc<Value>>,
    pub on_mutate: Option<OnMutateFn<V, C>>,
    pub on_success: Option<OnMutationSuccessFn<V, D, C>>,
    pub on_error: Option<OnMutationErrorFn<V, C>>,
    pub on_settled: Option<OnMutationSettledFn<V, D, C>>,
}

impl<V, D, C> Clone for MutationOptions<V, D, C> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            mutation_fn: self.mutation_fn.clone(),
            retry: self.retry.clone(),
            retry_delay: self.retry_delay.clone(),
            network_mode: self.network_mode,
            cache_time: self.cache_time,
            meta: self.meta.clone(),
            on_mutate: self.on_mutate.clone(),
            on_success: self.on_success.clone(),
            on_error: self.on_error.clone(),
            on_settled: self.on_settled.clone(),
        }
    }
}

impl<V, D, C> Default for MutationOptions<V, D, C> {
    fn default() -> Self {
        Self {
            key: None,
            mutation_fn: None,
            retry: None,
            retry_delay: None,
            network_mode: None,
            cache_time: None,
            meta: None,
            on_mutate: None,
            on_success: None,
            on_error: None,
            on_settled: None,
        }
    }
}

impl<V, D, C> MutationOptions<V, D, C>
where
    V: MutationVariables,
    D: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn key(mut self, key: impl Into<QueryKey>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn mutation_fn<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<D, QueryError>> + Send + 'static,
    {
        self.mutation_fn = Some(Arc::new(move |variables| f(variables).boxed()));
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
    pub fn on_mutate<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<C>, QueryError>> + Send + 'static,
    {
        self.on_mutate = Some(Arc::new(move |variables| f(variables).boxed()));
        self
    }

    #[must_use]
    pub fn on_success<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<D>, V, Option<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_success = Some(Arc::new(move |data, variables, context| {
            f(data, variables, context).boxed()
        }));
        self
    }

    #[must_use]
    pub fn on_error<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(QueryError, V, Option<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_error = Some(Arc::new(move |error, variables, context| {
            f(error, variables, context).boxed()
        }));
        self
    }

    #[must_use]
    pub fn on_settled<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Option<Arc<D>>, Option<QueryError>, V, Option<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_settled = Some(Arc::new(move |data, error, variables, context| {
            f(data, error, variables, context).boxed()
        }));
        self
    }
}

impl<V, D, C> std::fmt::Debug for MutationOptions<V, D, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationOptions")
            .field("key", &self.key)
            .field("retry", &self.retry)
            .field("network_mode", &self.network_mode)
            .finish_non_exhaustive()
    }
}

enum MutationAction<V, D, C> {
    Loading {
        variables: Option<V>,
        context: Option<C>,
    },
    Failed {
        failure_count: u32,
        error: QueryError,
    },
    Pause,
    Continue,
    Success {
        data: Arc<D>,
    },
    Error {
        error: QueryError,
    },
}

/// Mutation-side interface of an observer.
pub(crate) trait MutationObserverBase<V, D, C>: Send + Sync {
    fn id(&self) -> u64;
    fn on_mutation_update(&self);
}

type Pipeline<D> = SharedResult<Arc<D>>;

/// One write operation with an optimistic/paused lifecycle.
pub struct Mutation<V: MutationVariables, D, C = ()>
where
    D: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    id: u64,
    core: CoreContext,
    cache: Weak<MutationCache>,
    self_weak: Weak<Self>,
    options: Mutex<MutationOptions<V, D, C>>,
    state: Mutex<MutationState<V, D, C>>,
    observers: Mutex<Vec<Arc<dyn MutationObserverBase<V, D, C>>>>,
    retryer: Mutex<Option<Retryer<D>>>,
    pipeline: Mutex<Option<Pipeline<D>>>,
    removable: Removable,
}

impl<V, D, C> Mutation<V, D, C>
where
    V: MutationVariables,
    D: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        id: u64,
        core: CoreContext,
        cache: Weak<MutationCache>,
        options: MutationOptions<V, D, C>,
        state: Option<MutationState<V, D, C>>,
    ) -> Arc<Self> {
        let removable = Removable::new();
        removable.update_cache_time(options.cache_time);
        Arc::new_cyclic(|self_weak| Self {
            id,
            core,
            cache,
            self_weak: self_weak.clone(),
            options: Mutex::new(options),
            state: Mutex::new(state.unwrap_or_else(MutationState::idle)),
            observers: Mutex::new(Vec::new()),
            retryer: Mutex::new(None),
            pipeline: Mutex::new(None),
            removable,
        })
    }

    #[must_use]
    pub fn mutation_id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> MutationState<V, D, C> {
        self.state.lock().clone()
    }

    pub(crate) fn mutation_key(&self) -> Option<QueryKey> {
        self.options.lock().key.clone()
    }

    pub(crate) fn meta(&self) -> Option<Arc<Value>> {
        self.options.lock().meta.clone()
    }

    pub(crate) fn set_options(&self, options: MutationOptions<V, D, C>) {
        self.removable.update_cache_time(options.cache_time);
        *self.options.lock() = options;
    }

    pub(crate) fn add_observer(&self, observer: Arc<dyn MutationObserverBase<V, D, C>>) {
        let mut observers = self.observers.lock();
        if !observers.iter().any(|o| o.id() == observer.id()) {
            observers.push(observer);
            drop(observers);
            self.removable.clear_gc();
        }
    }

    pub(crate) fn remove_observer(&self, observer_id: u64) {
        let empty = {
            let mut observers = self.observers.lock();
            observers.retain(|o| o.id() != observer_id);
            observers.is_empty()
        };
        if empty {
            self.schedule_gc();
        }
    }

    pub(crate) fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    /// Runs the mutation lifecycle. The returned future settles with the
    /// mutation; callers share one pipeline per execution.
    pub(crate) fn execute(&self, variables: V) -> Pipeline<D> {
        self.run(Some(variables), false)
    }

    /// Resumes a paused execution, or replays a restored mutation from its
    /// recorded variables.
    pub(crate) fn resume(&self) -> BoxFuture<'static, ()> {
        let existing = {
            let pipeline = self.pipeline.lock();
            pipeline.clone()
        };
        if let Some(pipeline) = existing {
            if let Some(retryer) = self.retryer.lock().as_ref() {
                retryer.resume();
            }
            return async move {
                let _ = pipeline.await;
            }
            .boxed();
        }
        let pipeline = self.run(None, true);
        async move {
            let _ = pipeline.await;
        }
        .boxed()
    }

    fn run(&self, variables: Option<V>, restored: bool) -> Pipeline<D> {
        let weak = self.self_weak.clone();
        let pipeline = async move {
            let Some(mutation) = weak.upgrade() else {
                return Err(QueryError::cancelled());
            };
            mutation.pipeline_body(variables, restored).await
        }
        .boxed()
        .shared();

        *self.pipeline.lock() = Some(pipeline.clone());
        if let Ok(handle) = Handle::try_current() {
            let pump = pipeline.clone();
            handle.spawn(pump.map(|_| ()));
        }
        pipeline
    }

    async fn pipeline_body(
        self: Arc<Self>,
        variables: Option<V>,
        restored: bool,
    ) -> Result<Arc<D>, QueryError> {
        let options = self.options.lock().clone();
        let variables = match variables.or_else(|| self.state.lock().variables.clone()) {
            Some(variables) => variables,
            None => {
                let error = QueryError::MissingMutationFn;
                self.dispatch(MutationAction::Error {
                    error: error.clone(),
                });
                return Err(error);
            }
        };

        if restored {
            // A replayed mutation leaves its paused state before the first
            // attempt runs.
            self.dispatch(MutationAction::Continue);
        } else {
            self.dispatch(MutationAction::Loading {
                variables: Some(variables.clone()),
                context: None,
            });
            if let Some(cache) = self.cache.upgrade() {
                cache.run_mutate_hook(options.key.as_ref());
            }
            if let Some(on_mutate) = &options.on_mutate {
                match on_mutate(variables.clone()).await {
                    Ok(Some(context)) => {
                        self.dispatch(MutationAction::Loading {
                            variables: Some(variables.clone()),
                            context: Some(context),
                        });
                    }
                    Ok(None) => {}
                    Err(error) => {
                        return self.settle_error(&options, variables, error).await;
                    }
                }
            }
        }

        let Some(mutation_fn) = options.mutation_fn.clone() else {
            let error = QueryError::MissingMutationFn;
            self.core.logger.error("missing mutation function");
            return self.settle_error(&options, variables, error).await;
        };

        let attempt_variables = variables.clone();
        let on_fail_weak = self.self_weak.clone();
        let on_pause_weak = self.self_weak.clone();
        let on_continue_weak = self.self_weak.clone();
        let retryer = Retryer::new(RetryerConfig {
            attempt: Arc::new(move || mutation_fn(attempt_variables.clone())),
            retry: options.retry.clone().unwrap_or(RetryPolicy::Never),
            retry_delay: options.retry_delay.clone().unwrap_or_default(),
            network_mode: options.network_mode.unwrap_or_default(),
            online: self.core.online.clone(),
            wake_on_online: false,
            on_fail: Some(Box::new(move |failure_count, error| {
                if let Some(mutation) = on_fail_weak.upgrade() {
                    mutation.dispatch(MutationAction::Failed {
                        failure_count,
                        error: error.clone(),
                    });
                }
            })),
            on_pause: Some(Box::new(move || {
                if let Some(mutation) = on_pause_weak.upgrade() {
                    mutation.dispatch(MutationAction::Pause);
                }
            })),
            on_continue: Some(Box::new(move || {
                if let Some(mutation) = on_continue_weak.upgrade() {
                    mutation.dispatch(MutationAction::Continue);
                }
            })),
        });
        let promise = retryer.promise();
        *self.retryer.lock() = Some(retryer);

        let result = promise.await;
        *self.retryer.lock() = None;

        let settled = match result {
            Ok(data) => {
                let data = Arc::new(data);
                self.dispatch(MutationAction::Success { data: data.clone() });
                if let Some(cache) = self.cache.upgrade() {
                    cache.run_mutation_success_hook(options.key.as_ref());
                }
                let context = self.state.lock().context.clone();
                if let Some(on_success) = &options.on_success {
                    on_success(data.clone(), variables.clone(), context.clone()).await;
                }
                if let Some(cache) = self.cache.upgrade() {
                    cache.run_mutation_settled_hook(options.key.as_ref());
                }
                if let Some(on_settled) = &options.on_settled {
                    on_settled(Some(data.clone()), None, variables, context).await;
                }
                Ok(data)
            }
            Err(error) => self.settle_error(&options, variables, error).await,
        };
        self.schedule_gc();
        settled
    }

    async fn settle_error(
        &self,
        options: &MutationOptions<V, D, C>,
        variables: V,
        error: QueryError,
    ) -> Result<Arc<D>, QueryError> {
        self.dispatch(MutationAction::Error {
            error: error.clone(),
        });
        self.core
            .logger
            .error(&format!("mutation failed: {error}"));
        if let Some(cache) = self.cache.upgrade() {
            cache.run_mutation_error_hook(&error, options.key.as_ref());
        }
        let context = self.state.lock().context.clone();
        if let Some(on_error) = &options.on_error {
            on_error(error.clone(), variables.clone(), context.clone()).await;
        }
        if let Some(cache) = self.cache.upgrade() {
            cache.run_mutation_settled_hook(options.key.as_ref());
        }
        if let Some(on_settled) = &options.on_settled {
            on_settled(None, Some(error.clone()), variables, context).await;
        }
        Err(error)
    }

    fn schedule_gc(&self) {
        let weak = self.self_weak.clone();
        self.removable.schedule_gc(move || {
            if let Some(mutation) = weak.upgrade() {
                mutation.optional_remove();
            }
        });
    }

    fn optional_remove(&self) {
        let loading = self.state.lock().is_loading();
        if !loading && self.observers.lock().is_empty() {
            if let Some(cache) = self.cache.upgrade() {
                cache.remove_by_id(self.id);
            }
        }
    }

    fn dispatch(&self, action: MutationAction<V, D, C>) {
        {
            let mut state = self.state.lock();
            *state = self.reduce(&state, &action);
        }
        self.core.notify.batch(|| {
            let observers = self.observers.lock().clone();
            for observer in observers {
                observer.on_mutation_update();
            }
            if let Some(cache) = self.cache.upgrade() {
                cache.notify_mutation_updated(self.id);
            }
        });
    }

    fn reduce(
        &self,
        state: &MutationState<V, D, C>,
        action: &MutationAction<V, D, C>,
    ) -> MutationState<V, D, C> {
        match action {
            MutationAction::Loading { variables, context } => {
                let online = self.core.online.is_online();
                let mode = self.options.lock().network_mode.unwrap_or_default();
                let mut next = state.clone();
                next.status = MutationStatus::Loading;
                next.is_paused = !crate::retry::can_fetch(mode, online);
                next.data = None;
                next.error = None;
                next.failure_count = 0;
                next.failure_reason = None;
                if variables.is_some() {
                    next.variables = variables.clone();
                }
                if context.is_some() {
                    next.context = context.clone();
                }
                next.submitted_at = now_millis();
                next
            }
            MutationAction::Failed {
                failure_count,
                error,
            } => {
                let mut next = state.clone();
                next.failure_count = *failure_count;
                next.failure_reason = Some(error.clone());
                next
            }
            MutationAction::Pause => {
                let mut next = state.clone();
                next.is_paused = true;
                next
            }
            MutationAction::Continue => {
                let mut next = state.clone();
                next.is_paused = false;
                next
            }
            MutationAction::Success { data } => {
                let mut next = state.clone();
                next.status = MutationStatus::Success;
                next.data = Some(data.clone());
                next.error = None;
                next.is_paused = false;
                next
            }
            MutationAction::Error { error } => {
                let mut next = state.clone();
                next.status = MutationStatus::Error;
                next.error = Some(error.clone());
                next.failure_count = state.failure_count + 1;
                next.failure_reason = Some(error.clone());
                next.is_paused = false;
                next
            }
        }
    }

    pub(crate) fn serialize_state(&self) -> Option<Value> {
        match self.state().to_json() {
            Ok(value) => Some(value),
            Err(error) => {
                self.core
                    .logger
                    .warn(&format!("failed to dehydrate mutation: {error}"));
                None
            }
        }
    }
}

impl<V, D, C> std::fmt::Debug for Mutation<V, D, C>
where
    V: MutationVariables,
    D: Clone + Send + Sync + 'static,
    C: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutation")
            .field("id", &self.id)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}
