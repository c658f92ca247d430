//! Observing a dynamic list of queries.
//!
//! A [`QueriesObserver`] maintains an ordered list of child observers, one
//! per option set, and exposes their results as a single array. When the
//! input list changes, existing observers are reused greedily by key hash;
//! an unmatched slot asking for `keep_previous_data` adopts an unmatched
//! prior observer so its previous result carries over while the new query
//! loads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::client::QueryClient;
use crate::observer::{ObserverSubscription, QueryObserver, QueryObserverResult};
use crate::options::{QueryData, QueryObserverOptions, ResultData};

/// Listener receiving the whole ordered result array.
pub type QueriesListener<S> = Arc<dyn Fn(Vec<QueryObserverResult<S>>) + Send + Sync>;

/// Removes its listener on drop; the last one unsubscribes every child.
pub struct QueriesSubscription<T: QueryData, S: ResultData = T> {
    observer: Weak<QueriesObserver<T, S>>,
    id: u64,
}

impl<T: QueryData, S: ResultData> Drop for QueriesSubscription<T, S> {
    fn drop(&mut self) {
        if let Some(observer) = self.observer.upgrade() {
            observer.remove_listener(self.id);
        }
    }
}

struct QueriesInner<T: QueryData, S: ResultData> {
    observers: Vec<Arc<QueryObserver<T, S>>>,
    results: Vec<QueryObserverResult<S>>,
    subscriptions: Vec<ObserverSubscription<T, S>>,
    mounted: bool,
}

/// Observes an ordered, dynamic list of queries.
pub struct QueriesObserver<T: QueryData, S: ResultData = T> {
    client: QueryClient,
    self_weak: Weak<Self>,
    inner: Mutex<QueriesInner<T, S>>,
    listeners: Mutex<Vec<(u64, QueriesListener<S>)>>,
    next_listener_id: AtomicU64,
}

impl<T: QueryData, S: ResultData> QueriesObserver<T, S> {
    pub fn new(client: &QueryClient, queries: Vec<QueryObserverOptions<T, S>>) -> Arc<Self> {
        let observer = Arc::new_cyclic(|self_weak| Self {
            client: client.clone(),
            self_weak: self_weak.clone(),
            inner: Mutex::new(QueriesInner {
                observers: Vec::new(),
                results: Vec::new(),
                subscriptions: Vec::new(),
                mounted: false,
            }),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
        });
        observer.set_queries(queries);
        observer
    }

    /// The ordered results of every observed query.
    #[must_use]
    pub fn current_results(&self) -> Vec<QueryObserverResult<S>> {
        self.inner.lock().results.clone()
    }

    /// Replaces the observed option sets, reusing existing observers where
    /// the keys still match and keeping the output in input order.
    pub fn set_queries(&self, queries: Vec<QueryObserverOptions<T, S>>) {
        let defaulted: Vec<QueryObserverOptions<T, S>> = queries
            .into_iter()
            .map(|options| self.client.defaulted_observer_options(options))
            .collect();

        let (changed, mounted, to_watch) = {
            let mut inner = self.inner.lock();
            let prev = inner.observers.clone();
            let mut used = vec![false; prev.len()];

            // Greedy reuse by key hash.
            let mut slots: Vec<Option<Arc<QueryObserver<T, S>>>> =
                Vec::with_capacity(defaulted.len());
            for options in &defaulted {
                let hash = options.query.hash();
                let mut matched = None;
                for (index, observer) in prev.iter().enumerate() {
                    if !used[index] && observer.options_hash() == hash {
                        used[index] = true;
                        matched = Some(observer.clone());
                        break;
                    }
                }
                slots.push(matched);
            }

            // Unmatched priors, in their original order, are adoption
            // candidates for keep-previous-data slots.
            let mut unmatched: std::vec::IntoIter<Arc<QueryObserver<T, S>>> = prev
                .iter()
                .enumerate()
                .filter(|(index, _)| !used[*index])
                .map(|(_, observer)| observer.clone())
                .collect::<Vec<_>>()
                .into_iter();

            let mut observers = Vec::with_capacity(defaulted.len());
            let mut assignments = Vec::with_capacity(defaulted.len());
            for (slot, options) in slots.into_iter().zip(defaulted.into_iter()) {
                match slot {
                    Some(observer) => {
                        assignments.push((observer.clone(), options));
                        observers.push(observer);
                    }
                    None => {
                        let adopted = if options.keep_previous_data {
                            unmatched.next()
                        } else {
                            None
                        };
                        match adopted {
                            Some(observer) => {
                                assignments.push((observer.clone(), options));
                                observers.push(observer);
                            }
                            None => {
                                observers.push(QueryObserver::new(&self.client, options));
                            }
                        }
                    }
                }
            }

            let unchanged = observers.len() == inner.observers.len()
                && observers
                    .iter()
                    .zip(inner.observers.iter())
                    .all(|(a, b)| Arc::ptr_eq(a, b));

            if unchanged {
                (false, inner.mounted, assignments)
            } else {
                inner.observers = observers;
                (true, inner.mounted, assignments)
            }
        };

        // Option updates run outside the list lock; each may trigger a
        // refetch and a result notification on the child.
        for (observer, options) in to_watch {
            observer.set_options(options);
        }

        if changed && mounted {
            self.resubscribe_children();
        }
        self.refresh_results();
    }

    /// Registers a listener; the first one subscribes every child observer.
    pub fn subscribe(
        &self,
        listener: impl Fn(Vec<QueryObserverResult<S>>) + Send + Sync + 'static,
    ) -> QueriesSubscription<T, S> {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        let first = {
            let mut listeners = self.listeners.lock();
            listeners.push((id, Arc::new(listener)));
            listeners.len() == 1
        };
        if first {
            self.inner.lock().mounted = true;
            self.resubscribe_children();
            self.refresh_results();
        }
        QueriesSubscription {
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
            let mut inner = self.inner.lock();
            inner.mounted = false;
            inner.subscriptions.clear();
        }
    }

    /// Re-subscribes to the current child set, dropping subscriptions of
    /// observers no longer referenced (which detaches them from their
    /// queries).
    fn resubscribe_children(&self) {
        let observers = self.inner.lock().observers.clone();
        let mut subscriptions = Vec::with_capacity(observers.len());
        for observer in &observers {
            let weak = self.self_weak.clone();
            let observer_id = observer.observer_id();
            subscriptions.push(observer.subscribe(move |result| {
                if let Some(queries) = weak.upgrade() {
                    queries.on_child_update(observer_id, result);
                }
            }));
        }
        self.inner.lock().subscriptions = subscriptions;
    }

    fn on_child_update(&self, observer_id: u64, result: QueryObserverResult<S>) {
        let results = {
            let mut inner = self.inner.lock();
            let index = inner
                .observers
                .iter()
                .position(|observer| observer.observer_id() == observer_id);
            let Some(index) = index else {
                return;
            };
            if inner.results.len() != inner.observers.len() {
                inner.results = inner
                    .observers
                    .iter()
                    .map(|observer| observer.current_result())
                    .collect();
            }
            inner.results[index] = result;
            inner.results.clone()
        };
        self.notify(results);
    }

    fn refresh_results(&self) {
        let results = {
            let mut inner = self.inner.lock();
            let results: Vec<QueryObserverResult<S>> = inner
                .observers
                .iter()
                .map(|observer| observer.current_result())
                .collect();
            inner.results = results.clone();
            results
        };
        self.notify(results);
    }

    fn notify(&self, results: Vec<QueryObserverResult<S>>) {
        let listeners: Vec<QueriesListener<S>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            let results = results.clone();
            self.client
                .core()
                .notify
                .schedule(Box::new(move || listener(results)));
        }
    }
}

impl<T: QueryData, S: ResultData> std::fmt::Debug for QueriesObserver<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("QueriesObserver")
            .field("observers", &inner.observers.len())
            .field("mounted", &inner.mounted)
            .finish_non_exhaustive()
    }
}
