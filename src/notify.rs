//! Batched listener notification.
//!
//! State transitions inside the cache can touch many observers at once. The
//! [`NotifyManager`] collects the resulting listener callbacks while a batch
//! scope is open and flushes them as one unit on a scheduler task once the
//! outermost scope closes, so listeners observe causally ordered state with no
//! interleaving from synchronous mutators.
//!
//! Outside a batch scope, a scheduled callback is deferred to the scheduler
//! immediately. Both the per-callback dispatcher and the batch dispatcher are
//! replaceable by the embedding, e.g. to funnel notifications into a UI
//! framework's own batched-update primitive.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;

/// A queued listener callback.
pub type NotifyCallback = Box<dyn FnOnce() + Send + 'static>;

/// Dispatcher invoked for each individual callback.
pub type NotifyFn = Arc<dyn Fn(NotifyCallback) + Send + Sync>;

/// Dispatcher invoked with an entire flushed batch.
pub type BatchNotifyFn = Arc<dyn Fn(NotifyCallback) + Send + Sync>;

struct Inner {
    transactions: usize,
    queue: Vec<NotifyCallback>,
    notify_fn: NotifyFn,
    batch_notify_fn: BatchNotifyFn,
}

/// Batches and defers listener callbacks.
pub struct NotifyManager {
    inner: Mutex<Inner>,
}

impl NotifyManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                transactions: 0,
                queue: Vec::new(),
                notify_fn: Arc::new(|callback| callback()),
                batch_notify_fn: Arc::new(defer),
            }),
        }
    }

    /// Runs `f` inside a batch scope.
    ///
    /// Callbacks scheduled while the scope is open are queued; when the
    /// outermost scope closes the queue is flushed to the batch dispatcher.
    /// Scopes nest, and a callback that itself schedules lands in the next
    /// flush.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.lock().transactions += 1;
        let result = f();
        let flush = {
            let mut inner = self.inner.lock();
            inner.transactions -= 1;
            inner.transactions == 0
        };
        if flush {
            self.flush();
        }
        result
    }

    /// Schedules a callback: queued while a batch scope is open, otherwise
    /// deferred to the scheduler right away.
    pub fn schedule(&self, callback: NotifyCallback) {
        let deferred = {
            let mut inner = self.inner.lock();
            if inner.transactions > 0 {
                inner.queue.push(callback);
                None
            } else {
                Some((inner.notify_fn.clone(), callback))
            }
        };
        if let Some((notify_fn, callback)) = deferred {
            defer(Box::new(move || notify_fn(callback)));
        }
    }

    /// Replaces the per-callback dispatcher.
    pub fn set_notify_fn(&self, notify_fn: NotifyFn) {
        self.inner.lock().notify_fn = notify_fn;
    }

    /// Replaces the batch dispatcher.
    pub fn set_batch_notify_fn(&self, batch_notify_fn: BatchNotifyFn) {
        self.inner.lock().batch_notify_fn = batch_notify_fn;
    }

    fn flush(&self) {
        let (queue, notify_fn, batch_notify_fn) = {
            let mut inner = self.inner.lock();
            (
                std::mem::take(&mut inner.queue),
                inner.notify_fn.clone(),
                inner.batch_notify_fn.clone(),
            )
        };
        if queue.is_empty() {
            return;
        }
        batch_notify_fn(Box::new(move || {
            for callback in queue {
                notify_fn(callback);
            }
        }));
    }
}

impl Default for NotifyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NotifyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("NotifyManager")
            .field("transactions", &inner.transactions)
            .field("queued", &inner.queue.len())
            .finish()
    }
}

/// Runs a callback on a fresh runtime task, falling back to inline execution
/// when no runtime is available (e.g. synchronous unit tests).
fn defer(callback: NotifyCallback) {
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { callback() });
        }
        Err(_) => callback(),
    }
}
