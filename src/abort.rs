//! Cooperative cancellation signals.
//!
//! A fetch exposes an [`AbortSignal`] through its context so user fetchers can
//! observe cancellation: poll [`AbortSignal::aborted`], register a callback
//! with [`AbortSignal::on_abort`], or await [`AbortSignal::cancelled`] inside
//! spawned work. The owning [`AbortController`] fires the signal exactly once.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

struct AbortShared {
    sender: watch::Sender<bool>,
    callbacks: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
}

/// Fires an [`AbortSignal`].
pub struct AbortController {
    shared: Arc<AbortShared>,
}

impl AbortController {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            shared: Arc::new(AbortShared {
                sender,
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The signal controlled by this controller.
    #[must_use]
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            shared: self.shared.clone(),
        }
    }

    /// Aborts the signal, invoking registered callbacks. Subsequent calls are
    /// no-ops.
    pub fn abort(&self) {
        let first = !*self.shared.sender.borrow();
        self.shared.sender.send_replace(true);
        if first {
            let callbacks = std::mem::take(&mut *self.shared.callbacks.lock());
            for callback in callbacks {
                callback();
            }
        }
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AbortController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortController")
            .field("aborted", &*self.shared.sender.borrow())
            .finish()
    }
}

/// Observable side of an [`AbortController`].
#[derive(Clone)]
pub struct AbortSignal {
    shared: Arc<AbortShared>,
}

impl AbortSignal {
    /// Returns `true` once the controller has aborted.
    #[must_use]
    pub fn aborted(&self) -> bool {
        *self.shared.sender.borrow()
    }

    /// Registers a callback fired once on abort. Fires immediately if the
    /// signal is already aborted.
    pub fn on_abort(&self, callback: impl FnOnce() + Send + 'static) {
        if self.aborted() {
            callback();
        } else {
            self.shared.callbacks.lock().push(Box::new(callback));
        }
    }

    /// Resolves when the signal aborts; pends forever if it never does.
    pub async fn cancelled(&self) {
        let mut receiver = self.shared.sender.subscribe();
        loop {
            if *receiver.borrow() {
                return;
            }
            if receiver.changed().await.is_err() {
                // Controller dropped without aborting; never resolves.
                std::future::pending::<()>().await;
            }
        }
    }
}

impl std::fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.aborted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_abort_flips_signal() {
        let controller = AbortController::new();
        let signal = controller.signal();
        assert!(!signal.aborted());
        controller.abort();
        assert!(signal.aborted());
    }

    #[test]
    fn test_callbacks_fire_once() {
        let controller = AbortController::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let seen = calls.clone();
        controller.signal().on_abort(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        controller.abort();
        controller.abort();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_late_callback_fires_immediately() {
        let controller = AbortController::new();
        controller.abort();

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        controller.signal().on_abort(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_resolves_on_abort() {
        let controller = AbortController::new();
        let signal = controller.signal();

        let waiter = tokio::spawn(async move { signal.cancelled().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.abort();

        tokio::time::timeout(Duration::from_millis(100), waiter)
            .await
            .expect("cancelled() should resolve after abort")
            .unwrap();
    }
}
