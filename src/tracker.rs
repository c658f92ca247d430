//! Focus and online signals.
//!
//! The client reacts to two boolean environment signals: whether the
//! application is focused and whether the network is reachable. Each signal is
//! a single-writer, many-reader tracker with subscriber fan-out. The event
//! source feeding a tracker is pluggable through [`FocusTracker::set_event_listener`]
//! and [`OnlineTracker::set_event_listener`]; by default both signals are
//! `true` until told otherwise.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

/// Callback invoked with the new signal value on every change.
pub type TrackerListener = Arc<dyn Fn(bool) + Send + Sync>;

/// Teardown returned by an event-source setup.
pub type EventTeardown = Box<dyn FnOnce() + Send>;

/// Event-source installer: receives a publish function and may return a
/// teardown that is invoked when the source is replaced.
pub type EventSetup =
    Box<dyn FnOnce(Box<dyn Fn(bool) + Send + Sync>) -> Option<EventTeardown> + Send>;

struct Shared {
    sender: watch::Sender<bool>,
    listeners: Mutex<Vec<(u64, TrackerListener)>>,
    next_id: Mutex<u64>,
    teardown: Mutex<Option<EventTeardown>>,
}

impl Shared {
    fn new(initial: bool) -> Arc<Self> {
        let (sender, _) = watch::channel(initial);
        Arc::new(Self {
            sender,
            listeners: Mutex::new(Vec::new()),
            next_id: Mutex::new(0),
            teardown: Mutex::new(None),
        })
    }

    fn get(&self) -> bool {
        *self.sender.borrow()
    }

    fn set(&self, value: bool) {
        let changed = {
            let current = *self.sender.borrow();
            current != value
        };
        self.sender.send_replace(value);
        if changed {
            let listeners: Vec<TrackerListener> = self
                .listeners
                .lock()
                .iter()
                .map(|(_, l)| l.clone())
                .collect();
            for listener in listeners {
                listener(value);
            }
        }
    }

    fn subscribe(this: &Arc<Self>, listener: TrackerListener) -> TrackerGuard {
        let id = {
            let mut next = this.next_id.lock();
            *next += 1;
            *next
        };
        this.listeners.lock().push((id, listener));
        TrackerGuard {
            shared: Arc::downgrade(this),
            id,
        }
    }

    fn set_event_listener(this: &Arc<Self>, setup: EventSetup) {
        if let Some(teardown) = this.teardown.lock().take() {
            teardown();
        }
        let shared = Arc::downgrade(this);
        let publish = Box::new(move |value: bool| {
            if let Some(shared) = shared.upgrade() {
                shared.set(value);
            }
        });
        let teardown = setup(publish);
        *this.teardown.lock() = teardown;
    }
}

/// Removes the associated listener on drop.
pub struct TrackerGuard {
    shared: std::sync::Weak<Shared>,
    id: u64,
}

impl Drop for TrackerGuard {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.listeners.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

/// Tracks whether the application is focused.
///
/// # Example
///
/// ```rust
/// use refetch::FocusTracker;
///
/// let tracker = FocusTracker::new();
/// assert!(tracker.is_focused());
/// tracker.set_focused(false);
/// assert!(!tracker.is_focused());
/// ```
#[derive(Clone)]
pub struct FocusTracker {
    shared: Arc<Shared>,
}

impl FocusTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Shared::new(true),
        }
    }

    /// Current focus state.
    #[must_use]
    pub fn is_focused(&self) -> bool {
        self.shared.get()
    }

    /// Publishes a new focus state, notifying subscribers on change.
    pub fn set_focused(&self, focused: bool) {
        self.shared.set(focused);
    }

    /// Registers a listener; the returned guard unsubscribes on drop.
    pub fn subscribe(&self, listener: TrackerListener) -> TrackerGuard {
        Shared::subscribe(&self.shared, listener)
    }

    /// Installs the event source feeding this tracker, tearing down any
    /// previously installed source.
    pub fn set_event_listener(&self, setup: EventSetup) {
        Shared::set_event_listener(&self.shared, setup);
    }

    pub(crate) fn receiver(&self) -> watch::Receiver<bool> {
        self.shared.sender.subscribe()
    }
}

impl Default for FocusTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FocusTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FocusTracker")
            .field("focused", &self.is_focused())
            .finish_non_exhaustive()
    }
}

/// Tracks whether the network is reachable.
///
/// The retry engine waits on this tracker while a fetch is paused by the
/// network policy.
#[derive(Clone)]
pub struct OnlineTracker {
    shared: Arc<Shared>,
}

impl OnlineTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Shared::new(true),
        }
    }

    /// Current online state.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.shared.get()
    }

    /// Publishes a new online state, notifying subscribers on change.
    pub fn set_online(&self, online: bool) {
        self.shared.set(online);
    }

    /// Registers a listener; the returned guard unsubscribes on drop.
    pub fn subscribe(&self, listener: TrackerListener) -> TrackerGuard {
        Shared::subscribe(&self.shared, listener)
    }

    /// Installs the event source feeding this tracker, tearing down any
    /// previously installed source.
    pub fn set_event_listener(&self, setup: EventSetup) {
        Shared::set_event_listener(&self.shared, setup);
    }

    /// A watch receiver observing the online state, used by paused fetch
    /// loops to wake on reconnect.
    pub(crate) fn receiver(&self) -> watch::Receiver<bool> {
        self.shared.sender.subscribe()
    }
}

impl Default for OnlineTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OnlineTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnlineTracker")
            .field("online", &self.is_online())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_defaults_to_true() {
        assert!(FocusTracker::new().is_focused());
        assert!(OnlineTracker::new().is_online());
    }

    #[test]
    fn test_subscribers_fire_on_change_only() {
        let tracker = OnlineTracker::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let seen = calls.clone();
        let _guard = tracker.subscribe(Arc::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        tracker.set_online(true); // no change
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tracker.set_online(false);
        tracker.set_online(true);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_guard_unsubscribes_on_drop() {
        let tracker = FocusTracker::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let seen = calls.clone();
        let guard = tracker.subscribe(Arc::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        tracker.set_focused(false);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        drop(guard);
        tracker.set_focused(true);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_event_listener_publishes() {
        let tracker = OnlineTracker::new();
        tracker.set_event_listener(Box::new(|publish| {
            publish(false);
            None
        }));
        assert!(!tracker.is_online());
    }

    #[test]
    fn test_event_listener_replacement_tears_down() {
        let tracker = FocusTracker::new();
        let torn_down = Arc::new(AtomicUsize::new(0));

        let seen = torn_down.clone();
        tracker.set_event_listener(Box::new(move |_publish| {
            Some(Box::new(move || {
                seen.fetch_add(1, Ordering::SeqCst);
            }))
        }));
        assert_eq!(torn_down.load(Ordering::SeqCst), 0);

        tracker.set_event_listener(Box::new(|_publish| None));
        assert_eq!(torn_down.load(Ordering::SeqCst), 1);
    }
}
