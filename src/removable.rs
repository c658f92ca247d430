//! Scheduled garbage collection.
//!
//! Queries and mutations share the same idle-collection behavior: once nothing
//! references a record, a timer counts down its `cache_time` and then offers
//! it for removal. Re-acquiring the record clears the pending timer.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Default retention for unreferenced records, five minutes.
pub(crate) const DEFAULT_CACHE_TIME: Duration = Duration::from_secs(5 * 60);

/// A garbage-collection timer with an adjustable delay.
pub(crate) struct Removable {
    cache_time: Mutex<Duration>,
    gc_task: Mutex<Option<JoinHandle<()>>>,
}

impl Removable {
    /// Starts with no retention; the first `update_cache_time` establishes
    /// the window (the five-minute default when nothing is requested).
    pub fn new() -> Self {
        Self {
            cache_time: Mutex::new(Duration::ZERO),
            gc_task: Mutex::new(None),
        }
    }

    pub fn cache_time(&self) -> Duration {
        *self.cache_time.lock()
    }

    /// Widens the retention window. The delay only ever grows, so a record
    /// shared between configurations honors the longest request.
    pub fn update_cache_time(&self, requested: Option<Duration>) {
        let mut cache_time = self.cache_time.lock();
        *cache_time = (*cache_time).max(requested.unwrap_or(DEFAULT_CACHE_TIME));
    }

    /// Schedules `collect` to run after the retention window, replacing any
    /// pending timer. A `Duration::MAX` window disables collection.
    pub fn schedule_gc(&self, collect: impl FnOnce() + Send + 'static) {
        self.clear_gc();
        let delay = self.cache_time();
        if delay == Duration::MAX {
            return;
        }
        if let Ok(handle) = Handle::try_current() {
            let task = handle.spawn(async move {
                tokio::time::sleep(delay).await;
                collect();
            });
            *self.gc_task.lock() = Some(task);
        }
    }

    /// Aborts a pending timer, if any.
    pub fn clear_gc(&self) {
        if let Some(task) = self.gc_task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for Removable {
    fn drop(&mut self) {
        self.clear_gc();
    }
}

impl std::fmt::Debug for Removable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Removable")
            .field("cache_time", &self.cache_time())
            .field("scheduled", &self.gc_task.lock().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn with_cache_time(cache_time: Duration) -> Removable {
        Removable {
            cache_time: Mutex::new(cache_time),
            gc_task: Mutex::new(None),
        }
    }

    #[tokio::test]
    async fn test_gc_fires_after_cache_time() {
        let removable = with_cache_time(Duration::from_millis(10));

        let fired = Arc::new(AtomicUsize::new(0));
        let seen = fired.clone();
        removable.schedule_gc(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_clear_gc_cancels_timer() {
        let removable = with_cache_time(Duration::from_millis(10));

        let fired = Arc::new(AtomicUsize::new(0));
        let seen = fired.clone();
        removable.schedule_gc(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        removable.clear_gc();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cache_time_defaults_and_widens() {
        let removable = Removable::new();
        assert_eq!(removable.cache_time(), Duration::ZERO);

        removable.update_cache_time(Some(Duration::from_secs(1)));
        assert_eq!(removable.cache_time(), Duration::from_secs(1));

        removable.update_cache_time(None);
        assert_eq!(removable.cache_time(), DEFAULT_CACHE_TIME);

        removable.update_cache_time(Some(Duration::from_secs(1)));
        assert_eq!(removable.cache_time(), DEFAULT_CACHE_TIME);
    }

    #[tokio::test]
    async fn test_infinite_cache_time_disables_gc() {
        let removable = Removable::new();
        removable.update_cache_time(Some(Duration::MAX));

        let fired = Arc::new(AtomicUsize::new(0));
        let seen = fired.clone();
        removable.schedule_gc(move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        assert!(removable.gc_task.lock().is_none());
    }
}
