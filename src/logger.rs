use std::fmt::Debug;

/// Log sink used by the client and caches.
///
/// The logger is passed through construction rather than read from global
/// state; embeddings can route messages anywhere. The default implementation
/// forwards to [`tracing`].
pub trait Logger: Send + Sync + Debug {
    fn log(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Default logger forwarding to the `tracing` macros.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, message: &str) {
        tracing::debug!(target: "refetch", "{message}");
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "refetch", "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "refetch", "{message}");
    }
}
