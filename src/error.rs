use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for query and mutation operations.
///
/// A single error enum flows through the whole crate: user fetchers return it,
/// the retry engine classifies it, and cached state stores it. Cancellation is
/// modelled as an error value carrying its `revert`/`silent` attributes so that
/// the state reducer can tell a rollback apart from a plain failure.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryError {
    /// The user-provided fetch or mutation function failed.
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    /// The fetch was cancelled before it settled.
    ///
    /// `revert` rolls the query state back to the snapshot taken at fetch
    /// start; `silent` suppresses error dispatch and logging.
    #[error("fetch cancelled")]
    Cancelled { revert: bool, silent: bool },

    /// No query function is configured for this key and no observer
    /// supplies one.
    #[error("no query function configured")]
    MissingQueryFn,

    /// No mutation function is configured for this mutation.
    #[error("no mutation function configured")]
    MissingMutationFn,

    /// A `select` transform failed while deriving an observer result.
    ///
    /// Selector failures surface on the derived result only; the underlying
    /// query state is left untouched.
    #[error("select failed: {0}")]
    Selector(String),
}

impl QueryError {
    /// Creates a `FetchFailed` error from any displayable value.
    pub fn fetch_failed(message: impl ToString) -> Self {
        Self::FetchFailed(message.to_string())
    }

    /// Creates a cancellation marker with default attributes.
    #[must_use]
    pub const fn cancelled() -> Self {
        Self::Cancelled {
            revert: false,
            silent: false,
        }
    }

    /// Returns `true` if this error is a cancellation marker.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns `true` if this is a silent cancellation.
    #[must_use]
    pub const fn is_silent(&self) -> bool {
        matches!(self, Self::Cancelled { silent: true, .. })
    }

    /// Returns `true` if this cancellation requested a state rollback.
    #[must_use]
    pub const fn should_revert(&self) -> bool {
        matches!(self, Self::Cancelled { revert: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_attributes() {
        let err = QueryError::cancelled();
        assert!(err.is_cancelled());
        assert!(!err.is_silent());
        assert!(!err.should_revert());

        let err = QueryError::Cancelled {
            revert: true,
            silent: true,
        };
        assert!(err.is_cancelled());
        assert!(err.is_silent());
        assert!(err.should_revert());
    }

    #[test]
    fn test_non_cancelled_errors() {
        let err = QueryError::fetch_failed("boom");
        assert!(!err.is_cancelled());
        assert!(!err.is_silent());
        assert!(!err.should_revert());
        assert_eq!(err.to_string(), "fetch failed: boom");
    }

    #[test]
    fn test_serde_round_trip() {
        let err = QueryError::Cancelled {
            revert: true,
            silent: false,
        };
        let json = serde_json::to_string(&err).unwrap();
        let back: QueryError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }
}
