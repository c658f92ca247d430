//! Prelude module for convenient imports.
//!
//! ```
//! use refetch::prelude::*;
//! ```
//!
//! # What's included
//!
//! - [`QueryClient`] - The client facade
//! - [`QueryObserver`] / [`QueryObserverOptions`] - Observing cached queries
//! - [`MutationObserver`] / [`MutationOptions`] - Running mutations
//! - [`QueryKey`] and the error/status vocabulary

pub use crate::client::QueryClient;
pub use crate::error::QueryError;
pub use crate::infinite::{InfiniteData, InfinitePageConfig, InfiniteQueryObserver};
pub use crate::key::QueryKey;
pub use crate::mutation::{MutationOptions, MutationStatus};
pub use crate::mutation_observer::MutationObserver;
pub use crate::observer::{QueryObserver, QueryObserverResult};
pub use crate::options::{QueryObserverOptions, QueryOptions};
pub use crate::query::{FetchStatus, QueryStatus};
pub use crate::query_cache::QueryFilters;
pub use crate::retry::{NetworkMode, RetryDelay, RetryPolicy};
