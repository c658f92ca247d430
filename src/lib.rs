//! # Refetch - Asynchronous Data-Fetching Cache
//!
//! Refetch is a stale-while-revalidate cache for async data, similar to SWR
//! or TanStack Query, built on top of [tokio](https://tokio.rs/). It sits
//! between an application and its remote data sources and coordinates three
//! tightly-coupled concerns:
//!
//! 1. A **keyed cache** of in-flight and completed fetches with reference
//!    counting, staleness, garbage collection and structural sharing of
//!    result data.
//! 2. An **observer layer** that derives per-subscriber results, schedules
//!    automatic background refetches and batches notifications.
//! 3. A **retry-and-pause engine** that drives fetches under a network/focus
//!    policy with cancellation, exponential backoff and resumable paused
//!    fetches.
//!
//! A companion mutation subsystem (writes with optimistic context, offline
//! pause and FIFO resume) reuses the same retry engine and notification
//! conventions.
//!
//! ## Core Components
//!
//! - [`QueryClient`]: facade binding the caches, trackers and defaults
//! - [`QueryObserver`]: derives a result from one cached query
//! - [`InfiniteQueryObserver`]: multi-page overlay for paged data
//! - [`QueriesObserver`]: observes a dynamic, ordered list of queries
//! - [`MutationObserver`]: derives a result from one mutation
//! - [`dehydrate`] / [`hydrate`]: snapshot and restore of cache state
//!
//! ## Example
//!
//! ```rust,no_run
//! use refetch::{QueryClient, QueryObserver, QueryObserverOptions};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = QueryClient::new();
//!     client.mount();
//!
//!     let observer = QueryObserver::<Vec<String>>::new(
//!         &client,
//!         QueryObserverOptions::new(json!(["todos"]))
//!             .query_fn(|_ctx| async { Ok(vec!["buy milk".to_owned()]) })
//!             .stale_time(Duration::from_secs(30)),
//!     );
//!
//!     let _subscription = observer.subscribe(|result| {
//!         if let Some(todos) = &result.data {
//!             println!("todos: {todos:?}");
//!         }
//!     });
//! }
//! ```

pub mod abort;
pub mod client;
pub mod error;
pub mod hydration;
pub mod infinite;
pub mod key;
pub mod logger;
pub mod mutation;
pub mod mutation_cache;
pub mod mutation_observer;
pub mod notify;
pub mod observer;
pub mod options;
pub mod prelude;
pub mod queries;
pub mod query;
pub mod query_cache;
pub mod retry;
pub mod tracker;

mod removable;
mod time;

// Re-export commonly used types
pub use abort::{AbortController, AbortSignal};
pub use client::{
    DefaultMutationConfig, DefaultOptions, FetchQueryOptions, InvalidateOptions, QueryClient,
    QueryClientBuilder, RefetchOptions, RefetchType,
};
pub use error::QueryError;
pub use hydration::{
    DehydrateOptions, DehydratedMutation, DehydratedQuery, DehydratedState, dehydrate, hydrate,
};
pub use infinite::{
    InfiniteData, InfinitePageConfig, InfiniteQueryObserver, InfiniteQueryObserverResult,
};
pub use key::QueryKey;
pub use logger::{Logger, TracingLogger};
pub use mutation::{Mutation, MutationOptions, MutationState, MutationStatus};
pub use mutation_cache::{
    MutationCache, MutationCacheConfig, MutationCacheEvent, MutationCacheEventKind,
    MutationFilters, MutationPredicateContext,
};
pub use mutation_observer::{MutationObserver, MutationObserverResult, MutationSubscription};
pub use notify::NotifyManager;
pub use observer::{ObserverSubscription, QueryObserver, QueryObserverResult};
pub use options::{
    DefaultQueryConfig, FetchDirection, FetchMore, FetchOptions, NotifyOnChangeProps,
    PlaceholderData, QueryData, QueryFnContext, QueryObserverOptions, QueryOptions,
    RefetchBehavior, RefetchInterval, RefetchOn, ResultData, ResultProp, StructuralSharing,
};
pub use queries::{QueriesObserver, QueriesSubscription};
pub use query::{FetchStatus, Query, QueryState, QueryStatus};
pub use query_cache::{
    QueryCache, QueryCacheConfig, QueryCacheEvent, QueryCacheEventKind, QueryFilters,
    QueryPredicateContext, QueryTypeFilter,
};
pub use retry::{CancelOptions, NetworkMode, RetryDelay, RetryPolicy};
pub use tracker::{FocusTracker, OnlineTracker, TrackerGuard};
