//! Snapshot and restore of cache state.
//!
//! [`dehydrate`] captures a JSON-serializable snapshot of the interesting
//! parts of a client: successful queries (worth shipping to another process)
//! and paused mutations (worth replaying after a restart). [`hydrate`] feeds
//! such a snapshot back into a client; existing fresher entries win, and
//! restored entries always land idle.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::client::QueryClient;
use crate::key::QueryKey;
use crate::mutation_cache::MutationPredicateContext;
use crate::query::QueryStatus;
use crate::query_cache::QueryPredicateContext;

/// A dehydrated query entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DehydratedQuery {
    pub query_hash: String,
    pub query_key: QueryKey,
    pub state: Value,
}

/// A dehydrated mutation entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DehydratedMutation {
    pub mutation_key: Option<QueryKey>,
    pub state: Value,
}

/// The persistence format: all keys and states are plain JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DehydratedState {
    pub mutations: Vec<DehydratedMutation>,
    pub queries: Vec<DehydratedQuery>,
}

pub type ShouldDehydrateQueryFn = Arc<dyn Fn(&QueryPredicateContext) -> bool + Send + Sync>;
pub type ShouldDehydrateMutationFn =
    Arc<dyn Fn(&MutationPredicateContext) -> bool + Send + Sync>;

/// What [`dehydrate`] includes.
#[derive(Clone)]
pub struct DehydrateOptions {
    pub dehydrate_queries: bool,
    pub dehydrate_mutations: bool,
    /// Defaults to keeping successful queries.
    pub should_dehydrate_query: Option<ShouldDehydrateQueryFn>,
    /// Defaults to keeping paused mutations.
    pub should_dehydrate_mutation: Option<ShouldDehydrateMutationFn>,
}

impl Default for DehydrateOptions {
    fn default() -> Self {
        Self {
            dehydrate_queries: true,
            dehydrate_mutations: true,
            should_dehydrate_query: None,
            should_dehydrate_mutation: None,
        }
    }
}

impl std::fmt::Debug for DehydrateOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DehydrateOptions")
            .field("dehydrate_queries", &self.dehydrate_queries)
            .field("dehydrate_mutations", &self.dehydrate_mutations)
            .finish_non_exhaustive()
    }
}

/// Captures a snapshot of the client's caches.
#[must_use]
pub fn dehydrate(client: &QueryClient, options: &DehydrateOptions) -> DehydratedState {
    let mut state = DehydratedState::default();

    if options.dehydrate_mutations {
        for mutation in client.mutation_cache().all() {
            let context = MutationPredicateContext {
                key: mutation.mutation_key(),
                status: mutation.status(),
                is_paused: mutation.is_paused(),
            };
            let keep = match &options.should_dehydrate_mutation {
                Some(predicate) => predicate(&context),
                None => context.is_paused,
            };
            if keep {
                if let Some(mutation_state) = mutation.serialize_state() {
                    state.mutations.push(DehydratedMutation {
                        mutation_key: context.key,
                        state: mutation_state,
                    });
                }
            }
        }
        // Mutations hydrated earlier but not yet replayed survive another
        // round trip.
        for pending in client.mutation_cache().hydrated_snapshots() {
            state.mutations.push(DehydratedMutation {
                mutation_key: pending.key,
                state: pending.state,
            });
        }
    }

    if options.dehydrate_queries {
        for query in client.query_cache().all() {
            let context = QueryPredicateContext {
                key: query.query_key().clone(),
                hash: query.query_hash().to_owned(),
                status: query.status(),
                fetch_status: query.fetch_status(),
                is_active: query.is_active(),
                is_stale: query.is_stale(),
                observer_count: query.observer_count(),
            };
            let keep = match &options.should_dehydrate_query {
                Some(predicate) => predicate(&context),
                None => context.status == QueryStatus::Success,
            };
            if keep {
                if let Some(query_state) = query.serialize_state() {
                    state.queries.push(DehydratedQuery {
                        query_hash: context.hash,
                        query_key: context.key,
                        state: query_state,
                    });
                }
            }
        }
        for (hash, key, snapshot) in client.query_cache().hydrated_snapshots() {
            state.queries.push(DehydratedQuery {
                query_hash: hash,
                query_key: key,
                state: snapshot,
            });
        }
    }

    state
}

/// Restores a snapshot into the client.
///
/// A query that already exists keeps its state when it is at least as fresh
/// as the snapshot; otherwise the snapshot is applied with an idle fetch
/// status. Unknown queries are stored for adoption on first typed access.
/// Mutations are queued for replay by `resume_paused_mutations`.
pub fn hydrate(client: &QueryClient, state: &DehydratedState) {
    for mutation in &state.mutations {
        client
            .mutation_cache()
            .store_hydrated(mutation.mutation_key.clone(), mutation.state.clone());
    }
    for query in &state.queries {
        match client.query_cache().get(&query.query_hash) {
            Some(existing) => {
                existing.hydrate_state(&query.state);
            }
            None => {
                client.query_cache().store_hydrated(
                    query.query_hash.clone(),
                    query.query_key.clone(),
                    query.state.clone(),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_format_round_trips_as_json() {
        let state = DehydratedState {
            mutations: vec![DehydratedMutation {
                mutation_key: Some(QueryKey::from(json!(["add-todo"]))),
                state: json!({"is_paused": true}),
            }],
            queries: vec![DehydratedQuery {
                query_hash: r#"["todos"]"#.to_owned(),
                query_key: QueryKey::from(json!(["todos"])),
                state: json!({"data": [1, 2, 3]}),
            }],
        };
        let text = serde_json::to_string(&state).unwrap();
        let back: DehydratedState = serde_json::from_str(&text).unwrap();
        assert_eq!(back.mutations.len(), 1);
        assert_eq!(back.queries.len(), 1);
        assert_eq!(back.queries[0].query_hash, r#"["todos"]"#);
    }
}
