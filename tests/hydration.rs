// Integration tests for dehydrate/hydrate round trips

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use refetch::{
    DehydrateOptions, MutationOptions, QueryClient, QueryOptions, QueryStatus, dehydrate, hydrate,
};
use serde_json::json;
use tokio::time::{sleep, timeout};

#[tokio::test]
async fn test_successful_queries_round_trip() {
    let source = QueryClient::new();
    source
        .prefetch_query(
            QueryOptions::<Vec<i32>>::new(json!(["todos"]))
                .query_fn(|_ctx| async { Ok(vec![1, 2, 3]) }),
        )
        .await;
    let original = source.get_query_state::<Vec<i32>>(json!(["todos"])).unwrap();

    let snapshot = dehydrate(&source, &DehydrateOptions::default());
    assert_eq!(snapshot.queries.len(), 1);
    assert!(snapshot.mutations.is_empty());

    // The snapshot survives a JSON round trip (persistence transport).
    let text = serde_json::to_string(&snapshot).unwrap();
    let snapshot = serde_json::from_str(&text).unwrap();

    let target = QueryClient::new();
    hydrate(&target, &snapshot);

    let restored = target.get_query_state::<Vec<i32>>(json!(["todos"])).unwrap();
    assert_eq!(restored.data.as_deref(), Some(&vec![1, 2, 3]));
    assert_eq!(restored.data_updated_at, original.data_updated_at);
    assert_eq!(restored.status, QueryStatus::Success);
    assert_eq!(restored.fetch_status, refetch::FetchStatus::Idle);
}

#[tokio::test]
async fn test_failed_queries_are_not_dehydrated() {
    let client = QueryClient::new();
    client
        .prefetch_query(
            QueryOptions::<i32>::new(json!(["broken"]))
                .query_fn(|_ctx| async { Err(refetch::QueryError::fetch_failed("down")) }),
        )
        .await;

    let snapshot = dehydrate(&client, &DehydrateOptions::default());
    assert!(snapshot.queries.is_empty());
}

#[tokio::test]
async fn test_hydrate_loses_against_fresher_existing_data() {
    let source = QueryClient::new();
    source.set_query_data::<String>(json!(["k"]), |_| Some("old".to_owned()), Some(1000));
    let snapshot = dehydrate(&source, &DehydrateOptions::default());

    let target = QueryClient::new();
    target.set_query_data::<String>(json!(["k"]), |_| Some("new".to_owned()), Some(2000));
    hydrate(&target, &snapshot);

    assert_eq!(
        target.get_query_data::<String>(json!(["k"])).as_deref(),
        Some(&"new".to_owned())
    );

    // The other direction applies the snapshot.
    let stale_target = QueryClient::new();
    stale_target.set_query_data::<String>(json!(["k"]), |_| Some("ancient".to_owned()), Some(10));
    hydrate(&stale_target, &snapshot);
    assert_eq!(
        stale_target.get_query_data::<String>(json!(["k"])).as_deref(),
        Some(&"old".to_owned())
    );
}

#[tokio::test]
async fn test_paused_mutation_round_trip_and_resume() {
    let source = QueryClient::new();
    source.online_tracker().set_online(false);

    let options = MutationOptions::<String, String>::new()
        .key(json!(["send"]))
        .mutation_fn(|text: String| async move { Ok(text) });
    let pending = tokio::spawn(source.mutate(options, "hello".to_owned()));
    sleep(Duration::from_millis(30)).await;
    assert_eq!(source.is_mutating(None), 1);

    let snapshot = dehydrate(&source, &DehydrateOptions::default());
    assert_eq!(snapshot.mutations.len(), 1);
    let text = serde_json::to_string(&snapshot).unwrap();
    let snapshot = serde_json::from_str(&text).unwrap();
    pending.abort();

    // A fresh client replays the mutation through its registered defaults.
    let sent: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let target = QueryClient::new();
    let log = sent.clone();
    target.set_mutation_defaults(
        json!(["send"]),
        MutationOptions::<String, String>::new()
            .key(json!(["send"]))
            .mutation_fn(move |text: String| {
                let log = log.clone();
                async move {
                    log.lock().push(text.clone());
                    Ok(text)
                }
            }),
    );
    hydrate(&target, &snapshot);

    timeout(Duration::from_secs(1), target.resume_paused_mutations())
        .await
        .unwrap();
    assert_eq!(sent.lock().as_slice(), &["hello".to_owned()]);
}
