// Integration tests for the core stale-while-revalidate flow

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use refetch::{
    InvalidateOptions, QueryCacheEventKind, QueryClient, QueryFilters, QueryObserver,
    QueryObserverOptions, QueryOptions,
};
use serde_json::{Value, json};
use tokio::time::{sleep, timeout};

#[tokio::test]
async fn test_prefetch_then_stale_observer_revalidates() {
    let client = QueryClient::new();
    client.mount();

    client
        .prefetch_query(QueryOptions::<String>::new(json!(["k"])).query_fn(|_ctx| async {
            Ok("a".to_owned())
        }))
        .await;
    assert_eq!(
        client.get_query_data::<String>(json!(["k"])).as_deref(),
        Some(&"a".to_owned())
    );

    // Let the data age past the observer's stale time.
    sleep(Duration::from_millis(150)).await;

    let results = Arc::new(Mutex::new(Vec::new()));
    let seen = results.clone();
    let observer = QueryObserver::<String>::new(
        &client,
        QueryObserverOptions::new(json!(["k"]))
            .query_fn(|_ctx| async { Ok("b".to_owned()) })
            .stale_time(Duration::from_millis(100)),
    );
    let _subscription = observer.subscribe(move |result| {
        seen.lock().push(result);
    });

    // Mounting against stale data refetches in the background while the old
    // data stays visible.
    let mounted = observer.current_result();
    assert_eq!(mounted.data.as_deref(), Some(&"a".to_owned()));
    assert!(mounted.is_stale);
    assert!(mounted.is_fetching());

    timeout(Duration::from_secs(1), async {
        loop {
            let result = observer.current_result();
            if result.data.as_deref() == Some(&"b".to_owned()) && !result.is_stale {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("refetch should replace the stale data");

    // The listener saw the settled value.
    sleep(Duration::from_millis(20)).await;
    assert!(
        results
            .lock()
            .iter()
            .any(|r| r.data.as_deref() == Some(&"b".to_owned()))
    );
}

#[tokio::test]
async fn test_fetch_query_skips_when_fresh() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicU32::new(0));

    let counter = calls.clone();
    let options = move || {
        let counter = counter.clone();
        refetch::FetchQueryOptions::from(QueryOptions::<i32>::new(json!(["fresh"])).query_fn(
            move |_ctx| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                }
            },
        ))
        .stale_time(Duration::from_secs(60))
    };

    let first = client.fetch_query(options()).await.unwrap();
    assert_eq!(*first, 7);
    let second = client.fetch_query(options()).await.unwrap();
    assert_eq!(*second, 7);
    // Fresh within the stale time, so only one network call.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_set_query_data_round_trip() {
    let client = QueryClient::new();

    client.set_query_data::<Vec<i32>>(json!(["list"]), |_prev| Some(vec![1, 2, 3]), None);
    assert_eq!(
        client.get_query_data::<Vec<i32>>(json!(["list"])).as_deref(),
        Some(&vec![1, 2, 3])
    );

    // The updater sees the previous value; returning None is a no-op.
    client.set_query_data::<Vec<i32>>(
        json!(["list"]),
        |prev| prev.map(|p| p.iter().map(|n| n * 10).collect()),
        None,
    );
    assert_eq!(
        client.get_query_data::<Vec<i32>>(json!(["list"])).as_deref(),
        Some(&vec![10, 20, 30])
    );

    client.set_query_data::<Vec<i32>>(json!(["list"]), |_prev| None, None);
    assert_eq!(
        client.get_query_data::<Vec<i32>>(json!(["list"])).as_deref(),
        Some(&vec![10, 20, 30])
    );
}

#[tokio::test]
async fn test_structural_sharing_preserves_identity_across_fetches() {
    let client = QueryClient::new();

    async fn fetch_tree(client: &QueryClient) -> Result<Arc<Value>, refetch::QueryError> {
        client
            .fetch_query(
                QueryOptions::<Value>::new(json!(["tree"]))
                    .query_fn(|_ctx| async { Ok(json!({"a": [1, 2, {"b": 3}]})) }),
            )
            .await
    }

    let first = fetch_tree(&client).await.unwrap();
    // Second fetch returns a deep-equal tree; the cached allocation must be
    // reused so consumers keep identity.
    let second = client
        .fetch_query(
            refetch::FetchQueryOptions::from(
                QueryOptions::<Value>::new(json!(["tree"]))
                    .query_fn(|_ctx| async { Ok(json!({"a": [1, 2, {"b": 3}]})) }),
            ),
        )
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_invalidate_is_idempotent_on_notifications() {
    let client = QueryClient::new();
    client
        .prefetch_query(
            QueryOptions::<i32>::new(json!(["inv"])).query_fn(|_ctx| async { Ok(1) }),
        )
        .await;

    let invalidations = Arc::new(AtomicU32::new(0));
    let seen = invalidations.clone();
    let _subscription = client.query_cache().subscribe(Arc::new(move |event| {
        if event.kind == QueryCacheEventKind::Updated
            && event.action == Some(refetch::query::QueryActionKind::Invalidate)
        {
            seen.fetch_add(1, Ordering::SeqCst);
        }
    }));

    let filters = QueryFilters::key(json!(["inv"]));
    let no_refetch = InvalidateOptions {
        refetch_type: refetch::RefetchType::None,
        cancel_refetch: true,
    };
    client
        .invalidate_queries(filters.clone(), no_refetch)
        .await;
    client.invalidate_queries(filters, no_refetch).await;

    sleep(Duration::from_millis(20)).await;
    assert_eq!(invalidations.load(Ordering::SeqCst), 1);
    assert!(
        client
            .get_query_state::<i32>(json!(["inv"]))
            .unwrap()
            .is_invalidated
    );
}

#[tokio::test]
async fn test_unobserved_query_is_garbage_collected() {
    let client = QueryClient::new();
    client
        .prefetch_query(
            QueryOptions::<i32>::new(json!(["gc"]))
                .query_fn(|_ctx| async { Ok(1) })
                .cache_time(Duration::from_millis(30)),
        )
        .await;
    assert_eq!(client.query_cache().len(), 1);

    sleep(Duration::from_millis(120)).await;
    assert_eq!(client.query_cache().len(), 0);
}

#[tokio::test]
async fn test_observer_holds_off_garbage_collection() {
    let client = QueryClient::new();
    let observer = QueryObserver::<i32>::new(
        &client,
        QueryObserverOptions::new(json!(["held"]))
            .query_fn(|_ctx| async { Ok(5) })
            .stale_time(Duration::MAX),
    );
    {
        let _subscription = observer.subscribe(|_| {});
        sleep(Duration::from_millis(50)).await;
        assert_eq!(client.query_cache().len(), 1);
        sleep(Duration::from_millis(50)).await;
        // Still observed, still cached.
        assert_eq!(client.query_cache().len(), 1);
    }
    // Last subscriber gone: the default retention applies, entry stays for now.
    sleep(Duration::from_millis(50)).await;
    assert_eq!(client.query_cache().len(), 1);
}
