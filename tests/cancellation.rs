// Integration tests for fetch cancellation semantics

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use refetch::{
    CancelOptions, FetchStatus, QueryClient, QueryError, QueryFilters, QueryObserver,
    QueryObserverOptions, QueryOptions, QueryStatus,
};
use serde_json::json;
use tokio::time::{sleep, timeout};

#[tokio::test]
async fn test_cancel_with_revert_rolls_back_loading_state() {
    let client = QueryClient::new();

    let task = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .fetch_query(QueryOptions::<String>::new(json!(["slow"])).query_fn(
                    |_ctx| async {
                        sleep(Duration::from_secs(10)).await;
                        Ok("late".to_owned())
                    },
                ))
                .await
        }
    });

    sleep(Duration::from_millis(30)).await;
    assert_eq!(client.is_fetching(None), 1);

    client
        .cancel_queries(&QueryFilters::key(json!(["slow"])), None)
        .await;

    let result = timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    assert_eq!(
        result,
        Err(QueryError::Cancelled {
            revert: true,
            silent: false
        })
    );

    // The state rolled back to the pre-fetch snapshot and is idle again.
    let state = client.get_query_state::<String>(json!(["slow"])).unwrap();
    assert!(state.data.is_none());
    assert_eq!(state.status, QueryStatus::Loading);
    assert_eq!(state.fetch_status, FetchStatus::Idle);
}

#[tokio::test]
async fn test_explicit_cancel_without_revert_records_error() {
    let client = QueryClient::new();

    let task = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .fetch_query(QueryOptions::<String>::new(json!(["slow"])).query_fn(
                    |_ctx| async {
                        sleep(Duration::from_secs(10)).await;
                        Ok("late".to_owned())
                    },
                ))
                .await
        }
    });

    sleep(Duration::from_millis(30)).await;
    client
        .cancel_queries(
            &QueryFilters::key(json!(["slow"])),
            Some(CancelOptions::default()),
        )
        .await;

    let result = timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    assert!(matches!(result, Err(QueryError::Cancelled { .. })));

    let state = client.get_query_state::<String>(json!(["slow"])).unwrap();
    assert_eq!(state.status, QueryStatus::Error);
    assert!(matches!(state.error, Some(QueryError::Cancelled { .. })));
}

#[tokio::test]
async fn test_unmount_without_signal_lets_result_land_in_cache() {
    let client = QueryClient::new();

    let observer = QueryObserver::<String>::new(
        &client,
        QueryObserverOptions::new(json!(["bg"])).query_fn(|_ctx| async {
            sleep(Duration::from_millis(50)).await;
            Ok("landed".to_owned())
        }),
    );
    let subscription = observer.subscribe(|_| {});
    sleep(Duration::from_millis(10)).await;

    // The fetcher never consumed the abort signal: dropping the last
    // subscriber only cancels retries and lets the attempt settle.
    drop(subscription);
    sleep(Duration::from_millis(100)).await;

    assert_eq!(
        client.get_query_data::<String>(json!(["bg"])).as_deref(),
        Some(&"landed".to_owned())
    );
}

#[tokio::test]
async fn test_unmount_with_consumed_signal_cancels_fetch() {
    let client = QueryClient::new();
    let aborted = Arc::new(AtomicBool::new(false));

    let saw_abort = aborted.clone();
    let observer = QueryObserver::<String>::new(
        &client,
        QueryObserverOptions::new(json!(["watched"])).query_fn(move |ctx| {
            let signal = ctx.signal();
            let saw_abort = saw_abort.clone();
            async move {
                signal.on_abort(move || {
                    saw_abort.store(true, Ordering::SeqCst);
                });
                sleep(Duration::from_millis(100)).await;
                Ok("late".to_owned())
            }
        }),
    );
    let subscription = observer.subscribe(|_| {});
    sleep(Duration::from_millis(10)).await;

    drop(subscription);
    sleep(Duration::from_millis(150)).await;

    // The consumed signal makes unmount a hard cancel with revert.
    assert!(aborted.load(Ordering::SeqCst));
    assert_eq!(client.get_query_data::<String>(json!(["watched"])), None);
}

#[tokio::test]
async fn test_concurrent_fetches_share_one_attempt() {
    let client = QueryClient::new();
    let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));

    let options = |calls: Arc<std::sync::atomic::AtomicU32>| {
        QueryOptions::<i32>::new(json!(["shared"])).query_fn(move |_ctx| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(40)).await;
                Ok(1)
            }
        })
    };

    let (a, b) = tokio::join!(
        client.fetch_query(options(calls.clone())),
        client.fetch_query(options(calls.clone())),
    );
    assert_eq!(a, b);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
