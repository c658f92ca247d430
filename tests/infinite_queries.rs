// Integration tests for infinite (paged) queries

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use refetch::{
    InfiniteData, InfinitePageConfig, InfiniteQueryObserver, QueryClient, QueryObserverOptions,
    QueryOptions, RefetchOn,
};
use serde_json::{Value, json};
use tokio::time::{sleep, timeout};

#[tokio::test]
async fn test_first_page_then_forward_pagination() {
    let client = QueryClient::new();

    let pages = InfinitePageConfig::<i64>::new()
        .query_fn(|ctx| async move {
            // The first page has no parameter.
            Ok(ctx.page_param.and_then(|v| v.as_i64()).unwrap_or(1))
        })
        .get_next_page_param(|last, _all| (*last < 3).then(|| json!(last + 1)));

    let observer = InfiniteQueryObserver::new(
        &client,
        QueryObserverOptions::<InfiniteData<i64>>::new(json!(["numbers"]))
            .stale_time(Duration::MAX),
        pages,
    );
    let _subscription = observer.subscribe(|_| {});

    timeout(Duration::from_secs(1), async {
        while observer.current_result().data().is_none() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("first page should load on mount");

    let result = observer.current_result();
    assert_eq!(result.data().unwrap().pages, vec![1]);
    assert!(result.has_next_page);
    assert!(!result.has_previous_page);

    let result = timeout(Duration::from_secs(1), observer.fetch_next_page())
        .await
        .unwrap();
    assert_eq!(result.data().unwrap().pages, vec![1, 2]);
    assert!(result.has_next_page);

    let result = timeout(Duration::from_secs(1), observer.fetch_next_page())
        .await
        .unwrap();
    assert_eq!(result.data().unwrap().pages, vec![1, 2, 3]);
    // The getter returns None past page 3.
    assert!(!result.has_next_page);
    assert_eq!(
        result.data().unwrap().page_params,
        vec![None, Some(json!(2)), Some(json!(3))]
    );
}

#[tokio::test]
async fn test_refetch_page_selector_refetches_exactly_one_page() {
    let client = QueryClient::new();
    let calls = Arc::new(AtomicU32::new(0));
    let fetched_params: Arc<Mutex<Vec<Option<Value>>>> = Arc::new(Mutex::new(Vec::new()));

    // Seed three cached pages with manual parameters (no next-page getter).
    client.set_query_data::<InfiniteData<String>>(
        json!(["letters"]),
        |_prev| {
            Some(InfiniteData::new(
                vec!["P1".to_owned(), "P2".to_owned(), "P3".to_owned()],
                vec![None, Some(json!(2)), Some(json!(3))],
            ))
        },
        None,
    );

    let counter = calls.clone();
    let params = fetched_params.clone();
    let pages = InfinitePageConfig::<String>::new().query_fn(move |ctx| {
        counter.fetch_add(1, Ordering::SeqCst);
        params.lock().push(ctx.page_param.clone());
        async move { Ok(format!("P{}'", ctx.page_param.and_then(|v| v.as_i64()).unwrap_or(1))) }
    });

    let observer = InfiniteQueryObserver::new(
        &client,
        QueryObserverOptions::<InfiniteData<String>>::new(json!(["letters"]))
            .stale_time(Duration::MAX)
            .refetch_on_mount(RefetchOn::Never),
        pages,
    );
    let _subscription = observer.subscribe(|_| {});
    sleep(Duration::from_millis(20)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    // Refetch only the middle page; the others are reused from cache.
    let result = timeout(
        Duration::from_secs(1),
        observer.refetch_pages(|_page, index, _all| index == 1),
    )
    .await
    .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(fetched_params.lock().as_slice(), &[Some(json!(2))]);
    assert_eq!(
        result.data().unwrap().pages,
        vec!["P1".to_owned(), "P2'".to_owned(), "P3".to_owned()]
    );
    assert_eq!(
        result.data().unwrap().page_params,
        vec![None, Some(json!(2)), Some(json!(3))]
    );
}

#[tokio::test]
async fn test_backward_pagination_prepends() {
    let client = QueryClient::new();

    let pages = InfinitePageConfig::<i64>::new()
        .query_fn(|ctx| async move { Ok(ctx.page_param.and_then(|v| v.as_i64()).unwrap_or(5)) })
        .get_previous_page_param(|first, _all| (*first > 1).then(|| json!(first - 1)));

    let observer = InfiniteQueryObserver::new(
        &client,
        QueryObserverOptions::<InfiniteData<i64>>::new(json!(["timeline"]))
            .stale_time(Duration::MAX),
        pages,
    );
    let _subscription = observer.subscribe(|_| {});

    timeout(Duration::from_secs(1), async {
        while observer.current_result().data().is_none() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(observer.current_result().has_previous_page);

    let result = timeout(Duration::from_secs(1), observer.fetch_previous_page())
        .await
        .unwrap();
    assert_eq!(result.data().unwrap().pages, vec![4, 5]);
    assert_eq!(
        result.data().unwrap().page_params,
        vec![Some(json!(4)), None]
    );
}

#[tokio::test]
async fn test_fetch_infinite_query_loads_first_page() {
    let client = QueryClient::new();

    let pages = InfinitePageConfig::<String>::new()
        .query_fn(|_ctx| async { Ok("first".to_owned()) });
    let data = client
        .fetch_infinite_query(
            QueryOptions::<InfiniteData<String>>::new(json!(["feed"])),
            pages,
        )
        .await
        .unwrap();

    assert_eq!(data.pages, vec!["first".to_owned()]);
    assert_eq!(data.page_params, vec![None]);
}
