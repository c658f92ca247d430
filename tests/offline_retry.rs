// Integration tests for network pause/resume of queries and mutations

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use refetch::{
    FetchStatus, MutationOptions, NetworkMode, QueryClient, QueryError, QueryOptions, QueryStatus,
    RetryDelay,
};
use serde_json::json;
use tokio::time::{sleep, timeout};

#[tokio::test]
async fn test_offline_fetch_pauses_then_resumes_through_retries() {
    let client = QueryClient::new();
    client.online_tracker().set_online(false);

    let calls = Arc::new(AtomicU32::new(0));
    let task = tokio::spawn({
        let client = client.clone();
        let counter = calls.clone();
        async move {
            client
                .fetch_query(
                    QueryOptions::<String>::new(json!(["k"]))
                        .query_fn(move |_ctx| {
                            let n = counter.fetch_add(1, Ordering::SeqCst);
                            async move {
                                match n {
                                    0 => Err(QueryError::fetch_failed("e1")),
                                    1 => Err(QueryError::fetch_failed("e2")),
                                    _ => Ok("ok".to_owned()),
                                }
                            }
                        })
                        .retry(3u32)
                        .retry_delay(RetryDelay::Fixed(Duration::from_millis(1)))
                        .network_mode(NetworkMode::Online),
                )
                .await
        }
    });

    sleep(Duration::from_millis(50)).await;
    let state = client.get_query_state::<String>(json!(["k"])).unwrap();
    assert!(state.data.is_none());
    assert_eq!(state.fetch_status, FetchStatus::Paused);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    client.online_tracker().set_online(true);
    let result = timeout(Duration::from_secs(1), task)
        .await
        .expect("fetch should settle after reconnect")
        .unwrap();
    assert_eq!(result.unwrap().as_str(), "ok");

    let state = client.get_query_state::<String>(json!(["k"])).unwrap();
    assert_eq!(state.status, QueryStatus::Success);
    assert_eq!(state.data.as_deref().map(String::as_str), Some("ok"));
    assert_eq!(state.fetch_status, FetchStatus::Idle);
    // Two failures before the third attempt succeeded.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_offline_mutation_parks_paused() {
    let client = QueryClient::new();
    client.online_tracker().set_online(false);

    let options = MutationOptions::<i32, i32>::new()
        .key(json!(["add"]))
        .mutation_fn(|n| async move { Ok(n + 1) });
    let pipeline = client.mutate(options, 41);
    let task = tokio::spawn(pipeline);

    sleep(Duration::from_millis(50)).await;
    assert_eq!(client.is_mutating(None), 1);

    client.online_tracker().set_online(true);
    client.resume_paused_mutations().await;

    let result = timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    assert_eq!(*result.unwrap(), 42);
}

#[tokio::test]
async fn test_paused_mutations_resume_in_insertion_order() {
    let client = QueryClient::new();
    client.online_tracker().set_online(false);

    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let mutation_options = |log: Arc<Mutex<Vec<String>>>| {
        MutationOptions::<String, String>::new()
            .key(json!(["queue"]))
            .mutation_fn(move |name: String| {
                let log = log.clone();
                async move {
                    log.lock().push(format!("start-{name}"));
                    sleep(Duration::from_millis(20)).await;
                    log.lock().push(format!("end-{name}"));
                    Ok(name)
                }
            })
    };

    let first = tokio::spawn(client.mutate(mutation_options(log.clone()), "one".to_owned()));
    sleep(Duration::from_millis(10)).await;
    let second = tokio::spawn(client.mutate(mutation_options(log.clone()), "two".to_owned()));

    sleep(Duration::from_millis(30)).await;
    assert_eq!(client.is_mutating(None), 2);
    assert!(log.lock().is_empty());

    client.online_tracker().set_online(true);
    client.resume_paused_mutations().await;

    timeout(Duration::from_secs(1), async {
        let _ = first.await;
        let _ = second.await;
    })
    .await
    .unwrap();

    // Strictly sequential, strictly in insertion order.
    assert_eq!(
        log.lock().as_slice(),
        &["start-one", "end-one", "start-two", "end-two"]
    );
}

#[tokio::test]
async fn test_mutation_hooks_fire_in_sequence() {
    let client = QueryClient::new();
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let on_mutate_log = log.clone();
    let on_success_log = log.clone();
    let on_settled_log = log.clone();
    let options = MutationOptions::<i32, i32, i32>::new()
        .mutation_fn(|n| async move { Ok(n * 2) })
        .on_mutate(move |_vars| {
            let log = on_mutate_log.clone();
            async move {
                log.lock().push("mutate");
                Ok(Some(99))
            }
        })
        .on_success(move |data, _vars, context| {
            let log = on_success_log.clone();
            assert_eq!(context, Some(99));
            assert_eq!(*data, 42);
            async move {
                log.lock().push("success");
            }
        })
        .on_settled(move |_data, error, _vars, _context| {
            let log = on_settled_log.clone();
            assert!(error.is_none());
            async move {
                log.lock().push("settled");
            }
        });

    let result = client.mutate(options, 21).await.unwrap();
    assert_eq!(*result, 42);
    assert_eq!(log.lock().as_slice(), &["mutate", "success", "settled"]);
}

#[tokio::test]
async fn test_mutation_error_path_runs_error_hooks() {
    let client = QueryClient::new();
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let on_error_log = log.clone();
    let on_settled_log = log.clone();
    let options = MutationOptions::<i32, i32>::new()
        .mutation_fn(|_n| async move { Err::<i32, _>(QueryError::fetch_failed("nope")) })
        .on_error(move |error, _vars, _context: Option<()>| {
            let log = on_error_log.clone();
            assert_eq!(error, QueryError::fetch_failed("nope"));
            async move {
                log.lock().push("error");
            }
        })
        .on_settled(move |data, _error, _vars, _context| {
            let log = on_settled_log.clone();
            assert!(data.is_none());
            async move {
                log.lock().push("settled");
            }
        });

    let result = client.mutate(options, 1).await;
    assert_eq!(result, Err(QueryError::fetch_failed("nope")));
    assert_eq!(log.lock().as_slice(), &["error", "settled"]);
}
