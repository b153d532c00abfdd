mod helpers;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use tokio::sync::mpsc;

use narvik::application::ports::JobStore;
use narvik::application::services::{
    CallbackConfig, CallbackDispatcher, TRANSPORT_FAILURE_CODE,
};
use narvik::domain::{JobId, MediaSource, Segment, TranscriptionResult};
use narvik::infrastructure::persistence::SqliteJobStore;

use helpers::{sample_job, sqlite_store, with_callback};

fn quick_config() -> CallbackConfig {
    CallbackConfig {
        max_attempts: 5,
        base_delay: Duration::from_millis(10),
        backoff_factor: 2,
        max_delay: Duration::from_millis(100),
        request_timeout: Duration::from_secs(2),
        max_in_flight: 4,
        per_host_limit: 2,
    }
}

fn sample_result() -> TranscriptionResult {
    TranscriptionResult {
        text: "hello".into(),
        segments: vec![Segment {
            id: 0,
            start: 0.0,
            end: 1.0,
            text: "hello".into(),
            diagnostics: serde_json::Map::new(),
        }],
        info: serde_json::Map::new(),
    }
}

/// Callback receiver that replies with a scripted status per attempt
/// (last entry repeats) and counts what it saw.
async fn spawn_receiver(statuses: Vec<u16>) -> (String, Arc<AtomicU32>) {
    let attempts = Arc::new(AtomicU32::new(0));
    let state = (Arc::clone(&attempts), Arc::new(statuses));

    let app = Router::new().route(
        "/hook",
        post(
            |State((attempts, statuses)): State<(Arc<AtomicU32>, Arc<Vec<u16>>)>,
             body: String| async move {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) as usize;
                assert!(body.contains("\"status\""), "callback body carries the job row");
                let code = statuses
                    .get(attempt)
                    .or_else(|| statuses.last())
                    .copied()
                    .unwrap_or(200);
                StatusCode::from_u16(code).unwrap()
            },
        ),
    )
    .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/hook", addr), attempts)
}

async fn terminal_job_with_callback(store: &Arc<SqliteJobStore>, url: &str) -> JobId {
    let created = store
        .create(with_callback(
            sample_job("mock", MediaSource::RemoteUrl("https://e.com/a.mp4".into())),
            url,
        ))
        .await
        .unwrap();
    store.claim_next("mock").await.unwrap().unwrap();
    store
        .mark_completed(created.id, &sample_result(), Some("en"), 1.0)
        .await
        .unwrap();
    created.id
}

async fn wait_for_recorded_callback(
    store: &Arc<SqliteJobStore>,
    id: JobId,
) -> (Option<i32>, Option<String>) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let job = store.get(id).await.unwrap().unwrap();
        if job.callback_status_code.is_some() {
            return (job.callback_status_code, job.callback_message);
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "callback outcome never recorded"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn given_two_503s_then_200_then_three_attempts_and_success_recorded() {
    let (_dir, store) = sqlite_store().await;
    let (url, attempts) = spawn_receiver(vec![503, 503, 200]).await;
    let id = terminal_job_with_callback(&store, &url).await;

    let dispatcher = CallbackDispatcher::new(store.clone(), quick_config());
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(dispatcher.run(rx));
    tx.send(id).await.unwrap();

    let (code, _message) = wait_for_recorded_callback(&store, id).await;
    assert_eq!(code, Some(200));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    let job = store.get(id).await.unwrap().unwrap();
    assert!(job.callback_time.is_some());
}

#[tokio::test]
async fn given_client_error_then_no_retries_and_status_recorded() {
    let (_dir, store) = sqlite_store().await;
    let (url, attempts) = spawn_receiver(vec![410]).await;
    let id = terminal_job_with_callback(&store, &url).await;

    let dispatcher = CallbackDispatcher::new(store.clone(), quick_config());
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(dispatcher.run(rx));
    tx.send(id).await.unwrap();

    let (code, message) = wait_for_recorded_callback(&store, id).await;
    assert_eq!(code, Some(410));
    assert!(message.unwrap().contains("rejected"));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn given_unreachable_host_then_transport_failure_recorded() {
    let (_dir, store) = sqlite_store().await;
    // Nothing listens on this port.
    let id = terminal_job_with_callback(&store, "http://127.0.0.1:9/hook").await;

    let mut config = quick_config();
    config.max_attempts = 2;
    let dispatcher = CallbackDispatcher::new(store.clone(), config);
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(dispatcher.run(rx));
    tx.send(id).await.unwrap();

    let (code, message) = wait_for_recorded_callback(&store, id).await;
    assert_eq!(code, Some(TRANSPORT_FAILURE_CODE));
    assert!(message.unwrap().contains("transport error"));
}

#[tokio::test]
async fn given_persistent_5xx_then_last_status_recorded_after_max_attempts() {
    let (_dir, store) = sqlite_store().await;
    let (url, attempts) = spawn_receiver(vec![500]).await;
    let id = terminal_job_with_callback(&store, &url).await;

    let mut config = quick_config();
    config.max_attempts = 3;
    let dispatcher = CallbackDispatcher::new(store.clone(), config);
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(dispatcher.run(rx));
    tx.send(id).await.unwrap();

    let (code, _message) = wait_for_recorded_callback(&store, id).await;
    assert_eq!(code, Some(500));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn given_pending_callbacks_at_startup_then_dispatcher_recovers_them() {
    let (_dir, store) = sqlite_store().await;
    let (url, attempts) = spawn_receiver(vec![200]).await;
    let id = terminal_job_with_callback(&store, &url).await;

    // No send: the dispatcher discovers the pending outcome on its own.
    let dispatcher = CallbackDispatcher::new(store.clone(), quick_config());
    let (_tx, rx) = mpsc::channel::<JobId>(8);
    tokio::spawn(dispatcher.run(rx));

    let (code, _message) = wait_for_recorded_callback(&store, id).await;
    assert_eq!(code, Some(200));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}
