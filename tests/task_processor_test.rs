mod helpers;

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::{mpsc, watch, Notify};

use narvik::application::ports::JobStore;
use narvik::application::services::{ModelPool, PoolConfig, ProcessorConfig, TaskProcessor};
use narvik::domain::{JobId, JobPriority, JobStatus, MediaSource};
use narvik::infrastructure::engines::{MockOutcome, MockSpeechEngine};
use narvik::infrastructure::media::MockMediaProcessor;
use narvik::infrastructure::persistence::SqliteJobStore;

use helpers::{
    sample_job, sqlite_store, staged_media_job, staging_area, wait_for_status, wait_for_terminal,
    with_callback, with_priority,
};

struct Harness {
    store: Arc<SqliteJobStore>,
    engine: Arc<MockSpeechEngine>,
    pool: Arc<ModelPool>,
    wakeup: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    callback_rx: mpsc::Receiver<JobId>,
    _staging_dir: TempDir,
    _db_dir: TempDir,
    staging_dir_path: std::path::PathBuf,
}

async fn start_harness(engine: Arc<MockSpeechEngine>, max_concurrent: usize) -> Harness {
    let (db_dir, store) = sqlite_store().await;
    let staging_dir = TempDir::new().unwrap();
    let staging = staging_area(&staging_dir, 64 * 1024 * 1024);
    let media = Arc::new(MockMediaProcessor::new(39.61));

    let pool = ModelPool::new(
        Arc::clone(&engine) as Arc<dyn narvik::application::ports::SpeechEngine>,
        PoolConfig {
            min_size: 1,
            max_size: max_concurrent,
            max_instances_per_gpu: 1,
            init_with_max_pool_size: true,
        },
    )
    .unwrap();
    pool.initialize().await.unwrap();

    let wakeup = Arc::new(Notify::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (callback_tx, callback_rx) = mpsc::channel(64);

    let processor = TaskProcessor::new(
        store.clone() as _,
        Arc::clone(&pool),
        staging.clone() as _,
        media as _,
        callback_tx,
        Arc::clone(&wakeup),
        shutdown_rx,
        ProcessorConfig {
            engine_name: "mock".into(),
            max_concurrent_tasks: max_concurrent,
            status_check_interval: Duration::from_millis(50),
            job_deadline: None,
            recovery_threshold: chrono::Duration::zero(),
            staged_file_ttl: Duration::ZERO,
        },
    );
    processor.start().await.unwrap();

    let staging_dir_path = staging_dir.path().to_path_buf();
    Harness {
        store,
        engine,
        pool,
        wakeup,
        shutdown: shutdown_tx,
        callback_rx,
        _staging_dir: staging_dir,
        _db_dir: db_dir,
        staging_dir_path,
    }
}

#[tokio::test]
async fn given_staged_upload_job_then_it_completes_with_result_and_timing() {
    let engine = Arc::new(MockSpeechEngine::new(0));
    let mut harness = start_harness(engine, 1).await;

    let new_job = staged_media_job("mock", &harness._staging_dir, "speech").await;
    let created = harness.store.create(new_job).await.unwrap();
    harness.wakeup.notify_one();

    let job = wait_for_terminal(&harness.store, created.id, Duration::from_secs(5)).await;
    assert_eq!(job.status, JobStatus::Completed);
    let result = job.result.expect("completed job stores a result");
    assert!(!result.text.is_empty());
    assert_eq!(job.language.as_deref(), Some("en"));
    assert!(job.task_processing_time.is_some());
    assert!(job.error_message.is_none());

    // No callback URL, so nothing lands on the dispatcher queue.
    assert!(harness.callback_rx.try_recv().is_err());
    let _ = harness.shutdown.send(true);
}

#[tokio::test]
async fn given_mixed_priorities_with_one_slot_then_claim_order_is_high_normal_low() {
    // All three jobs must be queued before the slot starts claiming.
    let (_db_dir, store) = sqlite_store().await;
    let staging_dir = TempDir::new().unwrap();

    let low = store
        .create(with_priority(
            staged_media_job("mock", &staging_dir, "low").await,
            JobPriority::Low,
        ))
        .await
        .unwrap();
    let normal = store
        .create(with_priority(
            staged_media_job("mock", &staging_dir, "normal").await,
            JobPriority::Normal,
        ))
        .await
        .unwrap();
    let high = store
        .create(with_priority(
            staged_media_job("mock", &staging_dir, "high").await,
            JobPriority::High,
        ))
        .await
        .unwrap();

    let engine = Arc::new(MockSpeechEngine::new(0).with_latency(Duration::from_millis(30)));
    let staging = staging_area(&staging_dir, 64 * 1024 * 1024);
    let media = Arc::new(MockMediaProcessor::new(10.0));
    let pool = ModelPool::new(
        engine as Arc<dyn narvik::application::ports::SpeechEngine>,
        PoolConfig {
            min_size: 1,
            max_size: 1,
            max_instances_per_gpu: 1,
            init_with_max_pool_size: true,
        },
    )
    .unwrap();
    pool.initialize().await.unwrap();
    let wakeup = Arc::new(Notify::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (callback_tx, _callback_rx) = mpsc::channel(8);

    let processor = TaskProcessor::new(
        store.clone(),
        pool,
        staging,
        media,
        callback_tx,
        Arc::clone(&wakeup),
        shutdown_rx,
        ProcessorConfig {
            engine_name: "mock".into(),
            max_concurrent_tasks: 1,
            status_check_interval: Duration::from_millis(50),
            job_deadline: None,
            recovery_threshold: chrono::Duration::days(1),
            staged_file_ttl: Duration::ZERO,
        },
    );
    processor.start().await.unwrap();

    let high_done = wait_for_terminal(&store, high.id, Duration::from_secs(5)).await;
    let normal_done = wait_for_terminal(&store, normal.id, Duration::from_secs(5)).await;
    let low_done = wait_for_terminal(&store, low.id, Duration::from_secs(5)).await;

    // One serial slot, so terminal write order mirrors claim order.
    assert!(high_done.updated_at <= normal_done.updated_at);
    assert!(normal_done.updated_at <= low_done.updated_at);
    let _ = shutdown_tx.send(true);
}

#[tokio::test]
async fn given_decoder_failure_then_job_fails_with_message() {
    let engine = Arc::new(MockSpeechEngine::new(0));
    engine.push_outcome(MockOutcome::DecodeError("unintelligible audio".into()));
    let harness = start_harness(engine, 1).await;

    let created = harness
        .store
        .create(staged_media_job("mock", &harness._staging_dir, "noise").await)
        .await
        .unwrap();
    harness.wakeup.notify_one();

    let job = wait_for_terminal(&harness.store, created.id, Duration::from_secs(5)).await;
    assert_eq!(job.status, JobStatus::Failed);
    let message = job.error_message.expect("failed job stores a message");
    assert!(message.contains("unintelligible audio"));
    assert!(job.result.is_none());
    let _ = harness.shutdown.send(true);
}

#[tokio::test]
async fn given_transient_device_error_then_one_retry_on_a_fresh_worker_succeeds() {
    let engine = Arc::new(MockSpeechEngine::new(0));
    engine.push_outcome(MockOutcome::TransientDeviceError);
    let harness = start_harness(Arc::clone(&engine), 1).await;

    let created = harness
        .store
        .create(staged_media_job("mock", &harness._staging_dir, "flaky").await)
        .await
        .unwrap();
    harness.wakeup.notify_one();

    let job = wait_for_terminal(&harness.store, created.id, Duration::from_secs(5)).await;
    assert_eq!(job.status, JobStatus::Completed);
    // The faulted worker was discarded and replaced to honor min_size.
    assert!(engine.instances_created() >= 2);
    let _ = harness.shutdown.send(true);
}

#[tokio::test]
async fn given_two_consecutive_transient_errors_then_job_fails() {
    let engine = Arc::new(MockSpeechEngine::new(0));
    engine.push_outcome(MockOutcome::TransientDeviceError);
    engine.push_outcome(MockOutcome::TransientDeviceError);
    let harness = start_harness(engine, 1).await;

    let created = harness
        .store
        .create(staged_media_job("mock", &harness._staging_dir, "cursed").await)
        .await
        .unwrap();
    harness.wakeup.notify_one();

    let job = wait_for_terminal(&harness.store, created.id, Duration::from_secs(5)).await;
    assert_eq!(job.status, JobStatus::Failed);
    let _ = harness.shutdown.send(true);
}

#[tokio::test]
async fn given_missing_staged_file_then_job_fails_with_staging_error() {
    let engine = Arc::new(MockSpeechEngine::new(0));
    let harness = start_harness(engine, 1).await;

    let new_job = sample_job(
        "mock",
        MediaSource::LocalPath(
            harness
                .staging_dir_path
                .join("vanished.wav")
                .to_string_lossy()
                .into_owned(),
        ),
    );
    let created = harness.store.create(new_job).await.unwrap();
    harness.wakeup.notify_one();

    let job = wait_for_terminal(&harness.store, created.id, Duration::from_secs(5)).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("staged file missing"));
    let _ = harness.shutdown.send(true);
}

#[tokio::test]
async fn given_callback_url_then_job_id_lands_on_dispatcher_queue() {
    let engine = Arc::new(MockSpeechEngine::new(0));
    let mut harness = start_harness(engine, 1).await;

    let created = harness
        .store
        .create(with_callback(
            staged_media_job("mock", &harness._staging_dir, "notify").await,
            "https://callback.example.com/hook",
        ))
        .await
        .unwrap();
    harness.wakeup.notify_one();

    wait_for_terminal(&harness.store, created.id, Duration::from_secs(5)).await;
    let queued = tokio::time::timeout(Duration::from_secs(2), harness.callback_rx.recv())
        .await
        .expect("callback intent enqueued")
        .unwrap();
    assert_eq!(queued, created.id);
    let _ = harness.shutdown.send(true);
}

#[tokio::test]
async fn given_stale_processing_row_then_startup_recovery_requeues_and_completes_it() {
    // Claim a job on a first store handle, simulating a crashed owner.
    let (_db_dir, store) = sqlite_store().await;
    let staging_dir = TempDir::new().unwrap();
    let new_job = staged_media_job("mock", &staging_dir, "orphan").await;
    let created = store.create(new_job).await.unwrap();
    store.claim_next("mock").await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let engine = Arc::new(MockSpeechEngine::new(0));
    let staging = staging_area(&staging_dir, 64 * 1024 * 1024);
    let media = Arc::new(MockMediaProcessor::new(10.0));
    let pool = ModelPool::new(
        engine as Arc<dyn narvik::application::ports::SpeechEngine>,
        PoolConfig {
            min_size: 1,
            max_size: 1,
            max_instances_per_gpu: 1,
            init_with_max_pool_size: true,
        },
    )
    .unwrap();
    pool.initialize().await.unwrap();
    let wakeup = Arc::new(Notify::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (callback_tx, _callback_rx) = mpsc::channel(8);

    let processor = TaskProcessor::new(
        store.clone() as _,
        pool,
        staging as _,
        media as _,
        callback_tx,
        Arc::clone(&wakeup),
        shutdown_rx,
        ProcessorConfig {
            engine_name: "mock".into(),
            max_concurrent_tasks: 1,
            status_check_interval: Duration::from_millis(50),
            job_deadline: None,
            recovery_threshold: chrono::Duration::zero(),
            staged_file_ttl: Duration::ZERO,
        },
    );
    processor.start().await.unwrap();

    let job = wait_for_terminal(&store, created.id, Duration::from_secs(5)).await;
    assert_eq!(job.status, JobStatus::Completed);
    let _ = shutdown_tx.send(true);
}

#[tokio::test]
async fn given_more_jobs_than_slots_then_concurrency_never_exceeds_the_bound() {
    let engine = Arc::new(MockSpeechEngine::new(2).with_latency(Duration::from_millis(80)));
    let harness = start_harness(Arc::clone(&engine), 2).await;

    let mut ids = Vec::new();
    for i in 0..5 {
        let job = harness
            .store
            .create(staged_media_job("mock", &harness._staging_dir, &format!("j{}", i)).await)
            .await
            .unwrap();
        ids.push(job.id);
    }
    harness.wakeup.notify_one();

    for id in ids {
        wait_for_terminal(&harness.store, id, Duration::from_secs(10)).await;
    }
    assert!(harness.engine.max_observed_concurrency() <= 2);
    assert_eq!(harness.pool.status().busy, 0);
    let _ = harness.shutdown.send(true);
}

#[tokio::test]
async fn given_completed_job_then_staged_file_is_cleaned_up() {
    let engine = Arc::new(MockSpeechEngine::new(0));
    let harness = start_harness(engine, 1).await;

    let new_job = staged_media_job("mock", &harness._staging_dir, "cleanup").await;
    let staged_path = std::path::PathBuf::from(new_job.source.reference());
    let created = harness.store.create(new_job).await.unwrap();
    harness.wakeup.notify_one();

    wait_for_status(&harness.store, created.id, JobStatus::Completed, Duration::from_secs(5)).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while staged_path.exists() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "staged file not cleaned up"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let _ = harness.shutdown.send(true);
}
