mod helpers;

use std::time::Duration;

use chrono::Utc;
use narvik::application::ports::{JobStore, StoreError};
use narvik::domain::{
    JobPatch, JobPriority, JobQuery, JobStatus, MediaSource, Segment, TranscriptionResult,
};

use helpers::{sample_job, sqlite_store, with_callback, with_priority};

fn sample_result() -> TranscriptionResult {
    TranscriptionResult {
        text: "hello world".into(),
        segments: vec![Segment {
            id: 0,
            start: 0.0,
            end: 2.5,
            text: "hello world".into(),
            diagnostics: serde_json::Map::new(),
        }],
        info: serde_json::Map::new(),
    }
}

#[tokio::test]
async fn given_new_job_when_creating_and_reading_back_then_user_fields_round_trip() {
    let (_dir, store) = sqlite_store().await;

    let mut new_job = sample_job("mock", MediaSource::RemoteUrl("https://example.com/a.mp4".into()));
    new_job.file_url = Some("https://example.com/a.mp4".into());
    new_job.platform = Some("tiktok".into());
    new_job.callback_url = Some("https://callback.example.com/hook".into());
    new_job.decode_options.language = Some("en".into());

    let created = store.create(new_job.clone()).await.unwrap();
    let fetched = store.get(created.id).await.unwrap().expect("job exists");

    assert_eq!(fetched.status, JobStatus::Queued);
    assert_eq!(fetched.engine_name, new_job.engine_name);
    assert_eq!(fetched.task_type, new_job.task_type);
    assert_eq!(fetched.priority, new_job.priority);
    assert_eq!(fetched.source, new_job.source);
    assert_eq!(fetched.file_url, new_job.file_url);
    assert_eq!(fetched.file_name, new_job.file_name);
    assert_eq!(fetched.file_size_bytes, new_job.file_size_bytes);
    assert_eq!(fetched.file_duration, new_job.file_duration);
    assert_eq!(fetched.platform, new_job.platform);
    assert_eq!(fetched.callback_url, new_job.callback_url);
    assert_eq!(fetched.decode_options, new_job.decode_options);
    assert!(fetched.result.is_none());
    assert!(fetched.error_message.is_none());
}

#[tokio::test]
async fn given_jobs_of_mixed_priority_when_claiming_then_high_normal_low_order() {
    let (_dir, store) = sqlite_store().await;

    let low = store
        .create(with_priority(
            sample_job("mock", MediaSource::RemoteUrl("https://e.com/1".into())),
            JobPriority::Low,
        ))
        .await
        .unwrap();
    let normal = store
        .create(with_priority(
            sample_job("mock", MediaSource::RemoteUrl("https://e.com/2".into())),
            JobPriority::Normal,
        ))
        .await
        .unwrap();
    let high = store
        .create(with_priority(
            sample_job("mock", MediaSource::RemoteUrl("https://e.com/3".into())),
            JobPriority::High,
        ))
        .await
        .unwrap();

    let first = store.claim_next("mock").await.unwrap().unwrap();
    let second = store.claim_next("mock").await.unwrap().unwrap();
    let third = store.claim_next("mock").await.unwrap().unwrap();

    assert_eq!(first.id, high.id);
    assert_eq!(second.id, normal.id);
    assert_eq!(third.id, low.id);
    assert!(store.claim_next("mock").await.unwrap().is_none());
}

#[tokio::test]
async fn given_same_priority_when_claiming_then_fifo_with_id_tiebreak() {
    let (_dir, store) = sqlite_store().await;

    let first = store
        .create(sample_job("mock", MediaSource::RemoteUrl("https://e.com/1".into())))
        .await
        .unwrap();
    let second = store
        .create(sample_job("mock", MediaSource::RemoteUrl("https://e.com/2".into())))
        .await
        .unwrap();

    assert!(first.id < second.id);
    assert_eq!(store.claim_next("mock").await.unwrap().unwrap().id, first.id);
    assert_eq!(store.claim_next("mock").await.unwrap().unwrap().id, second.id);
}

#[tokio::test]
async fn given_claim_then_status_is_processing_and_other_engines_see_nothing() {
    let (_dir, store) = sqlite_store().await;

    store
        .create(sample_job("mock", MediaSource::RemoteUrl("https://e.com/1".into())))
        .await
        .unwrap();

    assert!(store.claim_next("other_engine").await.unwrap().is_none());

    let claimed = store.claim_next("mock").await.unwrap().unwrap();
    assert_eq!(claimed.status, JobStatus::Processing);

    assert!(store.claim_next("mock").await.unwrap().is_none());
}

#[tokio::test]
async fn given_completed_job_then_result_set_and_error_absent() {
    let (_dir, store) = sqlite_store().await;

    let created = store
        .create(sample_job("mock", MediaSource::RemoteUrl("https://e.com/1".into())))
        .await
        .unwrap();
    store.claim_next("mock").await.unwrap().unwrap();

    store
        .mark_completed(created.id, &sample_result(), Some("en"), 3.25)
        .await
        .unwrap();

    let job = store.get(created.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.language.as_deref(), Some("en"));
    assert_eq!(job.task_processing_time, Some(3.25));
    assert_eq!(job.result.unwrap().text, "hello world");
    assert!(job.error_message.is_none());
}

#[tokio::test]
async fn given_failed_job_then_error_set_and_result_absent() {
    let (_dir, store) = sqlite_store().await;

    let created = store
        .create(sample_job("mock", MediaSource::RemoteUrl("https://e.com/1".into())))
        .await
        .unwrap();
    store.claim_next("mock").await.unwrap().unwrap();

    store
        .mark_failed(created.id, "decoder exploded", Some(1.5))
        .await
        .unwrap();

    let job = store.get(created.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some("decoder exploded"));
    assert!(job.result.is_none());
}

#[tokio::test]
async fn given_queued_job_when_marking_completed_then_illegal_transition() {
    let (_dir, store) = sqlite_store().await;

    let created = store
        .create(sample_job("mock", MediaSource::RemoteUrl("https://e.com/1".into())))
        .await
        .unwrap();

    let err = store
        .mark_completed(created.id, &sample_result(), None, 1.0)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::IllegalTransition { .. }));

    let job = store.get(created.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Queued);
}

#[tokio::test]
async fn given_completed_job_when_patching_status_back_then_rejected() {
    let (_dir, store) = sqlite_store().await;

    let created = store
        .create(sample_job("mock", MediaSource::RemoteUrl("https://e.com/1".into())))
        .await
        .unwrap();
    store.claim_next("mock").await.unwrap().unwrap();
    store
        .mark_completed(created.id, &sample_result(), None, 1.0)
        .await
        .unwrap();

    let err = store
        .update(
            created.id,
            JobPatch {
                status: Some(JobStatus::Processing),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::IllegalTransition { .. }));
}

#[tokio::test]
async fn given_metadata_patch_then_only_those_fields_change() {
    let (_dir, store) = sqlite_store().await;

    let mut new_job = sample_job("mock", MediaSource::RemoteUrl("https://e.com/1".into()));
    new_job.file_name = None;
    new_job.file_size_bytes = None;
    new_job.file_duration = None;
    let created = store.create(new_job).await.unwrap();

    let updated = store
        .update(
            created.id,
            JobPatch {
                file_name: Some("probed.mp4".into()),
                file_size_bytes: Some(5_273_783),
                file_duration: Some(39.61),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.status, JobStatus::Queued);
    assert_eq!(updated.file_name.as_deref(), Some("probed.mp4"));
    assert_eq!(updated.file_size_bytes, Some(5_273_783));
    assert_eq!(updated.file_duration, Some(39.61));
}

#[tokio::test]
async fn given_repeated_delete_then_second_reports_not_found() {
    let (_dir, store) = sqlite_store().await;

    let created = store
        .create(sample_job("mock", MediaSource::RemoteUrl("https://e.com/1".into())))
        .await
        .unwrap();

    assert!(store.delete(created.id).await.unwrap());
    assert!(!store.delete(created.id).await.unwrap());
    assert!(store.get(created.id).await.unwrap().is_none());
}

#[tokio::test]
async fn given_query_filters_then_only_matching_rows_return() {
    let (_dir, store) = sqlite_store().await;

    let queued = store
        .create(sample_job("mock", MediaSource::RemoteUrl("https://e.com/1".into())))
        .await
        .unwrap();
    let done = store
        .create(sample_job("mock", MediaSource::RemoteUrl("https://e.com/2".into())))
        .await
        .unwrap();
    // FIFO claims: first claim takes `queued`, second takes `done`.
    store.claim_next("mock").await.unwrap().unwrap();
    store.claim_next("mock").await.unwrap().unwrap();
    store
        .mark_failed(queued.id, "boom", None)
        .await
        .unwrap();
    store
        .mark_completed(done.id, &sample_result(), Some("zh"), 2.0)
        .await
        .unwrap();

    let completed = store
        .query(&JobQuery {
            status: Some(JobStatus::Completed),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].id, done.id);

    let chinese = store
        .query(&JobQuery {
            language: Some("zh".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(chinese.len(), 1);

    let nothing = store
        .query(&JobQuery {
            engine_name: Some("faster_whisper".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(nothing.is_empty());
}

#[tokio::test]
async fn given_pagination_then_ordering_is_stable_newest_first() {
    let (_dir, store) = sqlite_store().await;

    let mut ids = Vec::new();
    for i in 0..5 {
        let job = store
            .create(sample_job(
                "mock",
                MediaSource::RemoteUrl(format!("https://e.com/{}", i)),
            ))
            .await
            .unwrap();
        ids.push(job.id);
    }

    let page_one = store
        .query(&JobQuery {
            limit: 2,
            offset: 0,
            ..Default::default()
        })
        .await
        .unwrap();
    let page_two = store
        .query(&JobQuery {
            limit: 2,
            offset: 2,
            ..Default::default()
        })
        .await
        .unwrap();

    let seen: Vec<_> = page_one.iter().chain(page_two.iter()).map(|j| j.id).collect();
    let mut expected = ids.clone();
    expected.reverse();
    assert_eq!(seen, expected[..4].to_vec());
}

#[tokio::test]
async fn given_stale_processing_row_when_requeueing_orphans_then_moves_exactly_once() {
    let (_dir, store) = sqlite_store().await;

    let created = store
        .create(sample_job("mock", MediaSource::RemoteUrl("https://e.com/1".into())))
        .await
        .unwrap();
    store.claim_next("mock").await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let fresh_threshold = store
        .requeue_orphans(chrono::Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(fresh_threshold, 0);

    let moved = store
        .requeue_orphans(chrono::Duration::zero())
        .await
        .unwrap();
    assert_eq!(moved, 1);
    assert_eq!(
        store.get(created.id).await.unwrap().unwrap().status,
        JobStatus::Queued
    );

    let again = store
        .requeue_orphans(chrono::Duration::zero())
        .await
        .unwrap();
    assert_eq!(again, 0);
}

#[tokio::test]
async fn given_recorded_success_when_recording_again_then_outcome_is_write_once() {
    let (_dir, store) = sqlite_store().await;

    let created = store
        .create(with_callback(
            sample_job("mock", MediaSource::RemoteUrl("https://e.com/1".into())),
            "https://callback.example.com/hook",
        ))
        .await
        .unwrap();
    store.claim_next("mock").await.unwrap().unwrap();
    store
        .mark_completed(created.id, &sample_result(), None, 1.0)
        .await
        .unwrap();

    // A failed outcome may be overwritten by a later success.
    store
        .record_callback(created.id, 503, "failed with status 503", Utc::now())
        .await
        .unwrap();
    store
        .record_callback(created.id, 200, "delivered", Utc::now())
        .await
        .unwrap();
    // But a success is final.
    store
        .record_callback(created.id, 500, "late duplicate", Utc::now())
        .await
        .unwrap();

    let job = store.get(created.id).await.unwrap().unwrap();
    assert_eq!(job.callback_status_code, Some(200));
    assert_eq!(job.callback_message.as_deref(), Some("delivered"));
    assert!(job.callback_time.is_some());
}

#[tokio::test]
async fn given_terminal_jobs_with_unrecorded_callbacks_then_pending_callbacks_finds_them() {
    let (_dir, store) = sqlite_store().await;

    let with_cb = store
        .create(with_callback(
            sample_job("mock", MediaSource::RemoteUrl("https://e.com/1".into())),
            "https://callback.example.com/hook",
        ))
        .await
        .unwrap();
    let without_cb = store
        .create(sample_job("mock", MediaSource::RemoteUrl("https://e.com/2".into())))
        .await
        .unwrap();
    store.claim_next("mock").await.unwrap().unwrap();
    store.claim_next("mock").await.unwrap().unwrap();
    store
        .mark_completed(with_cb.id, &sample_result(), None, 1.0)
        .await
        .unwrap();
    store
        .mark_failed(without_cb.id, "boom", None)
        .await
        .unwrap();

    let pending = store.pending_callbacks().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, with_cb.id);

    store
        .record_callback(with_cb.id, 200, "delivered", Utc::now())
        .await
        .unwrap();
    assert!(store.pending_callbacks().await.unwrap().is_empty());
}

#[tokio::test]
async fn given_local_and_remote_sources_then_active_paths_lists_only_live_local_files() {
    let (_dir, store) = sqlite_store().await;

    let local = store
        .create(sample_job(
            "mock",
            MediaSource::LocalPath("/staging/a.wav".into()),
        ))
        .await
        .unwrap();
    store
        .create(sample_job(
            "mock",
            MediaSource::RemoteUrl("https://e.com/b.mp4".into()),
        ))
        .await
        .unwrap();
    let done = store
        .create(sample_job(
            "mock",
            MediaSource::LocalPath("/staging/c.wav".into()),
        ))
        .await
        .unwrap();
    // First claim takes the local job into processing; the third job
    // fails straight from queued (async staging failure path).
    store.claim_next("mock").await.unwrap().unwrap();
    store.mark_failed(done.id, "gone", None).await.unwrap();

    let mut paths = store.active_local_paths().await.unwrap();
    paths.sort();
    assert_eq!(paths, vec!["/staging/a.wav".to_string()]);
    assert_eq!(
        store.get(local.id).await.unwrap().unwrap().source.kind(),
        "local_path"
    );
}
