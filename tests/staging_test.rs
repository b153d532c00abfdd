mod helpers;

use std::io;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures::stream;
use tempfile::TempDir;

use narvik::application::ports::{Staging, StagingError};

use helpers::{staging_area, staging_area_with};

fn byte_stream(chunks: Vec<Vec<u8>>) -> futures::stream::BoxStream<'static, Result<Bytes, io::Error>> {
    Box::pin(stream::iter(
        chunks.into_iter().map(|c| Ok(Bytes::from(c))),
    ))
}

async fn staged_file_count(dir: &TempDir) -> usize {
    let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
    let mut count = 0;
    while let Some(entry) = entries.next_entry().await.unwrap() {
        if entry.metadata().await.unwrap().is_file() {
            count += 1;
        }
    }
    count
}

/// Serves a fixed payload for download tests and returns its base url.
async fn spawn_media_server(payload: Vec<u8>) -> String {
    let app = Router::new().route(
        "/media/clip.mp4",
        get(move || {
            let payload = payload.clone();
            async move { payload }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn given_upload_exactly_at_cap_then_accepted() {
    let dir = TempDir::new().unwrap();
    let staging = staging_area(&dir, 1024);

    let path = staging
        .stage_upload(byte_stream(vec![vec![0u8; 512], vec![0u8; 512]]), "clip.mp4")
        .await
        .unwrap();

    assert_eq!(tokio::fs::metadata(&path).await.unwrap().len(), 1024);
}

#[tokio::test]
async fn given_upload_one_byte_over_cap_then_rejected_and_nothing_persists() {
    let dir = TempDir::new().unwrap();
    let staging = staging_area(&dir, 1024);

    let err = staging
        .stage_upload(byte_stream(vec![vec![0u8; 512], vec![0u8; 513]]), "clip.mp4")
        .await
        .unwrap_err();

    assert!(matches!(err, StagingError::TooLarge { max_bytes: 1024 }));
    assert_eq!(staged_file_count(&dir).await, 0);
}

#[tokio::test]
async fn given_extension_outside_allow_list_then_rejected() {
    let dir = TempDir::new().unwrap();
    let staging = staging_area_with(
        &dir,
        1024,
        vec!["mp4".into(), "wav".into()],
        Duration::from_secs(3600),
    );

    let err = staging
        .stage_upload(byte_stream(vec![vec![1, 2, 3]]), "notes.txt")
        .await
        .unwrap_err();
    assert!(matches!(err, StagingError::ExtensionNotAllowed(_)));

    staging
        .stage_upload(byte_stream(vec![vec![1, 2, 3]]), "clip.MP4")
        .await
        .expect("allow-list comparison is case-insensitive");
}

#[tokio::test]
async fn given_same_declared_name_twice_then_paths_never_collide() {
    let dir = TempDir::new().unwrap();
    let staging = staging_area(&dir, 1024);

    let first = staging
        .stage_upload(byte_stream(vec![vec![1]]), "clip.mp4")
        .await
        .unwrap();
    let second = staging
        .stage_upload(byte_stream(vec![vec![2]]), "clip.mp4")
        .await
        .unwrap();

    assert_ne!(first, second);
    assert_eq!(staged_file_count(&dir).await, 2);
}

#[tokio::test]
async fn given_stream_error_mid_upload_then_partial_file_is_removed() {
    let dir = TempDir::new().unwrap();
    let staging = staging_area(&dir, 1024);

    let chunks: Vec<Result<Bytes, io::Error>> = vec![
        Ok(Bytes::from_static(b"partial")),
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "drop")),
    ];
    let err = staging
        .stage_upload(Box::pin(stream::iter(chunks)), "clip.mp4")
        .await
        .unwrap_err();

    assert!(matches!(err, StagingError::Io(_)));
    assert_eq!(staged_file_count(&dir).await, 0);
}

#[tokio::test]
async fn given_remote_url_then_bytes_are_downloaded_into_staging() {
    let dir = TempDir::new().unwrap();
    let staging = staging_area(&dir, 1024 * 1024);
    let base = spawn_media_server(vec![7u8; 4096]).await;

    let path = staging
        .stage_url(&format!("{}/media/clip.mp4", base), None)
        .await
        .unwrap();

    let bytes = tokio::fs::read(&path).await.unwrap();
    assert_eq!(bytes.len(), 4096);
    assert!(path.starts_with(dir.path()));
    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.ends_with("clip.mp4"));
}

#[tokio::test]
async fn given_remote_body_over_cap_then_download_rejected() {
    let dir = TempDir::new().unwrap();
    let staging = staging_area(&dir, 1024);
    let base = spawn_media_server(vec![7u8; 4096]).await;

    let err = staging
        .stage_url(&format!("{}/media/clip.mp4", base), None)
        .await
        .unwrap_err();

    assert!(matches!(err, StagingError::TooLarge { .. }));
    assert_eq!(staged_file_count(&dir).await, 0);
}

#[tokio::test]
async fn given_source_404_then_fails_without_retry_loop() {
    let dir = TempDir::new().unwrap();
    let staging = staging_area(&dir, 1024);
    let base = spawn_media_server(vec![]).await;

    let err = staging
        .stage_url(&format!("{}/missing.mp4", base), None)
        .await
        .unwrap_err();

    assert!(matches!(err, StagingError::SourceStatus(404)));
}

#[tokio::test]
async fn given_malformed_url_then_rejected_before_any_request() {
    let dir = TempDir::new().unwrap();
    let staging = staging_area(&dir, 1024);

    let err = staging.stage_url("not a url", None).await.unwrap_err();
    assert!(matches!(err, StagingError::BadUrl(_)));
}

#[tokio::test]
async fn given_scheduled_delete_then_file_disappears() {
    let dir = TempDir::new().unwrap();
    let staging = staging_area(&dir, 1024);

    let path = staging
        .stage_upload(byte_stream(vec![vec![1, 2, 3]]), "clip.mp4")
        .await
        .unwrap();
    staging.schedule_delete(path.clone(), Duration::ZERO);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while path.exists() {
        assert!(tokio::time::Instant::now() < deadline, "file never deleted");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn given_reconcile_then_orphans_reaped_and_active_files_kept() {
    let dir = TempDir::new().unwrap();
    // Zero grace so freshly written files already count as stale.
    let staging = staging_area_with(&dir, 1024, Vec::new(), Duration::ZERO);

    let orphan = staging
        .stage_upload(byte_stream(vec![vec![1]]), "orphan.mp4")
        .await
        .unwrap();
    let active = staging
        .stage_upload(byte_stream(vec![vec![2]]), "active.mp4")
        .await
        .unwrap();

    let removed = staging
        .reconcile(&[active.to_string_lossy().into_owned()])
        .await
        .unwrap();

    assert_eq!(removed, 1);
    assert!(!orphan.exists());
    assert!(active.exists());
}

#[tokio::test]
async fn given_fresh_files_within_grace_then_reconcile_keeps_them() {
    let dir = TempDir::new().unwrap();
    let staging = staging_area_with(&dir, 1024, Vec::new(), Duration::from_secs(3600));

    let fresh = staging
        .stage_upload(byte_stream(vec![vec![1]]), "fresh.mp4")
        .await
        .unwrap();

    let removed = staging.reconcile(&[]).await.unwrap();
    assert_eq!(removed, 0);
    assert!(fresh.exists());
}
