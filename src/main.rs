use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{info, warn};

use narvik::application::ports::Staging;
use narvik::application::services::{
    CallbackConfig, CallbackDispatcher, IntakeService, ModelPool, PoolConfig, ProcessorConfig,
    TaskProcessor,
};
use narvik::infrastructure::crawlers::build_resolvers;
use narvik::infrastructure::engines::SpeechEngineFactory;
use narvik::infrastructure::media::{check_ffmpeg_binary, FfmpegMediaProcessor};
use narvik::infrastructure::observability::{init_tracing, TracingConfig};
use narvik::infrastructure::persistence::JobStoreFactory;
use narvik::infrastructure::staging::{LocalStagingArea, PlatformHttp, StagingConfig};
use narvik::presentation::config::Settings;
use narvik::presentation::{create_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Arc::new(Settings::from_env()?);
    let _log_guard = init_tracing(TracingConfig::default(), settings.server.port);

    if let Err(e) = check_ffmpeg_binary() {
        warn!(error = %e, "ffmpeg not available; probing and extraction will fail");
    }

    let store = JobStoreFactory::create(&settings.database).await?;

    let mut platform_http = HashMap::new();
    platform_http.insert(
        "douyin".to_string(),
        PlatformHttp {
            proxy: settings.crawler.douyin_proxy.clone(),
            cookie: settings.crawler.douyin_cookie.clone(),
            referer: Some("https://www.douyin.com/".to_string()),
        },
    );
    platform_http.insert(
        "tiktok".to_string(),
        PlatformHttp {
            proxy: settings.crawler.tiktok_proxy.clone(),
            cookie: None,
            referer: None,
        },
    );
    let staging = Arc::new(LocalStagingArea::new(StagingConfig {
        dir: PathBuf::from(&settings.staging.dir),
        max_file_size: settings.staging.max_file_size,
        allowed_extensions: settings.staging.allowed_extensions.clone(),
        max_concurrent_downloads: settings.staging.max_concurrent_downloads,
        download_retries: settings.staging.download_retries,
        retry_base_delay: Duration::from_millis(500),
        reconcile_grace: Duration::from_secs(settings.staging.reconcile_grace_seconds),
        platform_http,
    })?);

    let active_paths = store.active_local_paths().await?;
    staging.reconcile(&active_paths).await?;

    let engine = SpeechEngineFactory::create(&settings.engine)?;
    let pool = ModelPool::new(
        engine,
        PoolConfig {
            min_size: settings.pool.min_size,
            max_size: settings.pool.max_size,
            max_instances_per_gpu: settings.pool.max_instances_per_gpu,
            init_with_max_pool_size: settings.pool.init_with_max_pool_size,
        },
    )?;
    pool.initialize().await?;

    let media = Arc::new(FfmpegMediaProcessor);
    let resolvers = build_resolvers(&settings.crawler)?;
    let wakeup = Arc::new(Notify::new());
    let (callback_tx, callback_rx) = mpsc::channel(settings.callback.queue_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let intake = Arc::new(IntakeService::new(
        Arc::clone(&store),
        staging.clone(),
        media.clone(),
        resolvers,
        pool.engine_name().to_string(),
        Arc::clone(&wakeup),
    ));

    let processor = TaskProcessor::new(
        Arc::clone(&store),
        Arc::clone(&pool),
        staging.clone(),
        media.clone(),
        callback_tx.clone(),
        Arc::clone(&wakeup),
        shutdown_rx,
        ProcessorConfig {
            engine_name: pool.engine_name().to_string(),
            max_concurrent_tasks: settings.processor.max_concurrent_tasks,
            status_check_interval: Duration::from_secs(
                settings.processor.status_check_interval_seconds,
            ),
            job_deadline: settings
                .processor
                .job_deadline_seconds
                .map(Duration::from_secs),
            recovery_threshold: chrono::Duration::seconds(
                settings.processor.recovery_threshold_seconds,
            ),
            staged_file_ttl: Duration::from_secs(settings.processor.staged_file_ttl_seconds),
        },
    );
    let slot_handles = processor.start().await?;

    let dispatcher = CallbackDispatcher::new(
        Arc::clone(&store),
        CallbackConfig {
            max_attempts: settings.callback.max_attempts,
            base_delay: Duration::from_secs(settings.callback.base_delay_seconds),
            backoff_factor: settings.callback.backoff_factor,
            max_delay: Duration::from_secs(settings.callback.max_delay_seconds),
            request_timeout: Duration::from_secs(settings.callback.request_timeout_seconds),
            max_in_flight: settings.callback.max_in_flight,
            per_host_limit: settings.callback.per_host_limit,
        },
    );
    let dispatcher_handle = tokio::spawn(dispatcher.run(callback_rx));

    let state = AppState {
        store,
        staging: staging.clone(),
        media: media.clone(),
        intake,
        pool: Arc::clone(&pool),
        settings: Arc::clone(&settings),
    };
    let router = create_router(state);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    info!(addr = %addr, "Listening");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Draining task pipelines");
    let _ = shutdown_tx.send(true);
    wakeup.notify_waiters();

    let grace = Duration::from_secs(settings.processor.shutdown_grace_seconds);
    let drain = async {
        for handle in slot_handles {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(grace, drain).await.is_err() {
        warn!(
            grace_seconds = settings.processor.shutdown_grace_seconds,
            "Pipelines did not drain in time; in-flight jobs recover as orphans at next start"
        );
    }

    drop(callback_tx);
    let _ = tokio::time::timeout(Duration::from_secs(5), dispatcher_handle).await;
    pool.shutdown();
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
