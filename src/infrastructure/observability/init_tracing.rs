use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use super::TracingConfig;

/// Initialize the tracing subscriber with structured logging.
///
/// Returns the appender guard when file logging is enabled; dropping it
/// stops the background writer, so the caller must keep it alive.
pub fn init_tracing(config: TracingConfig, port: u16) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,narvik=debug,tower_http=debug"));

    let (writer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = rolling::daily(dir, "narvik.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    if config.json_format {
        let file_layer = writer.map(|w| fmt::layer().with_writer(w).with_ansi(false).json());
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .with(file_layer)
            .init();
    } else {
        let file_layer = writer.map(|w| fmt::layer().with_writer(w).with_ansi(false));
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .with(file_layer)
            .init();
    }

    tracing::info!(
        port = port,
        environment = %config.environment,
        json_format = config.json_format,
        "Server initialized"
    );
    guard
}
