use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::AppConfig;

pub const LOG_FILE_PREFIX: &str = "taskchain.log";

/// Installs the JSON subscriber on stderr and, when a log directory is set,
/// a daily rolling file next to it. Keep the returned guard alive until exit
/// so buffered file lines are flushed.
pub fn init(config: &AppConfig) -> Result<Option<WorkerGuard>> {
    let _ = tracing_log::LogTracer::init();

    let filter = EnvFilter::try_new(&config.log_filter)
        .with_context(|| format!("parse log filter {:?}", config.log_filter))?;

    let stderr_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_writer(std::io::stderr);

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_target(true)
                .with_timer(fmt::time::UtcTime::rfc_3339())
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    tracing::debug!(
        target: "taskchain",
        event = "logging_initialized",
        filter = %config.log_filter,
        file_sink = config.log_dir.is_some()
    );
    Ok(guard)
}
