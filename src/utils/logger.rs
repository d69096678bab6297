use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;

const DEBUG_ENV: &str = "MKDTEMP_BREAKER_DEBUG";
const LOG_FILE: &str = "mkdtemp-breaker.log";

/// Initialize logging based on MKDTEMP_BREAKER_DEBUG environment variable
pub fn init_logging() -> Option<WorkerGuard> {
    if std::env::var(DEBUG_ENV).is_ok() {
        let log_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mkdtemp-breaker");
        init_logging_in(&log_dir)
    } else {
        None
    }
}

/// Log to a daily rolling file in `log_dir`.
///
/// Returns `None` if the directory cannot be created. A subscriber that is
/// already installed by the host application is left in place.
pub fn init_logging_in(log_dir: &Path) -> Option<WorkerGuard> {
    if let Err(e) = std::fs::create_dir_all(log_dir) {
        tracing::warn!(
            "Failed to create log directory {}: {}",
            log_dir.display(),
            e
        );
        return None;
    }

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let installed = tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::DEBUG.into()),
        )
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("mkdtemp-breaker logging initialized");
    }
    Some(guard)
}
