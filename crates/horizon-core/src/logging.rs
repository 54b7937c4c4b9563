//! Logging configuration using tracing

use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{Result, ResultExt};

const LOG_FILE_NAME: &str = "horizon.log";
const LOG_ENV_VAR: &str = "HORIZON_LOG";
const DEFAULT_FILTER: &str = "constella_horizon=info,horizon_stream=info,horizon_app=info,warn";

/// Initialize the logging subsystem
///
/// Logs are written to `~/.local/share/constella-horizon/logs/` (or the
/// platform equivalent). Log level is controlled by the `HORIZON_LOG`
/// environment variable.
///
/// The host application calls this once from its composition root; the
/// connection managers only emit `tracing` events.
///
/// # Examples
/// ```bash
/// HORIZON_LOG=debug ./horizon
/// HORIZON_LOG=horizon_stream=trace ./horizon
/// ```
pub fn init() -> Result<()> {
    let log_dir = get_log_directory();
    std::fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_NAME);

    let env_filter =
        EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .init();

    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("Horizon streaming services starting");
    tracing::info!("Log directory: {}", log_dir.display());
    tracing::info!("═══════════════════════════════════════════════════════");

    Ok(())
}

/// Get the log directory path
fn get_log_directory() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("constella-horizon").join("logs")
}

/// Get the log file path for the current day
pub fn get_current_log_file() -> PathBuf {
    get_log_directory().join(LOG_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_lives_under_product_directory() {
        let path = get_current_log_file();
        assert!(path.ends_with("constella-horizon/logs/horizon.log"));
    }
}
