//! Log output for a build run.
//!
//! Everything goes to one persistent sink: the systemd journal when it is
//! reachable, otherwise a daily file under the log directory. Warnings and
//! errors are also echoed to stderr, since per-item failures (a corrupt
//! image, a failed transcode) never stop the build and would otherwise pass
//! unnoticed on the terminal.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Environment variable holding the log filter, e.g. `debug` or
/// `photoboxy::scanner=trace`.
pub const LOG_ENV: &str = "PHOTOBOXY_LOG";
const DEFAULT_FILTER: &str = "info";
const LOG_FILE_PREFIX: &str = "photoboxy.log";

/// Where the persistent log ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Journald,
    File(PathBuf),
}

/// `<data dir>/photoboxy/logs`, or `./photoboxy/logs` without a data dir.
pub fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("photoboxy")
        .join("logs")
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. Call once, before the build starts.
pub fn init(log_dir: Option<PathBuf>) -> Result<LogTarget> {
    #[cfg(target_os = "linux")]
    {
        if let Ok(journald) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(journald)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .without_time()
                        .with_target(false)
                        .with_filter(LevelFilter::WARN),
                )
                .init();
            tracing::debug!("Logging to the journal");
            return Ok(LogTarget::Journald);
        }
    }

    let log_dir = log_dir.unwrap_or_else(default_log_dir);
    std::fs::create_dir_all(&log_dir)?;

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX));
    // Dropping the guard stops the writer thread and loses buffered lines
    static GUARD: OnceLock<WorkerGuard> = OnceLock::new();
    let _ = GUARD.set(guard);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .without_time()
                .with_target(false)
                .with_filter(LevelFilter::WARN),
        )
        .init();
    tracing::debug!("Logging to {:?}", log_dir);
    Ok(LogTarget::File(log_dir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_dir() {
        let dir = default_log_dir();
        assert!(dir.ends_with("photoboxy/logs"));
    }
}
