//! Tracing subscriber setup for front ends embedding sqlhop.
//!
//! Interactive sessions log to stderr only, so query output on stdout stays
//! clean. Otherwise logs go to a daily rolling file under [`log_dir`], with
//! warnings mirrored to stderr. When the file cannot be opened, logging
//! falls back to stderr.
//!
//! Filter priority: explicit filter > `SQLHOP_LOG` > `RUST_LOG` > build default.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

/// Environment variable holding a filter directive.
pub const LOG_ENV: &str = "SQLHOP_LOG";

/// Logging configuration.
pub struct LogConfig {
    /// Directory for log files
    pub log_dir: PathBuf,
    /// Whether stderr is attached to a terminal
    pub interactive: bool,
    /// Optional filter directive overriding the environment
    pub log_filter: Option<String>,
}

impl LogConfig {
    pub fn new(log_dir: PathBuf) -> Self {
        Self { log_dir, interactive: atty::is(atty::Stream::Stderr), log_filter: None }
    }

    /// Set a filter directive such as `sqlhop_core=trace`.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }
}

/// Flushes buffered file logs when dropped; hold it for the process lifetime.
pub struct LoggingGuard {
    _worker_guard: Option<WorkerGuard>,
}

/// Install the global subscriber.
///
/// Installing twice is harmless; the second call leaves the first
/// subscriber in place.
pub fn init_logging(config: LogConfig) -> LoggingGuard {
    if config.interactive {
        return init_stderr_logging(config.log_filter.as_deref());
    }

    match init_file_logging(&config) {
        Ok(guard) => LoggingGuard { _worker_guard: Some(guard) },
        Err(e) => {
            eprintln!("Warning: Failed to initialize file logging: {e}. Using stderr only.");
            init_stderr_logging(config.log_filter.as_deref())
        }
    }
}

/// Initialize with [`log_dir`] and no explicit filter.
pub fn init_logging_default() -> LoggingGuard {
    init_logging(LogConfig::new(log_dir()))
}

fn init_stderr_logging(filter: Option<&str>) -> LoggingGuard {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(build_env_filter(filter))
        .with_ansi(true)
        .with_target(false)
        .try_init();

    LoggingGuard { _worker_guard: None }
}

fn init_file_logging(config: &LogConfig) -> Result<WorkerGuard, Box<dyn std::error::Error + Send + Sync>> {
    std::fs::create_dir_all(&config.log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("sqlhop")
        .filename_suffix("log")
        .build(&config.log_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let stderr = std::io::stderr.with_max_level(tracing::Level::WARN);

    tracing_subscriber::fmt()
        .with_writer(stderr.and(non_blocking))
        .with_env_filter(build_env_filter(config.log_filter.as_deref()))
        .with_ansi(false)
        .with_target(true)
        .try_init()?;

    Ok(guard)
}

fn build_env_filter(custom_filter: Option<&str>) -> EnvFilter {
    if let Some(filter) = custom_filter {
        return EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(default_log_filter()));
    }

    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new(default_log_filter()))
}

/// Default filter for the build type.
pub fn default_log_filter() -> &'static str {
    #[cfg(debug_assertions)]
    {
        "info,sqlhop_core=debug,tokio_postgres=warn,russh=warn"
    }
    #[cfg(not(debug_assertions))]
    {
        "warn,sqlhop_core=info,tokio_postgres=error,russh=error"
    }
}

/// `<data_dir>/sqlhop/logs`, or a relative `logs` when no data dir exists.
pub fn log_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("sqlhop"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(default_log_filter()).is_ok());
    }

    #[test]
    fn test_log_dir_ends_with_logs() {
        assert!(log_dir().ends_with("logs"));
    }

    #[test]
    fn test_invalid_custom_filter_falls_back() {
        let filter = build_env_filter(Some("=[not a filter"));
        assert!(!filter.to_string().is_empty());
    }
}
