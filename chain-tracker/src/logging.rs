//! Logging configuration for the chain tracker.
//!
//! Console output goes to stderr; file output goes through a daily rolling
//! appender that keeps a bounded number of files.

use std::fs;
use std::path::PathBuf;

use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{LoggingError, LoggingResult};

/// Prefix of every log file name.
const LOG_FILE_PREFIX: &str = "chain-tracker";
/// Suffix of every log file name.
const LOG_FILE_SUFFIX: &str = "log";

/// Guard that must be kept alive to ensure log flushing on shutdown.
/// When this guard is dropped, all buffered log entries will be flushed.
#[derive(Debug)]
pub struct LoggingGuard {
    _worker_guard: Option<WorkerGuard>,
}

/// Configuration for logging output.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter. If None, `RUST_LOG` is used, then INFO.
    pub level: Option<LevelFilter>,
    /// Whether to output logs to console (stderr).
    pub console: bool,
    /// Optional file logging configuration.
    pub file: Option<LogFileConfig>,
}

/// Configuration for log file output.
#[derive(Debug, Clone)]
pub struct LogFileConfig {
    /// Directory where log files will be stored.
    pub log_dir: PathBuf,
    /// Maximum number of log files kept; older ones are deleted on rotation.
    pub max_files: usize,
}

/// Initialize console-only logging with the given level.
pub fn init_console_logging(level: LevelFilter) -> LoggingResult<LoggingGuard> {
    init_logging(LoggingConfig {
        level: Some(level),
        console: true,
        file: None,
    })
}

/// Initialize logging with the given configuration.
///
/// Returns a `LoggingGuard` that must be kept alive for the duration of the
/// application. If neither console nor file output is enabled, logging is
/// disabled and Ok is returned.
///
/// # Errors
///
/// Fails when the log directory or appender cannot be created, or when a
/// global subscriber is already installed.
pub fn init_logging(config: LoggingConfig) -> LoggingResult<LoggingGuard> {
    if !config.console && config.file.is_none() {
        return Ok(LoggingGuard {
            _worker_guard: None,
        });
    }

    let env_filter = match config.level {
        Some(level) => EnvFilter::new(level.to_string()),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(LevelFilter::INFO.to_string())),
    };

    let (file_layer, guard) = if let Some(ref file_config) = config.file {
        let (non_blocking, guard) = setup_file_logging(file_config)?;
        let layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_ansi(false)
            .with_writer(non_blocking);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    let console_layer = config
        .console
        .then(|| fmt::layer().with_target(true).with_thread_ids(false).with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| LoggingError::SubscriberInit(e.to_string()))?;

    Ok(LoggingGuard {
        _worker_guard: guard,
    })
}

fn build_appender(config: &LogFileConfig) -> LoggingResult<RollingFileAppender> {
    fs::create_dir_all(&config.log_dir)?;

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix(LOG_FILE_SUFFIX)
        .max_log_files(config.max_files.max(1))
        .build(&config.log_dir)
        .map_err(|e| LoggingError::Appender(e.to_string()))
}

fn setup_file_logging(config: &LogFileConfig) -> LoggingResult<(NonBlocking, WorkerGuard)> {
    let appender = build_appender(config)?;
    Ok(tracing_appender::non_blocking(appender))
}
