//! # Logging Utilities
//!
//! Logging for ntodbg using `tracing`.
//!
//! - Console output in pretty or JSON form, on stderr so command output on
//!   stdout stays clean
//! - Optional non-blocking file output
//! - `RUST_LOG` filtering down to individual crates and modules
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ntodbg_utils::init_logging;
//!
//! // Keep the guard alive until exit so buffered file output is flushed
//! let _guard = init_logging().expect("Failed to initialize logging");
//!
//! tracing::info!(pid = 1234, "attached");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: filter (e.g. `debug`, `ntodbg_protocol=trace`)
//! - `NTODBG_LOG_FORMAT`: `json` or `pretty` (default `pretty`)
//! - `NTODBG_LOG_FILE`: also write logs to this file
//!
//! ## File-only logging
//!
//! While inferior console text is streamed to the terminal, log lines must not
//! interleave with it. [`init_logging_to_file`] sends everything to a file.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, io};

use chrono::Utc;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Environment variable selecting the console format.
pub const LOG_FORMAT_ENV: &str = "NTODBG_LOG_FORMAT";
/// Environment variable naming an extra log file.
pub const LOG_FILE_ENV: &str = "NTODBG_LOG_FILE";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat
{
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "dev" | "development" => Ok(LogFormat::Pretty),
            "json" | "prod" | "production" => Ok(LogFormat::Json),
            _ => Err(format!("Unknown log format: {s}. Use 'pretty' or 'json'")),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    Error,
    Warn,
    /// Default
    Info,
    Debug,
    /// Every frame on the wire
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" | "err" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" | "dbg" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(format!(
                "Unknown log level: {s}. Use 'error', 'warn', 'info', 'debug', or 'trace'"
            )),
        }
    }
}

/// Keeps the background file writer alive.
///
/// Dropping it flushes and stops file logging; console logging is unaffected.
#[derive(Debug, Default)]
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard
{
    _file: Option<WorkerGuard>,
}

/// Initialize logging from the environment
///
/// Reads `RUST_LOG`, `NTODBG_LOG_FORMAT` and `NTODBG_LOG_FILE`.
///
/// ## Errors
///
/// Returns an error if:
/// - Logging is already initialized
/// - `NTODBG_LOG_FORMAT` is not a known format
pub fn init_logging() -> Result<LoggingGuard, LoggingError>
{
    let format = match env::var(LOG_FORMAT_ENV) {
        Ok(value) => LogFormat::from_str(&value).map_err(LoggingError::InvalidFormat)?,
        Err(_) => LogFormat::Pretty,
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));
    init_with_filter(format, filter)
}

/// Initialize logging with an explicit level and format
///
/// The level wins over `RUST_LOG`; `NTODBG_LOG_FILE` is still honoured.
///
/// ## Example
///
/// ```rust,no_run
/// use ntodbg_utils::{LogFormat, LogLevel, init_logging_with_level};
///
/// let _guard = init_logging_with_level(LogLevel::Debug, LogFormat::Json)
///     .expect("Failed to initialize logging");
/// ```
///
/// ## Errors
///
/// Returns an error if logging is already initialized.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<LoggingGuard, LoggingError>
{
    init_with_filter(format, EnvFilter::new(Level::from(level).to_string()))
}

/// Initialize file-only logging
///
/// With no path, logs go to `<temp dir>/YYYY-MM-DD-ntodbg.log`. Returns the
/// path actually used with the guard.
///
/// ## Errors
///
/// Returns an error if logging is already initialized or the directory cannot be created.
pub fn init_logging_to_file(path: Option<PathBuf>, level: Option<LogLevel>) -> Result<(PathBuf, LoggingGuard), LoggingError>
{
    let path = path.unwrap_or_else(default_log_file);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let filter = match level {
        Some(level) => EnvFilter::new(Level::from(level).to_string()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string())),
    };
    let (layer, guard) = file_layer(&path, LogFormat::Pretty, filter);
    Registry::default()
        .with(vec![layer])
        .try_init()
        .map_err(|e| LoggingError::InitializationFailed(e.to_string()))?;
    Ok((path, LoggingGuard { _file: Some(guard) }))
}

/// Dated log file name in the system temp directory.
#[must_use]
pub fn default_log_file() -> PathBuf
{
    let today = Utc::now().format("%Y-%m-%d");
    env::temp_dir().join(format!("{today}-ntodbg.log"))
}

fn init_with_filter(format: LogFormat, filter: EnvFilter) -> Result<LoggingGuard, LoggingError>
{
    let mut layers = vec![console_layer(format, filter.clone())];
    let mut file_guard = None;
    if let Some(path) = env::var_os(LOG_FILE_ENV).map(PathBuf::from) {
        let (layer, guard) = file_layer(&path, format, filter);
        layers.push(layer);
        file_guard = Some(guard);
    }
    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| LoggingError::InitializationFailed(e.to_string()))?;
    Ok(LoggingGuard { _file: file_guard })
}

fn console_layer(format: LogFormat, filter: EnvFilter) -> BoxedLayer
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(true)
            .with_writer(io::stderr)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(io::stderr)
            .with_filter(filter)
            .boxed(),
    }
}

fn file_layer(path: &Path, format: LogFormat, filter: EnvFilter) -> (BoxedLayer, WorkerGuard)
{
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let name = path.file_name().unwrap_or_default();
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
    let layer = match format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(false)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(filter)
            .boxed(),
    };
    (layer, guard)
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    #[error("Invalid log format: {0}")]
    InvalidFormat(String),

    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    /// A global subscriber is already installed.
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}
