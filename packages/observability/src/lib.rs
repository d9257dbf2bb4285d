//! # Observability
//!
//! Logging setup shared by the relay binaries.
//!
//! Services call [`init_with_config`] once at startup and use the standard
//! `tracing` macros everywhere else. Two sinks are available:
//!
//! - a compact, human-readable stderr stream
//! - an append-only JSONL file, one [`LogRecord`] per line
//!
//! `RUST_LOG` overrides the configured default level for both.
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "relayd".into(),
//!     default_level: "debug".into(),
//!     log_path: Some("/var/log/relayd.jsonl".into()),
//!     ..Default::default()
//! })?;
//! ```

mod file;
mod json_layer;

pub use file::LogFileWriter;
pub use json_layer::{JsonLayer, LogRecord};

use std::io;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer};

/// Errors from installing the global subscriber.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("failed to open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("a global subscriber is already installed: {0}")]
    AlreadyInitialized(#[from] TryInitError),
}

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, written into every JSONL record.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// JSONL log file. No file sink when unset.
    pub log_path: Option<PathBuf>,

    /// Emit logs to stderr. Forced on when there is no file sink.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: true,
        }
    }
}

/// Initialize logging to stderr at `info`.
pub fn init(service_name: &str) -> Result<(), InitError> {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    })
}

/// Initialize logging with custom configuration.
///
/// Fails if the log file cannot be opened or if a global subscriber was
/// already installed.
pub fn init_with_config(config: LogConfig) -> Result<(), InitError> {
    let json_layer = match &config.log_path {
        Some(path) => {
            let writer = LogFileWriter::open(path).map_err(|source| InitError::LogFile {
                path: path.clone(),
                source,
            })?;
            Some(
                JsonLayer::new(config.service_name.clone(), writer)
                    .with_filter(env_filter(&config.default_level)),
            )
        }
        None => None,
    };

    let stderr_layer = (config.also_stderr || config.log_path.is_none()).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(io::stderr)
            .with_filter(env_filter(&config.default_level))
    });

    tracing_subscriber::registry()
        .with(json_layer)
        .with(stderr_layer)
        .try_init()?;

    if let Some(path) = &config.log_path {
        tracing::info!(log_path = %path.display(), "observability initialized");
    }
    Ok(())
}

/// `RUST_LOG` when set and valid, otherwise `default_level`.
fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}
