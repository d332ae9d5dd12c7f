//! # Observability
//!
//! Structured logging for the chat sync tools.
//!
//! Binaries call [`init`] or [`init_with_config`] once at startup and use the
//! regular `tracing` macros everywhere else. Library crates never install a
//! subscriber themselves.
//!
//! Every event is written as one JSON object per line to
//! `~/.chat-sync/logs/dev.jsonl` (or [`LogConfig::log_path`]), so the stream
//! can be followed with `tail -f ... | jq`. Writes are append-only with a
//! flush per line, so several processes can share the file.
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "chat-sync".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! });
//! tracing::info!(conversation_id = %cid, "chat opened");
//! ```

mod json_layer;
mod writer;

use std::io;
use std::path::PathBuf;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub use json_layer::{JsonLayer, LogEntry};
pub use writer::{CentralLogWriter, WriterFactory};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name written into every log line (e.g. "chat-sync").
    pub service_name: String,

    /// Filter used when `RUST_LOG` is unset (e.g. "debug", "info").
    pub default_level: String,

    /// Log file. Defaults to `~/.chat-sync/logs/dev.jsonl`.
    pub log_path: Option<PathBuf>,

    /// Mirror events to stderr in compact form.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Default JSONL location, when a home directory is known.
pub fn default_log_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".chat-sync").join("logs").join("dev.jsonl"))
}

/// Initialize logging with default settings.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize logging with custom configuration.
///
/// If the log file cannot be opened, events still go to stderr and the
/// failure is logged there. Calling this twice leaves the first subscriber
/// in place.
pub fn init_with_config(config: LogConfig) {
    let log_path = config.log_path.clone().or_else(default_log_path);
    let file_writer = match &log_path {
        Some(path) => CentralLogWriter::new(path).map_err(|e| (path.clone(), e)),
        None => Err((
            PathBuf::new(),
            io::Error::new(io::ErrorKind::NotFound, "no home directory"),
        )),
    };

    let (json_layer, open_error) = match file_writer {
        Ok(writer) => (
            Some(JsonLayer::new(
                config.service_name.clone(),
                WriterFactory::new(writer),
            )),
            None,
        ),
        Err(failure) => (None, Some(failure)),
    };

    // Without a file the stderr layer is the only output.
    let stderr_layer = if config.also_stderr || json_layer.is_none() {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_file(false)
                .with_line_number(false)
                .compact()
                .with_writer(io::stderr)
                .with_filter(env_filter(&config.default_level)),
        )
    } else {
        None
    };

    let installed = tracing_subscriber::registry()
        .with(json_layer.map(|l| l.with_filter(env_filter(&config.default_level))))
        .with(stderr_layer)
        .try_init()
        .is_ok();

    if !installed {
        return;
    }
    match open_error {
        None => tracing::info!(
            service = %config.service_name,
            log_path = ?log_path,
            "observability initialized"
        ),
        Some((path, error)) => tracing::warn!(
            service = %config.service_name,
            log_path = %path.display(),
            error = %error,
            "log file unavailable, logging to stderr only"
        ),
    }
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

pub use tracing::{debug, error, info, instrument, span, trace, warn, Level};
