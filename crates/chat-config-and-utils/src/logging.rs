//! Logging initialization for the chat sync tools.
//!
//! Everything goes through the observability crate, which writes JSONL to
//! `~/.chat-sync/logs/dev.jsonl` unless a log path is given.

use std::path::PathBuf;

use observability::LogConfig;

const DEFAULT_SERVICE_NAME: &str = "chat-sync";

/// Initialize logging under the default service name.
///
/// ```ignore
/// init_logging("info", None);
/// tracing::info!("sync started");
/// ```
pub fn init_logging(level: &str, log_path: Option<PathBuf>) {
    init_logging_for_service(DEFAULT_SERVICE_NAME, level, log_path);
}

/// Initialize logging with a custom service name.
///
/// Stderr mirroring is on unless `CHAT_SYNC_LOG_STDERR` is `0` or `false`.
pub fn init_logging_for_service(service_name: &str, level: &str, log_path: Option<PathBuf>) {
    observability::init_with_config(LogConfig {
        service_name: service_name.into(),
        default_level: parse_level(level).to_string().to_lowercase(),
        log_path,
        also_stderr: stderr_enabled(std::env::var("CHAT_SYNC_LOG_STDERR").ok()),
    });
}

fn stderr_enabled(raw: Option<String>) -> bool {
    match raw.as_deref().map(str::trim) {
        Some("0") | Some("false") | Some("off") => false,
        _ => true,
    }
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
