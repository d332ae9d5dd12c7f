//! Configuration for the chat sync tools.

use crate::{CoreError, CoreResult, Paths};
use conversation_sync_core::{RetryPolicy, SyncConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Store backend used when nothing else is configured.
pub const DEFAULT_STORE_URL: &str = "memory://local";

/// URL scheme selecting the in-process store.
pub const MEMORY_STORE_SCHEME: &str = "memory";

/// Tool configuration, stored as JSON.
///
/// Missing fields take their defaults, so a config file only needs the
/// values it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Document store to connect to.
    pub store_url: String,
    /// Largest gap between an echo and its committed copy, in milliseconds.
    pub echo_match_window_ms: u64,
    /// Attempts for appending a message.
    pub send_max_attempts: u32,
    /// Attempts for updating a conversation summary.
    pub summary_max_attempts: u32,
    /// Attempts for re-establishing a live subscription.
    pub subscription_max_attempts: u32,
    /// First retry delay, in milliseconds.
    pub backoff_base_ms: u64,
    /// Upper bound on any retry delay, in milliseconds.
    pub backoff_max_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let sync = SyncConfig::default();
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            store_url: DEFAULT_STORE_URL.to_string(),
            echo_match_window_ms: sync.echo_match_window.as_millis() as u64,
            send_max_attempts: sync.send_retry.max_attempts,
            summary_max_attempts: sync.summary_retry.max_attempts,
            subscription_max_attempts: sync.subscription_retry.max_attempts,
            backoff_base_ms: sync.summary_retry.base.as_millis() as u64,
            backoff_max_ms: sync.summary_retry.max.as_millis() as u64,
        }
    }
}

impl Config {
    /// Defaults, then environment overrides.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Loads the config file if it exists, falling back to defaults, then
    /// applies environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the config file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// `CHAT_SYNC_LOG_LEVEL` and `CHAT_SYNC_STORE_URL` override the file.
    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("CHAT_SYNC_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(store_url) = std::env::var("CHAT_SYNC_STORE_URL") {
            self.store_url = store_url;
        }
    }

    /// The store URL, parsed.
    pub fn store_url(&self) -> CoreResult<Url> {
        Url::parse(&self.store_url).map_err(CoreError::from)
    }

    /// Fails unless the store URL selects a backend this build can open.
    pub fn require_memory_store(&self) -> CoreResult<Url> {
        let url = self.store_url()?;
        if url.scheme() != MEMORY_STORE_SCHEME {
            return Err(CoreError::Config(format!(
                "unsupported store scheme '{}', expected '{}'",
                url.scheme(),
                MEMORY_STORE_SCHEME
            )));
        }
        Ok(url)
    }

    /// Sync core tuning derived from this config.
    ///
    /// All retry policies share the configured base and cap; each keeps
    /// its own attempt budget.
    pub fn to_sync_config(&self) -> SyncConfig {
        let policy = |max_attempts| RetryPolicy {
            base: Duration::from_millis(self.backoff_base_ms),
            max: Duration::from_millis(self.backoff_max_ms.max(self.backoff_base_ms)),
            max_attempts,
        };
        SyncConfig {
            echo_match_window: Duration::from_millis(self.echo_match_window_ms),
            send_retry: policy(self.send_max_attempts),
            summary_retry: policy(self.summary_max_attempts),
            subscription_retry: policy(self.subscription_max_attempts),
        }
    }
}
