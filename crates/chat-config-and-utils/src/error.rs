//! Errors raised while resolving paths and loading configuration.

use thiserror::Error;

/// Setup error for the chat sync tools.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A config value is present but unusable (e.g. an unsupported store scheme)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Reading or writing the config file or log directory failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// `store_url` does not parse
    #[error("Invalid store URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The config file is not valid JSON for [`crate::Config`]
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The home directory could not be determined
    #[error("Path error: {0}")]
    Path(String),
}

/// Result type alias using CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
