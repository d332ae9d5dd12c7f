//! Error types for document store operations.

use thiserror::Error;

/// Errors returned by a [`DocumentStore`](crate::DocumentStore).
///
/// Adapters map their transport failures onto these variants. Only
/// [`StoreError::Unavailable`] means the operation definitely did not apply
/// and may be retried as-is.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or dropped the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The referenced document does not exist.
    #[error("document not found: {0}")]
    NotFound(String),

    /// The caller is not allowed to perform the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The request was malformed (bad path, unsupported query).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Adapter-side failure that is not the caller's fault.
    #[error("internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Returns true if retrying the same call can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }

    /// Returns true if retrying an idempotent write (a merge upsert, a
    /// delete) can succeed. Only caller errors are final.
    pub fn is_retryable_when_idempotent(&self) -> bool {
        !matches!(
            self,
            StoreError::PermissionDenied(_) | StoreError::InvalidArgument(_)
        )
    }
}

/// Result type alias using StoreError.
pub type StoreResult<T> = Result<T, StoreError>;
