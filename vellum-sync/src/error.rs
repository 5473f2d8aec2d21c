//! Error types for the sync engine.

use thiserror::Error;
use vellum_storage::StorageError;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network error (transient; the run may be retried).
    #[error("network error: {0}")]
    Network(String),

    /// Authentication error.
    #[error("authentication error: {0}")]
    Auth(String),

    /// The service asked the client to back off.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// The service and the client disagree about sync state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Local storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Durability journal error.
    #[error("journal error: {0}")]
    Journal(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The run was cancelled through its cancellation token.
    #[error("operation cancelled")]
    Cancelled,
}
