//! Error types for hearsay.

use hearsay_store::StoreError;
use hearsay_sync::SyncError;
use thiserror::Error;

/// Errors that can occur when running a hearsay node.
#[derive(Debug, Error)]
pub enum HearsayError {
    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// The configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// The node was closed.
    #[error("closed")]
    Closed,
}

/// Result type for hearsay operations.
pub type Result<T> = std::result::Result<T, HearsayError>;
