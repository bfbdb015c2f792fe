//! Error types for the sync module.

use hearsay_core::{ContactId, TransportId, WindowError};
use thiserror::Error;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The contact does not exist (or was removed mid-operation).
    #[error("no such contact: {0}")]
    NoSuchContact(ContactId),

    /// No transport secret for the (contact, transport, period).
    #[error("no secret for {contact} on {transport} in period {period}")]
    NoSuchSecret {
        contact: ContactId,
        transport: TransportId,
        period: u64,
    },

    /// The store could not complete the transaction.
    #[error("storage failure: {0}")]
    Storage(#[from] hearsay_store::StoreError),

    /// Writing a packet to the caller's sink failed.
    #[error("serialization failure: {0}")]
    Serialization(#[from] std::io::Error),

    /// Malformed or out-of-turn inbound packet.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// An incoming connection number was refused by the replay window.
    #[error("connection rejected: {0}")]
    ReplayRejected(#[from] WindowError),

    /// The write gate was closed for shutdown.
    #[error("closed")]
    Closed,
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
