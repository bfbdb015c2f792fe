//! Store errors.

use thiserror::Error;

/// Failure of a store call. Any failure aborts the enclosing transaction.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite reported an error.
    #[error("sqlite: {0}")]
    Database(#[from] rusqlite::Error),

    /// A stored value could not be decoded into a core type.
    #[error("stored value rejected: {0}")]
    Core(#[from] hearsay_core::CoreError),

    /// CBOR encoding or decoding of a stored column failed.
    #[error("cbor column: {0}")]
    Serialization(String),

    /// A row violates an invariant the store relies on.
    #[error("corrupt row: {0}")]
    InvalidData(String),

    /// The schema could not be brought up to date.
    #[error("schema upgrade: {0}")]
    Migration(String),

    /// A thread panicked while holding the store lock.
    #[error("store lock poisoned: {0}")]
    Poisoned(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
