//! Error types for hearsay core.

use thiserror::Error;

/// Core errors raised while building or decoding core values.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("invalid connection window: {0}")]
    InvalidWindow(String),

    #[error("invalid enum value {value} for {kind}")]
    InvalidEnum { kind: &'static str, value: u8 },
}

/// Reasons an incoming connection number is refused by a replay window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("connection number {number} is below the window (lower bound {lower})")]
    TooOld { number: u64, lower: u64 },

    #[error("connection number {0} was already used")]
    Duplicate(u64),
}
