//! # Hearsay Core
//!
//! Pure types for the hearsay sync core: identifiers, messages, ratings,
//! transport secrets and replay windows.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`MessageId`], [`BatchId`], [`GroupId`], [`AuthorId`] - Content-addressed identifiers
//! - [`ContactId`], [`TransportId`] - Local identifiers
//! - [`Message`] - An immutable stored message
//! - [`MessageStatus`] - Per-contact delivery state of a message
//! - [`TemporarySecret`] - Per-period transport secret with counter and window
//! - [`ConnectionWindow`] - Sliding bitmap of consumed incoming connection numbers

pub mod error;
pub mod message;
pub mod secret;
pub mod types;
pub mod window;

pub use error::{CoreError, WindowError};
pub use message::{is_sendable, Group, Message, MessageStatus, Rating, Status};
pub use secret::TemporarySecret;
pub use types::{AuthorId, BatchId, ContactId, GroupId, MessageId, TransportId};
pub use window::{ConnectionWindow, WindowCheck, CONNECTION_WINDOW_BYTES, CONNECTION_WINDOW_SIZE};

/// Transport property map advertised for a contact (property name → value).
pub type TransportProperties = std::collections::BTreeMap<String, String>;
