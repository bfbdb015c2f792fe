//! Messages, groups, ratings and per-contact message status.
//!
//! A message is immutable once stored. Only its per-contact status changes.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::types::{AuthorId, ContactId, GroupId, MessageId};

/// A group (subscription topic) that contacts may share.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Group {
    /// Stable group identifier.
    pub id: GroupId,
    /// Human-readable name.
    pub name: String,
}

impl Group {
    /// Create a group, deriving its ID from the name and salt.
    pub fn new(name: impl Into<String>, salt: &[u8]) -> Self {
        let name = name.into();
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"hearsay-group-v0:");
        hasher.update(name.as_bytes());
        hasher.update(b":");
        hasher.update(salt);
        Self {
            id: GroupId(*hasher.finalize().as_bytes()),
            name,
        }
    }

    /// Create a group with a known ID.
    pub fn with_id(id: GroupId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// A stored message.
///
/// The raw bytes are the signed wire form and are opaque to the sync core.
/// The metadata fields are supplied by whoever parsed and verified them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Content address of `raw`.
    pub id: MessageId,
    /// The group the message was posted to.
    pub group: GroupId,
    /// The author, if the message is signed by one.
    pub author: Option<AuthorId>,
    /// Author-claimed timestamp (Unix ms).
    pub timestamp: i64,
    /// Raw signed bytes.
    pub raw: Bytes,
}

impl Message {
    /// Build a message from its raw bytes and parsed metadata.
    pub fn new(
        group: GroupId,
        author: Option<AuthorId>,
        timestamp: i64,
        raw: impl Into<Bytes>,
    ) -> Self {
        let raw = raw.into();
        Self {
            id: MessageId::for_raw(&raw),
            group,
            author,
            timestamp,
            raw,
        }
    }

    /// Size of the raw message in bytes.
    pub fn size(&self) -> usize {
        self.raw.len()
    }
}

/// Local trust rating of an author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Rating {
    #[default]
    Unrated = 0,
    Good = 1,
    Bad = 2,
}

impl Rating {
    /// Convert to u8 for storage.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse from u8.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Unrated),
            1 => Some(Self::Good),
            2 => Some(Self::Bad),
            _ => None,
        }
    }

    pub fn is_good(self) -> bool {
        self == Rating::Good
    }
}

/// Whether a message by `author` rated `rating` may be forwarded.
///
/// Anonymous messages are always sendable.
pub fn is_sendable(author: Option<AuthorId>, rating: Rating) -> bool {
    author.is_none() || rating.is_good()
}

/// Delivery state of a message with respect to one contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Status {
    /// Not yet sent, or sent in a batch that was declared lost.
    New = 0,
    /// Contained in an outstanding batch.
    Sent = 1,
    /// Acknowledged by, offered by, or received from the contact.
    Seen = 2,
}

impl Status {
    /// Convert to u8 for storage.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse from u8.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::New),
            1 => Some(Self::Sent),
            2 => Some(Self::Seen),
            _ => None,
        }
    }
}

/// Per (contact, message) status row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageStatus {
    pub contact: ContactId,
    pub message: MessageId,
    pub status: Status,
    pub sendable: bool,
}

impl MessageStatus {
    /// Whether the contact has the message.
    pub fn seen(&self) -> bool {
        self.status == Status::Seen
    }

    /// Whether the message may go into the next batch or offer.
    pub fn eligible(&self) -> bool {
        self.sendable && self.status == Status::New
    }
}
