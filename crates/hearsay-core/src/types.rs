//! Strong type definitions for hearsay.
//!
//! All identifiers are newtypes to prevent misuse at compile time. Hash-based
//! identifiers are 32 bytes; local identifiers (contacts, transports) are
//! small integers assigned by the store or the transport layer.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! hash_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            /// Wrap a raw digest.
            pub const fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            /// Get the raw bytes.
            pub const fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Lowercase hex, 64 digits.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            /// Parse 64 hex digits.
            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let mut bytes = [0u8; 32];
                hex::decode_to_slice(s, &mut bytes)?;
                Ok(Self(bytes))
            }

            /// The all-zero identifier (sentinel).
            pub const ZERO: Self = Self([0u8; 32]);
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &self.to_hex()[..16])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", &self.to_hex()[..16])
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = std::array::TryFromSliceError;

            fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
                <[u8; 32]>::try_from(slice).map(Self)
            }
        }
    };
}

hash_id!(
    /// Content address of a message: Blake3 of its raw signed bytes.
    MessageId
);

hash_id!(
    /// Content address of a batch, computed by the batch writer over the
    /// encoded batch body.
    BatchId
);

hash_id!(
    /// Stable identifier of a group (subscription topic).
    GroupId
);

hash_id!(
    /// Identifier of a message author. Opaque to the sync core.
    AuthorId
);

impl MessageId {
    /// Compute the ID of a raw message.
    pub fn for_raw(raw: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"hearsay-message-v0:");
        hasher.update(raw);
        Self(*hasher.finalize().as_bytes())
    }
}

impl BatchId {
    /// Compute the ID of an encoded batch body.
    pub fn for_body(body: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"hearsay-batch-v0:");
        hasher.update(body);
        Self(*hasher.finalize().as_bytes())
    }
}

/// Locally assigned contact identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContactId(pub u32);

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "contact#{}", self.0)
    }
}

/// Identifier of a transport plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransportId(pub u32);

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport#{}", self.0)
    }
}
