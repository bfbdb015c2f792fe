//! Configuration for sync behavior.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::packets::limits;

/// Configuration for sync behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// How long a sent batch may stay unacknowledged before it is declared
    /// lost and its messages become sendable again.
    #[serde(with = "millis")]
    pub retransmit_after: Duration,
    /// Maximum message IDs written into one offer.
    pub max_offer_ids: usize,
    /// Maximum batch IDs written into one ack.
    pub max_ack_ids: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retransmit_after: Duration::from_secs(60),
            max_offer_ids: limits::MAX_OFFER_IDS,
            max_ack_ids: limits::MAX_ACK_IDS,
        }
    }
}

/// Durations as whole milliseconds.
pub mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
