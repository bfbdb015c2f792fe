//! Node configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use hearsay_sync::config::millis;
use hearsay_sync::SyncConfig;

use crate::error::Result;

/// Configuration for a [`Hearsay`](crate::Hearsay) node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HearsayConfig {
    pub sync: SyncConfig,
    pub cleaner: CleanerConfig,
}

impl HearsayConfig {
    /// Parse a JSON configuration. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// When and how much the storage cleaner deletes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanerConfig {
    /// How often stored size is checked.
    #[serde(with = "millis")]
    pub interval: Duration,
    /// Stored message bytes above which old messages are expired.
    pub max_stored_bytes: u64,
    /// Extra bytes to free below the limit, so the cleaner doesn't run
    /// again right away.
    pub target_free_bytes: u64,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            max_stored_bytes: 512 * 1024 * 1024,
            target_free_bytes: 16 * 1024 * 1024,
        }
    }
}
