//! Broker configuration.

use crate::error::{BrokerError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Broker configuration.
///
/// Every field has a default, so a JSON file only needs the keys it
/// changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Upper bound for a queue's `max_message_size`.
    pub max_message_size: u32,

    /// Upper bound for a queue's `max_messages`.
    pub max_queue_messages: u32,

    /// Largest payload a channel accepts.
    pub channel_max_message_size: u32,

    /// Capacity of each client's mailbox.
    pub mailbox_capacity: usize,

    /// Where snapshots are written.
    pub snapshot_path: PathBuf,

    /// Seconds between periodic background saves; 0 disables them.
    pub save_interval_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            max_message_size: i32::MAX as u32,
            max_queue_messages: u32::MAX,
            channel_max_message_size: i32::MAX as u32,
            mailbox_capacity: 1024,
            snapshot_path: PathBuf::from("tidemq.snapshot"),
            save_interval_secs: 0,
        }
    }
}

impl BrokerConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: BrokerConfig = serde_json::from_str(json)
            .map_err(|e| BrokerError::Deserialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_message_size == 0 {
            return Err(BrokerError::InvalidSettings(
                "max_message_size must be positive".into(),
            ));
        }
        if self.max_queue_messages == 0 {
            return Err(BrokerError::InvalidSettings(
                "max_queue_messages must be positive".into(),
            ));
        }
        if self.mailbox_capacity == 0 {
            return Err(BrokerError::InvalidSettings(
                "mailbox_capacity must be positive".into(),
            ));
        }
        if self.snapshot_path.as_os_str().is_empty() {
            return Err(BrokerError::InvalidSettings(
                "snapshot_path must not be empty".into(),
            ));
        }
        Ok(())
    }
}
