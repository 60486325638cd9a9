//! Error types for the broker core.

use crate::types::{ClientId, MessageTag};
use thiserror::Error;

/// A push that the target refused. Recoverable; the caller reports it.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Rejected {
    #[error("Queue is full: {queue}")]
    Full { queue: String },

    #[error("Message too large: {size} bytes (limit {limit})")]
    TooLarge { size: usize, limit: u32 },
}

/// Main error type for broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error(transparent)]
    Rejected(#[from] Rejected),

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("Route not found: {0}")]
    RouteNotFound(String),

    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    #[error("Client not found: {0}")]
    ClientNotFound(String),

    #[error("Binding not found: route {route}, key {key}")]
    BindingNotFound { route: String, key: String },

    #[error("Subscription not found: channel {channel}, topic {topic}")]
    SubscriptionNotFound { channel: String, topic: String },

    #[error("Client {client} is not a member of {target}")]
    NotMember { client: ClientId, target: String },

    #[error("Message not found: queue {queue}, tag {tag}")]
    MessageNotFound { queue: String, tag: MessageTag },

    #[error("Queue already exists: {0}")]
    QueueExists(String),

    #[error("Route already exists: {0}")]
    RouteExists(String),

    #[error("Channel already exists: {0}")]
    ChannelExists(String),

    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Delivery failed for {failed} of the queues bound to route {route}")]
    DeliveryFailed { route: String, failed: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid snapshot format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("A snapshot is already being written")]
    SnapshotInProgress,
}

impl BrokerError {
    /// True for the not-found family of errors.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BrokerError::QueueNotFound(_)
                | BrokerError::RouteNotFound(_)
                | BrokerError::ChannelNotFound(_)
                | BrokerError::ClientNotFound(_)
                | BrokerError::BindingNotFound { .. }
                | BrokerError::SubscriptionNotFound { .. }
                | BrokerError::NotMember { .. }
                | BrokerError::MessageNotFound { .. }
        )
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(e: serde_json::Error) -> Self {
        BrokerError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for BrokerError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        BrokerError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for BrokerError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        BrokerError::Deserialization(e.to_string())
    }
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
