//! Core types for the broker.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum length of a queue, route or channel name in bytes.
pub const MAX_NAME_LEN: usize = 64;

/// Identifier of a queue inside one broker.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QueueId(pub u64);

impl fmt::Debug for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueueId({})", self.0)
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue#{}", self.0)
    }
}

/// Identifier of a route inside one broker.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RouteId(pub u64);

impl fmt::Debug for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RouteId({})", self.0)
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "route#{}", self.0)
    }
}

/// Identifier of a channel inside one broker.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({})", self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel#{}", self.0)
    }
}

/// Opaque handle to a connected session. The connection layer assigns it;
/// the broker only keeps membership links to it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientId(pub u64);

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", self.0)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Milliseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Current wall-clock time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_millis() as u64)
    }

    pub fn saturating_add_millis(self, millis: u64) -> Self {
        Timestamp(self.0.saturating_add(millis))
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Delivery tag of a message: `(ms << 32) | counter`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageTag(pub u64);

impl MessageTag {
    pub fn new(millis: u64, counter: u32) -> Self {
        MessageTag((millis << 32) | counter as u64)
    }

    /// The millisecond part the tag was built from (low 32 bits of the clock).
    pub fn millis(self) -> u64 {
        self.0 >> 32
    }

    pub fn counter(self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Debug for MessageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageTag({:#x})", self.0)
    }
}

impl fmt::Display for MessageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Behaviour switches of a queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueFlags {
    /// Delete the queue once the last declared client undeclares.
    pub auto_delete: bool,
    /// Evict the oldest message instead of rejecting a push into a full queue.
    pub force_push: bool,
    /// Direct-dispatch to one subscriber at a time instead of all of them.
    pub round_robin: bool,
    /// Include the queue in snapshots.
    pub durable: bool,
}

/// Behaviour switches of a route.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteFlags {
    pub auto_delete: bool,
    pub round_robin: bool,
    pub durable: bool,
}

/// Behaviour switches of a channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelFlags {
    pub auto_delete: bool,
    /// Applies to exact-topic delivery only; pattern delivery always broadcasts.
    pub round_robin: bool,
}

/// Creation parameters of a queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSettings {
    pub max_messages: u32,
    pub max_message_size: u32,
    pub flags: QueueFlags,
}

impl QueueSettings {
    pub fn new(max_messages: u32, max_message_size: u32) -> Self {
        Self {
            max_messages,
            max_message_size,
            flags: QueueFlags::default(),
        }
    }

    pub fn with_flags(mut self, flags: QueueFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Check a queue/route/channel name.
///
/// Names are 1..=64 bytes, start with an ASCII letter, `_` or `.`, and
/// continue with alphanumerics or `_`, `-`, `.`. Two separators in a row
/// are not allowed.
pub fn validate_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    let Some((&first, rest)) = bytes.split_first() else {
        return false;
    };
    if bytes.len() > MAX_NAME_LEN {
        return false;
    }
    if !(first.is_ascii_alphabetic() || first == b'_' || first == b'.') {
        return false;
    }

    let is_extra = |c: u8| c == b'_' || c == b'-' || c == b'.';
    let mut prev_extra = is_extra(first);
    for &c in rest {
        if !c.is_ascii_alphanumeric() && !is_extra(c) {
            return false;
        }
        if is_extra(c) && prev_extra {
            return false;
        }
        prev_extra = is_extra(c);
    }
    true
}

/// Introspection data for a queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub name: String,
    pub settings: QueueSettings,
    /// Messages currently buffered.
    pub size: usize,
    /// Messages handed out and awaiting confirmation.
    pub unconfirmed: usize,
    pub declared_clients: usize,
    pub subscribed_clients: usize,
}

/// Introspection data for a route.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteStats {
    pub name: String,
    pub flags: RouteFlags,
    pub keys: usize,
    /// Number of (key, queue) bindings.
    pub queues: usize,
}

/// Introspection data for a channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub name: String,
    pub flags: ChannelFlags,
    pub topics: usize,
    pub patterns: usize,
    pub subscribers: usize,
}

/// Broker-wide counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerStats {
    pub queues: usize,
    pub routes: usize,
    pub channels: usize,
    pub clients: usize,
    pub buffered_messages: usize,
    pub unconfirmed_messages: usize,
}

/// What one tick's sweep did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Buffered messages removed because their TTL passed.
    pub expired: usize,
    /// Unconfirmed messages put back into their queue.
    pub redelivered: usize,
    /// Unconfirmed messages released because their TTL passed first.
    pub dropped_unconfirmed: usize,
}

impl SweepStats {
    pub fn is_empty(&self) -> bool {
        self.expired == 0 && self.redelivered == 0 && self.dropped_unconfirmed == 0
    }

    pub(crate) fn merge(&mut self, other: SweepStats) {
        self.expired += other.expired;
        self.redelivered += other.redelivered;
        self.dropped_unconfirmed += other.dropped_unconfirmed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_layout() {
        let tag = MessageTag::new(0x1234, 7);
        assert_eq!(tag.0, (0x1234u64 << 32) | 7);
        assert_eq!(tag.millis(), 0x1234);
        assert_eq!(tag.counter(), 7);
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("orders"));
        assert!(validate_name("orders.eu-west_1"));
        assert!(validate_name("_internal"));
        assert!(validate_name(".hidden"));

        assert!(!validate_name(""));
        assert!(!validate_name("1orders"));
        assert!(!validate_name("orders..eu"));
        assert!(!validate_name("orders eu"));
        assert!(!validate_name(&"q".repeat(MAX_NAME_LEN + 1)));
        assert!(validate_name(&"q".repeat(MAX_NAME_LEN)));
    }

    #[test]
    fn test_timestamp_saturates() {
        let t = Timestamp(u64::MAX - 1);
        assert_eq!(t.saturating_add_millis(10), Timestamp(u64::MAX));
    }
}
