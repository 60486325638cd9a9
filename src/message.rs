//! Messages and the per-tick tag clock.

use crate::buffer::SharedBuffer;
use crate::types::{MessageTag, Timestamp};

/// A payload plus its delivery bookkeeping.
///
/// Cloning a message clones the buffer handle, never the bytes.
#[derive(Clone, Debug)]
pub struct Message {
    pub buffer: SharedBuffer,
    pub tag: MessageTag,
    /// Absolute TTL deadline; `None` means the message never expires.
    pub expires_at: Option<Timestamp>,
    /// Set while the message waits for a consumer's confirmation.
    pub confirm_deadline: Option<Timestamp>,
}

impl Message {
    /// Build a message pushed at `now` with a TTL of `expiration_ms` (0 = none).
    pub fn new(buffer: SharedBuffer, tag: MessageTag, now: Timestamp, expiration_ms: u32) -> Self {
        let expires_at = if expiration_ms > 0 {
            Some(now.saturating_add_millis(expiration_ms as u64))
        } else {
            None
        };

        Self {
            buffer,
            tag,
            expires_at,
            confirm_deadline: None,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }

    pub fn is_confirm_due(&self, now: Timestamp) -> bool {
        self.confirm_deadline.is_some_and(|deadline| deadline <= now)
    }
}

/// Broker time as seen by the delivery engine.
///
/// The event loop calls [`TickClock::advance`] once per tick; every push in
/// that tick is stamped with the same `now`. Tags are `(now_ms << 32) |
/// counter` with the counter reset on each tick. When the clock does not
/// move forward between ticks (mocked time, clock skew) the raw layout would
/// repeat, so tags are additionally kept strictly increasing.
#[derive(Clone, Debug)]
pub struct TickClock {
    now: Timestamp,
    counter: u32,
    last_tag: Option<MessageTag>,
}

impl TickClock {
    pub fn new(now: Timestamp) -> Self {
        Self {
            now,
            counter: 0,
            last_tag: None,
        }
    }

    pub fn now(&self) -> Timestamp {
        self.now
    }

    /// Start a new tick at `now`.
    pub fn advance(&mut self, now: Timestamp) {
        self.now = now;
        self.counter = 0;
    }

    /// Next unique delivery tag.
    pub fn next_tag(&mut self) -> MessageTag {
        let raw = MessageTag::new(self.now.as_millis(), self.counter);
        self.counter = self.counter.wrapping_add(1);

        let tag = match self.last_tag {
            Some(last) if raw <= last => MessageTag(last.0.wrapping_add(1)),
            _ => raw,
        };
        self.last_tag = Some(tag);
        tag
    }
}

impl Default for TickClock {
    fn default() -> Self {
        Self::new(Timestamp::now())
    }
}
