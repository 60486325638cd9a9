//! Client-response sink.
//!
//! Direct dispatch and notifications leave the engine through a
//! [`DeliverySink`]. The connection layer decides how a delivery reaches
//! the socket; [`ClientMailboxes`] is the in-process implementation backed
//! by bounded per-client channels.

use crate::buffer::SharedBuffer;
use crate::types::{ClientId, MessageTag};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// One event handed to a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// A queue message dispatched directly to a subscriber.
    QueueMessage {
        queue: String,
        tag: MessageTag,
        payload: SharedBuffer,
    },
    /// Something was pushed; carries no payload.
    QueueNotify { queue: String },
    /// Exact-topic channel delivery.
    ChannelMessage {
        channel: String,
        topic: String,
        payload: SharedBuffer,
    },
    /// Delivery through a matching pattern subscription.
    ChannelPatternMessage {
        channel: String,
        topic: String,
        pattern: String,
        payload: SharedBuffer,
    },
}

impl Delivery {
    pub fn payload(&self) -> Option<&SharedBuffer> {
        match self {
            Delivery::QueueMessage { payload, .. }
            | Delivery::ChannelMessage { payload, .. }
            | Delivery::ChannelPatternMessage { payload, .. } => Some(payload),
            Delivery::QueueNotify { .. } => None,
        }
    }
}

/// Receives deliveries for connected clients.
pub trait DeliverySink {
    fn deliver(&mut self, client: ClientId, delivery: Delivery);

    /// Called once a client has been ejected and will get no more
    /// deliveries.
    fn disconnect(&mut self, _client: ClientId) {}
}

/// Recording sink: keeps every delivery in order.
impl DeliverySink for Vec<(ClientId, Delivery)> {
    fn deliver(&mut self, client: ClientId, delivery: Delivery) {
        self.push((client, delivery));
    }
}

impl<S: DeliverySink + ?Sized> DeliverySink for &mut S {
    fn deliver(&mut self, client: ClientId, delivery: Delivery) {
        (**self).deliver(client, delivery);
    }

    fn disconnect(&mut self, client: ClientId) {
        (**self).disconnect(client);
    }
}

/// Receiving end of one client's mailbox.
pub struct Mailbox {
    pub client: ClientId,
    pub receiver: Receiver<Delivery>,
}

impl Mailbox {
    /// Receive the next delivery (blocking).
    pub fn recv(&self) -> Result<Delivery, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a delivery (non-blocking).
    pub fn try_recv(&self) -> Result<Delivery, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Delivery, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything currently queued, without blocking.
    pub fn drain(&self) -> Vec<Delivery> {
        self.receiver.try_iter().collect()
    }
}

/// Bounded per-client mailboxes.
///
/// A full mailbox drops the delivery (the client is too slow); a mailbox
/// whose receiver is gone is unregistered.
pub struct ClientMailboxes {
    senders: HashMap<ClientId, Sender<Delivery>>,
    capacity: usize,
    dropped: u64,
}

impl ClientMailboxes {
    pub fn new(capacity: usize) -> Self {
        Self {
            senders: HashMap::new(),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    /// Open a mailbox for `client`, replacing any previous one.
    pub fn register(&mut self, client: ClientId) -> Mailbox {
        let (sender, receiver) = bounded(self.capacity);
        self.senders.insert(client, sender);
        Mailbox { client, receiver }
    }

    pub fn unregister(&mut self, client: ClientId) {
        self.senders.remove(&client);
    }

    pub fn is_registered(&self, client: ClientId) -> bool {
        self.senders.contains_key(&client)
    }

    /// Deliveries discarded because a mailbox was full or missing.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Default for ClientMailboxes {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl DeliverySink for ClientMailboxes {
    fn deliver(&mut self, client: ClientId, delivery: Delivery) {
        let Some(sender) = self.senders.get(&client) else {
            self.dropped += 1;
            warn!(client = %client, "Delivery to unknown client dropped");
            return;
        };

        match sender.try_send(delivery) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                warn!(client = %client, "Client mailbox full, delivery dropped");
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped += 1;
                self.senders.remove(&client);
                debug!(client = %client, "Client mailbox closed, unregistered");
            }
        }
    }

    fn disconnect(&mut self, client: ClientId) {
        self.unregister(client);
    }
}
