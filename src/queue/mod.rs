//! Message queues.
//!
//! A queue buffers messages in push order and hands them out oldest first.
//! When it has message subscribers, pushes bypass the buffer and go
//! straight to them. Messages popped with a hold timeout wait in a
//! confirmation index until the consumer confirms them or the sweep puts
//! them back at the read end.

mod sequence;

pub use sequence::Iter;

use crate::buffer::SharedBuffer;
use crate::collections::{AssocList, MemberSet};
use crate::delivery::{Delivery, DeliverySink};
use crate::error::{BrokerError, Rejected, Result};
use crate::message::{Message, TickClock};
use crate::types::{
    ClientId, MessageTag, QueueFlags, QueueId, QueueSettings, QueueStats, RouteId, SweepStats,
    Timestamp,
};
use sequence::{Handle, Sequence};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace, warn};

pub struct Queue {
    id: QueueId,
    name: String,
    settings: QueueSettings,
    sequence: Sequence,
    /// Buffered messages with a TTL, ordered by deadline.
    expiring: BTreeSet<(Timestamp, Handle)>,
    /// Popped messages awaiting confirmation.
    confirming: BTreeMap<MessageTag, Message>,
    confirm_deadlines: BTreeSet<(Timestamp, MessageTag)>,
    declared_clients: MemberSet<ClientId>,
    msg_subscribers: MemberSet<ClientId>,
    notify_subscribers: MemberSet<ClientId>,
    /// Routes this queue is bound to, per key.
    route_bindings: AssocList<String, MemberSet<RouteId>>,
}

impl Queue {
    pub fn new(id: QueueId, name: impl Into<String>, settings: QueueSettings) -> Self {
        Self {
            id,
            name: name.into(),
            settings,
            sequence: Sequence::new(),
            expiring: BTreeSet::new(),
            confirming: BTreeMap::new(),
            confirm_deadlines: BTreeSet::new(),
            declared_clients: MemberSet::new(),
            msg_subscribers: MemberSet::new(),
            notify_subscribers: MemberSet::new(),
            route_bindings: AssocList::new(),
        }
    }

    pub fn id(&self) -> QueueId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    pub fn flags(&self) -> QueueFlags {
        self.settings.flags
    }

    /// Buffered messages.
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.sequence.len() >= self.settings.max_messages as usize
    }

    /// Messages handed out and not yet confirmed.
    pub fn unconfirmed_len(&self) -> usize {
        self.confirming.len()
    }

    /// Buffered messages, oldest first.
    pub fn messages(&self) -> Iter<'_> {
        self.sequence.iter()
    }

    /// Push a message.
    ///
    /// With message subscribers present the message is dispatched directly
    /// and never buffered. Otherwise it is buffered, evicting the oldest
    /// message first when the queue is full and `force_push` is set.
    /// Notify-only subscribers are told about every accepted push.
    pub fn push<S: DeliverySink + ?Sized>(
        &mut self,
        buffer: SharedBuffer,
        expiration_ms: u32,
        clock: &mut TickClock,
        sink: &mut S,
    ) -> std::result::Result<(), Rejected> {
        if buffer.len() > self.settings.max_message_size as usize {
            return Err(Rejected::TooLarge {
                size: buffer.len(),
                limit: self.settings.max_message_size,
            });
        }

        if !self.msg_subscribers.is_empty() {
            let message = Message::new(buffer, clock.next_tag(), clock.now(), expiration_ms);
            self.dispatch(message, sink);
            self.notify(sink);
            return Ok(());
        }

        if self.is_full() && !self.make_room() {
            debug!(queue = %self.name, max = self.settings.max_messages, "Push rejected, queue full");
            return Err(Rejected::Full {
                queue: self.name.clone(),
            });
        }

        let message = Message::new(buffer, clock.next_tag(), clock.now(), expiration_ms);
        self.insert_head(message);
        self.notify(sink);
        Ok(())
    }

    /// Oldest buffered message, left in place.
    pub fn peek(&self) -> Option<&Message> {
        self.sequence.tail().map(|(_, message)| message)
    }

    /// Remove the oldest buffered message.
    ///
    /// With a non-zero `hold_timeout_ms` the queue keeps a reference until
    /// [`Queue::confirm`] is called or the timeout passes, after which the
    /// sweep puts the message back at the read end.
    pub fn pop(&mut self, hold_timeout_ms: u32, now: Timestamp) -> Option<Message> {
        let (handle, mut message) = self.sequence.pop_tail()?;
        self.unlink_expiring(handle, &message);

        if hold_timeout_ms > 0 {
            let deadline = now.saturating_add_millis(hold_timeout_ms as u64);
            message.confirm_deadline = Some(deadline);
            self.confirm_deadlines.insert((deadline, message.tag));
            self.confirming.insert(message.tag, message.clone());
        }

        Some(message)
    }

    /// Acknowledge a message popped with a hold timeout.
    pub fn confirm(&mut self, tag: MessageTag) -> Result<()> {
        let message = self
            .confirming
            .remove(&tag)
            .ok_or_else(|| BrokerError::MessageNotFound {
                queue: self.name.clone(),
                tag,
            })?;

        if let Some(deadline) = message.confirm_deadline {
            self.confirm_deadlines.remove(&(deadline, tag));
        }
        trace!(queue = %self.name, tag = %tag, "Message confirmed");
        Ok(())
    }

    /// Release every buffered message whose TTL has passed.
    pub fn sweep_expired(&mut self, now: Timestamp) -> usize {
        let mut expired = 0;
        while let Some(&(deadline, handle)) = self.expiring.first() {
            if deadline > now {
                break;
            }
            self.expiring.pop_first();
            if self.sequence.remove(handle).is_some() {
                expired += 1;
            }
        }
        expired
    }

    /// Handle unconfirmed messages whose hold timeout has passed.
    ///
    /// A message whose TTL also passed is released. Otherwise it goes back
    /// to the read end of the queue. If the queue is full and cannot evict,
    /// the message stays unconfirmed and is retried on the next sweep.
    pub fn sweep_unconfirmed(&mut self, now: Timestamp) -> SweepStats {
        let mut stats = SweepStats::default();
        let due: Vec<(Timestamp, MessageTag)> = self
            .confirm_deadlines
            .range(..=(now, MessageTag(u64::MAX)))
            .copied()
            .collect();

        let mut deferred = 0;
        for (deadline, tag) in due {
            let expired = match self.confirming.get(&tag) {
                Some(message) => message.is_expired(now),
                None => {
                    self.confirm_deadlines.remove(&(deadline, tag));
                    continue;
                }
            };

            if !expired && self.is_full() && !self.make_room() {
                deferred += 1;
                continue;
            }

            self.confirm_deadlines.remove(&(deadline, tag));
            let Some(mut message) = self.confirming.remove(&tag) else {
                continue;
            };

            if expired {
                stats.dropped_unconfirmed += 1;
            } else {
                message.confirm_deadline = None;
                self.insert_tail(message);
                stats.redelivered += 1;
            }
        }

        if deferred > 0 {
            warn!(queue = %self.name, deferred, "Queue full, redelivery postponed");
        }
        stats
    }

    /// Drop all buffered messages. Unconfirmed messages are kept.
    pub fn purge(&mut self) -> usize {
        self.expiring.clear();
        self.sequence.clear()
    }

    pub fn declare(&mut self, client: ClientId) -> bool {
        self.declared_clients.insert(client)
    }

    pub fn undeclare(&mut self, client: ClientId) -> bool {
        self.declared_clients.remove(&client)
    }

    pub fn is_declared(&self, client: ClientId) -> bool {
        self.declared_clients.contains(&client)
    }

    /// Subscribe for messages, or for notifications only. Subscribing again
    /// with the other role moves the client.
    pub fn subscribe(&mut self, client: ClientId, notify_only: bool) -> bool {
        let (target, other) = if notify_only {
            (&mut self.notify_subscribers, &mut self.msg_subscribers)
        } else {
            (&mut self.msg_subscribers, &mut self.notify_subscribers)
        };
        other.remove(&client);
        target.insert(client)
    }

    pub fn unsubscribe(&mut self, client: ClientId) -> bool {
        self.msg_subscribers.remove(&client) | self.notify_subscribers.remove(&client)
    }

    pub fn is_subscribed(&self, client: ClientId) -> bool {
        self.msg_subscribers.contains(&client) || self.notify_subscribers.contains(&client)
    }

    pub fn declared_clients(&self) -> &MemberSet<ClientId> {
        &self.declared_clients
    }

    pub fn msg_subscribers(&self) -> &MemberSet<ClientId> {
        &self.msg_subscribers
    }

    pub fn notify_subscribers(&self) -> &MemberSet<ClientId> {
        &self.notify_subscribers
    }

    /// Every client subscribed in either role.
    pub fn subscribers(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.msg_subscribers
            .iter()
            .chain(self.notify_subscribers.iter())
            .copied()
    }

    pub fn route_bindings(&self) -> &AssocList<String, MemberSet<RouteId>> {
        &self.route_bindings
    }

    pub(crate) fn link_route(&mut self, route: RouteId, key: &str) -> bool {
        self.route_bindings
            .get_or_insert_with(key.to_string(), MemberSet::new)
            .insert(route)
    }

    pub(crate) fn unlink_route(&mut self, route: RouteId, key: &str) -> bool {
        let Some(routes) = self.route_bindings.get_mut(key) else {
            return false;
        };
        let removed = routes.remove(&route);
        if routes.is_empty() {
            self.route_bindings.remove(key);
        }
        removed
    }

    /// Buffer a message loaded from a snapshot, keeping its absolute TTL.
    pub(crate) fn restore(&mut self, message: Message) -> std::result::Result<(), Rejected> {
        if message.buffer.len() > self.settings.max_message_size as usize {
            return Err(Rejected::TooLarge {
                size: message.buffer.len(),
                limit: self.settings.max_message_size,
            });
        }
        if self.is_full() && !self.make_room() {
            return Err(Rejected::Full {
                queue: self.name.clone(),
            });
        }
        self.insert_head(message);
        Ok(())
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            name: self.name.clone(),
            settings: self.settings,
            size: self.sequence.len(),
            unconfirmed: self.confirming.len(),
            declared_clients: self.declared_clients.len(),
            subscribed_clients: self.msg_subscribers.len() + self.notify_subscribers.len(),
        }
    }

    fn dispatch<S: DeliverySink + ?Sized>(&mut self, message: Message, sink: &mut S) {
        if self.settings.flags.round_robin {
            if let Some(client) = self.msg_subscribers.rotate().copied() {
                sink.deliver(client, self.message_delivery(&message));
            }
        } else {
            for &client in self.msg_subscribers.iter() {
                sink.deliver(client, self.message_delivery(&message));
            }
        }
        trace!(queue = %self.name, tag = %message.tag, "Message dispatched");
    }

    fn message_delivery(&self, message: &Message) -> Delivery {
        Delivery::QueueMessage {
            queue: self.name.clone(),
            tag: message.tag,
            payload: message.buffer.clone(),
        }
    }

    fn notify<S: DeliverySink + ?Sized>(&self, sink: &mut S) {
        for &client in self.notify_subscribers.iter() {
            sink.deliver(
                client,
                Delivery::QueueNotify {
                    queue: self.name.clone(),
                },
            );
        }
    }

    /// Evict the oldest message if `force_push` allows it.
    fn make_room(&mut self) -> bool {
        if !self.settings.flags.force_push {
            return false;
        }
        while self.is_full() {
            let Some((handle, message)) = self.sequence.pop_tail() else {
                return false;
            };
            self.unlink_expiring(handle, &message);
            trace!(queue = %self.name, tag = %message.tag, "Oldest message evicted");
        }
        true
    }

    fn insert_head(&mut self, message: Message) {
        let expires_at = message.expires_at;
        let handle = self.sequence.push_head(message);
        if let Some(deadline) = expires_at {
            self.expiring.insert((deadline, handle));
        }
    }

    fn insert_tail(&mut self, message: Message) {
        let expires_at = message.expires_at;
        let handle = self.sequence.push_tail(message);
        if let Some(deadline) = expires_at {
            self.expiring.insert((deadline, handle));
        }
    }

    fn unlink_expiring(&mut self, handle: Handle, message: &Message) {
        if let Some(deadline) = message.expires_at {
            self.expiring.remove(&(deadline, handle));
        }
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("settings", &self.settings)
            .field("size", &self.sequence.len())
            .field("unconfirmed", &self.confirming.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(max: u32, flags: QueueFlags) -> Queue {
        Queue::new(
            QueueId(1),
            "orders",
            QueueSettings::new(max, 1024).with_flags(flags),
        )
    }

    fn push(queue: &mut Queue, clock: &mut TickClock, body: &str, ttl: u32) -> std::result::Result<(), Rejected> {
        let mut sink: Vec<(ClientId, Delivery)> = Vec::new();
        queue.push(SharedBuffer::from(body), ttl, clock, &mut sink)
    }

    fn bodies(queue: &Queue) -> Vec<Vec<u8>> {
        queue.messages().map(|m| m.payload().to_vec()).collect()
    }

    #[test]
    fn test_fifo_order() {
        let mut clock = TickClock::new(Timestamp(0));
        let mut q = queue(10, QueueFlags::default());
        push(&mut q, &mut clock, "a", 0).unwrap();
        push(&mut q, &mut clock, "b", 0).unwrap();

        assert_eq!(q.peek().map(|m| m.payload().to_vec()), Some(b"a".to_vec()));
        assert_eq!(q.pop(0, clock.now()).map(|m| m.payload().to_vec()), Some(b"a".to_vec()));
        assert_eq!(q.pop(0, clock.now()).map(|m| m.payload().to_vec()), Some(b"b".to_vec()));
        assert!(q.pop(0, clock.now()).is_none());
    }

    #[test]
    fn test_full_queue_rejects() {
        let mut clock = TickClock::new(Timestamp(0));
        let mut q = queue(2, QueueFlags::default());
        push(&mut q, &mut clock, "a", 0).unwrap();
        push(&mut q, &mut clock, "b", 0).unwrap();

        let err = push(&mut q, &mut clock, "c", 0).unwrap_err();
        assert!(matches!(err, Rejected::Full { .. }));
        assert_eq!(bodies(&q), vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn test_force_push_evicts_oldest() {
        let mut clock = TickClock::new(Timestamp(0));
        let flags = QueueFlags {
            force_push: true,
            ..Default::default()
        };
        let mut q = queue(2, flags);
        push(&mut q, &mut clock, "a", 0).unwrap();
        push(&mut q, &mut clock, "b", 100).unwrap();
        push(&mut q, &mut clock, "c", 0).unwrap();
        push(&mut q, &mut clock, "d", 0).unwrap();

        assert_eq!(bodies(&q), vec![b"c".to_vec(), b"d".to_vec()]);
        // The evicted message's TTL entry went with it.
        assert_eq!(q.sweep_expired(Timestamp(1_000)), 0);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn test_too_large() {
        let mut clock = TickClock::new(Timestamp(0));
        let mut q = Queue::new(QueueId(1), "small", QueueSettings::new(10, 3));
        push(&mut q, &mut clock, "abc", 0).unwrap();

        let err = push(&mut q, &mut clock, "abcd", 0).unwrap_err();
        assert_eq!(err, Rejected::TooLarge { size: 4, limit: 3 });
    }

    #[test]
    fn test_sweep_expired_keeps_live_messages() {
        let mut clock = TickClock::new(Timestamp(1_000));
        let mut q = queue(10, QueueFlags::default());
        push(&mut q, &mut clock, "short", 100).unwrap();
        push(&mut q, &mut clock, "forever", 0).unwrap();
        push(&mut q, &mut clock, "long", 5_000).unwrap();

        assert_eq!(q.sweep_expired(Timestamp(1_099)), 0);
        assert_eq!(q.sweep_expired(Timestamp(1_100)), 1);
        assert_eq!(bodies(&q), vec![b"forever".to_vec(), b"long".to_vec()]);
    }

    #[test]
    fn test_confirm_releases_held_message() {
        let mut clock = TickClock::new(Timestamp(0));
        let mut q = queue(10, QueueFlags::default());
        push(&mut q, &mut clock, "a", 0).unwrap();

        let message = q.pop(1_000, Timestamp(0)).unwrap();
        assert_eq!(q.unconfirmed_len(), 1);
        assert_eq!(message.buffer.refcount(), 2);

        q.confirm(message.tag).unwrap();
        assert_eq!(q.unconfirmed_len(), 0);
        assert_eq!(message.buffer.refcount(), 1);
        assert!(q.confirm(message.tag).unwrap_err().is_not_found());
        assert!(q.sweep_unconfirmed(Timestamp(10_000)).is_empty());
    }

    #[test]
    fn test_unconfirmed_goes_back_to_front() {
        let mut clock = TickClock::new(Timestamp(0));
        let mut q = queue(10, QueueFlags::default());
        push(&mut q, &mut clock, "a", 0).unwrap();
        push(&mut q, &mut clock, "b", 0).unwrap();

        let held = q.pop(500, Timestamp(0)).unwrap();
        assert!(q.sweep_unconfirmed(Timestamp(499)).is_empty());

        let stats = q.sweep_unconfirmed(Timestamp(500));
        assert_eq!(stats.redelivered, 1);
        assert_eq!(q.unconfirmed_len(), 0);
        assert_eq!(bodies(&q), vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(q.peek().map(|m| m.tag), Some(held.tag));
        assert_eq!(q.peek().and_then(|m| m.confirm_deadline), None);
    }

    #[test]
    fn test_expired_unconfirmed_is_dropped() {
        let mut clock = TickClock::new(Timestamp(0));
        let mut q = queue(10, QueueFlags::default());
        push(&mut q, &mut clock, "a", 100).unwrap();

        let held = q.pop(1_000, Timestamp(0)).unwrap();
        let stats = q.sweep_unconfirmed(Timestamp(1_000));
        assert_eq!(stats.dropped_unconfirmed, 1);
        assert!(q.is_empty());
        assert_eq!(held.buffer.refcount(), 1);
    }

    #[test]
    fn test_redelivery_into_full_queue_is_postponed() {
        let mut clock = TickClock::new(Timestamp(0));
        let mut q = queue(1, QueueFlags::default());
        push(&mut q, &mut clock, "a", 0).unwrap();
        q.pop(100, Timestamp(0)).unwrap();
        push(&mut q, &mut clock, "b", 0).unwrap();

        assert!(q.sweep_unconfirmed(Timestamp(100)).is_empty());
        assert_eq!(q.unconfirmed_len(), 1);

        q.pop(0, Timestamp(100)).unwrap();
        assert_eq!(q.sweep_unconfirmed(Timestamp(200)).redelivered, 1);
        assert_eq!(bodies(&q), vec![b"a".to_vec()]);
    }

    #[test]
    fn test_direct_dispatch_broadcast() {
        let mut clock = TickClock::new(Timestamp(0));
        let mut q = queue(10, QueueFlags::default());
        q.subscribe(ClientId(1), false);
        q.subscribe(ClientId(2), false);
        q.subscribe(ClientId(3), true);

        let mut sink: Vec<(ClientId, Delivery)> = Vec::new();
        let payload = SharedBuffer::from("hello");
        q.push(payload.clone(), 0, &mut clock, &mut sink).unwrap();

        assert!(q.is_empty());
        assert_eq!(sink.len(), 3);
        assert!(matches!(sink[2], (ClientId(3), Delivery::QueueNotify { .. })));
        // One handle per message delivery plus ours.
        assert_eq!(payload.refcount(), 3);
    }

    #[test]
    fn test_direct_dispatch_round_robin() {
        let mut clock = TickClock::new(Timestamp(0));
        let flags = QueueFlags {
            round_robin: true,
            ..Default::default()
        };
        let mut q = queue(10, flags);
        for id in 1..=3 {
            q.subscribe(ClientId(id), false);
        }

        let mut sink: Vec<(ClientId, Delivery)> = Vec::new();
        for _ in 0..6 {
            q.push(SharedBuffer::from("m"), 0, &mut clock, &mut sink).unwrap();
        }

        let mut counts = [0usize; 3];
        for (client, _) in &sink {
            counts[(client.0 - 1) as usize] += 1;
        }
        assert_eq!(sink.len(), 6);
        assert_eq!(counts, [2, 2, 2]);
    }

    #[test]
    fn test_notify_on_buffered_push() {
        let mut clock = TickClock::new(Timestamp(0));
        let mut q = queue(10, QueueFlags::default());
        q.subscribe(ClientId(7), true);

        let mut sink: Vec<(ClientId, Delivery)> = Vec::new();
        q.push(SharedBuffer::from("m"), 0, &mut clock, &mut sink).unwrap();

        assert_eq!(q.len(), 1);
        assert_eq!(
            sink,
            vec![(
                ClientId(7),
                Delivery::QueueNotify {
                    queue: "orders".into()
                }
            )]
        );
    }

    #[test]
    fn test_resubscribe_switches_role() {
        let mut q = queue(10, QueueFlags::default());
        assert!(q.subscribe(ClientId(1), false));
        assert!(!q.subscribe(ClientId(1), false));
        assert!(q.subscribe(ClientId(1), true));

        assert!(q.msg_subscribers().is_empty());
        assert!(q.notify_subscribers().contains(&ClientId(1)));
        assert!(q.unsubscribe(ClientId(1)));
        assert!(!q.is_subscribed(ClientId(1)));
    }

    #[test]
    fn test_route_links() {
        let mut q = queue(10, QueueFlags::default());
        assert!(q.link_route(RouteId(5), "eu"));
        assert!(!q.link_route(RouteId(5), "eu"));
        assert!(q.link_route(RouteId(6), "eu"));

        assert!(q.unlink_route(RouteId(5), "eu"));
        assert!(q.unlink_route(RouteId(6), "eu"));
        assert!(q.route_bindings().is_empty());
        assert!(!q.unlink_route(RouteId(6), "eu"));
    }

    #[test]
    fn test_purge_keeps_unconfirmed() {
        let mut clock = TickClock::new(Timestamp(0));
        let mut q = queue(10, QueueFlags::default());
        push(&mut q, &mut clock, "a", 50).unwrap();
        push(&mut q, &mut clock, "b", 0).unwrap();
        push(&mut q, &mut clock, "c", 0).unwrap();
        q.pop(100, Timestamp(0)).unwrap();

        assert_eq!(q.purge(), 2);
        assert!(q.is_empty());
        assert_eq!(q.unconfirmed_len(), 1);
    }
}
