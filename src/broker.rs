//! Broker context tying queues, routes, channels and clients together.
//!
//! The broker owns every entity in id-keyed registries. Memberships are
//! mirrored: an entity lists its clients and each client's [`ClientLinks`]
//! lists its entities, and both sides are always updated in one operation.
//! Auto-delete and client ejection cascade through those links.

use crate::buffer::SharedBuffer;
use crate::channel::Channel;
use crate::client::ClientLinks;
use crate::config::BrokerConfig;
use crate::delivery::{ClientMailboxes, DeliverySink};
use crate::error::{BrokerError, Result};
use crate::message::{Message, TickClock};
use crate::queue::Queue;
use crate::route::Route;
use crate::snapshot::BrokerSnapshot;
use crate::types::{
    validate_name, BrokerStats, ChannelFlags, ChannelId, ChannelStats, ClientId, MessageTag,
    QueueId, QueueSettings, QueueStats, RouteFlags, RouteId, RouteStats, SweepStats, Timestamp,
};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// The delivery engine.
///
/// Single-threaded by construction: the event loop owns the broker and
/// calls into it for every command and once per timer tick.
pub struct Broker<S: DeliverySink = ClientMailboxes> {
    config: BrokerConfig,
    clock: TickClock,
    sink: S,

    queues: HashMap<QueueId, Queue>,
    queue_names: HashMap<String, QueueId>,

    routes: HashMap<RouteId, Route>,
    route_names: HashMap<String, RouteId>,

    channels: HashMap<ChannelId, Channel>,
    channel_names: HashMap<String, ChannelId>,

    clients: HashMap<ClientId, ClientLinks>,

    /// Last id handed out; shared by all entity kinds, never reused.
    last_id: u64,
}

impl Broker<ClientMailboxes> {
    /// Broker delivering into bounded per-client mailboxes.
    pub fn with_mailboxes(config: BrokerConfig) -> Result<Self> {
        let mailboxes = ClientMailboxes::new(config.mailbox_capacity);
        Self::new(config, mailboxes)
    }
}

impl<S: DeliverySink> Broker<S> {
    pub fn new(config: BrokerConfig, sink: S) -> Result<Self> {
        Self::with_time(config, sink, Timestamp::now())
    }

    /// Create a broker whose clock starts at `now`.
    pub fn with_time(config: BrokerConfig, sink: S, now: Timestamp) -> Result<Self> {
        config.validate()?;
        info!(
            max_message_size = config.max_message_size,
            max_queue_messages = config.max_queue_messages,
            "Broker started"
        );

        Ok(Self {
            config,
            clock: TickClock::new(now),
            sink,
            queues: HashMap::new(),
            queue_names: HashMap::new(),
            routes: HashMap::new(),
            route_names: HashMap::new(),
            channels: HashMap::new(),
            channel_names: HashMap::new(),
            clients: HashMap::new(),
            last_id: 0,
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Time of the current tick.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    fn next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }

    // --- Clients ---

    /// Register a connected client. Returns false if it was already known.
    pub fn connect_client(&mut self, client: ClientId) -> bool {
        if self.clients.contains_key(&client) {
            return false;
        }
        self.clients.insert(client, ClientLinks::default());
        debug!(client = %client, "Client connected");
        true
    }

    /// Tear down every membership of a disconnecting client.
    ///
    /// Subscriptions go first, then declarations (which may auto-delete
    /// queues and, through their bindings, routes), then channel
    /// subscriptions. Membership lists are copied before the walk since
    /// cascades remove entities along the way.
    pub fn eject_client(&mut self, client: ClientId) -> bool {
        let Some(links) = self.clients.get(&client) else {
            return false;
        };

        let subscribed = links.subscribed_queues.to_vec();
        let declared = links.declared_queues.to_vec();
        let topics = links.topic_pairs();
        let patterns = links.pattern_pairs();

        for queue in subscribed {
            if let Err(e) = self.unsubscribe_queue(client, queue) {
                debug!(client = %client, queue = %queue, error = %e, "Unsubscribe during eject skipped");
            }
        }
        for queue in declared {
            if let Err(e) = self.undeclare_queue(client, queue) {
                debug!(client = %client, queue = %queue, error = %e, "Undeclare during eject skipped");
            }
            self.auto_delete_queue(queue);
        }
        for (channel, topic) in topics {
            if let Err(e) = self.unsubscribe_topic(client, channel, &topic) {
                debug!(client = %client, channel = %channel, error = %e, "Topic unsubscribe during eject skipped");
            }
        }
        for (channel, pattern) in patterns {
            if let Err(e) = self.unsubscribe_pattern(client, channel, &pattern) {
                debug!(client = %client, channel = %channel, error = %e, "Pattern unsubscribe during eject skipped");
            }
        }

        self.clients.remove(&client);
        self.sink.disconnect(client);
        info!(client = %client, "Client ejected");
        true
    }

    pub fn client(&self, client: ClientId) -> Option<&ClientLinks> {
        self.clients.get(&client)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    // --- Queues ---

    pub fn create_queue(&mut self, name: &str, settings: QueueSettings) -> Result<QueueId> {
        if !validate_name(name) {
            return Err(BrokerError::InvalidName(name.to_string()));
        }
        if self.queue_names.contains_key(name) {
            return Err(BrokerError::QueueExists(name.to_string()));
        }
        self.check_queue_settings(&settings)?;

        let id = QueueId(self.next_id());
        self.queues.insert(id, Queue::new(id, name, settings));
        self.queue_names.insert(name.to_string(), id);

        info!(
            queue = %name,
            max_messages = settings.max_messages,
            max_message_size = settings.max_message_size,
            "Queue created"
        );
        Ok(id)
    }

    fn check_queue_settings(&self, settings: &QueueSettings) -> Result<()> {
        if settings.max_messages == 0 || settings.max_messages > self.config.max_queue_messages {
            return Err(BrokerError::InvalidSettings(format!(
                "max_messages must be in 1..={}",
                self.config.max_queue_messages
            )));
        }
        if settings.max_message_size == 0
            || settings.max_message_size > self.config.max_message_size
        {
            return Err(BrokerError::InvalidSettings(format!(
                "max_message_size must be in 1..={}",
                self.config.max_message_size
            )));
        }
        Ok(())
    }

    /// Delete a queue, releasing its messages.
    ///
    /// Route bindings and client links to the queue go with it; a route
    /// left without bindings is auto-deleted if flagged so.
    pub fn delete_queue(&mut self, queue: QueueId) -> Result<()> {
        if self.remove_queue(queue) {
            Ok(())
        } else {
            Err(queue_not_found(queue))
        }
    }

    fn remove_queue(&mut self, id: QueueId) -> bool {
        let Some(queue) = self.queues.remove(&id) else {
            return false;
        };
        self.queue_names.remove(queue.name());

        for client in queue.declared_clients().iter().copied().chain(queue.subscribers()) {
            if let Some(links) = self.clients.get_mut(&client) {
                links.forget_queue(id);
            }
        }

        let mut touched = Vec::new();
        for (key, routes) in queue.route_bindings().iter() {
            for &route_id in routes.iter() {
                if let Some(route) = self.routes.get_mut(&route_id) {
                    if route.unbind(id, key).is_ok() {
                        touched.push(route_id);
                    }
                }
            }
        }
        for route_id in touched {
            self.auto_delete_route(route_id);
        }

        info!(
            queue = %queue.name(),
            released = queue.len() + queue.unconfirmed_len(),
            "Queue deleted"
        );
        true
    }

    fn auto_delete_queue(&mut self, id: QueueId) -> bool {
        let Some(queue) = self.queues.get(&id) else {
            return false;
        };
        if !queue.flags().auto_delete || !queue.declared_clients().is_empty() {
            return false;
        }
        debug!(queue = %queue.name(), "Queue auto-delete");
        self.remove_queue(id)
    }

    pub fn rename_queue(&mut self, queue: QueueId, new_name: &str) -> Result<()> {
        if !validate_name(new_name) {
            return Err(BrokerError::InvalidName(new_name.to_string()));
        }
        if self.queue_names.contains_key(new_name) {
            return Err(BrokerError::QueueExists(new_name.to_string()));
        }
        let entry = self
            .queues
            .get_mut(&queue)
            .ok_or_else(|| queue_not_found(queue))?;

        let old_name = entry.name().to_string();
        entry.set_name(new_name.to_string());
        self.queue_names.remove(&old_name);
        self.queue_names.insert(new_name.to_string(), queue);

        info!(from = %old_name, to = %new_name, "Queue renamed");
        Ok(())
    }

    pub fn queue_id(&self, name: &str) -> Option<QueueId> {
        self.queue_names.get(name).copied()
    }

    pub fn queue(&self, queue: QueueId) -> Option<&Queue> {
        self.queues.get(&queue)
    }

    pub fn queue_exists(&self, name: &str) -> bool {
        self.queue_names.contains_key(name)
    }

    /// Queues in creation order.
    pub(crate) fn queues_in_order(&self) -> impl Iterator<Item = &Queue> {
        let mut queues: Vec<&Queue> = self.queues.values().collect();
        queues.sort_by_key(|queue| queue.id());
        queues.into_iter()
    }

    pub fn list_queues(&self) -> Vec<QueueStats> {
        self.queues_in_order().map(Queue::stats).collect()
    }

    pub fn declare_queue(&mut self, client: ClientId, queue: QueueId) -> Result<()> {
        let links = self
            .clients
            .get_mut(&client)
            .ok_or_else(|| client_not_found(client))?;
        let entry = self
            .queues
            .get_mut(&queue)
            .ok_or_else(|| queue_not_found(queue))?;

        if entry.declare(client) {
            links.declared_queues.insert(queue);
            debug!(client = %client, queue = %entry.name(), "Queue declared");
        }
        Ok(())
    }

    /// Drop a declaration. An auto-delete queue left with no declared
    /// client is deleted.
    pub fn undeclare_queue(&mut self, client: ClientId, queue: QueueId) -> Result<()> {
        let links = self
            .clients
            .get_mut(&client)
            .ok_or_else(|| client_not_found(client))?;
        let entry = self
            .queues
            .get_mut(&queue)
            .ok_or_else(|| queue_not_found(queue))?;

        if !entry.undeclare(client) {
            return Err(BrokerError::NotMember {
                client,
                target: entry.name().to_string(),
            });
        }
        links.declared_queues.remove(&queue);
        debug!(client = %client, queue = %entry.name(), "Queue undeclared");

        self.auto_delete_queue(queue);
        Ok(())
    }

    /// Subscribe for direct delivery, or for push notifications only.
    pub fn subscribe_queue(
        &mut self,
        client: ClientId,
        queue: QueueId,
        notify_only: bool,
    ) -> Result<()> {
        let links = self
            .clients
            .get_mut(&client)
            .ok_or_else(|| client_not_found(client))?;
        let entry = self
            .queues
            .get_mut(&queue)
            .ok_or_else(|| queue_not_found(queue))?;

        entry.subscribe(client, notify_only);
        links.subscribed_queues.insert(queue);
        debug!(client = %client, queue = %entry.name(), notify_only, "Queue subscribed");
        Ok(())
    }

    pub fn unsubscribe_queue(&mut self, client: ClientId, queue: QueueId) -> Result<()> {
        let links = self
            .clients
            .get_mut(&client)
            .ok_or_else(|| client_not_found(client))?;
        let entry = self
            .queues
            .get_mut(&queue)
            .ok_or_else(|| queue_not_found(queue))?;

        if !entry.unsubscribe(client) {
            return Err(BrokerError::NotMember {
                client,
                target: entry.name().to_string(),
            });
        }
        links.subscribed_queues.remove(&queue);
        debug!(client = %client, queue = %entry.name(), "Queue unsubscribed");
        Ok(())
    }

    pub fn push(&mut self, queue: QueueId, buffer: SharedBuffer, expiration_ms: u32) -> Result<()> {
        let entry = self
            .queues
            .get_mut(&queue)
            .ok_or_else(|| queue_not_found(queue))?;
        entry.push(buffer, expiration_ms, &mut self.clock, &mut self.sink)?;
        Ok(())
    }

    pub fn peek(&self, queue: QueueId) -> Result<Option<&Message>> {
        let entry = self.queues.get(&queue).ok_or_else(|| queue_not_found(queue))?;
        Ok(entry.peek())
    }

    /// Take the oldest message. A non-zero `hold_timeout_ms` requires a
    /// [`Broker::confirm`] before the timeout or the message is redelivered.
    pub fn pop(&mut self, queue: QueueId, hold_timeout_ms: u32) -> Result<Option<Message>> {
        let now = self.clock.now();
        let entry = self
            .queues
            .get_mut(&queue)
            .ok_or_else(|| queue_not_found(queue))?;
        Ok(entry.pop(hold_timeout_ms, now))
    }

    pub fn confirm(&mut self, queue: QueueId, tag: MessageTag) -> Result<()> {
        self.queues
            .get_mut(&queue)
            .ok_or_else(|| queue_not_found(queue))?
            .confirm(tag)
    }

    pub fn purge_queue(&mut self, queue: QueueId) -> Result<usize> {
        let entry = self
            .queues
            .get_mut(&queue)
            .ok_or_else(|| queue_not_found(queue))?;
        let purged = entry.purge();
        info!(queue = %entry.name(), purged, "Queue purged");
        Ok(purged)
    }

    // --- Routes ---

    pub fn create_route(&mut self, name: &str, flags: RouteFlags) -> Result<RouteId> {
        if !validate_name(name) {
            return Err(BrokerError::InvalidName(name.to_string()));
        }
        if self.route_names.contains_key(name) {
            return Err(BrokerError::RouteExists(name.to_string()));
        }

        let id = RouteId(self.next_id());
        self.routes.insert(id, Route::new(id, name, flags));
        self.route_names.insert(name.to_string(), id);

        info!(route = %name, "Route created");
        Ok(id)
    }

    /// Delete a route and its bindings. Bound queues stay.
    pub fn delete_route(&mut self, route: RouteId) -> Result<()> {
        if self.remove_route(route) {
            Ok(())
        } else {
            Err(route_not_found(route))
        }
    }

    fn remove_route(&mut self, id: RouteId) -> bool {
        let Some(route) = self.routes.remove(&id) else {
            return false;
        };
        self.route_names.remove(route.name());

        for (key, queues) in route.bindings().iter() {
            for queue in queues.iter() {
                if let Some(entry) = self.queues.get_mut(queue) {
                    entry.unlink_route(id, key);
                }
            }
        }

        info!(route = %route.name(), bindings = route.queue_count(), "Route deleted");
        true
    }

    fn auto_delete_route(&mut self, id: RouteId) -> bool {
        let Some(route) = self.routes.get(&id) else {
            return false;
        };
        if !route.flags().auto_delete || !route.is_empty() {
            return false;
        }
        debug!(route = %route.name(), "Route auto-delete");
        self.remove_route(id)
    }

    pub fn rename_route(&mut self, route: RouteId, new_name: &str) -> Result<()> {
        if !validate_name(new_name) {
            return Err(BrokerError::InvalidName(new_name.to_string()));
        }
        if self.route_names.contains_key(new_name) {
            return Err(BrokerError::RouteExists(new_name.to_string()));
        }
        let entry = self
            .routes
            .get_mut(&route)
            .ok_or_else(|| route_not_found(route))?;

        let old_name = entry.name().to_string();
        entry.set_name(new_name.to_string());
        self.route_names.remove(&old_name);
        self.route_names.insert(new_name.to_string(), route);

        info!(from = %old_name, to = %new_name, "Route renamed");
        Ok(())
    }

    pub fn route_id(&self, name: &str) -> Option<RouteId> {
        self.route_names.get(name).copied()
    }

    pub fn route(&self, route: RouteId) -> Option<&Route> {
        self.routes.get(&route)
    }

    pub fn route_exists(&self, name: &str) -> bool {
        self.route_names.contains_key(name)
    }

    pub(crate) fn routes_in_order(&self) -> impl Iterator<Item = &Route> {
        let mut routes: Vec<&Route> = self.routes.values().collect();
        routes.sort_by_key(|route| route.id());
        routes.into_iter()
    }

    pub fn list_routes(&self) -> Vec<RouteStats> {
        self.routes_in_order().map(Route::stats).collect()
    }

    /// Bind `queue` to `route` under `key`. Binding twice is a no-op.
    pub fn bind(&mut self, route: RouteId, queue: QueueId, key: &str) -> Result<()> {
        let entry = self
            .routes
            .get_mut(&route)
            .ok_or_else(|| route_not_found(route))?;
        let target = self
            .queues
            .get_mut(&queue)
            .ok_or_else(|| queue_not_found(queue))?;

        if entry.bind(queue, key) {
            target.link_route(route, key);
            debug!(route = %entry.name(), queue = %target.name(), key, "Queue bound");
        }
        Ok(())
    }

    pub fn unbind(&mut self, route: RouteId, queue: QueueId, key: &str) -> Result<()> {
        let entry = self
            .routes
            .get_mut(&route)
            .ok_or_else(|| route_not_found(route))?;
        entry.unbind(queue, key)?;
        debug!(route = %entry.name(), queue = %queue, key, "Queue unbound");

        if let Some(target) = self.queues.get_mut(&queue) {
            target.unlink_route(route, key);
        }
        self.auto_delete_route(route);
        Ok(())
    }

    /// Push into every queue bound under `key` (one of them on a
    /// round-robin route).
    ///
    /// Every target is attempted. If any push is rejected the result is
    /// [`BrokerError::DeliveryFailed`] with the number of failures.
    pub fn publish_route(
        &mut self,
        route: RouteId,
        key: &str,
        buffer: SharedBuffer,
        expiration_ms: u32,
    ) -> Result<()> {
        let entry = self
            .routes
            .get_mut(&route)
            .ok_or_else(|| route_not_found(route))?;
        let targets = entry.targets(key)?;
        let route_name = entry.name().to_string();

        let mut failed = 0;
        for queue in targets {
            let Some(target) = self.queues.get_mut(&queue) else {
                failed += 1;
                continue;
            };
            if let Err(rejected) =
                target.push(buffer.clone(), expiration_ms, &mut self.clock, &mut self.sink)
            {
                debug!(route = %route_name, queue = %target.name(), reason = %rejected, "Route push rejected");
                failed += 1;
            }
        }

        if failed > 0 {
            warn!(route = %route_name, key, failed, "Route publish partially failed");
            return Err(BrokerError::DeliveryFailed {
                route: route_name,
                failed,
            });
        }
        Ok(())
    }

    // --- Channels ---

    pub fn create_channel(&mut self, name: &str, flags: ChannelFlags) -> Result<ChannelId> {
        if !validate_name(name) {
            return Err(BrokerError::InvalidName(name.to_string()));
        }
        if self.channel_names.contains_key(name) {
            return Err(BrokerError::ChannelExists(name.to_string()));
        }

        let id = ChannelId(self.next_id());
        let channel = Channel::new(id, name, flags, self.config.channel_max_message_size);
        self.channels.insert(id, channel);
        self.channel_names.insert(name.to_string(), id);

        info!(channel = %name, "Channel created");
        Ok(id)
    }

    pub fn delete_channel(&mut self, channel: ChannelId) -> Result<()> {
        if self.remove_channel(channel) {
            Ok(())
        } else {
            Err(channel_not_found(channel))
        }
    }

    fn remove_channel(&mut self, id: ChannelId) -> bool {
        let Some(channel) = self.channels.remove(&id) else {
            return false;
        };
        self.channel_names.remove(channel.name());

        for clients in channel.topics().values().chain(channel.patterns().values()) {
            for client in clients.iter() {
                if let Some(links) = self.clients.get_mut(client) {
                    links.forget_channel(id);
                }
            }
        }

        info!(channel = %channel.name(), "Channel deleted");
        true
    }

    fn auto_delete_channel(&mut self, id: ChannelId) -> bool {
        let Some(channel) = self.channels.get(&id) else {
            return false;
        };
        if !channel.flags().auto_delete || !channel.is_unused() {
            return false;
        }
        debug!(channel = %channel.name(), "Channel auto-delete");
        self.remove_channel(id)
    }

    pub fn rename_channel(&mut self, channel: ChannelId, new_name: &str) -> Result<()> {
        if !validate_name(new_name) {
            return Err(BrokerError::InvalidName(new_name.to_string()));
        }
        if self.channel_names.contains_key(new_name) {
            return Err(BrokerError::ChannelExists(new_name.to_string()));
        }
        let entry = self
            .channels
            .get_mut(&channel)
            .ok_or_else(|| channel_not_found(channel))?;

        let old_name = entry.name().to_string();
        entry.set_name(new_name.to_string());
        self.channel_names.remove(&old_name);
        self.channel_names.insert(new_name.to_string(), channel);

        info!(from = %old_name, to = %new_name, "Channel renamed");
        Ok(())
    }

    pub fn channel_id(&self, name: &str) -> Option<ChannelId> {
        self.channel_names.get(name).copied()
    }

    pub fn channel(&self, channel: ChannelId) -> Option<&Channel> {
        self.channels.get(&channel)
    }

    pub fn channel_exists(&self, name: &str) -> bool {
        self.channel_names.contains_key(name)
    }

    pub(crate) fn channels_in_order(&self) -> impl Iterator<Item = &Channel> {
        let mut channels: Vec<&Channel> = self.channels.values().collect();
        channels.sort_by_key(|channel| channel.id());
        channels.into_iter()
    }

    pub fn list_channels(&self) -> Vec<ChannelStats> {
        self.channels_in_order().map(Channel::stats).collect()
    }

    pub fn subscribe_topic(&mut self, client: ClientId, channel: ChannelId, topic: &str) -> Result<()> {
        let links = self
            .clients
            .get_mut(&client)
            .ok_or_else(|| client_not_found(client))?;
        let entry = self
            .channels
            .get_mut(&channel)
            .ok_or_else(|| channel_not_found(channel))?;

        if entry.subscribe_topic(client, topic) {
            links.add_topic(channel, topic);
            debug!(client = %client, channel = %entry.name(), topic, "Topic subscribed");
        }
        Ok(())
    }

    pub fn unsubscribe_topic(
        &mut self,
        client: ClientId,
        channel: ChannelId,
        topic: &str,
    ) -> Result<()> {
        let links = self
            .clients
            .get_mut(&client)
            .ok_or_else(|| client_not_found(client))?;
        let entry = self
            .channels
            .get_mut(&channel)
            .ok_or_else(|| channel_not_found(channel))?;

        entry.unsubscribe_topic(client, topic)?;
        links.remove_topic(channel, topic);
        debug!(client = %client, channel = %entry.name(), topic, "Topic unsubscribed");

        self.auto_delete_channel(channel);
        Ok(())
    }

    pub fn subscribe_pattern(
        &mut self,
        client: ClientId,
        channel: ChannelId,
        pattern: &str,
    ) -> Result<()> {
        let links = self
            .clients
            .get_mut(&client)
            .ok_or_else(|| client_not_found(client))?;
        let entry = self
            .channels
            .get_mut(&channel)
            .ok_or_else(|| channel_not_found(channel))?;

        if entry.subscribe_pattern(client, pattern) {
            links.add_pattern(channel, pattern);
            debug!(client = %client, channel = %entry.name(), pattern, "Pattern subscribed");
        }
        Ok(())
    }

    pub fn unsubscribe_pattern(
        &mut self,
        client: ClientId,
        channel: ChannelId,
        pattern: &str,
    ) -> Result<()> {
        let links = self
            .clients
            .get_mut(&client)
            .ok_or_else(|| client_not_found(client))?;
        let entry = self
            .channels
            .get_mut(&channel)
            .ok_or_else(|| channel_not_found(channel))?;

        entry.unsubscribe_pattern(client, pattern)?;
        links.remove_pattern(channel, pattern);
        debug!(client = %client, channel = %entry.name(), pattern, "Pattern unsubscribed");

        self.auto_delete_channel(channel);
        Ok(())
    }

    /// Deliver to the channel's current subscribers. Returns the number of
    /// deliveries made.
    pub fn publish_channel(
        &mut self,
        channel: ChannelId,
        topic: &str,
        buffer: SharedBuffer,
    ) -> Result<usize> {
        let entry = self
            .channels
            .get_mut(&channel)
            .ok_or_else(|| channel_not_found(channel))?;
        Ok(entry.publish(topic, buffer, &mut self.sink)?)
    }

    // --- Timer ---

    /// Start a new tick at `now` and sweep every queue: expired messages
    /// are released, overdue unconfirmed messages are redelivered.
    pub fn tick(&mut self, now: Timestamp) -> SweepStats {
        self.clock.advance(now);

        let mut stats = SweepStats::default();
        for queue in self.queues.values_mut() {
            stats.expired += queue.sweep_expired(now);
            stats.merge(queue.sweep_unconfirmed(now));
        }

        if !stats.is_empty() {
            debug!(
                expired = stats.expired,
                redelivered = stats.redelivered,
                dropped_unconfirmed = stats.dropped_unconfirmed,
                "Sweep"
            );
        }
        stats
    }

    // --- Admin ---

    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            queues: self.queues.len(),
            routes: self.routes.len(),
            channels: self.channels.len(),
            clients: self.clients.len(),
            buffered_messages: self.queues.values().map(Queue::len).sum(),
            unconfirmed_messages: self.queues.values().map(Queue::unconfirmed_len).sum(),
        }
    }

    /// Delete every queue, route and channel. Clients stay connected with
    /// no memberships.
    pub fn flush(&mut self) {
        let stats = self.stats();

        self.queues.clear();
        self.queue_names.clear();
        self.routes.clear();
        self.route_names.clear();
        self.channels.clear();
        self.channel_names.clear();
        for links in self.clients.values_mut() {
            *links = ClientLinks::default();
        }

        info!(
            queues = stats.queues,
            routes = stats.routes,
            channels = stats.channels,
            released = stats.buffered_messages + stats.unconfirmed_messages,
            "Broker flushed"
        );
    }

    // --- Persistence ---

    pub fn snapshot(&self) -> BrokerSnapshot {
        BrokerSnapshot::capture(self)
    }

    /// Rebuild a broker from a snapshot.
    ///
    /// Messages get fresh delivery tags. Messages whose TTL passed while
    /// the snapshot was on disk are dropped on the first tick.
    pub fn restore(config: BrokerConfig, sink: S, snapshot: BrokerSnapshot) -> Result<Self> {
        let now = Timestamp::now().max(snapshot.taken_at);
        let mut broker = Self::with_time(config, sink, now)?;

        for saved in snapshot.queues {
            let id = broker.create_queue(&saved.name, saved.settings)?;
            let Some(queue) = broker.queues.get_mut(&id) else {
                continue;
            };
            for message in saved.messages {
                let mut restored = Message::new(
                    SharedBuffer::from(message.payload),
                    broker.clock.next_tag(),
                    now,
                    0,
                );
                restored.expires_at = message.expires_at;
                if let Err(rejected) = queue.restore(restored) {
                    warn!(queue = %saved.name, reason = %rejected, "Snapshot message skipped");
                }
            }
        }

        for saved in snapshot.routes {
            let route = broker.create_route(&saved.name, saved.flags)?;
            for binding in saved.bindings {
                for queue_name in binding.queues {
                    match broker.queue_id(&queue_name) {
                        Some(queue) => broker.bind(route, queue, &binding.key)?,
                        None => warn!(
                            route = %saved.name,
                            queue = %queue_name,
                            "Snapshot binding to unknown queue skipped"
                        ),
                    }
                }
            }
        }

        for saved in snapshot.channels {
            broker.create_channel(&saved.name, saved.flags)?;
        }

        let stats = broker.stats();
        info!(
            queues = stats.queues,
            routes = stats.routes,
            channels = stats.channels,
            messages = stats.buffered_messages,
            "Broker restored from snapshot"
        );
        Ok(broker)
    }
}

fn queue_not_found(queue: QueueId) -> BrokerError {
    BrokerError::QueueNotFound(queue.to_string())
}

fn route_not_found(route: RouteId) -> BrokerError {
    BrokerError::RouteNotFound(route.to_string())
}

fn channel_not_found(channel: ChannelId) -> BrokerError {
    BrokerError::ChannelNotFound(channel.to_string())
}

fn client_not_found(client: ClientId) -> BrokerError {
    BrokerError::ClientNotFound(client.to_string())
}
