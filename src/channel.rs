//! Topic channels.
//!
//! Channels never buffer: a publish reaches whoever is subscribed at that
//! moment. Exact-topic subscribers get every message (or one of them per
//! publish when the channel is round-robin). Pattern subscribers whose glob
//! matches the topic always all receive it.

use crate::buffer::SharedBuffer;
use crate::collections::{AssocList, MemberSet};
use crate::delivery::{Delivery, DeliverySink};
use crate::error::{BrokerError, Rejected, Result};
use crate::glob::pattern_match;
use crate::types::{ChannelFlags, ChannelId, ChannelStats, ClientId};
use std::collections::HashSet;
use tracing::trace;

#[derive(Debug)]
pub struct Channel {
    id: ChannelId,
    name: String,
    flags: ChannelFlags,
    max_message_size: u32,
    topics: AssocList<String, MemberSet<ClientId>>,
    patterns: AssocList<String, MemberSet<ClientId>>,
}

impl Channel {
    pub fn new(
        id: ChannelId,
        name: impl Into<String>,
        flags: ChannelFlags,
        max_message_size: u32,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            flags,
            max_message_size,
            topics: AssocList::new(),
            patterns: AssocList::new(),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub fn flags(&self) -> ChannelFlags {
        self.flags
    }

    pub fn max_message_size(&self) -> u32 {
        self.max_message_size
    }

    pub fn subscribe_topic(&mut self, client: ClientId, topic: &str) -> bool {
        subscribe(&mut self.topics, client, topic)
    }

    pub fn unsubscribe_topic(&mut self, client: ClientId, topic: &str) -> Result<()> {
        if unsubscribe(&mut self.topics, client, topic) {
            Ok(())
        } else {
            Err(self.not_subscribed(topic))
        }
    }

    pub fn subscribe_pattern(&mut self, client: ClientId, pattern: &str) -> bool {
        subscribe(&mut self.patterns, client, pattern)
    }

    pub fn unsubscribe_pattern(&mut self, client: ClientId, pattern: &str) -> Result<()> {
        if unsubscribe(&mut self.patterns, client, pattern) {
            Ok(())
        } else {
            Err(self.not_subscribed(pattern))
        }
    }

    pub fn topics(&self) -> &AssocList<String, MemberSet<ClientId>> {
        &self.topics
    }

    pub fn patterns(&self) -> &AssocList<String, MemberSet<ClientId>> {
        &self.patterns
    }

    /// No topic or pattern subscription left.
    pub fn is_unused(&self) -> bool {
        self.topics.is_empty() && self.patterns.is_empty()
    }

    /// Deliver `buffer` to the current subscribers of `topic`.
    ///
    /// Returns how many deliveries were made. A topic nobody listens to is
    /// not an error; the message is simply dropped.
    pub fn publish<S: DeliverySink + ?Sized>(
        &mut self,
        topic: &str,
        buffer: SharedBuffer,
        sink: &mut S,
    ) -> std::result::Result<usize, Rejected> {
        if buffer.len() > self.max_message_size as usize {
            return Err(Rejected::TooLarge {
                size: buffer.len(),
                limit: self.max_message_size,
            });
        }

        let mut delivered = 0;
        if let Some(clients) = self.topics.get_mut(topic) {
            let message = || Delivery::ChannelMessage {
                channel: self.name.clone(),
                topic: topic.to_string(),
                payload: buffer.clone(),
            };
            if self.flags.round_robin {
                if let Some(&client) = clients.rotate() {
                    sink.deliver(client, message());
                    delivered += 1;
                }
            } else {
                for &client in clients.iter() {
                    sink.deliver(client, message());
                    delivered += 1;
                }
            }
        }

        for (pattern, clients) in self.patterns.iter() {
            if !pattern_match(topic, pattern) {
                continue;
            }
            for &client in clients.iter() {
                sink.deliver(
                    client,
                    Delivery::ChannelPatternMessage {
                        channel: self.name.clone(),
                        topic: topic.to_string(),
                        pattern: pattern.clone(),
                        payload: buffer.clone(),
                    },
                );
                delivered += 1;
            }
        }

        trace!(channel = %self.name, topic, delivered, "Channel publish");
        Ok(delivered)
    }

    /// Distinct clients holding at least one subscription.
    pub fn subscriber_count(&self) -> usize {
        self.topics
            .values()
            .chain(self.patterns.values())
            .flat_map(|clients| clients.iter().copied())
            .collect::<HashSet<ClientId>>()
            .len()
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            name: self.name.clone(),
            flags: self.flags,
            topics: self.topics.len(),
            patterns: self.patterns.len(),
            subscribers: self.subscriber_count(),
        }
    }

    fn not_subscribed(&self, topic: &str) -> BrokerError {
        BrokerError::SubscriptionNotFound {
            channel: self.name.clone(),
            topic: topic.to_string(),
        }
    }
}

fn subscribe(
    index: &mut AssocList<String, MemberSet<ClientId>>,
    client: ClientId,
    key: &str,
) -> bool {
    index
        .get_or_insert_with(key.to_string(), MemberSet::new)
        .insert(client)
}

fn unsubscribe(
    index: &mut AssocList<String, MemberSet<ClientId>>,
    client: ClientId,
    key: &str,
) -> bool {
    let Some(clients) = index.get_mut(key) else {
        return false;
    };
    let removed = clients.remove(&client);
    if clients.is_empty() {
        index.remove(key);
    }
    removed
}
