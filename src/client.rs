//! Per-client back-references.
//!
//! Every membership a client holds (declared queue, queue subscription,
//! topic or pattern subscription) is recorded on both sides. The entity
//! side lives in the queue or channel; this is the client side, used to
//! tear everything down when the client goes away.

use crate::collections::{AssocList, MemberSet};
use crate::types::{ChannelId, QueueId};

#[derive(Clone, Debug, Default)]
pub struct ClientLinks {
    pub(crate) declared_queues: MemberSet<QueueId>,
    pub(crate) subscribed_queues: MemberSet<QueueId>,
    pub(crate) topics: AssocList<ChannelId, MemberSet<String>>,
    pub(crate) patterns: AssocList<ChannelId, MemberSet<String>>,
}

impl ClientLinks {
    pub fn declared_queues(&self) -> &MemberSet<QueueId> {
        &self.declared_queues
    }

    pub fn subscribed_queues(&self) -> &MemberSet<QueueId> {
        &self.subscribed_queues
    }

    /// Topics subscribed on `channel`.
    pub fn topics(&self, channel: ChannelId) -> Vec<String> {
        self.topics
            .get(&channel)
            .map(MemberSet::to_vec)
            .unwrap_or_default()
    }

    /// Patterns subscribed on `channel`.
    pub fn patterns(&self, channel: ChannelId) -> Vec<String> {
        self.patterns
            .get(&channel)
            .map(MemberSet::to_vec)
            .unwrap_or_default()
    }

    pub fn has_topic(&self, channel: ChannelId, topic: &str) -> bool {
        self.topics
            .get(&channel)
            .is_some_and(|topics| topics.iter().any(|t| t == topic))
    }

    pub fn has_pattern(&self, channel: ChannelId, pattern: &str) -> bool {
        self.patterns
            .get(&channel)
            .is_some_and(|patterns| patterns.iter().any(|p| p == pattern))
    }

    /// No membership of any kind.
    pub fn is_empty(&self) -> bool {
        self.declared_queues.is_empty()
            && self.subscribed_queues.is_empty()
            && self.topics.is_empty()
            && self.patterns.is_empty()
    }

    pub(crate) fn add_topic(&mut self, channel: ChannelId, topic: &str) -> bool {
        self.topics
            .get_or_insert_with(channel, MemberSet::new)
            .insert(topic.to_string())
    }

    pub(crate) fn remove_topic(&mut self, channel: ChannelId, topic: &str) -> bool {
        remove_entry(&mut self.topics, channel, topic)
    }

    pub(crate) fn add_pattern(&mut self, channel: ChannelId, pattern: &str) -> bool {
        self.patterns
            .get_or_insert_with(channel, MemberSet::new)
            .insert(pattern.to_string())
    }

    pub(crate) fn remove_pattern(&mut self, channel: ChannelId, pattern: &str) -> bool {
        remove_entry(&mut self.patterns, channel, pattern)
    }

    /// Forget a queue that no longer exists.
    pub(crate) fn forget_queue(&mut self, queue: QueueId) {
        self.declared_queues.remove(&queue);
        self.subscribed_queues.remove(&queue);
    }

    /// Forget a channel that no longer exists.
    pub(crate) fn forget_channel(&mut self, channel: ChannelId) {
        self.topics.remove(&channel);
        self.patterns.remove(&channel);
    }

    /// Every (channel, topic) pair held, for teardown.
    pub(crate) fn topic_pairs(&self) -> Vec<(ChannelId, String)> {
        flatten(&self.topics)
    }

    pub(crate) fn pattern_pairs(&self) -> Vec<(ChannelId, String)> {
        flatten(&self.patterns)
    }
}

fn remove_entry(
    index: &mut AssocList<ChannelId, MemberSet<String>>,
    channel: ChannelId,
    name: &str,
) -> bool {
    let Some(names) = index.get_mut(&channel) else {
        return false;
    };
    let removed = names.remove(&name.to_string());
    if names.is_empty() {
        index.remove(&channel);
    }
    removed
}

fn flatten(index: &AssocList<ChannelId, MemberSet<String>>) -> Vec<(ChannelId, String)> {
    index
        .iter()
        .flat_map(|(&channel, names)| names.iter().map(move |name| (channel, name.clone())))
        .collect()
}
