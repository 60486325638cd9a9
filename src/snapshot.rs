//! Point-in-time copy of the broker's durable state.
//!
//! A snapshot owns its data, so it can be written out on another thread
//! while the broker keeps running.

use crate::broker::Broker;
use crate::delivery::DeliverySink;
use crate::queue::Queue;
use crate::route::Route;
use crate::types::{ChannelFlags, QueueSettings, RouteFlags, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerSnapshot {
    pub taken_at: Timestamp,
    pub queues: Vec<QueueSnapshot>,
    pub routes: Vec<RouteSnapshot>,
    pub channels: Vec<ChannelSnapshot>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub name: String,
    pub settings: QueueSettings,
    /// Buffered messages, oldest first.
    pub messages: Vec<MessageSnapshot>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSnapshot {
    pub payload: Vec<u8>,
    pub expires_at: Option<Timestamp>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSnapshot {
    pub name: String,
    pub flags: RouteFlags,
    pub bindings: Vec<BindingSnapshot>,
}

/// Queue names bound under one key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingSnapshot {
    pub key: String,
    pub queues: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub name: String,
    pub flags: ChannelFlags,
}

impl BrokerSnapshot {
    /// Capture durable queues and routes plus every channel.
    ///
    /// Messages awaiting confirmation are not part of the queue contents
    /// and are left out. Bindings to non-durable queues are skipped.
    pub fn capture<S: DeliverySink>(broker: &Broker<S>) -> Self {
        let queues = broker
            .queues_in_order()
            .filter(|queue| queue.flags().durable)
            .map(QueueSnapshot::capture)
            .collect();

        let routes = broker
            .routes_in_order()
            .filter(|route| route.flags().durable)
            .map(|route| RouteSnapshot::capture(route, |id| {
                broker
                    .queue(id)
                    .filter(|queue| queue.flags().durable)
                    .map(|queue| queue.name().to_string())
            }))
            .collect();

        let channels = broker
            .channels_in_order()
            .map(|channel| ChannelSnapshot {
                name: channel.name().to_string(),
                flags: channel.flags(),
            })
            .collect();

        Self {
            taken_at: broker.now(),
            queues,
            routes,
            channels,
        }
    }

    pub fn message_count(&self) -> usize {
        self.queues.iter().map(|queue| queue.messages.len()).sum()
    }
}

impl QueueSnapshot {
    pub fn capture(queue: &Queue) -> Self {
        Self {
            name: queue.name().to_string(),
            settings: *queue.settings(),
            messages: queue
                .messages()
                .map(|message| MessageSnapshot {
                    payload: message.payload().to_vec(),
                    expires_at: message.expires_at,
                })
                .collect(),
        }
    }
}

impl RouteSnapshot {
    /// `queue_name` resolves a bound queue, returning `None` to skip it.
    pub fn capture<F>(route: &Route, queue_name: F) -> Self
    where
        F: Fn(crate::types::QueueId) -> Option<String>,
    {
        let bindings = route
            .bindings()
            .iter()
            .map(|(key, queues)| BindingSnapshot {
                key: key.clone(),
                queues: queues.iter().filter_map(|&id| queue_name(id)).collect(),
            })
            .filter(|binding| !binding.queues.is_empty())
            .collect();

        Self {
            name: route.name().to_string(),
            flags: route.flags(),
            bindings,
        }
    }
}
