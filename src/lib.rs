//! # TideMQ
//!
//! The delivery core of a message broker: queues, key-based routes and
//! topic channels, with client membership bookkeeping and a periodic sweep
//! for expiring and unconfirmed messages.
//!
//! ## Core Concepts
//!
//! - **Queues**: FIFO buffers with capacity, TTL, force-push eviction,
//!   direct dispatch to subscribers and confirm-or-redeliver pops
//! - **Routes**: fan a message out to every queue bound under a key
//! - **Channels**: unbuffered pub/sub on exact topics and glob patterns
//! - **Buffers**: payloads are shared, never copied, between every holder
//!
//! ## Example
//!
//! ```ignore
//! use tidemq::{Broker, BrokerConfig, ClientId, QueueSettings, SharedBuffer};
//!
//! let mut broker = Broker::with_mailboxes(BrokerConfig::default())?;
//! let mailbox = broker.sink_mut().register(ClientId(1));
//! broker.connect_client(ClientId(1));
//!
//! let queue = broker.create_queue("orders", QueueSettings::new(1000, 65536))?;
//! broker.subscribe_queue(ClientId(1), queue, false)?;
//! broker.push(queue, SharedBuffer::from("hello"), 0)?;
//!
//! let delivery = mailbox.recv()?;
//! ```

pub mod broker;
pub mod buffer;
pub mod channel;
pub mod client;
pub mod collections;
pub mod config;
pub mod delivery;
pub mod error;
pub mod glob;
pub mod message;
pub mod queue;
pub mod route;
pub mod snapshot;
pub mod storage;
pub mod types;

// Re-exports
pub use broker::Broker;
pub use buffer::{SharedBuffer, WeakBuffer};
pub use channel::Channel;
pub use client::ClientLinks;
pub use collections::{AssocList, MemberSet};
pub use config::BrokerConfig;
pub use delivery::{ClientMailboxes, Delivery, DeliverySink, Mailbox};
pub use error::{BrokerError, Rejected, Result};
pub use glob::pattern_match;
pub use message::{Message, TickClock};
pub use queue::Queue;
pub use route::Route;
pub use snapshot::{
    BindingSnapshot, BrokerSnapshot, ChannelSnapshot, MessageSnapshot, QueueSnapshot,
    RouteSnapshot,
};
pub use storage::{BackgroundSaver, SaveSchedule, SnapshotFile};
pub use types::*;
