//! Key-based routes.
//!
//! A route maps routing keys to the queues bound under them. Publishing to
//! a route pushes the message into every bound queue for the key, or into
//! one of them per publish when the route is round-robin.

use crate::collections::{AssocList, MemberSet};
use crate::error::{BrokerError, Result};
use crate::types::{QueueId, RouteFlags, RouteId, RouteStats};

#[derive(Debug)]
pub struct Route {
    id: RouteId,
    name: String,
    flags: RouteFlags,
    bindings: AssocList<String, MemberSet<QueueId>>,
}

impl Route {
    pub fn new(id: RouteId, name: impl Into<String>, flags: RouteFlags) -> Self {
        Self {
            id,
            name: name.into(),
            flags,
            bindings: AssocList::new(),
        }
    }

    pub fn id(&self) -> RouteId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub fn flags(&self) -> RouteFlags {
        self.flags
    }

    /// Bind `queue` under `key`. Returns false if it was already bound.
    pub fn bind(&mut self, queue: QueueId, key: &str) -> bool {
        self.bindings
            .get_or_insert_with(key.to_string(), MemberSet::new)
            .insert(queue)
    }

    /// Remove one binding. A key left without queues disappears.
    pub fn unbind(&mut self, queue: QueueId, key: &str) -> Result<()> {
        let not_found = || BrokerError::BindingNotFound {
            route: self.name.clone(),
            key: key.to_string(),
        };

        let queues = self.bindings.get_mut(key).ok_or_else(not_found)?;
        if !queues.remove(&queue) {
            return Err(not_found());
        }
        if queues.is_empty() {
            self.bindings.remove(key);
        }
        Ok(())
    }

    pub fn is_bound(&self, queue: QueueId, key: &str) -> bool {
        self.bindings
            .get(key)
            .is_some_and(|queues| queues.contains(&queue))
    }

    /// Queues a publish under `key` should reach.
    ///
    /// Round-robin routes return a single queue and advance the rotation.
    pub fn targets(&mut self, key: &str) -> Result<Vec<QueueId>> {
        let queues = self
            .bindings
            .get_mut(key)
            .ok_or_else(|| BrokerError::BindingNotFound {
                route: self.name.clone(),
                key: key.to_string(),
            })?;

        if self.flags.round_robin {
            Ok(queues.rotate().copied().into_iter().collect())
        } else {
            Ok(queues.to_vec())
        }
    }

    /// Drop every binding of `queue`. Returns the keys it was bound under.
    pub(crate) fn unlink_queue(&mut self, queue: QueueId) -> Vec<String> {
        let mut keys = Vec::new();
        for (key, queues) in self.bindings.iter_mut() {
            if queues.remove(&queue) {
                keys.push(key.clone());
            }
        }
        self.bindings.retain(|_, queues| !queues.is_empty());
        keys
    }

    pub fn bindings(&self) -> &AssocList<String, MemberSet<QueueId>> {
        &self.bindings
    }

    pub fn key_count(&self) -> usize {
        self.bindings.len()
    }

    /// Number of (key, queue) bindings.
    pub fn queue_count(&self) -> usize {
        self.bindings.values().map(MemberSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn stats(&self) -> RouteStats {
        RouteStats {
            name: self.name.clone(),
            flags: self.flags,
            keys: self.key_count(),
            queues: self.queue_count(),
        }
    }
}
