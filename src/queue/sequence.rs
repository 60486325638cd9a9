//! Arena-backed message sequence.
//!
//! Messages live in a slab; the sequence is a doubly-linked list threaded
//! through slab handles. Other indexes (expiration) store handles, so a
//! message can be unlinked from the middle in O(1) without raw pointers.

use crate::message::Message;
use slab::Slab;

/// Stable index of a message inside a [`Sequence`].
pub(crate) type Handle = usize;

struct Node {
    message: Message,
    /// Neighbour towards the head (pushed later).
    newer: Option<Handle>,
    /// Neighbour towards the tail (pushed earlier).
    older: Option<Handle>,
}

/// Double-ended message sequence. New messages enter at the head; reads
/// and pops happen at the tail, so the tail is always the oldest message.
pub(crate) struct Sequence {
    nodes: Slab<Node>,
    head: Option<Handle>,
    tail: Option<Handle>,
}

impl Sequence {
    pub(crate) fn new() -> Self {
        Self {
            nodes: Slab::new(),
            head: None,
            tail: None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Insert at the head (newest end).
    pub(crate) fn push_head(&mut self, message: Message) -> Handle {
        let handle = self.nodes.insert(Node {
            message,
            newer: None,
            older: self.head,
        });

        match self.head {
            Some(old_head) => self.nodes[old_head].newer = Some(handle),
            None => self.tail = Some(handle),
        }
        self.head = Some(handle);
        handle
    }

    /// Insert at the tail, making the message the next one read.
    pub(crate) fn push_tail(&mut self, message: Message) -> Handle {
        let handle = self.nodes.insert(Node {
            message,
            newer: self.tail,
            older: None,
        });

        match self.tail {
            Some(old_tail) => self.nodes[old_tail].older = Some(handle),
            None => self.head = Some(handle),
        }
        self.tail = Some(handle);
        handle
    }

    /// Oldest message without removing it.
    pub(crate) fn tail(&self) -> Option<(Handle, &Message)> {
        self.tail.map(|h| (h, &self.nodes[h].message))
    }

    pub(crate) fn pop_tail(&mut self) -> Option<(Handle, Message)> {
        let handle = self.tail?;
        self.remove(handle).map(|message| (handle, message))
    }

    /// Unlink `handle` wherever it sits. `None` if it is not live.
    pub(crate) fn remove(&mut self, handle: Handle) -> Option<Message> {
        let node = self.nodes.try_remove(handle)?;

        match node.newer {
            Some(newer) => self.nodes[newer].older = node.older,
            None => self.head = node.older,
        }
        match node.older {
            Some(older) => self.nodes[older].newer = node.newer,
            None => self.tail = node.newer,
        }

        Some(node.message)
    }

    /// Drop every message. Returns how many there were.
    pub(crate) fn clear(&mut self) -> usize {
        let count = self.nodes.len();
        self.nodes.clear();
        self.head = None;
        self.tail = None;
        count
    }

    /// Walk from the tail (oldest) to the head (newest).
    pub(crate) fn iter(&self) -> Iter<'_> {
        Iter {
            nodes: &self.nodes,
            next: self.tail,
        }
    }
}

/// Oldest-first iterator over a [`Sequence`].
pub struct Iter<'a> {
    nodes: &'a Slab<Node>,
    next: Option<Handle>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Message;

    fn next(&mut self) -> Option<&'a Message> {
        let handle = self.next?;
        let node = &self.nodes[handle];
        self.next = node.newer;
        Some(&node.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SharedBuffer;
    use crate::types::{MessageTag, Timestamp};

    fn msg(tag: u64) -> Message {
        Message::new(SharedBuffer::from("m"), MessageTag(tag), Timestamp(0), 0)
    }

    fn tags(seq: &Sequence) -> Vec<u64> {
        seq.iter().map(|m| m.tag.0).collect()
    }

    #[test]
    fn test_head_push_tail_pop_is_fifo() {
        let mut seq = Sequence::new();
        seq.push_head(msg(1));
        seq.push_head(msg(2));
        seq.push_head(msg(3));

        assert_eq!(tags(&seq), vec![1, 2, 3]);
        assert_eq!(seq.pop_tail().map(|(_, m)| m.tag.0), Some(1));
        assert_eq!(seq.pop_tail().map(|(_, m)| m.tag.0), Some(2));
        assert_eq!(seq.len(), 1);
    }

    #[test]
    fn test_push_tail_is_read_next() {
        let mut seq = Sequence::new();
        seq.push_head(msg(1));
        seq.push_tail(msg(9));

        assert_eq!(seq.tail().map(|(_, m)| m.tag.0), Some(9));
        assert_eq!(tags(&seq), vec![9, 1]);
    }

    #[test]
    fn test_remove_middle_keeps_links() {
        let mut seq = Sequence::new();
        seq.push_head(msg(1));
        let middle = seq.push_head(msg(2));
        seq.push_head(msg(3));

        assert_eq!(seq.remove(middle).map(|m| m.tag.0), Some(2));
        assert_eq!(tags(&seq), vec![1, 3]);
        assert!(seq.remove(middle).is_none());

        seq.pop_tail();
        seq.pop_tail();
        assert!(seq.is_empty());
        assert!(seq.tail().is_none());
    }

    #[test]
    fn test_remove_ends() {
        let mut seq = Sequence::new();
        let first = seq.push_head(msg(1));
        seq.push_head(msg(2));
        let last = seq.push_head(msg(3));

        seq.remove(last);
        seq.remove(first);
        assert_eq!(tags(&seq), vec![2]);

        seq.push_head(msg(4));
        assert_eq!(tags(&seq), vec![2, 4]);
    }

    #[test]
    fn test_clear() {
        let mut seq = Sequence::new();
        seq.push_head(msg(1));
        seq.push_head(msg(2));
        assert_eq!(seq.clear(), 2);
        assert!(seq.is_empty());
        assert_eq!(tags(&seq), Vec::<u64>::new());
    }
}
