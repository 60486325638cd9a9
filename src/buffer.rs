//! Shared, immutable message payloads.
//!
//! A pushed payload is copied once into a [`SharedBuffer`]. Every queue,
//! confirmation slot and client delivery holding it owns one clone; the
//! storage is freed when the last clone drops.

use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};

/// Reference-counted byte buffer. Never mutated after construction.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedBuffer(Arc<[u8]>);

impl SharedBuffer {
    /// Copy a client payload into a new buffer.
    pub fn copy_from_slice(data: &[u8]) -> Self {
        SharedBuffer(Arc::from(data))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Payload size as carried on the wire.
    pub fn size(&self) -> u32 {
        u32::try_from(self.0.len()).unwrap_or(u32::MAX)
    }

    /// Number of live holders of this buffer.
    pub fn refcount(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// A handle that observes release without keeping the storage alive.
    pub fn downgrade(&self) -> WeakBuffer {
        WeakBuffer(Arc::downgrade(&self.0))
    }
}

impl Deref for SharedBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for SharedBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for SharedBuffer {
    fn from(data: Vec<u8>) -> Self {
        SharedBuffer(Arc::from(data))
    }
}

impl From<&[u8]> for SharedBuffer {
    fn from(data: &[u8]) -> Self {
        SharedBuffer::copy_from_slice(data)
    }
}

impl From<&str> for SharedBuffer {
    fn from(data: &str) -> Self {
        SharedBuffer::copy_from_slice(data.as_bytes())
    }
}

impl fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("len", &self.len())
            .field("refcount", &self.refcount())
            .finish()
    }
}

/// Non-owning observer of a [`SharedBuffer`].
#[derive(Clone, Debug)]
pub struct WeakBuffer(Weak<[u8]>);

impl WeakBuffer {
    /// True once every holder has dropped and the storage is gone.
    pub fn is_released(&self) -> bool {
        self.0.strong_count() == 0
    }

    /// Current number of holders (0 once released).
    pub fn refcount(&self) -> usize {
        self.0.strong_count()
    }

    pub fn upgrade(&self) -> Option<SharedBuffer> {
        self.0.upgrade().map(SharedBuffer)
    }
}
