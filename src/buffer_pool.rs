//! Bounded packet buffer pools.
//!
//! A [`PacketPool`] owns a fixed number of equally sized buffers that are allocated up front.
//! Allocating a packet pops a buffer off the free list; dropping the packet pushes it back.
//! Unlike a general allocator the pool never grows: once every buffer is leased, `alloc`
//! reports exhaustion and the caller decides what to drop.

use crate::packet::Packet;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

struct PoolInner {
    name: String,
    buffer_len: usize,
    capacity: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

impl PoolInner {
    fn release(&self, buffer: Vec<u8>) {
        let mut free = self.free.lock();
        debug_assert!(free.len() < self.capacity, "buffer released twice into {}", self.name);
        free.push(buffer);
    }
}

/// Cloneable handle to a fixed-capacity pool of packet buffers.
#[derive(Clone)]
pub struct PacketPool {
    inner: Arc<PoolInner>,
}

impl PacketPool {
    /// Pre-allocate `num_buffers` buffers of `buffer_len` bytes each.
    pub fn new(name: impl Into<String>, num_buffers: usize, buffer_len: usize) -> Self {
        let mut buffers = Vec::with_capacity(num_buffers);
        for _ in 0..num_buffers {
            buffers.push(vec![0u8; buffer_len]);
        }
        Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                buffer_len,
                capacity: num_buffers,
                free: Mutex::new(buffers),
            }),
        }
    }

    /// Allocate a packet with `len` valid bytes.
    ///
    /// Returns `None` when the pool is exhausted or `len` exceeds the buffer length. The
    /// payload contents of a fresh packet are unspecified.
    pub fn alloc(&self, len: usize) -> Option<Packet> {
        if len > self.inner.buffer_len {
            return None;
        }
        let data = self.inner.free.lock().pop()?;
        Some(Packet::from_buffer(
            PooledBuffer {
                pool: self.inner.clone(),
                data: Some(data),
            },
            len,
        ))
    }

    /// Buffers currently free.
    pub fn available(&self) -> usize {
        self.inner.free.lock().len()
    }

    /// Total buffers owned by the pool.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Buffers currently leased out.
    pub fn in_use(&self) -> usize {
        self.capacity() - self.available()
    }

    pub fn buffer_len(&self) -> usize {
        self.inner.buffer_len
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

impl fmt::Debug for PacketPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketPool")
            .field("name", &self.inner.name)
            .field("buffer_len", &self.inner.buffer_len)
            .field("capacity", &self.inner.capacity)
            .field("available", &self.available())
            .finish()
    }
}

/// Exclusive lease on one pool buffer, returned to the pool on drop.
pub(crate) struct PooledBuffer {
    pool: Arc<PoolInner>,
    data: Option<Vec<u8>>,
}

impl PooledBuffer {
    pub(crate) fn as_slice(&self) -> &[u8] {
        self.data.as_deref().unwrap_or_default()
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().unwrap_or_default()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            self.pool.release(data);
        }
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("pool", &self.pool.name)
            .field("len", &self.as_slice().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_drop_returns_buffer() {
        let pool = PacketPool::new("test", 2, 64);
        assert_eq!(pool.available(), 2);

        let pkt = pool.alloc(10).expect("pool has buffers");
        assert_eq!(pkt.len(), 10);
        assert_eq!(pool.available(), 1);
        assert_eq!(pool.in_use(), 1);

        drop(pkt);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn exhausted_pool_returns_none() {
        let pool = PacketPool::new("tiny", 1, 64);
        let _held = pool.alloc(64).unwrap();
        assert!(pool.alloc(1).is_none());
    }

    #[test]
    fn oversized_request_is_rejected() {
        let pool = PacketPool::new("short", 4, 128);
        assert!(pool.alloc(129).is_none());
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn clones_share_the_same_buffers() {
        let pool = PacketPool::new("shared", 3, 32);
        let other = pool.clone();
        let _a = other.alloc(8).unwrap();
        assert_eq!(pool.available(), 2);
    }
}
