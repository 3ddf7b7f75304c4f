//! Packet handle travelling through the forwarder.

use crate::buffer_pool::{PacketPool, PooledBuffer};

/// Index of an interface inside the forwarder's interface table.
pub type InterfaceIndex = usize;

/// Owned handle to a pooled packet buffer.
///
/// A [`Packet`] is deliberately not `Clone`: whoever holds the handle is the single owner and
/// either forwards it through a sink or drops it, which frees the buffer back to its pool.
#[derive(Debug)]
pub struct Packet {
    buffer: PooledBuffer,
    len: usize,
    input: InterfaceIndex,
}

impl Packet {
    pub(crate) fn from_buffer(buffer: PooledBuffer, len: usize) -> Packet {
        Packet {
            buffer,
            len,
            input: 0,
        }
    }

    /// Number of valid payload bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_slice()[..self.len]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut self.buffer.as_mut_slice()[..len]
    }

    /// Interface the packet was received on.
    pub fn input_interface(&self) -> InterfaceIndex {
        self.input
    }

    pub fn set_input_interface(&mut self, input: InterfaceIndex) {
        self.input = input;
    }

    /// Builder-style variant of [`Packet::set_input_interface`].
    pub fn with_input_interface(mut self, input: InterfaceIndex) -> Packet {
        self.input = input;
        self
    }

    /// Duplicate payload and metadata into a new packet allocated from `pool`.
    ///
    /// Returns `None` when `pool` cannot supply a buffer of the same length.
    pub fn copy_to(&self, pool: &PacketPool) -> Option<Packet> {
        let mut copy = pool.alloc(self.len)?;
        copy.payload_mut().copy_from_slice(self.payload());
        copy.input = self.input;
        Some(copy)
    }
}
