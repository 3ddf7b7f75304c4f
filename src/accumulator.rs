//! Per-interface burst accumulation.

use crate::packet::{InterfaceIndex, Packet};

/// Upper bound on segments per copy, and therefore on the burst size.
pub const MAX_BURST: usize = 32;

/// Packets a single accumulator can hold: one full burst plus one scheduling batch.
pub const ACCUMULATOR_CAPACITY: usize = MAX_BURST * 2;

/// FIFO buffer of received packets for one input interface.
///
/// Packets are appended as they arrive and handed to the copy strategy in bursts of exactly
/// the configured size. The accumulator never drops anything itself.
#[derive(Debug)]
pub struct BurstAccumulator {
    interface: InterfaceIndex,
    packets: Vec<Packet>,
    capacity: usize,
}

impl BurstAccumulator {
    pub fn new(interface: InterfaceIndex) -> Self {
        Self::with_capacity(interface, ACCUMULATOR_CAPACITY)
    }

    pub fn with_capacity(interface: InterfaceIndex, capacity: usize) -> Self {
        Self {
            interface,
            packets: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a packet. The caller checks [`BurstAccumulator::is_full`] first.
    pub fn push(&mut self, packet: Packet) {
        debug_assert!(!self.is_full(), "accumulator {} overflow", self.interface);
        self.packets.push(packet);
    }

    /// Whether a burst of `threshold` packets can be drained.
    ///
    /// Only checked at the end of each scheduling batch. An interface that trickles in fewer
    /// than `threshold` packets keeps them buffered until more arrive or the worker stops; small
    /// bursts trade latency for copy efficiency.
    pub fn is_ready(&self, threshold: usize) -> bool {
        threshold > 0 && self.packets.len() >= threshold
    }

    /// Remove the first `n` packets in arrival order; the remainder moves to the front.
    pub fn drain(&mut self, n: usize) -> Vec<Packet> {
        let n = n.min(self.packets.len());
        self.packets.drain(..n).collect()
    }

    /// Free every buffered packet, returning how many there were.
    pub fn clear(&mut self) -> usize {
        let count = self.packets.len();
        self.packets.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.packets.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn interface(&self) -> InterfaceIndex {
        self.interface
    }
}
