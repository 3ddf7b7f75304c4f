//! Packet output and copy offload collaborators.
//!
//! The forwarder does not own any device. It sends through a [`PacketSink`] and submits
//! asynchronous copies to an [`OffloadEngine`]; both are supplied by whoever sets the run up
//! (real I/O, or the software stand-ins in [`crate::sim`]).

use crate::packet::{InterfaceIndex, Packet};
use crate::slot_pool::CompletionSlot;
use crate::transfer::CompletionToken;
use std::sync::Arc;
use thiserror::Error;

/// Output side of the packet I/O.
pub trait PacketSink: Send + Sync {
    /// Try to send `packets` on output queue `queue` of `interface`.
    ///
    /// Sent packets are removed from the front of `packets` and the count is returned. Packets
    /// left in the vector were not accepted and remain owned by the caller.
    fn send(&self, interface: InterfaceIndex, queue: usize, packets: &mut Vec<Packet>) -> usize;
}

/// One batch handed to the offload engine.
#[derive(Debug)]
pub struct TransferRequest {
    /// Token the engine must echo back in the completion event.
    pub token: CompletionToken,
    /// Slot the completion event will occupy.
    pub slot: CompletionSlot,
    /// Completion channel of the submitting worker.
    pub channel: usize,
    /// Number of source/destination segment pairs.
    pub segments: usize,
}

#[derive(Debug, Error)]
#[error("offload engine rejected transfer {token}: {reason}")]
pub struct SubmitRejected {
    pub token: CompletionToken,
    pub reason: String,
}

/// Asynchronous bulk copy facility.
///
/// An accepted request must eventually produce exactly one completion event carrying the same
/// token and the request's slot. A rejected request produces no event; the engine drops the
/// request, which releases its slot.
pub trait OffloadEngine: Send + Sync {
    fn submit(&self, request: TransferRequest) -> Result<(), SubmitRejected>;
}

/// Input side of the packet I/O, controlled by the forwarder.
///
/// Received packets are delivered as [`crate::event::Event::Packet`] through the scheduler.
/// Once `stop` returns no further packet events may be produced.
pub trait Ingress {
    fn start(&mut self) -> std::io::Result<()>;
    fn stop(&mut self);
}

/// Static description of one forwarding interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub name: String,
    /// Output queues configured on the interface, at least one.
    pub out_queues: usize,
}

impl InterfaceInfo {
    pub fn new(name: impl Into<String>, out_queues: usize) -> Self {
        Self {
            name: name.into(),
            out_queues: out_queues.max(1),
        }
    }
}

/// Outcome of one send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SendOutcome {
    pub sent: usize,
    pub dropped: usize,
}

/// Per-worker view of the output side.
///
/// Each worker always uses output queue `worker_index % out_queues` of an interface, so workers
/// never contend on a queue when there are as many queues as workers.
#[derive(Clone)]
pub struct Egress {
    sink: Arc<dyn PacketSink>,
    interfaces: Arc<[InterfaceInfo]>,
    worker_index: usize,
}

impl Egress {
    pub fn new(
        sink: Arc<dyn PacketSink>,
        interfaces: Arc<[InterfaceInfo]>,
        worker_index: usize,
    ) -> Self {
        Self {
            sink,
            interfaces,
            worker_index,
        }
    }

    /// Output queue this worker uses on `interface`.
    pub fn queue_for(&self, interface: InterfaceIndex) -> usize {
        let queues = self
            .interfaces
            .get(interface)
            .map(|info| info.out_queues)
            .unwrap_or(1);
        self.worker_index % queues
    }

    /// Send `packets` and free whatever the sink did not accept.
    ///
    /// `packets` is empty on return.
    pub fn send(&self, interface: InterfaceIndex, packets: &mut Vec<Packet>) -> SendOutcome {
        if packets.is_empty() {
            return SendOutcome::default();
        }
        let requested = packets.len();
        let sent = self
            .sink
            .send(interface, self.queue_for(interface), packets)
            .min(requested);
        let dropped = packets.len();
        debug_assert_eq!(sent + dropped, requested);
        packets.clear();
        SendOutcome { sent, dropped }
    }

    pub fn interfaces(&self) -> &[InterfaceInfo] {
        &self.interfaces
    }
}
