//! Events delivered by the shared scheduler.

use crate::packet::Packet;
use crate::slot_pool::CompletionSlot;
use crate::transfer::CompletionToken;
use std::time::Duration;

/// Result of one offloaded copy, delivered as a scheduler event.
///
/// The event owns the completion slot the transfer was submitted with, so consuming the event
/// is what releases the slot. Handling it is a single-use capability: the event is moved into
/// the handler and cannot be processed twice.
#[derive(Debug)]
pub struct CompletionEvent {
    pub token: CompletionToken,
    pub success: bool,
    slot: CompletionSlot,
}

impl CompletionEvent {
    pub fn new(token: CompletionToken, success: bool, slot: CompletionSlot) -> Self {
        Self {
            token,
            success,
            slot,
        }
    }
}

/// Coarse event classification used by the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Packet,
    Completion,
    Other,
}

/// Anything the scheduler can hand to a worker.
#[derive(Debug)]
pub enum Event {
    /// A packet received on one of the input interfaces.
    Packet(Packet),
    /// An offloaded copy finished, successfully or not.
    Completion(CompletionEvent),
    /// Any other event type; carries an opaque tag for diagnostics.
    Other(u32),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Packet(_) => EventKind::Packet,
            Event::Completion(_) => EventKind::Completion,
            Event::Other(_) => EventKind::Other,
        }
    }
}

/// Shared multi-producer/multi-consumer event source.
///
/// Each event is delivered to exactly one caller. Implementations must be safe to poll from
/// every worker thread concurrently.
pub trait EventScheduler: Send + Sync {
    /// Move up to `max` ready events into `out` without blocking; returns how many were added.
    fn poll(&self, max: usize, out: &mut Vec<Event>) -> usize;

    /// Wait up to `timeout` for a single event.
    fn poll_timeout(&self, timeout: Duration) -> Option<Event>;
}
