//! Offloaded-copy transfer tracking.
//!
//! A [`Transfer`] is the persisted continuation of one offloaded copy: the source packets, the
//! destination packets they are being copied into, and the interface the result goes back out
//! of. Once submitted it lives in the shared [`TransferTable`] and is reachable only through its
//! [`CompletionToken`]. The table is also the tracker pool: it has a fixed number of slots and
//! reserving one fails once they are all taken.
//!
//! Life cycle of a slot:
//!
//! ```text
//! free --reserve()--> reserved --commit()--> live --take()--> free
//!                        |                                 ^
//!                        +------ lease dropped ------------+
//! ```
//!
//! Every slot carries a generation that is bumped when the slot is freed, so a token that was
//! already redeemed can never resolve to a later transfer stored in the same slot.

use crate::packet::{InterfaceIndex, Packet};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Correlation handle linking a completion event to its live [`Transfer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompletionToken(u64);

impl CompletionToken {
    fn new(index: u32, generation: u32) -> Self {
        CompletionToken(((generation as u64) << 32) | index as u64)
    }

    fn index(self) -> usize {
        (self.0 & u32::MAX as u64) as usize
    }

    fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Display for CompletionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.index(), self.generation())
    }
}

/// One offloaded-copy batch: index-aligned source and destination packets.
#[derive(Debug)]
pub struct Transfer {
    interface: InterfaceIndex,
    src: Vec<Packet>,
    dst: Vec<Packet>,
}

impl Transfer {
    pub fn new(interface: InterfaceIndex, capacity: usize) -> Self {
        Self {
            interface,
            src: Vec::with_capacity(capacity),
            dst: Vec::with_capacity(capacity),
        }
    }

    /// Record one source/destination pair.
    pub fn push_pair(&mut self, src: Packet, dst: Packet) {
        debug_assert_eq!(src.len(), dst.len());
        self.src.push(src);
        self.dst.push(dst);
    }

    /// Number of pairs; source and destination counts are always equal.
    pub fn len(&self) -> usize {
        debug_assert_eq!(self.src.len(), self.dst.len());
        self.src.len()
    }

    pub fn is_empty(&self) -> bool {
        self.src.is_empty()
    }

    pub fn interface(&self) -> InterfaceIndex {
        self.interface
    }

    pub fn sources(&self) -> &[Packet] {
        &self.src
    }

    pub fn destinations(&self) -> &[Packet] {
        &self.dst
    }

    /// Copy every source payload into its destination.
    ///
    /// This is what an offload engine does while the transfer is in flight.
    pub fn copy_payloads(&mut self) {
        for (src, dst) in self.src.iter().zip(self.dst.iter_mut()) {
            dst.payload_mut().copy_from_slice(src.payload());
            dst.set_input_interface(src.input_interface());
        }
    }

    /// Split into `(sources, destinations)`.
    pub fn into_parts(self) -> (Vec<Packet>, Vec<Packet>) {
        (self.src, self.dst)
    }
}

enum SlotState {
    Free,
    Reserved,
    Live(Transfer),
}

struct Slot {
    generation: u32,
    state: SlotState,
}

struct TableInner {
    slots: Vec<Mutex<Slot>>,
    free: Mutex<Vec<u32>>,
}

impl TableInner {
    /// Return a slot to the free list, bumping its generation.
    fn free_slot(&self, index: usize, slot: &mut Slot) {
        slot.state = SlotState::Free;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.lock().push(index as u32);
    }
}

/// Fixed-capacity tracker pool holding in-flight transfers by token.
#[derive(Clone)]
pub struct TransferTable {
    inner: Arc<TableInner>,
}

impl TransferTable {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(u32::MAX as usize);
        let slots = (0..capacity)
            .map(|_| {
                Mutex::new(Slot {
                    generation: 0,
                    state: SlotState::Free,
                })
            })
            .collect();
        // Reverse so the lowest index is handed out first.
        let free = (0..capacity as u32).rev().collect();
        Self {
            inner: Arc::new(TableInner {
                slots,
                free: Mutex::new(free),
            }),
        }
    }

    /// Reserve a tracker slot, or `None` when the pool is exhausted.
    pub fn reserve(&self) -> Option<TrackerLease> {
        let index = self.inner.free.lock().pop()?;
        let mut slot = self.inner.slots[index as usize].lock();
        debug_assert!(matches!(slot.state, SlotState::Free));
        slot.state = SlotState::Reserved;
        let token = CompletionToken::new(index, slot.generation);
        drop(slot);
        Some(TrackerLease {
            table: self.clone(),
            token,
            committed: false,
        })
    }

    /// Redeem a token, handing the transfer back to the caller and freeing its slot.
    ///
    /// Returns `None` if the token is stale or was never committed.
    pub fn take(&self, token: CompletionToken) -> Option<Transfer> {
        let index = token.index();
        let mut slot = self.inner.slots.get(index)?.lock();
        if slot.generation != token.generation() || !matches!(slot.state, SlotState::Live(_)) {
            return None;
        }
        let state = std::mem::replace(&mut slot.state, SlotState::Free);
        self.inner.free_slot(index, &mut slot);
        match state {
            SlotState::Live(transfer) => Some(transfer),
            SlotState::Free | SlotState::Reserved => None,
        }
    }

    /// Run `f` against the live transfer behind `token`.
    ///
    /// Offload engines use this to reach the buffers while the transfer is in flight.
    pub fn with_transfer<R>(
        &self,
        token: CompletionToken,
        f: impl FnOnce(&mut Transfer) -> R,
    ) -> Option<R> {
        let mut slot = self.inner.slots.get(token.index())?.lock();
        if slot.generation != token.generation() {
            return None;
        }
        match &mut slot.state {
            SlotState::Live(transfer) => Some(f(transfer)),
            SlotState::Free | SlotState::Reserved => None,
        }
    }

    /// Slots not reserved or live.
    pub fn available(&self) -> usize {
        self.inner.free.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.slots.len()
    }

    fn release_reserved(&self, token: CompletionToken) {
        let index = token.index();
        let mut slot = self.inner.slots[index].lock();
        if slot.generation == token.generation() && matches!(slot.state, SlotState::Reserved) {
            self.inner.free_slot(index, &mut slot);
        }
    }

    fn store(&self, token: CompletionToken, transfer: Transfer) {
        let mut slot = self.inner.slots[token.index()].lock();
        debug_assert_eq!(slot.generation, token.generation());
        debug_assert!(matches!(slot.state, SlotState::Reserved));
        slot.state = SlotState::Live(transfer);
    }
}

impl fmt::Debug for TransferTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferTable")
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .finish()
    }
}

/// A reserved tracker slot that has not been populated yet.
///
/// Dropping the lease without committing releases the slot.
pub struct TrackerLease {
    table: TransferTable,
    token: CompletionToken,
    committed: bool,
}

impl TrackerLease {
    pub fn token(&self) -> CompletionToken {
        self.token
    }

    /// Store the populated transfer; from now on it is reachable only through the token.
    pub fn commit(mut self, transfer: Transfer) -> CompletionToken {
        self.table.store(self.token, transfer);
        self.committed = true;
        self.token
    }
}

impl Drop for TrackerLease {
    fn drop(&mut self) {
        if !self.committed {
            self.table.release_reserved(self.token);
        }
    }
}

impl fmt::Debug for TrackerLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerLease")
            .field("token", &self.token)
            .field("committed", &self.committed)
            .finish()
    }
}
