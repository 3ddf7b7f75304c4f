//! Completion event handling for offloaded copies.

use crate::event::CompletionEvent;
use crate::io::Egress;
use crate::stats::WorkerStats;
use crate::transfer::TransferTable;
use tracing::warn;

/// Redeems completion events against the shared [`TransferTable`].
///
/// The event is consumed by every method here, so a given completion can release its
/// transfer at most once.
#[derive(Debug, Clone)]
pub struct CompletionHandler {
    table: TransferTable,
}

impl CompletionHandler {
    pub fn new(table: TransferTable) -> Self {
        Self { table }
    }

    /// Forward the copies of a successful transfer, or discard them on failure.
    ///
    /// Source packets, the tracker and the completion slot are released either way.
    pub fn handle(&self, event: CompletionEvent, egress: &Egress, stats: &mut WorkerStats) {
        let Some(transfer) = self.table.take(event.token) else {
            warn!(token = %event.token, "completion for unknown transfer");
            stats.completion_errors += 1;
            return;
        };

        let interface = transfer.interface();
        let (sources, mut destinations) = transfer.into_parts();
        drop(sources);

        if event.success {
            stats.record_send(egress.send(interface, &mut destinations));
            stats.transfers += 1;
        } else {
            drop(destinations);
            stats.transfer_errors += 1;
        }
    }

    /// Release a transfer without forwarding anything.
    ///
    /// Used while draining after shutdown. Returns whether the event resolved to a transfer.
    pub fn release(&self, event: CompletionEvent, stats: &mut WorkerStats) -> bool {
        match self.table.take(event.token) {
            Some(transfer) => {
                drop(transfer);
                stats.drained_transfers += 1;
                true
            }
            None => {
                stats.completion_errors += 1;
                false
            }
        }
    }

    pub fn table(&self) -> &TransferTable {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_pool::PacketPool;
    use crate::io::{InterfaceInfo, PacketSink};
    use crate::packet::{InterfaceIndex, Packet};
    use crate::slot_pool::CompletionPool;
    use crate::transfer::{CompletionToken, Transfer};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct Capture {
        limit: Option<usize>,
        sent: Mutex<Vec<(InterfaceIndex, Vec<u8>)>>,
    }

    impl PacketSink for Capture {
        fn send(&self, interface: InterfaceIndex, _queue: usize, packets: &mut Vec<Packet>) -> usize {
            let n = self.limit.unwrap_or(usize::MAX).min(packets.len());
            let mut sent = self.sent.lock();
            for pkt in packets.drain(..n) {
                sent.push((interface, pkt.payload().to_vec()));
            }
            n
        }
    }

    struct Fixture {
        rx: PacketPool,
        copy_pool: PacketPool,
        table: TransferTable,
        slots: CompletionPool,
        sink: Arc<Capture>,
        egress: Egress,
    }

    impl Fixture {
        fn new(limit: Option<usize>) -> Self {
            let sink = Arc::new(Capture {
                limit,
                ..Default::default()
            });
            let interfaces: Arc<[InterfaceInfo]> =
                vec![InterfaceInfo::new("if0", 1), InterfaceInfo::new("if1", 1)].into();
            Self {
                rx: PacketPool::new("rx", 8, 64),
                copy_pool: PacketPool::new("copy", 8, 64),
                table: TransferTable::new(4),
                slots: CompletionPool::new("compl", 4),
                egress: Egress::new(sink.clone(), interfaces, 0),
                sink,
            }
        }

        /// Commit a transfer of `n` pairs on `interface` with copied payloads.
        fn in_flight(&self, interface: InterfaceIndex, n: usize) -> CompletionToken {
            let mut transfer = Transfer::new(interface, n);
            for i in 0..n {
                let mut src = self.rx.alloc(4).unwrap();
                src.payload_mut().fill(i as u8 + 1);
                transfer.push_pair(src, self.copy_pool.alloc(4).unwrap());
            }
            let token = self.table.reserve().unwrap().commit(transfer);
            self.table.with_transfer(token, Transfer::copy_payloads).unwrap();
            token
        }

        fn event(&self, token: CompletionToken, success: bool) -> CompletionEvent {
            CompletionEvent::new(token, success, self.slots.acquire().unwrap())
        }

        fn assert_all_released(&self) {
            assert_eq!(self.rx.available(), 8);
            assert_eq!(self.copy_pool.available(), 8);
            assert_eq!(self.table.available(), 4);
            assert_eq!(self.slots.available(), 4);
        }
    }

    #[test]
    fn success_forwards_destinations_on_owning_interface() {
        let fx = Fixture::new(None);
        let handler = CompletionHandler::new(fx.table.clone());
        let mut stats = WorkerStats::default();
        let token = fx.in_flight(1, 2);

        handler.handle(fx.event(token, true), &fx.egress, &mut stats);

        assert_eq!(stats.transfers, 1);
        assert_eq!(stats.forwarded, 2);
        let sent = fx.sink.sent.lock();
        assert_eq!(sent[0], (1, vec![1; 4]));
        assert_eq!(sent[1], (1, vec![2; 4]));
        drop(sent);
        fx.assert_all_released();
    }

    #[test]
    fn failure_frees_destinations_without_sending() {
        let fx = Fixture::new(None);
        let handler = CompletionHandler::new(fx.table.clone());
        let mut stats = WorkerStats::default();
        let token = fx.in_flight(0, 2);

        handler.handle(fx.event(token, false), &fx.egress, &mut stats);

        assert_eq!(stats.transfer_errors, 1);
        assert_eq!(stats.forwarded, 0);
        assert!(fx.sink.sent.lock().is_empty());
        fx.assert_all_released();
    }

    #[test]
    fn short_send_counts_drops() {
        let fx = Fixture::new(Some(1));
        let handler = CompletionHandler::new(fx.table.clone());
        let mut stats = WorkerStats::default();
        let token = fx.in_flight(0, 3);

        handler.handle(fx.event(token, true), &fx.egress, &mut stats);

        assert_eq!(stats.forwarded, 1);
        assert_eq!(stats.discards, 2);
        fx.sink.sent.lock().clear();
        fx.assert_all_released();
    }

    #[test]
    fn duplicate_completion_only_releases_slot() {
        let fx = Fixture::new(None);
        let handler = CompletionHandler::new(fx.table.clone());
        let mut stats = WorkerStats::default();
        let token = fx.in_flight(0, 1);

        handler.handle(fx.event(token, false), &fx.egress, &mut stats);
        handler.handle(fx.event(token, true), &fx.egress, &mut stats);

        assert_eq!(stats.transfer_errors, 1);
        assert_eq!(stats.completion_errors, 1);
        assert_eq!(stats.transfers, 0);
        fx.assert_all_released();
    }

    #[test]
    fn release_skips_forwarding() {
        let fx = Fixture::new(None);
        let handler = CompletionHandler::new(fx.table.clone());
        let mut stats = WorkerStats::default();
        let token = fx.in_flight(0, 2);

        assert!(handler.release(fx.event(token, true), &mut stats));
        assert!(!handler.release(fx.event(token, true), &mut stats));

        assert_eq!(stats.drained_transfers, 1);
        assert_eq!(stats.completion_errors, 1);
        assert_eq!(stats.forwarded, 0);
        assert!(fx.sink.sent.lock().is_empty());
        fx.assert_all_released();
    }
}
