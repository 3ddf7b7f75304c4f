//! Asynchronous copy through an [`OffloadEngine`].

use crate::buffer_pool::PacketPool;
use crate::io::{OffloadEngine, TransferRequest};
use crate::packet::{InterfaceIndex, Packet};
use crate::slot_pool::CompletionPool;
use crate::stats::WorkerStats;
use crate::transfer::{Transfer, TransferTable};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Builds one [`Transfer`] per burst and submits it to the offload engine.
///
/// Nothing is forwarded here; the copies go out when the completion event comes back.
pub struct OffloadedCopy {
    pool: PacketPool,
    table: TransferTable,
    slots: CompletionPool,
    engine: Arc<dyn OffloadEngine>,
    channel: usize,
}

impl OffloadedCopy {
    /// # Arguments
    /// * `pool` - destination buffers
    /// * `table` - shared transfer tracker pool
    /// * `slots` - this worker's completion slots
    /// * `engine` - where transfers are submitted
    /// * `channel` - completion channel events for this worker are tagged with
    pub fn new(
        pool: PacketPool,
        table: TransferTable,
        slots: CompletionPool,
        engine: Arc<dyn OffloadEngine>,
        channel: usize,
    ) -> Self {
        Self {
            pool,
            table,
            slots,
            engine,
            channel,
        }
    }

    /// Turn `burst` into a transfer and submit it.
    ///
    /// Resources are taken in a fixed order: tracker, one destination per source, completion
    /// slot. Running out of a tracker or slot discards the whole burst; running out of
    /// destination buffers only drops the affected sources. Anything acquired before a failure is
    /// released on the way out.
    pub fn copy_burst(
        &mut self,
        interface: InterfaceIndex,
        burst: Vec<Packet>,
        stats: &mut WorkerStats,
    ) {
        let Some(lease) = self.table.reserve() else {
            stats.tracker_alloc_errors += 1;
            return;
        };

        let mut transfer = Transfer::new(interface, burst.len());
        for src in burst {
            match self.pool.alloc(src.len()) {
                Some(dst) => transfer.push_pair(src, dst),
                None => stats.packet_alloc_errors += 1,
            }
        }
        if transfer.is_empty() {
            return;
        }

        let Some(slot) = self.slots.acquire() else {
            stats.completion_alloc_errors += 1;
            return;
        };

        let segments = transfer.len();
        let token = lease.commit(transfer);
        let request = TransferRequest {
            token,
            slot,
            channel: self.channel,
            segments,
        };

        if let Err(err) = self.engine.submit(request) {
            trace!(channel = self.channel, %err, "transfer not started");
            // No completion will ever arrive for this token.
            drop(self.table.take(token));
            stats.start_errors += 1;
        }
    }
}

impl fmt::Debug for OffloadedCopy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OffloadedCopy")
            .field("pool", &self.pool)
            .field("table", &self.table)
            .field("slots", &self.slots)
            .field("channel", &self.channel)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::SubmitRejected;
    use parking_lot::Mutex;

    /// Keeps accepted requests so the test decides when they finish.
    #[derive(Default)]
    struct RecordingEngine {
        reject: bool,
        accepted: Mutex<Vec<TransferRequest>>,
    }

    impl OffloadEngine for RecordingEngine {
        fn submit(&self, request: TransferRequest) -> Result<(), SubmitRejected> {
            if self.reject {
                return Err(SubmitRejected {
                    token: request.token,
                    reason: "test".into(),
                });
            }
            self.accepted.lock().push(request);
            Ok(())
        }
    }

    struct Fixture {
        rx: PacketPool,
        copy_pool: PacketPool,
        table: TransferTable,
        slots: CompletionPool,
        engine: Arc<RecordingEngine>,
    }

    impl Fixture {
        fn new(copy_room: usize, trackers: usize, slots: usize, reject: bool) -> Self {
            Self {
                rx: PacketPool::new("rx", 8, 64),
                copy_pool: PacketPool::new("copy", copy_room, 64),
                table: TransferTable::new(trackers),
                slots: CompletionPool::new("compl", slots),
                engine: Arc::new(RecordingEngine {
                    reject,
                    ..Default::default()
                }),
            }
        }

        fn strategy(&self) -> OffloadedCopy {
            OffloadedCopy::new(
                self.copy_pool.clone(),
                self.table.clone(),
                self.slots.clone(),
                self.engine.clone(),
                3,
            )
        }

        fn burst(&self, n: usize) -> Vec<Packet> {
            (0..n).map(|_| self.rx.alloc(32).unwrap()).collect()
        }

        fn assert_all_released(&self) {
            assert_eq!(self.rx.available(), self.rx.capacity());
            assert_eq!(self.copy_pool.available(), self.copy_pool.capacity());
            assert_eq!(self.table.available(), self.table.capacity());
            assert_eq!(self.slots.available(), self.slots.capacity());
        }
    }

    #[test]
    fn submits_one_transfer_per_burst() {
        let fx = Fixture::new(8, 2, 2, false);
        let mut stats = WorkerStats::default();

        fx.strategy().copy_burst(1, fx.burst(4), &mut stats);

        let accepted = fx.engine.accepted.lock();
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].segments, 4);
        assert_eq!(accepted[0].channel, 3);
        let token = accepted[0].token;
        let (src, dst, iface) = fx
            .table
            .with_transfer(token, |t| (t.sources().len(), t.destinations().len(), t.interface()))
            .unwrap();
        assert_eq!((src, dst, iface), (4, 4, 1));
        assert_eq!(stats.errors(), 0);
        assert_eq!(fx.slots.available(), 1);
    }

    #[test]
    fn no_tracker_drops_whole_burst() {
        let fx = Fixture::new(8, 0, 2, false);
        let mut stats = WorkerStats::default();

        fx.strategy().copy_burst(0, fx.burst(3), &mut stats);

        assert_eq!(stats.tracker_alloc_errors, 1);
        assert!(fx.engine.accepted.lock().is_empty());
        fx.assert_all_released();
    }

    #[test]
    fn missing_destinations_shrink_the_transfer() {
        let fx = Fixture::new(2, 1, 1, false);
        let mut stats = WorkerStats::default();

        fx.strategy().copy_burst(0, fx.burst(4), &mut stats);

        assert_eq!(stats.packet_alloc_errors, 2);
        assert_eq!(fx.engine.accepted.lock()[0].segments, 2);
        // Two sources went back at once, two are held by the transfer.
        assert_eq!(fx.rx.available(), 6);
    }

    #[test]
    fn empty_transfer_is_not_submitted() {
        let fx = Fixture::new(0, 1, 1, false);
        let mut stats = WorkerStats::default();

        fx.strategy().copy_burst(0, fx.burst(2), &mut stats);

        assert_eq!(stats.packet_alloc_errors, 2);
        assert!(fx.engine.accepted.lock().is_empty());
        fx.assert_all_released();
    }

    #[test]
    fn no_completion_slot_releases_everything() {
        let fx = Fixture::new(8, 1, 0, false);
        let mut stats = WorkerStats::default();

        fx.strategy().copy_burst(0, fx.burst(4), &mut stats);

        assert_eq!(stats.completion_alloc_errors, 1);
        fx.assert_all_released();
    }

    #[test]
    fn rejected_submission_is_cleaned_up_synchronously() {
        let fx = Fixture::new(8, 1, 1, true);
        let mut stats = WorkerStats::default();
        let mut strategy = fx.strategy();

        for _ in 0..3 {
            strategy.copy_burst(0, fx.burst(2), &mut stats);
        }

        assert_eq!(stats.start_errors, 3);
        fx.assert_all_released();
    }
}
