//! Synchronous CPU copy.

use crate::buffer_pool::PacketPool;
use crate::io::Egress;
use crate::packet::{InterfaceIndex, Packet};
use crate::stats::WorkerStats;

/// Duplicates each packet of a burst into the copy pool and forwards the copies right away.
#[derive(Debug)]
pub struct LocalCopy {
    pool: PacketPool,
    out: Vec<Packet>,
}

impl LocalCopy {
    pub fn new(pool: PacketPool) -> Self {
        Self {
            pool,
            out: Vec::new(),
        }
    }

    /// Copy `burst` and send the copies out of `interface`.
    ///
    /// Every source packet is freed once it has been duplicated (or failed to be). Copies the
    /// sink does not accept are freed and counted as drops.
    pub fn copy_burst(
        &mut self,
        interface: InterfaceIndex,
        burst: Vec<Packet>,
        egress: &Egress,
        stats: &mut WorkerStats,
    ) {
        self.out.reserve(burst.len());
        for src in burst {
            match src.copy_to(&self.pool) {
                Some(dst) => self.out.push(dst),
                None => stats.copy_errors += 1,
            }
        }
        stats.record_send(egress.send(interface, &mut self.out));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{InterfaceInfo, PacketSink};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Accepts up to `limit` packets per call, dropping what it accepts.
    struct CountingSink {
        limit: usize,
        accepted: AtomicUsize,
    }

    impl PacketSink for CountingSink {
        fn send(&self, _interface: InterfaceIndex, _queue: usize, packets: &mut Vec<Packet>) -> usize {
            let n = self.limit.min(packets.len());
            packets.drain(..n);
            self.accepted.fetch_add(n, Ordering::Relaxed);
            n
        }
    }

    fn egress(limit: usize) -> (Egress, Arc<CountingSink>) {
        let sink = Arc::new(CountingSink {
            limit,
            accepted: AtomicUsize::new(0),
        });
        let interfaces: Arc<[InterfaceInfo]> = vec![InterfaceInfo::new("if0", 1)].into();
        (Egress::new(sink.clone(), interfaces, 0), sink)
    }

    fn burst(pool: &PacketPool, n: usize) -> Vec<Packet> {
        (0..n)
            .map(|i| {
                let mut pkt = pool.alloc(16).unwrap();
                pkt.payload_mut().fill(i as u8);
                pkt
            })
            .collect()
    }

    #[test]
    fn copies_and_forwards_whole_burst() {
        let rx = PacketPool::new("rx", 4, 64);
        let copy_pool = PacketPool::new("copy", 4, 64);
        let (egress, sink) = egress(usize::MAX);
        let mut copy = LocalCopy::new(copy_pool.clone());
        let mut stats = WorkerStats::default();

        copy.copy_burst(0, burst(&rx, 4), &egress, &mut stats);

        assert_eq!(stats.forwarded, 4);
        assert_eq!(stats.discards, 0);
        assert_eq!(stats.copy_errors, 0);
        assert_eq!(sink.accepted.load(Ordering::Relaxed), 4);
        assert_eq!(rx.available(), 4);
        assert_eq!(copy_pool.available(), 4);
    }

    #[test]
    fn exhausted_copy_pool_counts_errors_and_frees_sources() {
        let rx = PacketPool::new("rx", 3, 64);
        let copy_pool = PacketPool::new("copy", 1, 64);
        let (egress, _sink) = egress(usize::MAX);
        let mut copy = LocalCopy::new(copy_pool);
        let mut stats = WorkerStats::default();

        copy.copy_burst(0, burst(&rx, 3), &egress, &mut stats);

        assert_eq!(stats.forwarded, 1);
        assert_eq!(stats.copy_errors, 2);
        assert_eq!(rx.available(), 3);
    }

    #[test]
    fn backpressure_drops_unsent_copies() {
        let rx = PacketPool::new("rx", 5, 64);
        let copy_pool = PacketPool::new("copy", 5, 64);
        let (egress, _sink) = egress(3);
        let mut copy = LocalCopy::new(copy_pool.clone());
        let mut stats = WorkerStats::default();

        copy.copy_burst(0, burst(&rx, 5), &egress, &mut stats);

        assert_eq!(stats.forwarded, 3);
        assert_eq!(stats.discards, 2);
        assert_eq!(copy_pool.available(), 5);
    }

    proptest! {
        #[test]
        fn every_packet_is_accounted_once(k in 0usize..=32, copy_room in 0usize..=32, limit in 0usize..=32) {
            let rx = PacketPool::new("rx", 32, 64);
            let copy_pool = PacketPool::new("copy", copy_room, 64);
            let (egress, _sink) = egress(limit);
            let mut copy = LocalCopy::new(copy_pool.clone());
            let mut stats = WorkerStats::default();

            copy.copy_burst(0, burst(&rx, k), &egress, &mut stats);

            prop_assert_eq!(stats.forwarded + stats.discards + stats.copy_errors, k as u64);
            prop_assert_eq!(rx.available(), 32);
            prop_assert_eq!(copy_pool.available(), copy_room);
        }
    }
}
