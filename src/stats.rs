//! Per-worker counters and the end-of-run report.
//!
//! [`WorkerStats`] is plain data owned by one worker thread; nothing else writes to it. When
//! the worker exits, its stats are moved to the controller and folded into a [`RunReport`].

use crate::config::CopyMode;
use crate::io::SendOutcome;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    /// Local copies that failed to allocate a destination packet.
    pub copy_errors: u64,
    /// Offloaded transfers that completed successfully.
    pub transfers: u64,
    /// Offloaded transfers the engine refused to start.
    pub start_errors: u64,
    /// Offloaded transfers that completed with an error.
    pub transfer_errors: u64,
    /// Bursts dropped because no transfer tracker was free.
    pub tracker_alloc_errors: u64,
    /// Bursts dropped because no completion slot was free.
    pub completion_alloc_errors: u64,
    /// Packets dropped because no destination buffer was free for an offloaded copy.
    pub packet_alloc_errors: u64,
    /// Completion events whose token did not resolve to a live transfer.
    pub completion_errors: u64,
    /// Packets accepted by the output interface.
    pub forwarded: u64,
    /// Packets the output interface did not accept, plus unexpected events.
    pub discards: u64,
    /// Events that were neither packets nor completions.
    pub other_events: u64,
    /// Bursts handed to the copy strategy.
    pub bursts: u64,
    /// Packets still buffered in accumulators when the worker stopped.
    pub pending_freed: u64,
    /// In-flight transfers released during the drain phase.
    pub drained_transfers: u64,
    /// Time spent inside the scheduler poll.
    pub sched_ns: u64,
    /// Wall time spent in the dispatch loop.
    pub total_ns: u64,
    /// Scheduler poll rounds.
    pub rounds: u64,
}

impl WorkerStats {
    pub fn record_send(&mut self, outcome: SendOutcome) {
        self.forwarded += outcome.sent as u64;
        self.discards += outcome.dropped as u64;
    }

    /// Average loop time per scheduling round.
    pub fn total_ns_per_round(&self) -> u64 {
        per_round(self.total_ns, self.rounds)
    }

    /// Average scheduler poll time per scheduling round.
    pub fn sched_ns_per_round(&self) -> u64 {
        per_round(self.sched_ns, self.rounds)
    }

    /// Every error counter summed.
    pub fn errors(&self) -> u64 {
        self.copy_errors
            + self.start_errors
            + self.transfer_errors
            + self.tracker_alloc_errors
            + self.completion_alloc_errors
            + self.packet_alloc_errors
            + self.completion_errors
    }

    /// Fold `other` into `self`.
    pub fn merge(&mut self, other: &WorkerStats) {
        self.copy_errors += other.copy_errors;
        self.transfers += other.transfers;
        self.start_errors += other.start_errors;
        self.transfer_errors += other.transfer_errors;
        self.tracker_alloc_errors += other.tracker_alloc_errors;
        self.completion_alloc_errors += other.completion_alloc_errors;
        self.packet_alloc_errors += other.packet_alloc_errors;
        self.completion_errors += other.completion_errors;
        self.forwarded += other.forwarded;
        self.discards += other.discards;
        self.other_events += other.other_events;
        self.bursts += other.bursts;
        self.pending_freed += other.pending_freed;
        self.drained_transfers += other.drained_transfers;
        self.sched_ns += other.sched_ns;
        self.total_ns += other.total_ns;
        self.rounds += other.rounds;
    }
}

fn per_round(value: u64, rounds: u64) -> u64 {
    if rounds == 0 {
        0
    } else {
        value / rounds
    }
}

/// Everything printed once the run is over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub copy_mode: CopyMode,
    pub burst_size: usize,
    pub packet_len: usize,
    pub cache_size: usize,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
    pub workers: Vec<WorkerStats>,
}

impl RunReport {
    pub fn totals(&self) -> WorkerStats {
        let mut total = WorkerStats::default();
        for worker in &self.workers {
            total.merge(worker);
        }
        total
    }

    /// Forwarded packets per second over the whole run.
    pub fn forwarded_pps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.totals().forwarded as f64 / secs
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n==================\n")?;
        writeln!(f, "Copy forwarder done\n")?;
        writeln!(f, "    copy mode:       {}", self.copy_mode)?;
        writeln!(f, "    burst size:      {}", self.burst_size)?;
        writeln!(f, "    packet length:   {}", self.packet_len)?;
        writeln!(f, "    pool cache size: {}", self.cache_size)?;
        writeln!(f, "    run time:        {:.3} s", self.elapsed.as_secs_f64())?;

        for (idx, stats) in self.workers.iter().enumerate() {
            writeln!(f, "\n    worker {idx}:")?;
            match self.copy_mode {
                CopyMode::Local => {
                    writeln!(f, "        packet copy errors:                 {}", stats.copy_errors)?;
                }
                CopyMode::Offloaded => {
                    writeln!(f, "        successful transfers:               {}", stats.transfers)?;
                    writeln!(f, "        transfer start errors:              {}", stats.start_errors)?;
                    writeln!(f, "        transfer errors:                    {}", stats.transfer_errors)?;
                    writeln!(f, "        transfer tracker allocation errors: {}", stats.tracker_alloc_errors)?;
                    writeln!(f, "        completion slot allocation errors:  {}", stats.completion_alloc_errors)?;
                    writeln!(f, "        copy packet allocation errors:      {}", stats.packet_alloc_errors)?;
                    writeln!(f, "        unresolved completions:             {}", stats.completion_errors)?;
                    writeln!(f, "        transfers released on drain:        {}", stats.drained_transfers)?;
                }
            }
            writeln!(f, "        packets forwarded:                  {}", stats.forwarded)?;
            writeln!(f, "        packets dropped:                    {}", stats.discards)?;
            writeln!(f, "        nanoseconds per schedule round:")?;
            writeln!(f, "            total:    {}", stats.total_ns_per_round())?;
            writeln!(f, "            schedule: {}", stats.sched_ns_per_round())?;
            writeln!(f, "            rounds:   {}", stats.rounds)?;
        }

        writeln!(f, "\n    forwarded rate: {:.0} pps", self.forwarded_pps())?;
        write!(f, "\n==================")
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_round_averages_handle_zero_rounds() {
        let stats = WorkerStats::default();
        assert_eq!(stats.total_ns_per_round(), 0);
        assert_eq!(stats.sched_ns_per_round(), 0);
    }

    #[test]
    fn record_send_splits_forwarded_and_dropped() {
        let mut stats = WorkerStats::default();
        stats.record_send(SendOutcome { sent: 3, dropped: 2 });
        assert_eq!(stats.forwarded, 3);
        assert_eq!(stats.discards, 2);
    }

    #[test]
    fn totals_merge_all_workers() {
        let report = RunReport {
            copy_mode: CopyMode::Offloaded,
            burst_size: 4,
            packet_len: 64,
            cache_size: 0,
            elapsed: Duration::from_secs(2),
            workers: vec![
                WorkerStats {
                    forwarded: 10,
                    transfers: 3,
                    rounds: 5,
                    ..Default::default()
                },
                WorkerStats {
                    forwarded: 6,
                    start_errors: 1,
                    rounds: 5,
                    ..Default::default()
                },
            ],
        };
        let total = report.totals();
        assert_eq!(total.forwarded, 16);
        assert_eq!(total.transfers, 3);
        assert_eq!(total.errors(), 1);
        assert_eq!(total.rounds, 10);
        assert_eq!(report.forwarded_pps(), 8.0);
    }

    #[test]
    fn report_serializes_to_json() {
        let report = RunReport {
            copy_mode: CopyMode::Local,
            burst_size: 2,
            packet_len: 128,
            cache_size: 16,
            elapsed: Duration::from_millis(1500),
            workers: vec![WorkerStats::default()],
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"elapsed\":1500"));
        let back: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.workers.len(), 1);
        assert_eq!(back.elapsed, Duration::from_millis(1500));
    }

    #[test]
    fn text_report_lists_mode_specific_counters() {
        let report = RunReport {
            copy_mode: CopyMode::Local,
            burst_size: 2,
            packet_len: 128,
            cache_size: 16,
            elapsed: Duration::from_secs(1),
            workers: vec![WorkerStats::default()],
        };
        let text = report.to_string();
        assert!(text.contains("packet copy errors"));
        assert!(!text.contains("transfer start errors"));
    }
}
