//! Per-thread dispatch loop.
//!
//! A worker walks through four states:
//!
//! ```text
//! Initializing --start barrier--> Running --run flag cleared--> (free accumulators)
//!     --termination barrier--> Draining --quiet for drain_timeout--> Terminated
//! ```
//!
//! While running it polls the shared scheduler for at most `burst_size` events at a time,
//! routes completions to the [`CompletionHandler`] and packets to the accumulator of their
//! input interface, then copies every accumulator that reached the burst size. After the
//! termination barrier no new packets arrive, so the drain phase only has to release transfers
//! whose completions are still on their way.

use crate::accumulator::BurstAccumulator;
use crate::copy::{CompletionHandler, CopyStrategy};
use crate::event::{Event, EventScheduler};
use crate::io::Egress;
use crate::packet::Packet;
use crate::stats::WorkerStats;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Initializing,
    Running,
    Draining,
    Terminated,
}

/// Process-wide run/stop signal.
///
/// Raised on creation. Cleared by the signal handler or the time limit; workers only read it.
#[derive(Debug, Clone)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    pub fn new() -> Self {
        RunFlag(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// State every worker of a run shares with the controller.
#[derive(Clone)]
pub struct WorkerShared {
    pub scheduler: Arc<dyn EventScheduler>,
    pub run_flag: RunFlag,
    /// Sized for every worker plus the controller.
    pub start_barrier: Arc<Barrier>,
    /// Sized for every worker plus the controller.
    pub term_barrier: Arc<Barrier>,
    pub burst_size: usize,
    pub drain_timeout: Duration,
}

pub struct Worker {
    index: usize,
    shared: WorkerShared,
    copy: CopyStrategy,
    completions: CompletionHandler,
    egress: Egress,
    accumulators: Vec<BurstAccumulator>,
    events: Vec<Event>,
    state: WorkerState,
    stats: WorkerStats,
}

impl Worker {
    /// One accumulator is created per interface known to `egress`.
    pub fn new(
        index: usize,
        shared: WorkerShared,
        copy: CopyStrategy,
        completions: CompletionHandler,
        egress: Egress,
    ) -> Self {
        let accumulators = (0..egress.interfaces().len())
            .map(BurstAccumulator::new)
            .collect();
        let events = Vec::with_capacity(shared.burst_size);
        Self {
            index,
            shared,
            copy,
            completions,
            egress,
            accumulators,
            events,
            state: WorkerState::Initializing,
            stats: WorkerStats::default(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Run the whole life cycle on the calling thread and hand back the final counters.
    ///
    /// A panic while running still clears the run flag and crosses the barriers this worker
    /// has not reached yet, so the controller and the other workers are not left waiting.
    pub fn run(mut self) -> WorkerStats {
        let mut barriers = BarrierGuard::new(self.shared.clone());
        self.initialize(&mut barriers);
        self.dispatch_until_stopped();
        self.stop(&mut barriers);
        self.drain();
        self.state = WorkerState::Terminated;
        debug!(worker = self.index, stats = ?self.stats, "worker terminated");
        self.stats
    }

    fn initialize(&mut self, barriers: &mut BarrierGuard) {
        for acc in &mut self.accumulators {
            acc.clear();
        }
        debug!(worker = self.index, mode = %self.copy.mode(), "worker waiting for start");
        barriers.start();
        self.state = WorkerState::Running;
    }

    fn dispatch_until_stopped(&mut self) {
        let burst_size = self.shared.burst_size;
        let started = Instant::now();

        while self.shared.run_flag.is_running() {
            let poll_start = Instant::now();
            let polled = self.shared.scheduler.poll(burst_size, &mut self.events);
            self.stats.sched_ns += elapsed_ns(poll_start);
            self.stats.rounds += 1;

            if polled == 0 {
                std::hint::spin_loop();
                continue;
            }

            self.dispatch_batch();
            self.copy_ready_bursts();
        }

        self.stats.total_ns = elapsed_ns(started);
    }

    fn dispatch_batch(&mut self) {
        let mut events = std::mem::take(&mut self.events);
        for event in events.drain(..) {
            match event {
                Event::Completion(completion) => {
                    self.completions
                        .handle(completion, &self.egress, &mut self.stats)
                }
                Event::Packet(packet) => self.accumulate(packet),
                Event::Other(tag) => {
                    trace!(worker = self.index, tag, "discarding event");
                    self.stats.other_events += 1;
                    self.stats.discards += 1;
                }
            }
        }
        self.events = events;
    }

    fn accumulate(&mut self, packet: Packet) {
        match self.accumulators.get_mut(packet.input_interface()) {
            Some(acc) if !acc.is_full() => acc.push(packet),
            _ => self.stats.discards += 1,
        }
    }

    /// Only the end of a batch triggers a copy, see [`BurstAccumulator::is_ready`].
    fn copy_ready_bursts(&mut self) {
        let burst_size = self.shared.burst_size;
        for acc in &mut self.accumulators {
            if acc.is_ready(burst_size) {
                let burst = acc.drain(burst_size);
                self.copy
                    .copy_burst(acc.interface(), burst, &self.egress, &mut self.stats);
            }
        }
    }

    fn stop(&mut self, barriers: &mut BarrierGuard) {
        let pending: usize = self.accumulators.iter_mut().map(BurstAccumulator::clear).sum();
        self.stats.pending_freed += pending as u64;
        debug!(worker = self.index, pending, "worker stopped, waiting for peers");
        barriers.terminate();
        self.state = WorkerState::Draining;
    }

    fn drain(&mut self) {
        while let Some(event) = self.shared.scheduler.poll_timeout(self.shared.drain_timeout) {
            match event {
                Event::Completion(completion) => {
                    self.completions.release(completion, &mut self.stats);
                }
                Event::Packet(packet) => {
                    drop(packet);
                    self.stats.discards += 1;
                }
                Event::Other(_) => {
                    self.stats.other_events += 1;
                    self.stats.discards += 1;
                }
            }
        }
    }
}

/// Tracks which barriers of the run a worker has crossed.
struct BarrierGuard {
    shared: WorkerShared,
    started: bool,
    terminated: bool,
}

impl BarrierGuard {
    fn new(shared: WorkerShared) -> Self {
        Self {
            shared,
            started: false,
            terminated: false,
        }
    }

    fn start(&mut self) {
        self.shared.start_barrier.wait();
        self.started = true;
    }

    fn terminate(&mut self) {
        self.shared.term_barrier.wait();
        self.terminated = true;
    }
}

impl Drop for BarrierGuard {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }
        self.shared.run_flag.stop();
        if !self.started {
            self.shared.start_barrier.wait();
        }
        if !self.terminated {
            self.shared.term_barrier.wait();
        }
    }
}

fn elapsed_ns(since: Instant) -> u64 {
    since.elapsed().as_nanos().min(u64::MAX as u128) as u64
}
