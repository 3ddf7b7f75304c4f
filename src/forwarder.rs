//! Run orchestration.
//!
//! The [`Forwarder`] owns everything that is sized once from the configuration (copy pool,
//! transfer table, per-worker completion pools), spawns the workers and runs the start/stop
//! sequence:
//!
//! 1. spawn `workers` named threads and, once all of them exist, let them park on the start
//!    barrier (a failed spawn releases the threads already created and returns the error);
//! 2. cross the start barrier, start ingress;
//! 3. wait until the run flag is cleared or the time limit expires;
//! 4. stop ingress, cross the termination barrier so workers begin draining;
//! 5. join every worker and fold their counters into a [`RunReport`].

use crate::buffer_pool::PacketPool;
use crate::config::{Capabilities, CopyMode, ForwarderConfig, MAX_OUT_QUEUES};
use crate::copy::{CompletionHandler, CopyStrategy, LocalCopy, OffloadedCopy};
use crate::error::ForwarderError;
use crate::event::EventScheduler;
use crate::io::{Egress, InterfaceInfo, Ingress, OffloadEngine, PacketSink};
use crate::slot_pool::CompletionPool;
use crate::stats::{RunReport, WorkerStats};
use crate::threading::{pin_to_core, worker_core, GateTicket, StartGate};
use crate::transfer::TransferTable;
use crate::worker::{RunFlag, Worker, WorkerShared};
use std::sync::{Arc, Barrier};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const CONTROL_INTERVAL: Duration = Duration::from_millis(10);

/// External pieces the forwarder runs against.
pub struct Collaborators {
    pub scheduler: Arc<dyn EventScheduler>,
    pub sink: Arc<dyn PacketSink>,
    /// Required in offloaded mode, ignored otherwise.
    pub engine: Option<Arc<dyn OffloadEngine>>,
}

pub struct Forwarder {
    config: ForwarderConfig,
    interfaces: Arc<[InterfaceInfo]>,
    copy_pool: PacketPool,
    table: TransferTable,
    completion_pools: Vec<CompletionPool>,
    run_flag: RunFlag,
}

impl Forwarder {
    /// Validate `config` and create the copy resources.
    ///
    /// Each interface gets one output queue per worker, capped at [`MAX_OUT_QUEUES`].
    pub fn new(config: ForwarderConfig, capabilities: &Capabilities) -> Result<Self, ForwarderError> {
        config.validate(capabilities)?;

        let out_queues = config.workers.min(MAX_OUT_QUEUES);
        let interfaces: Arc<[InterfaceInfo]> = config
            .interfaces
            .iter()
            .map(|name| InterfaceInfo::new(name.clone(), out_queues))
            .collect();

        let copy_pool = PacketPool::new("copy", config.num_pkts, config.pkt_len);
        let (table, completion_pools) = match config.copy_mode {
            CopyMode::Local => (TransferTable::new(0), Vec::new()),
            CopyMode::Offloaded => (
                TransferTable::new(config.num_pkts),
                (0..config.workers)
                    .map(|idx| CompletionPool::new(format!("compl-{idx}"), config.num_pkts))
                    .collect(),
            ),
        };

        info!(
            mode = %config.copy_mode,
            workers = config.workers,
            burst = config.burst_size,
            pkts = config.num_pkts,
            len = config.pkt_len,
            "forwarder configured"
        );

        Ok(Self {
            config,
            interfaces,
            copy_pool,
            table,
            completion_pools,
            run_flag: RunFlag::new(),
        })
    }

    pub fn config(&self) -> &ForwarderConfig {
        &self.config
    }

    pub fn interfaces(&self) -> &[InterfaceInfo] {
        &self.interfaces
    }

    /// Destination pool shared by both copy strategies.
    pub fn copy_pool(&self) -> &PacketPool {
        &self.copy_pool
    }

    /// Tracker pool; offload engines need it to reach in-flight buffers.
    pub fn transfer_table(&self) -> &TransferTable {
        &self.table
    }

    pub fn completion_pools(&self) -> &[CompletionPool] {
        &self.completion_pools
    }

    /// Clearing this flag ends the run.
    pub fn run_flag(&self) -> RunFlag {
        self.run_flag.clone()
    }

    /// Run until the run flag is cleared or the configured time limit passes.
    pub fn run(
        &self,
        collaborators: Collaborators,
        ingress: &mut dyn Ingress,
    ) -> Result<RunReport, ForwarderError> {
        let workers = self.config.workers;
        let shared = WorkerShared {
            scheduler: collaborators.scheduler,
            run_flag: self.run_flag.clone(),
            start_barrier: Arc::new(Barrier::new(workers + 1)),
            term_barrier: Arc::new(Barrier::new(workers + 1)),
            burst_size: self.config.burst_size,
            drain_timeout: self.config.drain_timeout,
        };

        let mut pending = Vec::with_capacity(workers);
        for index in 0..workers {
            let copy = self.copy_strategy(index, collaborators.engine.as_ref())?;
            let egress = Egress::new(collaborators.sink.clone(), self.interfaces.clone(), index);
            pending.push(Worker::new(
                index,
                shared.clone(),
                copy,
                CompletionHandler::new(self.table.clone()),
                egress,
            ));
        }

        // Nobody touches a barrier until every thread exists, so a failed spawn can still
        // release the threads already running.
        let gate = StartGate::new();
        let mut handles = Vec::with_capacity(workers);
        for worker in pending {
            match self.spawn_worker(worker, gate.ticket()) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    warn!(%err, spawned = handles.len(), "aborting start");
                    drop(gate);
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(err);
                }
            }
        }
        gate.open(handles.len());

        shared.start_barrier.wait();
        let started = Instant::now();
        info!(workers, "forwarding started");

        if let Err(err) = ingress.start() {
            warn!(%err, "failed to start ingress");
            self.run_flag.stop();
            shared.term_barrier.wait();
            join_workers(handles)?;
            return Err(ForwarderError::Ingress(err));
        }

        self.wait_for_stop(started);
        let elapsed = started.elapsed();

        ingress.stop();
        debug!("ingress stopped, releasing workers into drain");
        shared.term_barrier.wait();
        let stats = join_workers(handles)?;
        info!(elapsed_ms = elapsed.as_millis() as u64, "forwarding finished");

        Ok(RunReport {
            copy_mode: self.config.copy_mode,
            burst_size: self.config.burst_size,
            packet_len: self.config.pkt_len,
            cache_size: self.config.cache_size,
            elapsed,
            workers: stats,
        })
    }

    fn copy_strategy(
        &self,
        index: usize,
        engine: Option<&Arc<dyn OffloadEngine>>,
    ) -> Result<CopyStrategy, ForwarderError> {
        match self.config.copy_mode {
            CopyMode::Local => Ok(LocalCopy::new(self.copy_pool.clone()).into()),
            CopyMode::Offloaded => {
                let engine = engine.ok_or(ForwarderError::MissingOffloadEngine)?;
                Ok(OffloadedCopy::new(
                    self.copy_pool.clone(),
                    self.table.clone(),
                    self.completion_pools[index].clone(),
                    engine.clone(),
                    index,
                )
                .into())
            }
        }
    }

    fn spawn_worker(
        &self,
        worker: Worker,
        ticket: GateTicket,
    ) -> Result<JoinHandle<WorkerStats>, ForwarderError> {
        let index = worker.index();
        let pin = self.config.pin_workers;
        thread::Builder::new()
            .name(format!("dmafwd-worker-{index}"))
            .spawn(move || {
                if !ticket.wait() {
                    return WorkerStats::default();
                }
                if pin {
                    let core = worker_core(index);
                    if !pin_to_core(core) {
                        warn!(worker = index, core, "failed to pin worker");
                    }
                }
                worker.run()
            })
            .map_err(|source| ForwarderError::Spawn {
                worker: index,
                source,
            })
    }

    fn wait_for_stop(&self, started: Instant) {
        while self.run_flag.is_running() {
            if let Some(limit) = self.config.run_time {
                if started.elapsed() >= limit {
                    debug!("time limit reached");
                    self.run_flag.stop();
                    break;
                }
            }
            thread::sleep(CONTROL_INTERVAL);
        }
    }
}

fn join_workers(
    handles: Vec<JoinHandle<WorkerStats>>,
) -> Result<Vec<WorkerStats>, ForwarderError> {
    handles
        .into_iter()
        .enumerate()
        .map(|(index, handle)| {
            handle
                .join()
                .map_err(|_| ForwarderError::WorkerPanicked(index))
        })
        .collect()
}
