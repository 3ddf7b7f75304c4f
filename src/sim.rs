//! Software stand-ins for the packet I/O, scheduler and offload hardware.
//!
//! These let the forwarder run end to end inside one process: the binary uses them as its
//! runtime, and the integration tests and benches drive them directly.

use crate::buffer_pool::PacketPool;
use crate::event::{CompletionEvent, Event, EventScheduler};
use crate::io::{Ingress, OffloadEngine, PacketSink, SubmitRejected, TransferRequest};
use crate::packet::{InterfaceIndex, Packet};
use crate::transfer::{Transfer, TransferTable};
use crossbeam_channel::{unbounded, Receiver, Select, Sender, TryRecvError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace};

/// Scheduler backed by crossbeam channels.
///
/// Packet and other events share one queue; each completion channel has a queue of its own.
/// Completion queues are always polled first.
pub struct ChannelScheduler {
    events_tx: Sender<Event>,
    events_rx: Receiver<Event>,
    completions: Vec<(Sender<Event>, Receiver<Event>)>,
}

impl ChannelScheduler {
    /// Create a scheduler with `completion_channels` completion queues (at least one).
    pub fn new(completion_channels: usize) -> Self {
        let (events_tx, events_rx) = unbounded();
        let completions = (0..completion_channels.max(1)).map(|_| unbounded()).collect();
        Self {
            events_tx,
            events_rx,
            completions,
        }
    }

    /// Queue a packet or other event.
    pub fn inject(&self, event: Event) {
        // Both ends live in `self`, so the channel cannot be disconnected.
        let _ = self.events_tx.send(event);
    }

    /// Queue a completion on `channel`; out-of-range channels wrap around.
    pub fn post_completion(&self, channel: usize, event: CompletionEvent) {
        let (tx, _) = &self.completions[channel % self.completions.len()];
        let _ = tx.send(Event::Completion(event));
    }

    /// Events queued but not yet polled.
    pub fn pending(&self) -> usize {
        self.events_rx.len()
            + self
                .completions
                .iter()
                .map(|(_, rx)| rx.len())
                .sum::<usize>()
    }

    fn try_next(&self) -> Option<Event> {
        for (_, rx) in &self.completions {
            match rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
            }
        }
        self.events_rx.try_recv().ok()
    }
}

impl EventScheduler for ChannelScheduler {
    fn poll(&self, max: usize, out: &mut Vec<Event>) -> usize {
        let mut polled = 0;
        while polled < max {
            match self.try_next() {
                Some(event) => {
                    out.push(event);
                    polled += 1;
                }
                None => break,
            }
        }
        polled
    }

    fn poll_timeout(&self, timeout: Duration) -> Option<Event> {
        if let Some(event) = self.try_next() {
            return Some(event);
        }
        let mut select = Select::new();
        for (_, rx) in &self.completions {
            select.recv(rx);
        }
        select.recv(&self.events_rx);

        let operation = select.select_timeout(timeout).ok()?;
        let index = operation.index();
        let rx = match self.completions.get(index) {
            Some((_, rx)) => rx,
            None => &self.events_rx,
        };
        operation.recv(rx).ok()
    }
}

/// Output interfaces that accept packets and free them.
///
/// An optional per-call limit models a full output queue.
#[derive(Default)]
pub struct LoopbackSink {
    per_call_limit: Option<usize>,
    capture: bool,
    accepted: AtomicU64,
    calls: AtomicU64,
    captured: Mutex<Vec<Packet>>,
}

impl LoopbackSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept at most `limit` packets per send call.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            per_call_limit: Some(limit),
            ..Self::default()
        }
    }

    /// Keep accepted packets instead of freeing them, see [`LoopbackSink::take_captured`].
    pub fn capturing() -> Self {
        Self {
            capture: true,
            ..Self::default()
        }
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn take_captured(&self) -> Vec<Packet> {
        std::mem::take(&mut *self.captured.lock())
    }
}

impl PacketSink for LoopbackSink {
    fn send(&self, _interface: InterfaceIndex, _queue: usize, packets: &mut Vec<Packet>) -> usize {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let n = self
            .per_call_limit
            .map_or(packets.len(), |limit| limit.min(packets.len()));
        let sent = packets.drain(..n);
        if self.capture {
            self.captured.lock().extend(sent);
        } else {
            drop(sent);
        }
        self.accepted.fetch_add(n as u64, Ordering::Relaxed);
        n
    }
}

/// Which submissions the software engine refuses or fails.
///
/// Counting starts at zero for the first submission. A value of zero disables that rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultPlan {
    /// Reject the first `n` submissions.
    pub reject_first: u64,
    /// Reject every `n`th submission after those.
    pub reject_every: u64,
    /// Report failure for every `n`th accepted transfer; 1 fails them all.
    pub fail_every: u64,
}

impl FaultPlan {
    fn rejects(&self, seq: u64) -> bool {
        seq < self.reject_first || (self.reject_every > 0 && (seq + 1) % self.reject_every == 0)
    }

    fn fails(&self, accepted_seq: u64) -> bool {
        self.fail_every > 0 && (accepted_seq + 1) % self.fail_every == 0
    }
}

#[derive(Debug, Default)]
struct EngineCounters {
    submitted: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
}

/// Offload engine that performs the copies on a background thread.
///
/// Accepted requests are copied in submission order and a completion event is posted on the
/// request's channel of the [`ChannelScheduler`].
pub struct SoftOffloadEngine {
    requests: Mutex<Option<Sender<(u64, TransferRequest)>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    faults: FaultPlan,
    counters: Arc<EngineCounters>,
}

impl SoftOffloadEngine {
    pub fn start(
        table: TransferTable,
        scheduler: Arc<ChannelScheduler>,
        faults: FaultPlan,
    ) -> std::io::Result<Self> {
        let (tx, rx) = unbounded::<(u64, TransferRequest)>();
        let counters = Arc::new(EngineCounters::default());
        let thread_counters = counters.clone();

        let worker = thread::Builder::new()
            .name("dmafwd-offload".to_string())
            .spawn(move || {
                for (seq, request) in rx.iter() {
                    let copied = table
                        .with_transfer(request.token, Transfer::copy_payloads)
                        .is_some();
                    let success = copied && !faults.fails(seq);
                    trace!(token = %request.token, segments = request.segments, success, "transfer done");
                    scheduler.post_completion(
                        request.channel,
                        CompletionEvent::new(request.token, success, request.slot),
                    );
                    thread_counters.completed.fetch_add(1, Ordering::Relaxed);
                }
                debug!("offload engine stopped");
            })?;

        Ok(Self {
            requests: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            faults,
            counters,
        })
    }

    pub fn submitted(&self) -> u64 {
        self.counters.submitted.load(Ordering::Relaxed)
    }

    pub fn accepted(&self) -> u64 {
        self.counters.accepted.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.counters.rejected.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.counters.completed.load(Ordering::Relaxed)
    }

    /// Finish queued requests and stop the engine thread. New submissions are rejected.
    pub fn shutdown(&self) {
        self.requests.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }

    fn reject(&self, request: TransferRequest, reason: &str) -> Result<(), SubmitRejected> {
        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
        Err(SubmitRejected {
            token: request.token,
            reason: reason.to_string(),
        })
    }
}

impl OffloadEngine for SoftOffloadEngine {
    fn submit(&self, request: TransferRequest) -> Result<(), SubmitRejected> {
        let seq = self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        if self.faults.rejects(seq) {
            return self.reject(request, "injected fault");
        }

        let requests = self.requests.lock();
        let sent = match requests.as_ref() {
            Some(tx) => {
                let accepted_seq = self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                tx.send((accepted_seq, request)).map_err(|err| {
                    self.counters.accepted.fetch_sub(1, Ordering::Relaxed);
                    err.into_inner().1
                })
            }
            None => Err(request),
        };
        drop(requests);
        sent.or_else(|request| self.reject(request, "engine stopped"))
    }
}

impl Drop for SoftOffloadEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Traffic source standing in for the input interfaces.
///
/// A background thread allocates packets from the receive pool, stamps them with a sequence
/// number and an input interface (round-robin) and injects them into the scheduler. When the
/// pool runs dry it waits for buffers to come back rather than dropping.
pub struct TrafficGenerator {
    pool: PacketPool,
    scheduler: Arc<ChannelScheduler>,
    interfaces: usize,
    pkt_len: usize,
    limit: Option<u64>,
    stop: Arc<AtomicBool>,
    generated: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
}

impl TrafficGenerator {
    pub fn new(
        pool: PacketPool,
        scheduler: Arc<ChannelScheduler>,
        interfaces: usize,
        pkt_len: usize,
    ) -> Self {
        Self {
            pool,
            scheduler,
            interfaces: interfaces.max(1),
            pkt_len,
            limit: None,
            stop: Arc::new(AtomicBool::new(false)),
            generated: Arc::new(AtomicU64::new(0)),
            thread: None,
        }
    }

    /// Stop on its own after `count` packets.
    pub fn with_limit(mut self, count: u64) -> Self {
        self.limit = Some(count);
        self
    }

    pub fn generated(&self) -> u64 {
        self.generated.load(Ordering::Relaxed)
    }
}

impl Ingress for TrafficGenerator {
    fn start(&mut self) -> std::io::Result<()> {
        if self.thread.is_some() {
            return Ok(());
        }
        self.stop.store(false, Ordering::Relaxed);
        let pool = self.pool.clone();
        let scheduler = self.scheduler.clone();
        let stop = self.stop.clone();
        let generated = self.generated.clone();
        let interfaces = self.interfaces;
        let pkt_len = self.pkt_len;
        let limit = self.limit.unwrap_or(u64::MAX);

        let handle = thread::Builder::new()
            .name("dmafwd-ingress".to_string())
            .spawn(move || {
                let mut seq = generated.load(Ordering::Relaxed);
                while seq < limit && !stop.load(Ordering::Relaxed) {
                    let Some(mut packet) = pool.alloc(pkt_len) else {
                        thread::yield_now();
                        continue;
                    };
                    stamp(&mut packet, seq);
                    packet.set_input_interface((seq % interfaces as u64) as usize);
                    scheduler.inject(Event::Packet(packet));
                    seq += 1;
                    generated.store(seq, Ordering::Relaxed);
                }
            })?;
        self.thread = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TrafficGenerator {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Write the little-endian `seq` into the first bytes of the payload and fill the rest.
fn stamp(packet: &mut Packet, seq: u64) {
    let payload = packet.payload_mut();
    let bytes = seq.to_le_bytes();
    let n = bytes.len().min(payload.len());
    payload[..n].copy_from_slice(&bytes[..n]);
    payload[n..].fill(seq as u8);
}
