//! Worker thread placement and start-up helpers.

use crossbeam_channel::{unbounded, Receiver, Sender};

/// Pin the current thread to `core_id` when supported.
///
/// Keeps a worker on one core so its accumulators and per-worker pools stay cache-hot.
///
/// # Platform Support
/// - **Linux**: Uses `pthread_setaffinity_np`
/// - **Other platforms**: No-op
///
/// # Returns
/// `true` if the affinity was applied.
pub fn pin_to_core(core_id: usize) -> bool {
    #[cfg(target_os = "linux")]
    {
        use libc::{cpu_set_t, pthread_self, pthread_setaffinity_np, CPU_SET, CPU_SETSIZE, CPU_ZERO};

        if core_id >= CPU_SETSIZE as usize {
            return false;
        }
        unsafe {
            let mut set: cpu_set_t = std::mem::zeroed();
            CPU_ZERO(&mut set);
            CPU_SET(core_id, &mut set);
            pthread_setaffinity_np(pthread_self(), std::mem::size_of::<cpu_set_t>(), &set) == 0
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = core_id;
        false
    }
}

/// Number of cores the process may run on, at least one.
pub fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Core worker `index` is pinned to: workers are spread round-robin over the available cores.
pub fn worker_core(index: usize) -> usize {
    index % available_cores()
}

/// Holds freshly spawned threads until the whole set exists.
///
/// Each thread waits on its own [`GateTicket`]. [`StartGate::open`] lets them through;
/// dropping the gate unopened makes every ticket report an abort instead.
pub struct StartGate {
    go: Sender<()>,
    tickets: Receiver<()>,
}

impl StartGate {
    pub fn new() -> Self {
        let (go, tickets) = unbounded();
        Self { go, tickets }
    }

    pub fn ticket(&self) -> GateTicket {
        GateTicket(self.tickets.clone())
    }

    /// Release `parties` waiting threads.
    pub fn open(self, parties: usize) {
        for _ in 0..parties {
            // The gate holds a receiver, so the channel is still connected.
            let _ = self.go.send(());
        }
    }
}

impl Default for StartGate {
    fn default() -> Self {
        Self::new()
    }
}

pub struct GateTicket(Receiver<()>);

impl GateTicket {
    /// Block until the gate opens. Returns `false` if it was dropped instead.
    pub fn wait(self) -> bool {
        self.0.recv().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn opened_gate_releases_every_ticket() {
        let gate = StartGate::new();
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let ticket = gate.ticket();
                thread::spawn(move || ticket.wait())
            })
            .collect();
        gate.open(3);
        for handle in handles {
            assert!(handle.join().unwrap());
        }
    }

    #[test]
    fn dropped_gate_aborts_waiting_threads() {
        let gate = StartGate::new();
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let ticket = gate.ticket();
                thread::spawn(move || ticket.wait())
            })
            .collect();
        drop(gate);
        for handle in handles {
            assert!(!handle.join().unwrap());
        }
    }

    #[test]
    fn worker_cores_wrap_around() {
        let cores = available_cores();
        assert!(cores >= 1);
        assert_eq!(worker_core(0), 0);
        assert_eq!(worker_core(cores), 0);
        assert!(worker_core(cores + 1) < cores);
    }

    #[test]
    fn pinning_to_out_of_range_core_fails() {
        assert!(!pin_to_core(usize::MAX));
    }
}
