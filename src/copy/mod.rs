//! Copy strategies applied to full bursts.
//!
//! The strategy is chosen once per worker when the forwarder starts and never changes during
//! the run.

pub mod completion;
pub mod local;
pub mod offload;

pub use completion::CompletionHandler;
pub use local::LocalCopy;
pub use offload::OffloadedCopy;

use crate::config::CopyMode;
use crate::io::Egress;
use crate::packet::{InterfaceIndex, Packet};
use crate::stats::WorkerStats;

#[derive(Debug)]
pub enum CopyStrategy {
    Local(LocalCopy),
    Offloaded(OffloadedCopy),
}

impl CopyStrategy {
    pub fn mode(&self) -> CopyMode {
        match self {
            CopyStrategy::Local(_) => CopyMode::Local,
            CopyStrategy::Offloaded(_) => CopyMode::Offloaded,
        }
    }

    /// Copy one burst received on `interface`.
    ///
    /// Local copies are sent through `egress` before this returns; offloaded copies are sent
    /// later by the [`CompletionHandler`].
    pub fn copy_burst(
        &mut self,
        interface: InterfaceIndex,
        burst: Vec<Packet>,
        egress: &Egress,
        stats: &mut WorkerStats,
    ) {
        stats.bursts += 1;
        match self {
            CopyStrategy::Local(local) => local.copy_burst(interface, burst, egress, stats),
            CopyStrategy::Offloaded(offload) => offload.copy_burst(interface, burst, stats),
        }
    }
}

impl From<LocalCopy> for CopyStrategy {
    fn from(copy: LocalCopy) -> Self {
        CopyStrategy::Local(copy)
    }
}

impl From<OffloadedCopy> for CopyStrategy {
    fn from(copy: OffloadedCopy) -> Self {
        CopyStrategy::Offloaded(copy)
    }
}
