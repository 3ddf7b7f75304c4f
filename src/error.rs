//! Setup-time errors.
//!
//! Only setup can fail. Once workers are running every failure is a counter in
//! [`crate::stats::WorkerStats`].

use thiserror::Error;

/// Process exit status for generic failures.
pub const EXIT_FAILURE: i32 = 1;
/// Process exit status when the runtime lacks a required capability.
pub const EXIT_NOT_SUPPORTED: i32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid number of interfaces: {count} (min: 1, max: {max})")]
    InterfaceCount { count: usize, max: usize },

    #[error("invalid worker count: {count} (min: 1, max: {max})")]
    WorkerCount { count: usize, max: usize },

    #[error("not enough offload sessions supported: {requested} (max: {max})")]
    NotEnoughSessions { requested: usize, max: usize },

    #[error("unsupported segment count for offloaded copy: {burst} (min: 1, max: {max})")]
    BurstSize { burst: usize, max: usize },

    #[error("unsupported packet length for offloaded copy: {len} (max: {max})")]
    SegmentLength { len: usize, max: usize },

    #[error("event completion on scheduled queues is not supported")]
    CompletionMode,

    #[error("unsupported amount of completion pools: {requested} (max: {max})")]
    CompletionPools { requested: usize, max: usize },

    #[error("invalid pool packet count: {count} (min: 1, max: {max})")]
    PoolPackets { count: usize, max: usize },

    #[error("invalid pool packet length: {len} (min: 1, max: {max})")]
    PacketLength { len: usize, max: usize },

    #[error("invalid pool cache size: {size} (min: {min}, max: {max})")]
    CacheSize { size: usize, min: usize, max: usize },

    #[error("invalid copy type: {0}")]
    CopyType(u8),
}

impl ConfigError {
    /// Whether the configuration is fine but the runtime cannot provide it.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            ConfigError::NotEnoughSessions { .. } | ConfigError::CompletionMode
        )
    }
}

#[derive(Debug, Error)]
pub enum ForwarderError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to spawn worker {worker}: {source}")]
    Spawn {
        worker: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("worker {0} panicked")]
    WorkerPanicked(usize),

    #[error("failed to start ingress: {0}")]
    Ingress(#[source] std::io::Error),

    #[error("failed to start offload engine: {0}")]
    Engine(#[source] std::io::Error),

    #[error("offloaded copy mode requires an offload engine")]
    MissingOffloadEngine,

    #[error("failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),

    #[error("failed to encode report: {0}")]
    Report(#[from] serde_json::Error),
}

impl ForwarderError {
    pub fn exit_code(&self) -> i32 {
        match self {
            ForwarderError::Config(err) if err.is_unsupported() => EXIT_NOT_SUPPORTED,
            _ => EXIT_FAILURE,
        }
    }
}
