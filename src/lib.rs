pub mod accumulator;
pub mod buffer_pool;
pub mod config;
pub mod copy;
pub mod error;
pub mod event;
pub mod forwarder;
pub mod io;
pub mod packet;
pub mod sim;
pub mod slot_pool;
pub mod stats;
pub mod threading;
pub mod transfer;
pub mod worker;

// Re-export for easier testing
pub use config::{Capabilities, CopyMode, ForwarderConfig};
pub use error::{ConfigError, ForwarderError};
pub use forwarder::{Collaborators, Forwarder};
pub use stats::{RunReport, WorkerStats};
pub use worker::{RunFlag, Worker, WorkerState};
