//! Run configuration and the capability checks applied before any worker starts.

use crate::accumulator::MAX_BURST;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Maximum number of forwarding interfaces.
pub const MAX_INTERFACES: usize = 2;
/// Maximum output queues used per interface.
pub const MAX_OUT_QUEUES: usize = 32;

const DEFAULT_NUM_PKTS: usize = 32_768;
const DEFAULT_PKT_LEN: usize = 1024;
const DEFAULT_WORKERS: usize = 1;
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How bursts are copied before being forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyMode {
    /// Synchronous CPU memory copy, forwarded immediately.
    #[default]
    Local,
    /// Asynchronous copy by the offload engine, forwarded on completion.
    Offloaded,
}

impl CopyMode {
    /// Map the numeric copy type used on the command line (0 = local, 1 = offloaded).
    pub fn from_type_id(id: u8) -> Option<CopyMode> {
        match id {
            0 => Some(CopyMode::Local),
            1 => Some(CopyMode::Offloaded),
            _ => None,
        }
    }
}

impl fmt::Display for CopyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CopyMode::Local => "local (CPU)",
            CopyMode::Offloaded => "offloaded",
        };
        write!(f, "{label}")
    }
}

/// What the packet I/O, pool and offload runtime can do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub max_src_segments: usize,
    pub max_dst_segments: usize,
    pub max_segment_len: usize,
    /// Concurrent offload sessions; one per worker is needed.
    pub max_sessions: usize,
    /// Completion can be delivered as a scheduler event.
    pub event_completion: bool,
    /// Completion events can be placed on scheduled queues.
    pub scheduled_completion_queues: bool,
    pub max_completion_pools: usize,
    /// Zero means no limit.
    pub max_pool_packets: usize,
    /// Zero means no limit.
    pub max_packet_len: usize,
    pub min_cache_size: usize,
    pub max_cache_size: usize,
    pub default_cache_size: usize,
    pub max_workers: usize,
}

impl Capabilities {
    /// Largest burst both the segment limits and the accumulator allow.
    pub fn max_burst(&self) -> usize {
        self.max_src_segments
            .min(self.max_dst_segments)
            .min(MAX_BURST)
    }
}

impl Default for Capabilities {
    /// Limits of the in-process software runtime.
    fn default() -> Self {
        Self {
            max_src_segments: MAX_BURST,
            max_dst_segments: MAX_BURST,
            max_segment_len: 65_536,
            max_sessions: 64,
            event_completion: true,
            scheduled_completion_queues: true,
            max_completion_pools: 64,
            max_pool_packets: 0,
            max_packet_len: 65_536,
            min_cache_size: 0,
            max_cache_size: 4096,
            default_cache_size: 256,
            max_workers: 64,
        }
    }
}

/// Top-level configuration for one forwarding run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwarderConfig {
    /// Interface names, at most [`MAX_INTERFACES`].
    pub interfaces: Vec<String>,
    pub copy_mode: CopyMode,
    /// Packets accumulated per interface before a copy is triggered.
    pub burst_size: usize,
    /// Buffers in each packet pool.
    pub num_pkts: usize,
    /// Buffer length of each packet pool.
    pub pkt_len: usize,
    pub workers: usize,
    /// Per-thread pool cache size; reported but not interpreted by the software pools.
    pub cache_size: usize,
    /// `None` runs until the run flag is cleared externally.
    pub run_time: Option<Duration>,
    /// Quiet period that ends the post-shutdown drain.
    pub drain_timeout: Duration,
    /// Pin worker `n` to core `n`.
    pub pin_workers: bool,
}

impl ForwarderConfig {
    /// Defaults derived from what the runtime supports.
    pub fn defaults_for(capabilities: &Capabilities) -> Self {
        let num_pkts = if capabilities.max_pool_packets > 0 {
            capabilities.max_pool_packets.min(DEFAULT_NUM_PKTS)
        } else {
            DEFAULT_NUM_PKTS
        };
        let pkt_len = if capabilities.max_packet_len > 0 {
            capabilities.max_packet_len.min(DEFAULT_PKT_LEN)
        } else {
            DEFAULT_PKT_LEN
        };
        Self {
            interfaces: Vec::new(),
            copy_mode: CopyMode::default(),
            burst_size: capabilities.max_burst(),
            num_pkts,
            pkt_len,
            workers: DEFAULT_WORKERS,
            cache_size: capabilities.default_cache_size,
            run_time: None,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            pin_workers: false,
        }
    }

    /// Check the configuration against `capabilities`.
    ///
    /// Errors that only mean "this runtime cannot do that" are reported as unsupported so the
    /// binary can exit with a distinct status.
    pub fn validate(&self, capabilities: &Capabilities) -> Result<(), ConfigError> {
        if self.interfaces.is_empty() || self.interfaces.len() > MAX_INTERFACES {
            return Err(ConfigError::InterfaceCount {
                count: self.interfaces.len(),
                max: MAX_INTERFACES,
            });
        }
        if self.workers == 0 || self.workers > capabilities.max_workers {
            return Err(ConfigError::WorkerCount {
                count: self.workers,
                max: capabilities.max_workers,
            });
        }
        if self.workers > capabilities.max_sessions {
            return Err(ConfigError::NotEnoughSessions {
                requested: self.workers,
                max: capabilities.max_sessions,
            });
        }
        let max_burst = capabilities.max_burst();
        if self.burst_size == 0 || self.burst_size > max_burst {
            return Err(ConfigError::BurstSize {
                burst: self.burst_size,
                max: max_burst,
            });
        }
        if self.pkt_len > capabilities.max_segment_len {
            return Err(ConfigError::SegmentLength {
                len: self.pkt_len,
                max: capabilities.max_segment_len,
            });
        }
        if !capabilities.event_completion || !capabilities.scheduled_completion_queues {
            return Err(ConfigError::CompletionMode);
        }
        if self.workers > capabilities.max_completion_pools {
            return Err(ConfigError::CompletionPools {
                requested: self.workers,
                max: capabilities.max_completion_pools,
            });
        }
        if self.num_pkts == 0
            || (capabilities.max_pool_packets > 0 && self.num_pkts > capabilities.max_pool_packets)
        {
            return Err(ConfigError::PoolPackets {
                count: self.num_pkts,
                max: capabilities.max_pool_packets,
            });
        }
        if self.pkt_len == 0
            || (capabilities.max_packet_len > 0 && self.pkt_len > capabilities.max_packet_len)
        {
            return Err(ConfigError::PacketLength {
                len: self.pkt_len,
                max: capabilities.max_packet_len,
            });
        }
        if self.cache_size < capabilities.min_cache_size
            || self.cache_size > capabilities.max_cache_size
        {
            return Err(ConfigError::CacheSize {
                size: self.cache_size,
                min: capabilities.min_cache_size,
                max: capabilities.max_cache_size,
            });
        }
        Ok(())
    }
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self::defaults_for(&Capabilities::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ForwarderConfig {
        ForwarderConfig {
            interfaces: vec!["if0".into()],
            ..ForwarderConfig::default()
        }
    }

    #[test]
    fn defaults_follow_capabilities() {
        let caps = Capabilities {
            max_src_segments: 8,
            max_dst_segments: 16,
            max_pool_packets: 100,
            max_packet_len: 512,
            ..Capabilities::default()
        };
        let config = ForwarderConfig::defaults_for(&caps);
        assert_eq!(config.burst_size, 8);
        assert_eq!(config.num_pkts, 100);
        assert_eq!(config.pkt_len, 512);
        assert_eq!(config.copy_mode, CopyMode::Local);
        assert_eq!(config.drain_timeout, Duration::from_secs(2));
    }

    #[test]
    fn default_config_with_one_interface_is_valid() {
        assert_eq!(valid().validate(&Capabilities::default()), Ok(()));
    }

    #[test]
    fn interface_count_is_bounded() {
        let caps = Capabilities::default();
        let mut config = valid();
        config.interfaces.clear();
        assert!(matches!(config.validate(&caps), Err(ConfigError::InterfaceCount { .. })));
        config.interfaces = vec!["a".into(), "b".into(), "c".into()];
        assert!(matches!(config.validate(&caps), Err(ConfigError::InterfaceCount { .. })));
    }

    #[test]
    fn burst_size_is_capped_by_segments() {
        let caps = Capabilities {
            max_dst_segments: 4,
            ..Capabilities::default()
        };
        let mut config = valid();
        config.burst_size = 5;
        assert_eq!(
            config.validate(&caps),
            Err(ConfigError::BurstSize { burst: 5, max: 4 })
        );
        config.burst_size = 0;
        assert!(config.validate(&caps).is_err());
    }

    #[test]
    fn missing_event_completion_is_unsupported() {
        let caps = Capabilities {
            event_completion: false,
            ..Capabilities::default()
        };
        let err = valid().validate(&caps).unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn too_many_workers_for_sessions_is_unsupported() {
        let caps = Capabilities {
            max_sessions: 2,
            ..Capabilities::default()
        };
        let mut config = valid();
        config.workers = 3;
        let err = config.validate(&caps).unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn cache_size_range_is_checked() {
        let caps = Capabilities {
            min_cache_size: 16,
            ..Capabilities::default()
        };
        let mut config = valid();
        config.cache_size = 8;
        assert!(matches!(config.validate(&caps), Err(ConfigError::CacheSize { .. })));
    }

    #[test]
    fn copy_type_ids() {
        assert_eq!(CopyMode::from_type_id(0), Some(CopyMode::Local));
        assert_eq!(CopyMode::from_type_id(1), Some(CopyMode::Offloaded));
        assert_eq!(CopyMode::from_type_id(2), None);
    }
}
