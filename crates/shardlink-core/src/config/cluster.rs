use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Membership and election timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Interval between outgoing heartbeats, in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// Silence after which a peer is marked offline, in milliseconds.
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_ms: u64,

    /// Interval between timeout scans, in milliseconds.
    #[serde(default = "default_scan_interval")]
    pub scan_interval_ms: u64,

    /// Leader assumed by every shard at bootstrap.
    #[serde(default)]
    pub initial_leader: u32,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval(),
            heartbeat_timeout_ms: default_heartbeat_timeout(),
            scan_interval_ms: default_scan_interval(),
            initial_leader: 0,
        }
    }
}

impl ClusterConfig {
    /// Heartbeat interval as a duration.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Heartbeat timeout as a duration.
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Scan interval as a duration.
    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.scan_interval_ms)
    }
}

fn default_heartbeat_interval() -> u64 {
    5000
}

fn default_heartbeat_timeout() -> u64 {
    10000
}

fn default_scan_interval() -> u64 {
    5000
}
