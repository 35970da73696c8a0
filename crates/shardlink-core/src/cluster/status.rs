use serde::{Deserialize, Serialize};

use super::leader::Epoch;
use super::shard::ShardId;

/// Lifecycle of a shard process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecyclePhase {
    /// Normal operation.
    Running,
    /// Termination requested; no new elections.
    Draining,
    /// Transport closed.
    Closed,
}

impl LifecyclePhase {
    /// Convert to string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Closed => "closed",
        }
    }

    /// Decode from the compact form used in atomics.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Draining,
            _ => Self::Closed,
        }
    }

    /// Encode to the compact form used in atomics.
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Running => 0,
            Self::Draining => 1,
            Self::Closed => 2,
        }
    }
}

impl std::fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Summary of the cluster as seen by one shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStatus {
    /// The reporting shard.
    pub shard_id: ShardId,
    /// Total number of shards.
    pub total_shards: usize,
    /// Shards currently online, including the local one.
    pub online_shards: usize,
    /// Shards currently offline.
    pub offline_shards: usize,
    /// Current leader.
    pub leader_id: ShardId,
    /// Epoch of the current leader.
    pub epoch: Epoch,
    /// Whether the leader view has been checked against the cluster.
    ///
    /// A freshly started shard only has its bootstrap view until failure
    /// detection starts or a peer reports its own view.
    pub leader_confirmed: bool,
    /// Whether the transport is connected.
    pub transport_connected: bool,
    /// Lifecycle phase.
    pub phase: LifecyclePhase,
}

impl ClusterStatus {
    /// Check if the reporting shard is the confirmed leader.
    pub fn is_leader(&self) -> bool {
        self.leader_confirmed && self.leader_id == self.shard_id
    }
}
