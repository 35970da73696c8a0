use std::time::Duration;

use shardlink_core::cluster::{ClusterMessage, LeaderState, ShardId, Timestamp};
use shardlink_core::config::ClusterConfig;

use super::registry::{timeout_millis, HeartbeatObservation, MembershipRegistry};

/// Heartbeat timing.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between heartbeats.
    pub interval: Duration,
    /// Silence after which a shard is considered offline.
    pub timeout: Duration,
    /// Interval between liveness scans.
    pub scan_interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(10),
            scan_interval: Duration::from_secs(5),
        }
    }
}

impl From<&ClusterConfig> for HeartbeatConfig {
    fn from(config: &ClusterConfig) -> Self {
        Self {
            interval: config.heartbeat_interval(),
            timeout: config.heartbeat_timeout(),
            scan_interval: config.scan_interval(),
        }
    }
}

/// Produces the local heartbeat and turns peer heartbeats into membership changes.
#[derive(Debug, Clone)]
pub struct HeartbeatEngine {
    local: ShardId,
    config: HeartbeatConfig,
}

impl HeartbeatEngine {
    /// Create a new engine for `local`.
    pub fn new(local: ShardId, config: HeartbeatConfig) -> Self {
        Self { local, config }
    }

    /// Get the timing configuration.
    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    /// Build the heartbeat to broadcast at `now`.
    pub fn build(&self, now: Timestamp, leader: &LeaderState) -> ClusterMessage {
        ClusterMessage::heartbeat(self.local, now, Some(*leader))
    }

    /// Record a heartbeat from `sender` stamped `at`, received at `now`.
    ///
    /// A heartbeat that is already older than the timeout is dropped; applying
    /// it would only revive a shard the next scan expires again.
    pub fn observe(
        &self,
        registry: &mut MembershipRegistry,
        sender: ShardId,
        at: Timestamp,
        now: Timestamp,
    ) -> HeartbeatObservation {
        if now.saturating_sub(at) > timeout_millis(self.config.timeout) {
            return HeartbeatObservation::Expired;
        }

        let observation = registry.mark_online(sender, at);
        if observation == HeartbeatObservation::Recovered {
            tracing::info!(shard = %sender, "Shard is online");
        }
        observation
    }

    /// Mark every silent peer offline and return the ones that transitioned.
    ///
    /// The local shard is never expired by its own scan.
    pub fn scan(&self, registry: &mut MembershipRegistry, now: Timestamp) -> Vec<ShardId> {
        let expired: Vec<ShardId> = registry
            .entries()
            .iter()
            .map(|e| e.shard_id)
            .filter(|id| *id != self.local)
            .filter(|id| registry.is_timed_out(*id, now, self.config.timeout))
            .collect();

        expired
            .into_iter()
            .filter(|id| {
                let changed = registry.mark_offline(*id);
                if changed {
                    tracing::warn!(shard = %id, "Shard missed heartbeats, marking offline");
                }
                changed
            })
            .collect()
    }
}
