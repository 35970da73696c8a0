use std::time::Duration;

use shardlink_core::cluster::{MembershipEntry, ShardId, ShardStatus, ShardTopology, Timestamp};

/// What happened when a heartbeat was offered to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatObservation {
    /// Timestamp advanced on an already online shard.
    Applied,
    /// Shard transitioned from offline to online.
    Recovered,
    /// Older than the newest applied heartbeat; dropped.
    Stale,
    /// Already past the timeout when it arrived; dropped.
    Expired,
    /// Sender is not part of the cluster.
    UnknownShard,
}

impl HeartbeatObservation {
    /// Check whether the heartbeat changed the registry.
    pub fn was_applied(&self) -> bool {
        matches!(self, Self::Applied | Self::Recovered)
    }
}

/// In-memory membership table for cluster liveness.
///
/// Holds exactly one entry per shard of the topology for the lifetime of the
/// process. Owned by the shard's event loop; no internal locking.
#[derive(Debug, Clone)]
pub struct MembershipRegistry {
    local: ShardId,
    entries: Vec<MembershipEntry>,
}

impl MembershipRegistry {
    /// Bootstrap the table: the local shard online at `now`, every peer offline.
    pub fn new(topology: &ShardTopology, now: Timestamp) -> Self {
        let local = topology.local();
        let entries = topology
            .ids()
            .map(|id| {
                if id == local {
                    MembershipEntry::online(id, now)
                } else {
                    MembershipEntry::offline(id)
                }
            })
            .collect();

        Self { local, entries }
    }

    /// Get the local shard ID.
    pub fn local_id(&self) -> ShardId {
        self.local
    }

    /// Get all entries, ordered by shard id.
    pub fn entries(&self) -> &[MembershipEntry] {
        &self.entries
    }

    /// Get a specific entry.
    pub fn get(&self, id: ShardId) -> Option<&MembershipEntry> {
        self.entries.get(id.index())
    }

    /// Get the status of a shard.
    pub fn status(&self, id: ShardId) -> Option<ShardStatus> {
        self.get(id).map(|e| e.status)
    }

    /// Check if a shard is online.
    pub fn is_online(&self, id: ShardId) -> bool {
        self.get(id).map(|e| e.is_online()).unwrap_or(false)
    }

    /// Ids of every online shard, including the local one.
    pub fn online_ids(&self) -> Vec<ShardId> {
        self.entries
            .iter()
            .filter(|e| e.is_online())
            .map(|e| e.shard_id)
            .collect()
    }

    /// Record a heartbeat sent at `at`.
    ///
    /// Heartbeats older than the newest one applied are dropped so that
    /// `last_heartbeat_at` never moves backwards.
    pub fn mark_online(&mut self, id: ShardId, at: Timestamp) -> HeartbeatObservation {
        let Some(entry) = self.entries.get_mut(id.index()) else {
            return HeartbeatObservation::UnknownShard;
        };

        if entry.last_heartbeat_at.is_some_and(|last| at < last) {
            return HeartbeatObservation::Stale;
        }

        let recovered = entry.status == ShardStatus::Offline;
        entry.status = ShardStatus::Online;
        entry.last_heartbeat_at = Some(at);

        if recovered {
            HeartbeatObservation::Recovered
        } else {
            HeartbeatObservation::Applied
        }
    }

    /// Mark a shard offline. Returns true if it was online.
    pub fn mark_offline(&mut self, id: ShardId) -> bool {
        match self.entries.get_mut(id.index()) {
            Some(entry) if entry.status == ShardStatus::Online => {
                entry.status = ShardStatus::Offline;
                true
            }
            _ => false,
        }
    }

    /// Check if an online shard has been silent for longer than `timeout`.
    pub fn is_timed_out(&self, id: ShardId, now: Timestamp, timeout: Duration) -> bool {
        let Some(entry) = self.get(id) else {
            return false;
        };
        if !entry.is_online() {
            return false;
        }

        match entry.last_heartbeat_at {
            Some(last) => now.saturating_sub(last) > timeout_millis(timeout),
            None => true,
        }
    }

    /// Count shards by status.
    pub fn counts(&self) -> MembershipCounts {
        let online = self.entries.iter().filter(|e| e.is_online()).count();
        MembershipCounts {
            online,
            offline: self.entries.len() - online,
            total: self.entries.len(),
        }
    }
}

pub(crate) fn timeout_millis(timeout: Duration) -> i64 {
    i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX)
}

/// Shard count statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MembershipCounts {
    /// Online shards.
    pub online: usize,
    /// Offline shards.
    pub offline: usize,
    /// Total shards.
    pub total: usize,
}
