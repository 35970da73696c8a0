use serde::{Deserialize, Serialize};

use crate::error::{Result, ShardError};

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Current wall-clock time in milliseconds.
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

/// Shard identifier in `[0, shard_count)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardId(pub u32);

impl ShardId {
    /// Get the raw index.
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Get the index as a usize for table lookups.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for ShardId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ShardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Liveness status of a shard as seen locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardStatus {
    /// Heartbeats are arriving.
    Online,
    /// Never heard from, or timed out.
    Offline,
}

impl ShardStatus {
    /// Convert to string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

impl std::fmt::Display for ShardStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One row of the membership table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipEntry {
    /// Shard this entry describes.
    pub shard_id: ShardId,
    /// Current status.
    pub status: ShardStatus,
    /// Timestamp carried by the newest applied heartbeat.
    pub last_heartbeat_at: Option<Timestamp>,
}

impl MembershipEntry {
    /// Create an entry for a shard that has not been heard from.
    pub fn offline(shard_id: ShardId) -> Self {
        Self {
            shard_id,
            status: ShardStatus::Offline,
            last_heartbeat_at: None,
        }
    }

    /// Create an entry for a shard known to be alive at `at`.
    pub fn online(shard_id: ShardId, at: Timestamp) -> Self {
        Self {
            shard_id,
            status: ShardStatus::Online,
            last_heartbeat_at: Some(at),
        }
    }

    /// Check if the shard is online.
    pub fn is_online(&self) -> bool {
        self.status == ShardStatus::Online
    }
}

/// Fixed cluster shape plus the identity of the local shard.
///
/// Both values come from configuration at startup and never change for the
/// lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardTopology {
    local: ShardId,
    count: u32,
}

impl ShardTopology {
    /// Create a topology, validating that `local` is inside `[0, count)`.
    pub fn new(local: ShardId, count: u32) -> Result<Self> {
        if count == 0 {
            return Err(ShardError::Config(
                "shard count must be at least 1".to_string(),
            ));
        }
        if local.0 >= count {
            return Err(ShardError::Config(format!(
                "shard id {} is outside the cluster of {} shards",
                local, count
            )));
        }
        Ok(Self { local, count })
    }

    /// The local shard.
    pub fn local(&self) -> ShardId {
        self.local
    }

    /// Total number of shards.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Check whether an id belongs to this cluster.
    pub fn contains(&self, id: ShardId) -> bool {
        id.0 < self.count
    }

    /// All shard ids, in order.
    pub fn ids(&self) -> impl Iterator<Item = ShardId> {
        (0..self.count).map(ShardId)
    }

    /// All shard ids except the local one.
    pub fn peers(&self) -> impl Iterator<Item = ShardId> {
        let local = self.local;
        self.ids().filter(move |id| *id != local)
    }

    /// Static owner of a routing key (`key mod count`).
    pub fn owner_of(&self, key: u64) -> ShardId {
        ShardId((key % u64::from(self.count)) as u32)
    }
}
