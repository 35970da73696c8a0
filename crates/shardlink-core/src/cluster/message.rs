use serde::{Deserialize, Serialize};

use super::leader::{Epoch, LeaderState};
use super::shard::{ShardId, Timestamp};
use crate::error::{Result, ShardError};

/// A record exchanged between shards over the broker.
///
/// Encoded as JSON with a `type` tag and camelCase field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClusterMessage {
    /// Liveness announcement, optionally carrying the sender's leader view.
    Heartbeat {
        sender_id: ShardId,
        timestamp: Timestamp,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        leader_id: Option<ShardId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        epoch: Option<Epoch>,
    },
    /// Outcome of an election.
    LeaderElected {
        sender_id: ShardId,
        timestamp: Timestamp,
        new_leader_id: ShardId,
        epoch: Epoch,
    },
    /// Application-level event relayed between shards.
    Event {
        sender_id: ShardId,
        timestamp: Timestamp,
        topic: String,
        #[serde(default)]
        payload: serde_json::Value,
    },
}

/// Discriminant of a [`ClusterMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Heartbeat,
    LeaderElected,
    Event,
}

impl MessageKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heartbeat => "heartbeat",
            Self::LeaderElected => "leaderElected",
            Self::Event => "event",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ClusterMessage {
    /// Build a heartbeat, piggy-backing the sender's leader view if given.
    pub fn heartbeat(sender_id: ShardId, timestamp: Timestamp, leader: Option<LeaderState>) -> Self {
        Self::Heartbeat {
            sender_id,
            timestamp,
            leader_id: leader.map(|l| l.current_leader_id),
            epoch: leader.map(|l| l.epoch),
        }
    }

    /// Build an election announcement.
    pub fn leader_elected(
        sender_id: ShardId,
        timestamp: Timestamp,
        new_leader_id: ShardId,
        epoch: Epoch,
    ) -> Self {
        Self::LeaderElected {
            sender_id,
            timestamp,
            new_leader_id,
            epoch,
        }
    }

    /// Build an application event.
    pub fn event(
        sender_id: ShardId,
        timestamp: Timestamp,
        topic: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self::Event {
            sender_id,
            timestamp,
            topic: topic.into(),
            payload,
        }
    }

    /// Get the message kind.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Heartbeat { .. } => MessageKind::Heartbeat,
            Self::LeaderElected { .. } => MessageKind::LeaderElected,
            Self::Event { .. } => MessageKind::Event,
        }
    }

    /// Get the sending shard.
    pub fn sender_id(&self) -> ShardId {
        match self {
            Self::Heartbeat { sender_id, .. }
            | Self::LeaderElected { sender_id, .. }
            | Self::Event { sender_id, .. } => *sender_id,
        }
    }

    /// Get the send timestamp.
    pub fn timestamp(&self) -> Timestamp {
        match self {
            Self::Heartbeat { timestamp, .. }
            | Self::LeaderElected { timestamp, .. }
            | Self::Event { timestamp, .. } => *timestamp,
        }
    }

    /// Encode for the wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from the wire.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| ShardError::Deserialization(e.to_string()))
    }
}
