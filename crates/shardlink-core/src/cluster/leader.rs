use serde::{Deserialize, Serialize};

use super::shard::ShardId;

/// Election counter. Increases by one on every election.
pub type Epoch = u64;

/// The local view of who leads the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderState {
    /// Shard currently believed to be the leader.
    pub current_leader_id: ShardId,
    /// Epoch of the decision that installed it.
    pub epoch: Epoch,
}

/// Result of offering a leader decision to a [`LeaderState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderUpdate {
    /// The decision replaced the previous leader.
    Applied {
        /// Leader before the update.
        previous: ShardId,
    },
    /// The exact same decision was already applied.
    Duplicate,
    /// The decision is older than (or loses the tie against) the current one.
    Stale,
}

impl LeaderState {
    /// Bootstrap state: `initial` leads at epoch 0.
    pub fn new(initial: ShardId) -> Self {
        Self {
            current_leader_id: initial,
            epoch: 0,
        }
    }

    /// Check if `id` is the current leader.
    pub fn is_leader(&self, id: ShardId) -> bool {
        self.current_leader_id == id
    }

    /// Check whether a decision would replace the current one.
    ///
    /// Higher epochs always win. Two different decisions carrying the same
    /// epoch are settled in favour of the lower shard id so that concurrent
    /// elections converge on every shard regardless of arrival order.
    pub fn is_superseded_by(&self, leader: ShardId, epoch: Epoch) -> bool {
        epoch > self.epoch || (epoch == self.epoch && leader < self.current_leader_id)
    }

    /// Apply a leader decision if it supersedes the current one.
    pub fn apply(&mut self, leader: ShardId, epoch: Epoch) -> LeaderUpdate {
        if epoch == self.epoch && leader == self.current_leader_id {
            return LeaderUpdate::Duplicate;
        }

        if !self.is_superseded_by(leader, epoch) {
            return LeaderUpdate::Stale;
        }

        let previous = self.current_leader_id;
        self.current_leader_id = leader;
        self.epoch = epoch;
        LeaderUpdate::Applied { previous }
    }
}
