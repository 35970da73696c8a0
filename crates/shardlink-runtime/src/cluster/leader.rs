use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use shardlink_core::cluster::{ClusterMessage, Epoch, LeaderState, LeaderUpdate, ShardId, Timestamp};

use super::registry::MembershipRegistry;

/// Leader election by random choice among online shards.
///
/// Every shard that sees the leader go offline may run an election. Competing
/// decisions are reconciled through [`LeaderState::apply`]: the highest epoch
/// wins and equal epochs go to the lowest shard id.
pub struct LeaderElection {
    local: ShardId,
    state: LeaderState,
    rng: StdRng,
}

impl LeaderElection {
    /// Create an election with `initial` as the bootstrap leader.
    pub fn new(local: ShardId, initial: ShardId) -> Self {
        Self {
            local,
            state: LeaderState::new(initial),
            rng: StdRng::from_entropy(),
        }
    }

    /// Create an election with a deterministic candidate choice.
    pub fn with_seed(local: ShardId, initial: ShardId, seed: u64) -> Self {
        Self {
            local,
            state: LeaderState::new(initial),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Get the current leader view.
    pub fn state(&self) -> LeaderState {
        self.state
    }

    /// Get the current leader.
    pub fn leader(&self) -> ShardId {
        self.state.current_leader_id
    }

    /// Get the current epoch.
    pub fn epoch(&self) -> Epoch {
        self.state.epoch
    }

    /// Check if the local shard is the leader.
    pub fn is_leader(&self) -> bool {
        self.state.is_leader(self.local)
    }

    /// Pick a random online shard other than `failed`. Falls back to the local shard.
    pub fn choose_candidate(&mut self, registry: &MembershipRegistry, failed: ShardId) -> ShardId {
        let candidates: Vec<ShardId> = registry
            .online_ids()
            .into_iter()
            .filter(|id| *id != failed)
            .collect();

        candidates.choose(&mut self.rng).copied().unwrap_or(self.local)
    }

    /// Run an election after `failed` went offline.
    ///
    /// The decision is applied locally before the announcement is returned.
    pub fn elect(
        &mut self,
        registry: &MembershipRegistry,
        failed: ShardId,
        now: Timestamp,
    ) -> ClusterMessage {
        let candidate = self.choose_candidate(registry, failed);
        let epoch = self.state.epoch + 1;

        tracing::info!(
            failed = %failed,
            candidate = %candidate,
            epoch,
            "Electing new leader"
        );

        self.apply(candidate, epoch);
        ClusterMessage::leader_elected(self.local, now, candidate, epoch)
    }

    /// Apply a leader decision received from a peer or made locally.
    pub fn apply(&mut self, leader: ShardId, epoch: Epoch) -> LeaderUpdate {
        let update = self.state.apply(leader, epoch);
        match update {
            LeaderUpdate::Applied { previous } => {
                tracing::info!(
                    previous = %previous,
                    leader = %leader,
                    epoch,
                    "Leader changed"
                );
                if leader == self.local {
                    tracing::info!("This shard is now the leader");
                }
            }
            LeaderUpdate::Stale => {
                tracing::debug!(
                    leader = %leader,
                    epoch,
                    current_epoch = self.state.epoch,
                    "Ignoring stale leader decision"
                );
            }
            LeaderUpdate::Duplicate => {}
        }
        update
    }
}

impl std::fmt::Debug for LeaderElection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderElection")
            .field("local", &self.local)
            .field("state", &self.state)
            .finish()
    }
}
