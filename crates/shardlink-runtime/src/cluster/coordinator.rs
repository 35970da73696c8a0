use shardlink_core::cluster::{
    ClusterMessage, ClusterStatus, Epoch, LeaderState, LeaderUpdate, LifecyclePhase, ShardId,
    ShardTopology, Timestamp,
};

use super::heartbeat::{HeartbeatConfig, HeartbeatEngine};
use super::leader::LeaderElection;
use super::registry::{timeout_millis, MembershipRegistry};

/// Application event received from a shard.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardEvent {
    /// Shard that published the event.
    pub sender_id: ShardId,
    /// Sender's clock when the event was published.
    pub timestamp: Timestamp,
    /// Event topic.
    pub topic: String,
    /// Event payload.
    pub payload: serde_json::Value,
}

/// Result of handling one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    /// Membership was updated.
    Applied,
    /// The leader changed.
    LeaderChanged {
        previous: ShardId,
        leader: ShardId,
        epoch: Epoch,
    },
    /// An application event to hand to subscribers.
    Event(ShardEvent),
    /// Stale, duplicate or unknown; nothing changed.
    Ignored,
}

/// Coordination state machine for one shard.
///
/// Owns the membership registry, the heartbeat engine and the leader
/// election. Every method takes the current time explicitly and performs no
/// I/O; the caller publishes whatever messages are returned.
#[derive(Debug)]
pub struct ShardCoordinator {
    topology: ShardTopology,
    registry: MembershipRegistry,
    heartbeat: HeartbeatEngine,
    election: LeaderElection,
    accepting_elections: bool,
    transport_connected: bool,
    detection_resumes_at: Timestamp,
    leader_confirmed: bool,
}

impl ShardCoordinator {
    /// Bootstrap coordination state at `now`.
    ///
    /// Failure detection starts one heartbeat timeout after `now` so that
    /// peers get a chance to announce themselves. Until then, or until a peer
    /// reports its leader view, the bootstrap leader is unconfirmed and the
    /// local shard does not consider itself leader.
    pub fn new(
        topology: ShardTopology,
        config: HeartbeatConfig,
        initial_leader: ShardId,
        now: Timestamp,
    ) -> Self {
        let election = LeaderElection::new(topology.local(), initial_leader);
        Self::with_election(topology, config, election, now)
    }

    /// Same as [`ShardCoordinator::new`] with a seeded candidate choice.
    pub fn with_rng_seed(
        topology: ShardTopology,
        config: HeartbeatConfig,
        initial_leader: ShardId,
        now: Timestamp,
        seed: u64,
    ) -> Self {
        let election = LeaderElection::with_seed(topology.local(), initial_leader, seed);
        Self::with_election(topology, config, election, now)
    }

    fn with_election(
        topology: ShardTopology,
        config: HeartbeatConfig,
        election: LeaderElection,
        now: Timestamp,
    ) -> Self {
        let detection_resumes_at = now.saturating_add(timeout_millis(config.timeout));
        Self {
            registry: MembershipRegistry::new(&topology, now),
            heartbeat: HeartbeatEngine::new(topology.local(), config),
            election,
            topology,
            accepting_elections: true,
            transport_connected: true,
            detection_resumes_at,
            leader_confirmed: false,
        }
    }

    /// Get the topology.
    pub fn topology(&self) -> &ShardTopology {
        &self.topology
    }

    /// Get the local shard id.
    pub fn shard_id(&self) -> ShardId {
        self.topology.local()
    }

    /// Get the membership registry.
    pub fn registry(&self) -> &MembershipRegistry {
        &self.registry
    }

    /// Get the heartbeat timing.
    pub fn heartbeat_config(&self) -> &HeartbeatConfig {
        self.heartbeat.config()
    }

    /// Get the local leader view.
    pub fn leader(&self) -> LeaderState {
        self.election.state()
    }

    /// Check if the local shard is the confirmed leader.
    pub fn is_leader(&self) -> bool {
        self.leader_confirmed && self.election.is_leader()
    }

    /// Check whether the leader view has been confirmed.
    pub fn is_leader_confirmed(&self) -> bool {
        self.leader_confirmed
    }

    /// Check whether timeout scans currently run.
    pub fn is_detecting(&self, now: Timestamp) -> bool {
        self.transport_connected && now >= self.detection_resumes_at
    }

    /// Give peers one heartbeat timeout from `now` before detection starts.
    pub fn restart_detection(&mut self, now: Timestamp) {
        let timeout = timeout_millis(self.heartbeat.config().timeout);
        self.detection_resumes_at = now.saturating_add(timeout);
    }

    /// Stop triggering elections. Used once shutdown begins.
    pub fn stop_elections(&mut self) {
        if self.accepting_elections {
            tracing::debug!("No longer triggering elections");
        }
        self.accepting_elections = false;
    }

    /// Record a transport connectivity change.
    ///
    /// Detection is suspended while disconnected and for one heartbeat timeout
    /// after the connection comes back.
    pub fn set_transport_connected(&mut self, connected: bool, now: Timestamp) {
        if connected == self.transport_connected {
            return;
        }

        self.transport_connected = connected;
        if connected {
            self.restart_detection(now);
            tracing::info!(
                resume_in_ms = timeout_millis(self.heartbeat.config().timeout),
                "Transport reconnected, failure detection resumes after one timeout"
            );
        } else {
            tracing::warn!("Transport disconnected, suspending failure detection");
        }
    }

    /// Refresh the local entry and build the heartbeat to broadcast.
    pub fn heartbeat(&mut self, now: Timestamp) -> ClusterMessage {
        self.registry.mark_online(self.shard_id(), now);
        self.heartbeat.build(now, &self.election.state())
    }

    /// Apply one inbound message.
    pub fn handle(&mut self, message: &ClusterMessage, now: Timestamp) -> MessageOutcome {
        let sender = message.sender_id();
        if !self.topology.contains(sender) {
            tracing::warn!(
                sender = %sender,
                kind = %message.kind(),
                shard_count = self.topology.count(),
                "Ignoring message from unknown shard"
            );
            return MessageOutcome::Ignored;
        }

        match message {
            ClusterMessage::Heartbeat {
                timestamp,
                leader_id,
                epoch,
                ..
            } => {
                let observation = self
                    .heartbeat
                    .observe(&mut self.registry, sender, *timestamp, now);
                if !observation.was_applied() {
                    tracing::trace!(sender = %sender, ?observation, "Heartbeat not applied");
                    return MessageOutcome::Ignored;
                }

                match (leader_id, epoch) {
                    (Some(leader), Some(epoch)) => {
                        let outcome = match self.apply_leader(*leader, *epoch, *timestamp) {
                            MessageOutcome::Ignored => MessageOutcome::Applied,
                            changed => changed,
                        };
                        if sender != self.shard_id() {
                            self.confirm_leader();
                        }
                        outcome
                    }
                    _ => MessageOutcome::Applied,
                }
            }
            ClusterMessage::LeaderElected {
                timestamp,
                new_leader_id,
                epoch,
                ..
            } => {
                let outcome = self.apply_leader(*new_leader_id, *epoch, *timestamp);
                if sender != self.shard_id() {
                    self.confirm_leader();
                }
                outcome
            }
            ClusterMessage::Event {
                timestamp,
                topic,
                payload,
                ..
            } => MessageOutcome::Event(ShardEvent {
                sender_id: sender,
                timestamp: *timestamp,
                topic: topic.clone(),
                payload: payload.clone(),
            }),
        }
    }

    /// Expire silent peers and run an election if the leader is gone.
    ///
    /// Returns the election announcement to broadcast, if any.
    pub fn scan(&mut self, now: Timestamp) -> Option<ClusterMessage> {
        if !self.is_detecting(now) {
            return None;
        }
        self.confirm_leader();

        let expired = self.heartbeat.scan(&mut self.registry, now);
        let leader = self.election.leader();
        if expired.contains(&leader) {
            tracing::warn!(leader = %leader, "Leader went offline");
        }

        if leader == self.shard_id() || self.registry.is_online(leader) {
            return None;
        }
        if !self.accepting_elections {
            tracing::debug!(leader = %leader, "Leader offline but shutting down, skipping election");
            return None;
        }

        Some(self.election.elect(&self.registry, leader, now))
    }

    /// Build a status snapshot.
    pub fn status(&self, transport_connected: bool, phase: LifecyclePhase) -> ClusterStatus {
        let counts = self.registry.counts();
        let leader = self.election.state();
        ClusterStatus {
            shard_id: self.shard_id(),
            total_shards: counts.total,
            online_shards: counts.online,
            offline_shards: counts.offline,
            leader_id: leader.current_leader_id,
            epoch: leader.epoch,
            leader_confirmed: self.leader_confirmed,
            transport_connected,
            phase,
        }
    }

    fn confirm_leader(&mut self) {
        if !self.leader_confirmed {
            self.leader_confirmed = true;
            tracing::debug!(
                leader = %self.election.leader(),
                epoch = self.election.epoch(),
                "Leader view confirmed"
            );
        }
    }

    fn apply_leader(&mut self, leader: ShardId, epoch: Epoch, at: Timestamp) -> MessageOutcome {
        if !self.topology.contains(leader) {
            tracing::warn!(leader = %leader, epoch, "Ignoring leader decision naming unknown shard");
            return MessageOutcome::Ignored;
        }

        match self.election.apply(leader, epoch) {
            LeaderUpdate::Applied { previous } => {
                if !self.registry.is_online(leader) {
                    // The decision vouches for the leader; its own heartbeats take over from here.
                    let last = self
                        .registry
                        .get(leader)
                        .and_then(|e| e.last_heartbeat_at)
                        .unwrap_or(at);
                    self.registry.mark_online(leader, at.max(last));
                }
                MessageOutcome::LeaderChanged {
                    previous,
                    leader,
                    epoch,
                }
            }
            LeaderUpdate::Duplicate | LeaderUpdate::Stale => MessageOutcome::Ignored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const INTERVAL: Timestamp = 5_000;

    fn config() -> HeartbeatConfig {
        HeartbeatConfig {
            interval: Duration::from_millis(5_000),
            timeout: Duration::from_millis(10_000),
            scan_interval: Duration::from_millis(1_000),
        }
    }

    fn coordinator(local: u32, count: u32, now: Timestamp) -> ShardCoordinator {
        let topology = ShardTopology::new(ShardId(local), count).unwrap();
        ShardCoordinator::with_rng_seed(topology, config(), ShardId(0), now, u64::from(local) + 11)
    }

    /// A broadcast bus between coordinators driven by explicit time.
    struct Cluster {
        shards: Vec<Option<ShardCoordinator>>,
        connected: Vec<bool>,
        elections: usize,
    }

    impl Cluster {
        fn new(count: u32) -> Self {
            Self {
                shards: (0..count).map(|id| Some(coordinator(id, count, 0))).collect(),
                connected: vec![true; count as usize],
                elections: 0,
            }
        }

        fn reachable(&self) -> Vec<usize> {
            (0..self.shards.len())
                .filter(|i| self.shards[*i].is_some() && self.connected[*i])
                .collect()
        }

        fn deliver(&mut self, message: &ClusterMessage, now: Timestamp) {
            for i in self.reachable() {
                if let Some(shard) = self.shards[i].as_mut() {
                    shard.handle(message, now);
                }
            }
        }

        fn tick(&mut self, now: Timestamp) {
            if now % INTERVAL == 0 {
                for i in self.reachable() {
                    let heartbeat = self.shards[i].as_mut().map(|s| s.heartbeat(now));
                    if let Some(heartbeat) = heartbeat {
                        self.deliver(&heartbeat, now);
                    }
                }
            }

            // scans run concurrently; their elections cross on the wire
            let mut announcements = Vec::new();
            for shard in self.shards.iter_mut().flatten() {
                if let Some(message) = shard.scan(now) {
                    announcements.push(message);
                }
            }
            for message in announcements {
                let sender = message.sender_id().index();
                self.elections += 1;
                if self.connected[sender] {
                    self.deliver(&message, now);
                }
            }
        }

        fn run(&mut self, from: Timestamp, to: Timestamp) {
            let mut now = from;
            while now <= to {
                self.tick(now);
                now += 1_000;
            }
        }

        fn shard(&self, id: usize) -> &ShardCoordinator {
            self.shards[id].as_ref().unwrap()
        }

        fn set_connected(&mut self, id: usize, connected: bool, now: Timestamp) {
            self.connected[id] = connected;
            if let Some(shard) = self.shards[id].as_mut() {
                shard.set_transport_connected(connected, now);
            }
        }
    }

    #[test]
    fn test_bootstrap_sees_all_peers() {
        let mut cluster = Cluster::new(3);
        cluster.run(0, 10_000);

        for id in 0..3 {
            let status = cluster.shard(id).status(true, LifecyclePhase::Running);
            assert_eq!(status.online_shards, 3);
            assert_eq!(status.leader_id, ShardId(0));
            assert_eq!(status.epoch, 0);
        }
        assert_eq!(cluster.elections, 0);
    }

    #[test]
    fn test_leader_failure_and_restart() {
        let mut cluster = Cluster::new(4);
        cluster.run(0, 10_000);

        // shard 0 dies after its heartbeat at 10s
        cluster.shards[0] = None;
        cluster.run(11_000, 25_000);

        let agreed = cluster.shard(1).leader();
        assert_ne!(agreed.current_leader_id, ShardId(0));
        assert!(agreed.epoch >= 1);
        for id in 1..4 {
            let shard = cluster.shard(id);
            assert_eq!(shard.leader(), agreed);
            assert!(!shard.registry().is_online(ShardId(0)));
            assert!(shard.registry().is_online(agreed.current_leader_id));
        }

        // shard 0 restarts with the bootstrap view and learns the leader from heartbeats
        cluster.shards[0] = Some(coordinator(0, 4, 30_000));
        assert!(!cluster.shard(0).is_leader());
        assert!(!cluster.shard(0).status(true, LifecyclePhase::Running).is_leader());
        cluster.run(30_000, 45_000);

        for id in 0..4 {
            let shard = cluster.shard(id);
            assert_eq!(shard.leader(), agreed);
            assert!(shard.registry().is_online(ShardId(0)));
        }
        assert!(!cluster.shard(0).is_leader());
    }

    #[test]
    fn test_partitioned_follower_causes_no_election() {
        let mut cluster = Cluster::new(4);
        cluster.run(0, 10_000);

        cluster.set_connected(2, false, 10_500);
        cluster.run(11_000, 22_000);

        for id in [0, 1, 3] {
            assert!(!cluster.shard(id).registry().is_online(ShardId(2)));
        }
        // isolated shard keeps its view while it cannot detect anything
        assert_eq!(cluster.shard(2).registry().counts().online, 4);

        cluster.set_connected(2, true, 25_500);
        cluster.run(23_000, 40_000);

        for id in 0..4 {
            let shard = cluster.shard(id);
            assert_eq!(shard.registry().counts().online, 4);
            assert_eq!(shard.leader(), LeaderState::new(ShardId(0)));
        }
        assert_eq!(cluster.elections, 0);
    }

    #[test]
    fn test_restarted_initial_leader_waits_for_confirmation() {
        let mut shard = coordinator(0, 3, 30_000);
        assert_eq!(shard.leader(), LeaderState::new(ShardId(0)));
        assert!(!shard.is_leader());

        // own heartbeat looped back by the fanout confirms nothing
        let own = shard.heartbeat(30_000);
        shard.handle(&own, 30_000);
        assert!(!shard.is_leader());

        let hint = ClusterMessage::heartbeat(
            ShardId(1),
            30_500,
            Some(LeaderState {
                current_leader_id: ShardId(2),
                epoch: 1,
            }),
        );
        shard.handle(&hint, 30_500);
        assert!(shard.is_leader_confirmed());
        assert_eq!(shard.leader().current_leader_id, ShardId(2));
        assert!(!shard.is_leader());
    }

    #[test]
    fn test_bootstrap_leader_confirmed_by_peer_hint() {
        let mut shard = coordinator(0, 2, 0);
        let hint = ClusterMessage::heartbeat(ShardId(1), 100, Some(LeaderState::new(ShardId(0))));
        shard.handle(&hint, 100);
        assert!(shard.is_leader());
    }

    #[test]
    fn test_lone_leader_confirmed_once_detection_starts() {
        let mut shard = coordinator(0, 1, 0);
        assert!(shard.scan(5_000).is_none());
        assert!(!shard.is_leader());
        assert!(shard.scan(10_000).is_none());
        assert!(shard.is_leader());
    }

    #[test]
    fn test_concurrent_elections_converge() {
        let topology = |id| ShardTopology::new(ShardId(id), 3).unwrap();
        let mut a = ShardCoordinator::with_rng_seed(topology(1), config(), ShardId(0), 0, 1);
        let mut b = ShardCoordinator::with_rng_seed(topology(2), config(), ShardId(0), 0, 2);

        let from_a = ClusterMessage::leader_elected(ShardId(1), 100, ShardId(2), 1);
        let from_b = ClusterMessage::leader_elected(ShardId(2), 100, ShardId(1), 1);

        a.handle(&from_a, 100);
        a.handle(&from_b, 100);
        b.handle(&from_b, 100);
        b.handle(&from_a, 100);

        assert_eq!(a.leader(), b.leader());
        assert_eq!(a.leader().current_leader_id, ShardId(1));
    }

    #[test]
    fn test_election_marks_leader_online() {
        let mut shard = coordinator(0, 3, 0);
        let outcome = shard.handle(&ClusterMessage::leader_elected(ShardId(1), 500, ShardId(2), 1), 600);

        assert_eq!(
            outcome,
            MessageOutcome::LeaderChanged {
                previous: ShardId(0),
                leader: ShardId(2),
                epoch: 1
            }
        );
        assert!(shard.registry().is_online(ShardId(2)));
        assert_eq!(
            shard.registry().get(ShardId(2)).unwrap().last_heartbeat_at,
            Some(500)
        );
    }

    #[test]
    fn test_election_is_idempotent() {
        let mut shard = coordinator(1, 3, 0);
        let message = ClusterMessage::leader_elected(ShardId(2), 500, ShardId(2), 3);

        assert!(matches!(
            shard.handle(&message, 500),
            MessageOutcome::LeaderChanged { .. }
        ));
        let after_first = shard.leader();
        assert_eq!(shard.handle(&message, 600), MessageOutcome::Ignored);
        assert_eq!(shard.leader(), after_first);
    }

    #[test]
    fn test_unknown_sender_ignored() {
        let mut shard = coordinator(0, 2, 0);
        let outcome = shard.handle(&ClusterMessage::heartbeat(ShardId(7), 10, None), 10);
        assert_eq!(outcome, MessageOutcome::Ignored);
        assert_eq!(shard.registry().counts().online, 1);
    }

    #[test]
    fn test_unknown_leader_ignored() {
        let mut shard = coordinator(0, 2, 0);
        let message = ClusterMessage::leader_elected(ShardId(1), 10, ShardId(9), 5);
        assert_eq!(shard.handle(&message, 10), MessageOutcome::Ignored);
        assert_eq!(shard.leader(), LeaderState::new(ShardId(0)));
    }

    #[test]
    fn test_events_are_forwarded() {
        let mut shard = coordinator(0, 2, 0);
        let message = ClusterMessage::event(
            ShardId(1),
            42,
            "guild.update",
            serde_json::json!({"guild": 7}),
        );

        match shard.handle(&message, 50) {
            MessageOutcome::Event(event) => {
                assert_eq!(event.sender_id, ShardId(1));
                assert_eq!(event.topic, "guild.update");
                assert_eq!(event.payload["guild"], 7);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_no_election_while_shutting_down() {
        let mut shard = coordinator(1, 2, 0);
        shard.handle(&ClusterMessage::heartbeat(ShardId(0), 0, None), 0);
        shard.stop_elections();

        assert!(shard.scan(20_000).is_none());
        assert!(!shard.registry().is_online(ShardId(0)));
        assert_eq!(shard.leader().current_leader_id, ShardId(0));
    }

    #[test]
    fn test_restart_detection_delays_scans() {
        let mut shard = coordinator(1, 2, 0);
        shard.restart_detection(50_000);
        assert!(!shard.is_detecting(59_999));
        assert!(shard.scan(55_000).is_none());
        assert!(shard.is_detecting(60_000));
    }

    #[test]
    fn test_initial_leader_never_seen_is_replaced() {
        let mut shard = coordinator(1, 2, 0);
        assert!(shard.scan(5_000).is_none());

        let message = shard.scan(10_000).expect("election after bootstrap grace");
        assert_eq!(
            message,
            ClusterMessage::leader_elected(ShardId(1), 10_000, ShardId(1), 1)
        );
        assert!(shard.is_leader());
    }
}
