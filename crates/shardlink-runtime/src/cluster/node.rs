use std::sync::Arc;

use shardlink_core::cluster::{
    now_millis, ClusterMessage, ClusterStatus, LeaderState, MembershipEntry, ShardId,
    ShardTopology,
};
use shardlink_core::{Result, ShardError};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

use super::coordinator::{MessageOutcome, ShardCoordinator, ShardEvent};
use super::heartbeat::HeartbeatConfig;
use super::shutdown::ShutdownCoordinator;
use crate::transport::Transport;

const EVENT_BUFFER: usize = 256;

/// State published by the event loop for handles to read.
struct NodeShared {
    topology: ShardTopology,
    leader_tx: watch::Sender<LeaderState>,
    membership_tx: watch::Sender<Vec<MembershipEntry>>,
    status_tx: watch::Sender<ClusterStatus>,
    events_tx: broadcast::Sender<ShardEvent>,
}

/// The single event loop of a shard.
///
/// Heartbeat timer, scan timer, inbound messages and shutdown are multiplexed
/// in one task; the coordinator is never touched from anywhere else.
pub struct ShardNode {
    coordinator: ShardCoordinator,
    transport: Arc<dyn Transport>,
    shutdown: Arc<ShutdownCoordinator>,
    shared: Arc<NodeShared>,
    inbox: mpsc::Receiver<ClusterMessage>,
}

impl ShardNode {
    /// Create a node with a fresh coordinator bootstrapped now.
    ///
    /// Takes the transport's inbox; fails if it already has a subscriber.
    pub fn new(
        topology: ShardTopology,
        config: HeartbeatConfig,
        initial_leader: ShardId,
        transport: Arc<dyn Transport>,
        shutdown: Arc<ShutdownCoordinator>,
    ) -> Result<Self> {
        let coordinator = ShardCoordinator::new(topology, config, initial_leader, now_millis());
        Self::with_coordinator(coordinator, transport, shutdown)
    }

    /// Create a node around an existing coordinator.
    pub fn with_coordinator(
        coordinator: ShardCoordinator,
        transport: Arc<dyn Transport>,
        shutdown: Arc<ShutdownCoordinator>,
    ) -> Result<Self> {
        let inbox = transport.subscribe()?;
        let status = coordinator.status(transport.is_connected(), shutdown.phase());
        let (leader_tx, _) = watch::channel(coordinator.leader());
        let (membership_tx, _) = watch::channel(coordinator.registry().entries().to_vec());
        let (status_tx, _) = watch::channel(status);
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER);

        let shared = Arc::new(NodeShared {
            topology: *coordinator.topology(),
            leader_tx,
            membership_tx,
            status_tx,
            events_tx,
        });

        Ok(Self {
            coordinator,
            transport,
            shutdown,
            shared,
            inbox,
        })
    }

    /// Get a handle for the rest of the application.
    pub fn handle(&self) -> ShardHandle {
        ShardHandle {
            shared: self.shared.clone(),
            transport: self.transport.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Run until shutdown is requested or the transport goes away.
    pub async fn run(mut self) -> Result<()> {
        let config = self.coordinator.heartbeat_config().clone();
        let token = self.shutdown.token();

        let mut heartbeat = tokio::time::interval(config.interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut scan =
            tokio::time::interval_at(Instant::now() + config.scan_interval, config.scan_interval);
        scan.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.coordinator.restart_detection(now_millis());

        tracing::info!(
            shard = %self.coordinator.shard_id(),
            shard_count = self.coordinator.topology().count(),
            leader = %self.coordinator.leader().current_leader_id,
            "Shard node started"
        );

        loop {
            self.sync_lifecycle();

            tokio::select! {
                _ = token.cancelled() => break,
                _ = heartbeat.tick() => {
                    let message = self.coordinator.heartbeat(now_millis());
                    if let Err(e) = self.transport.publish_broadcast(message).await {
                        tracing::warn!("Failed to publish heartbeat: {}", e);
                    }
                }
                _ = scan.tick() => {
                    if let Some(election) = self.coordinator.scan(now_millis()) {
                        if let Err(e) = self.transport.publish_broadcast(election).await {
                            tracing::warn!("Failed to publish election result: {}", e);
                        }
                    }
                }
                received = self.inbox.recv() => match received {
                    Some(message) => self.dispatch(message),
                    None => {
                        tracing::warn!("Transport inbox closed, stopping shard node");
                        break;
                    }
                },
            }

            self.publish_state();
        }

        self.coordinator.stop_elections();
        self.publish_state();
        tracing::info!(shard = %self.coordinator.shard_id(), "Shard node stopped");
        Ok(())
    }

    fn sync_lifecycle(&mut self) {
        self.coordinator
            .set_transport_connected(self.transport.is_connected(), now_millis());
        if !self.shutdown.should_accept_elections() {
            self.coordinator.stop_elections();
        }
    }

    fn dispatch(&mut self, message: ClusterMessage) {
        if let MessageOutcome::Event(event) = self.coordinator.handle(&message, now_millis()) {
            // no subscribers is fine
            let _ = self.shared.events_tx.send(event);
        }
    }

    fn publish_state(&self) {
        let leader = self.coordinator.leader();
        self.shared.leader_tx.send_if_modified(|current| {
            if *current == leader {
                return false;
            }
            *current = leader;
            true
        });

        let entries = self.coordinator.registry().entries();
        self.shared.membership_tx.send_if_modified(|current| {
            if current.as_slice() == entries {
                return false;
            }
            *current = entries.to_vec();
            true
        });

        self.shared.status_tx.send_replace(
            self.coordinator
                .status(self.transport.is_connected(), self.shutdown.phase()),
        );
    }
}

/// Cloneable view of a running shard.
#[derive(Clone)]
pub struct ShardHandle {
    shared: Arc<NodeShared>,
    transport: Arc<dyn Transport>,
    shutdown: Arc<ShutdownCoordinator>,
}

impl ShardHandle {
    /// Get the local shard id.
    pub fn shard_id(&self) -> ShardId {
        self.shared.topology.local()
    }

    /// Get the topology.
    pub fn topology(&self) -> &ShardTopology {
        &self.shared.topology
    }

    /// Get the current leader view, confirmed or not.
    pub fn leader(&self) -> LeaderState {
        *self.shared.leader_tx.borrow()
    }

    /// Check if this shard is the confirmed leader.
    pub fn is_leader(&self) -> bool {
        self.shared.status_tx.borrow().is_leader()
    }

    /// Watch leader changes.
    pub fn leader_changes(&self) -> watch::Receiver<LeaderState> {
        self.shared.leader_tx.subscribe()
    }

    /// Snapshot of the membership table.
    pub fn membership(&self) -> Vec<MembershipEntry> {
        self.shared.membership_tx.borrow().clone()
    }

    /// Watch membership changes.
    pub fn membership_changes(&self) -> watch::Receiver<Vec<MembershipEntry>> {
        self.shared.membership_tx.subscribe()
    }

    /// Current cluster status.
    pub fn status(&self) -> ClusterStatus {
        let mut status = self.shared.status_tx.borrow().clone();
        status.transport_connected = self.transport.is_connected();
        status.phase = self.shutdown.phase();
        status
    }

    /// Shard that owns `key` under the static `key mod count` scheme.
    pub fn owner_of(&self, key: u64) -> ShardId {
        self.shared.topology.owner_of(key)
    }

    /// Publish an application event to every shard.
    pub async fn broadcast_event(
        &self,
        topic: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<()> {
        self.ensure_running()?;
        let message = ClusterMessage::event(self.shard_id(), now_millis(), topic, payload);
        self.transport.publish_broadcast(message).await
    }

    /// Publish an application event to one shard.
    pub async fn send_event(
        &self,
        target: ShardId,
        topic: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<()> {
        self.ensure_running()?;
        if !self.shared.topology.contains(target) {
            return Err(ShardError::UnknownShard(target.as_u32()));
        }
        let message = ClusterMessage::event(self.shard_id(), now_millis(), topic, payload);
        self.transport.publish_direct(target, message).await
    }

    /// Receive application events from every shard.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ShardEvent> {
        self.shared.events_tx.subscribe()
    }

    /// Ask the shard to stop. The transport is closed by whoever runs the shutdown.
    pub fn request_shutdown(&self) {
        self.shutdown.request();
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shutdown.is_draining() {
            return Err(ShardError::InvalidState(
                "shard is shutting down".to_string(),
            ));
        }
        Ok(())
    }
}
