//! Shardlink shard runtime
//!
//! Wires a configured shard together:
//! - Broker transport (AMQP by default)
//! - Shard node event loop (heartbeats, failure detection, elections)
//! - Shutdown on Ctrl-C / SIGTERM with a bounded grace period

use std::sync::Arc;

use shardlink_core::cluster::{ShardId, ShardTopology};
use shardlink_core::config::ShardConfig;
use shardlink_core::error::{Result, ShardError};
use shardlink_runtime::cluster::{
    wait_for_signal, HeartbeatConfig, ShardHandle, ShardNode, ShutdownConfig, ShutdownCoordinator,
    ShutdownOutcome,
};
use shardlink_runtime::transport::{AmqpTransport, Transport};
use tokio::time::Instant;

/// Prelude module for common imports.
pub mod prelude {
    pub use shardlink_core::cluster::{
        ClusterMessage, ClusterStatus, Epoch, LeaderState, LifecyclePhase, MembershipEntry, ShardId,
        ShardStatus, ShardTopology, Timestamp,
    };
    pub use shardlink_core::config::ShardConfig;
    pub use shardlink_core::error::{Result, ShardError};
    pub use shardlink_runtime::cluster::{ShardEvent, ShardHandle};
    pub use shardlink_runtime::transport::{MemoryBroker, Transport};

    pub use crate::{Shard, ShardBuilder};
}

/// A configured shard, ready to run.
pub struct Shard {
    config: ShardConfig,
    topology: ShardTopology,
    transport: Arc<dyn Transport>,
    shutdown: Arc<ShutdownCoordinator>,
    node: ShardNode,
}

impl Shard {
    /// Create a new builder.
    pub fn builder() -> ShardBuilder {
        ShardBuilder::new()
    }

    /// Get the local shard id.
    pub fn shard_id(&self) -> ShardId {
        self.topology.local()
    }

    /// Get the topology.
    pub fn topology(&self) -> &ShardTopology {
        &self.topology
    }

    /// Get the configuration.
    pub fn config(&self) -> &ShardConfig {
        &self.config
    }

    /// Get a handle for leader queries, status and events.
    pub fn handle(&self) -> ShardHandle {
        self.node.handle()
    }

    /// Connect, run until a termination signal or a shutdown request, then close.
    ///
    /// Fails if the broker cannot be reached within the startup deadline.
    pub async fn run(self) -> Result<()> {
        tracing::info!(
            shard = %self.topology.local(),
            shard_count = self.topology.count(),
            "Shardlink shard starting"
        );

        let deadline = self.config.broker.connect_timeout();
        tokio::time::timeout(deadline, self.transport.connect())
            .await
            .map_err(|_| {
                ShardError::Timeout(format!(
                    "Broker not reachable within {}s",
                    deadline.as_secs()
                ))
            })??;

        let node_task = tokio::spawn(self.node.run());
        let token = self.shutdown.token();

        tracing::info!("Shard started");

        tokio::select! {
            result = wait_for_signal() => match result {
                Ok(()) => tracing::info!("Received shutdown signal"),
                Err(e) => {
                    tracing::warn!("Failed to listen for shutdown signals: {}", e);
                    token.cancelled().await;
                }
            },
            _ = token.cancelled() => {
                tracing::info!("Received shutdown request");
            }
        }

        let deadline = Instant::now() + self.config.shutdown.grace_period();
        match self
            .shutdown
            .shutdown_by(self.transport.as_ref(), deadline)
            .await
        {
            ShutdownOutcome::Clean | ShutdownOutcome::AlreadyRequested => {}
            ShutdownOutcome::CloseFailed(e) => tracing::warn!("Shutdown error: {}", e),
            ShutdownOutcome::TimedOut => tracing::warn!("Shutdown grace period exceeded"),
        }

        match tokio::time::timeout_at(deadline, node_task).await {
            Ok(Ok(result)) => result?,
            Ok(Err(e)) => {
                return Err(ShardError::Internal(format!("Shard node task failed: {}", e)));
            }
            Err(_) => tracing::warn!("Shard node did not stop within the grace period"),
        }

        tracing::info!("Shard stopped");
        Ok(())
    }
}

/// Builder for a [`Shard`].
pub struct ShardBuilder {
    config: Option<ShardConfig>,
    transport: Option<Arc<dyn Transport>>,
}

impl ShardBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: None,
            transport: None,
        }
    }

    /// Set the configuration.
    pub fn config(mut self, config: ShardConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use a custom transport instead of AMQP.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Validate the configuration and assemble the shard.
    pub fn build(self) -> Result<Shard> {
        let config = self
            .config
            .ok_or_else(|| ShardError::Config("Configuration is required".to_string()))?;
        let topology = config.validate()?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(AmqpTransport::new(topology.local(), config.broker.clone())),
        };
        let shutdown = Arc::new(ShutdownCoordinator::new(ShutdownConfig::from(
            &config.shutdown,
        )));
        let node = ShardNode::new(
            topology,
            HeartbeatConfig::from(&config.cluster),
            ShardId(config.cluster.initial_leader),
            transport.clone(),
            shutdown.clone(),
        )?;

        Ok(Shard {
            config,
            topology,
            transport,
            shutdown,
            node,
        })
    }
}

impl Default for ShardBuilder {
    fn default() -> Self {
        Self::new()
    }
}
