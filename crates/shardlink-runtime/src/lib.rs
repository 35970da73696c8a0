pub mod cluster;
pub mod transport;

pub use cluster::{
    HeartbeatConfig, HeartbeatEngine, LeaderElection, MembershipRegistry, ShardCoordinator,
    ShardEvent, ShardHandle, ShardNode, ShutdownConfig, ShutdownCoordinator, ShutdownOutcome,
};
pub use transport::{AmqpTransport, MemoryBroker, MemoryTransport, Transport};
