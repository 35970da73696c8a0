mod coordinator;
mod heartbeat;
mod leader;
mod node;
mod registry;
mod shutdown;

pub use coordinator::{MessageOutcome, ShardCoordinator, ShardEvent};
pub use heartbeat::{HeartbeatConfig, HeartbeatEngine};
pub use leader::LeaderElection;
pub use node::{ShardHandle, ShardNode};
pub use registry::{HeartbeatObservation, MembershipCounts, MembershipRegistry};
pub use shutdown::{wait_for_signal, ShutdownConfig, ShutdownCoordinator, ShutdownOutcome};
