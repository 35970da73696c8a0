mod leader;
mod message;
mod shard;
mod status;

pub use leader::{Epoch, LeaderState, LeaderUpdate};
pub use message::{ClusterMessage, MessageKind};
pub use shard::{now_millis, MembershipEntry, ShardId, ShardStatus, ShardTopology, Timestamp};
pub use status::{ClusterStatus, LifecyclePhase};
