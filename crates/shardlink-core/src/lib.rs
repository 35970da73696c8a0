pub mod cluster;
pub mod config;
pub mod error;

pub use cluster::{
    ClusterMessage, ClusterStatus, LeaderState, LifecyclePhase, MembershipEntry, MessageKind, ShardId,
    ShardStatus, ShardTopology,
};
pub use config::ShardConfig;
pub use error::{Result, ShardError};
