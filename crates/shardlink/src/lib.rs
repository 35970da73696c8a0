//! Shardlink - coordination for fleets of shard processes
//!
//! Each shard process tracks which peers are alive through heartbeats,
//! agrees on a single leader shard, and exchanges application events with
//! its peers over a shared message broker.

mod runtime;

#[doc(hidden)]
pub use shardlink_core;
#[doc(hidden)]
pub use shardlink_runtime;

pub use runtime::prelude;
pub use runtime::{Shard, ShardBuilder};
