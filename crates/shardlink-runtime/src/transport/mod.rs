//! Message transport between shards.
//!
//! Every shard publishes to one shared fanout channel and owns one private
//! queue for point-to-point delivery. Delivery is at-least-once; consumers
//! must apply messages idempotently.

mod amqp;
mod backoff;
mod inbox;
mod memory;
mod outbox;

pub use amqp::AmqpTransport;
pub use backoff::Backoff;
pub use memory::{MemoryBroker, MemoryTransport};
pub use outbox::Outbox;

pub(crate) use inbox::Inbox;

use std::future::Future;
use std::pin::Pin;

use shardlink_core::cluster::{ClusterMessage, ShardId};
use shardlink_core::Result;
use tokio::sync::mpsc;

/// Boxed future returned by [`Transport`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Default capacity of the inbound message channel.
pub const INBOX_CAPACITY: usize = 1024;

/// Publish/subscribe channel between shards.
///
/// Implementations reconnect on their own after the first successful
/// `connect`. While disconnected, broadcasts are buffered in a bounded outbox
/// and direct sends fail.
pub trait Transport: Send + Sync {
    /// Establish the channel topology. Fails if the broker cannot be reached.
    fn connect(&self) -> BoxFuture<'_, Result<()>>;

    /// Send a message to every shard, including this one.
    fn publish_broadcast(&self, message: ClusterMessage) -> BoxFuture<'_, Result<()>>;

    /// Send a message to one shard's private queue.
    fn publish_direct(&self, target: ShardId, message: ClusterMessage) -> BoxFuture<'_, Result<()>>;

    /// Take the stream of inbound messages, broadcast or direct.
    ///
    /// There is a single consumer; a second call fails. A message is only
    /// acknowledged to the broker once it is queued on this stream.
    fn subscribe(&self) -> Result<mpsc::Receiver<ClusterMessage>>;

    /// Check if the broker connection is currently up.
    fn is_connected(&self) -> bool;

    /// Flush what can be flushed and release the connection.
    fn close(&self) -> BoxFuture<'_, Result<()>>;
}
