use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use shardlink_core::cluster::{ClusterMessage, ShardId};
use shardlink_core::{Result, ShardError};
use tokio::sync::{mpsc, Mutex, RwLock};

use super::outbox::Outbox;
use super::{BoxFuture, Inbox, Transport};

type Queue = mpsc::UnboundedSender<ClusterMessage>;

/// In-process broker shared by several [`MemoryTransport`]s.
///
/// Each connected transport binds a queue; a broadcast reaches every bound
/// queue, a direct send reaches one. Queues are unbounded, like a broker's,
/// and each transport drains its own into a bounded inbox.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    queues: Arc<RwLock<HashMap<ShardId, Queue>>>,
}

impl MemoryBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport for `shard_id` attached to this broker.
    pub fn transport(&self, shard_id: ShardId, outbox_capacity: usize) -> MemoryTransport {
        MemoryTransport {
            shard_id,
            broker: self.clone(),
            inbox: Inbox::new(),
            connected: AtomicBool::new(false),
            outbox: Mutex::new(Outbox::new(outbox_capacity)),
        }
    }

    /// Shards with a bound queue.
    pub async fn bound_shards(&self) -> Vec<ShardId> {
        let mut shards: Vec<ShardId> = self.queues.read().await.keys().copied().collect();
        shards.sort();
        shards
    }

    async fn bind(&self, shard_id: ShardId, queue: Queue) {
        self.queues.write().await.insert(shard_id, queue);
    }

    async fn unbind(&self, shard_id: ShardId) {
        self.queues.write().await.remove(&shard_id);
    }

    async fn fanout(&self, message: &ClusterMessage) {
        for queue in self.queues.read().await.values() {
            // no consumer left behind this queue
            let _ = queue.send(message.clone());
        }
    }

    async fn deliver(&self, target: ShardId, message: ClusterMessage) -> Result<()> {
        let queues = self.queues.read().await;
        let queue = queues.get(&target).ok_or_else(|| {
            ShardError::Transport(format!("No queue bound for shard {}", target))
        })?;
        queue
            .send(message)
            .map_err(|_| ShardError::Transport(format!("Queue for shard {} is closed", target)))
    }
}

/// Move messages from a broker queue into the inbox, waiting for capacity.
async fn pump(
    mut queue: mpsc::UnboundedReceiver<ClusterMessage>,
    inbox: mpsc::Sender<ClusterMessage>,
) {
    while let Some(message) = queue.recv().await {
        if inbox.send(message).await.is_err() {
            break;
        }
    }
}

/// [`Transport`] over a [`MemoryBroker`].
///
/// `disconnect` simulates losing the broker connection; calling `connect`
/// again restores it and flushes the buffered broadcasts.
pub struct MemoryTransport {
    shard_id: ShardId,
    broker: MemoryBroker,
    inbox: Inbox,
    connected: AtomicBool,
    outbox: Mutex<Outbox<ClusterMessage>>,
}

impl MemoryTransport {
    /// Get the shard this transport belongs to.
    pub fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    /// Drop the connection without closing the transport.
    pub async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.broker.unbind(self.shard_id).await;
            tracing::warn!(shard = %self.shard_id, "Memory transport disconnected");
        }
    }

    /// Number of broadcasts waiting for the connection.
    pub async fn pending(&self) -> usize {
        self.outbox.lock().await.len()
    }

    async fn flush_outbox(&self) {
        let mut outbox = self.outbox.lock().await;
        while let Some(message) = outbox.pop_front() {
            self.broker.fanout(&message).await;
        }
    }
}

impl Transport for MemoryTransport {
    fn connect(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if !self.connected.swap(true, Ordering::SeqCst) {
                let (queue, queue_rx) = mpsc::unbounded_channel();
                tokio::spawn(pump(queue_rx, self.inbox.sender()));
                self.broker.bind(self.shard_id, queue).await;
                tracing::debug!(shard = %self.shard_id, "Memory transport connected");
                self.flush_outbox().await;
            }
            Ok(())
        })
    }

    fn publish_broadcast(&self, message: ClusterMessage) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.connected.load(Ordering::SeqCst) {
                self.broker.fanout(&message).await;
            } else if self.outbox.lock().await.push(message).is_some() {
                tracing::warn!("Outbox full, dropped oldest broadcast");
            }
            Ok(())
        })
    }

    fn publish_direct(&self, target: ShardId, message: ClusterMessage) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if !self.connected.load(Ordering::SeqCst) {
                return Err(ShardError::Transport(
                    "Cannot send direct message while disconnected".to_string(),
                ));
            }
            self.broker.deliver(target, message).await
        })
    }

    fn subscribe(&self) -> Result<mpsc::Receiver<ClusterMessage>> {
        self.inbox.take()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.connected.swap(false, Ordering::SeqCst) {
                self.flush_outbox().await;
                self.broker.unbind(self.shard_id).await;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::INBOX_CAPACITY;
    use std::time::Duration;

    fn heartbeat(sender: u32, at: i64) -> ClusterMessage {
        ClusterMessage::heartbeat(ShardId(sender), at, None)
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_shard() {
        let broker = MemoryBroker::new();
        let a = broker.transport(ShardId(0), 8);
        let b = broker.transport(ShardId(1), 8);
        a.connect().await.unwrap();
        b.connect().await.unwrap();

        let mut rx_a = a.subscribe().unwrap();
        let mut rx_b = b.subscribe().unwrap();
        a.publish_broadcast(heartbeat(0, 1)).await.unwrap();

        assert_eq!(rx_a.recv().await.unwrap(), heartbeat(0, 1));
        assert_eq!(rx_b.recv().await.unwrap(), heartbeat(0, 1));
    }

    #[tokio::test]
    async fn test_direct_reaches_one_shard() {
        let broker = MemoryBroker::new();
        let a = broker.transport(ShardId(0), 8);
        let b = broker.transport(ShardId(1), 8);
        a.connect().await.unwrap();
        b.connect().await.unwrap();

        let mut rx_a = a.subscribe().unwrap();
        let mut rx_b = b.subscribe().unwrap();
        a.publish_direct(ShardId(1), heartbeat(0, 1)).await.unwrap();

        assert_eq!(rx_b.recv().await.unwrap(), heartbeat(0, 1));
        assert!(rx_a.try_recv().is_err());
        assert!(a.publish_direct(ShardId(5), heartbeat(0, 2)).await.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_buffers_broadcasts() {
        let broker = MemoryBroker::new();
        let a = broker.transport(ShardId(0), 2);
        let b = broker.transport(ShardId(1), 2);
        a.connect().await.unwrap();
        b.connect().await.unwrap();
        let mut rx_b = b.subscribe().unwrap();

        a.disconnect().await;
        assert!(!a.is_connected());
        assert_eq!(broker.bound_shards().await, vec![ShardId(1)]);

        for at in 1..=3 {
            a.publish_broadcast(heartbeat(0, at)).await.unwrap();
        }
        assert_eq!(a.pending().await, 2);
        assert!(a.publish_direct(ShardId(1), heartbeat(0, 9)).await.is_err());
        assert!(rx_b.try_recv().is_err());

        a.connect().await.unwrap();
        assert_eq!(rx_b.recv().await.unwrap(), heartbeat(0, 2));
        assert_eq!(rx_b.recv().await.unwrap(), heartbeat(0, 3));
        assert_eq!(a.pending().await, 0);
    }

    #[tokio::test]
    async fn test_disconnected_shard_receives_nothing() {
        let broker = MemoryBroker::new();
        let a = broker.transport(ShardId(0), 8);
        let b = broker.transport(ShardId(1), 8);
        a.connect().await.unwrap();
        b.connect().await.unwrap();
        let mut rx_b = b.subscribe().unwrap();

        b.disconnect().await;
        a.publish_broadcast(heartbeat(0, 1)).await.unwrap();
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_burst_is_not_lost() {
        let broker = MemoryBroker::new();
        let a = broker.transport(ShardId(0), 8);
        let b = broker.transport(ShardId(1), 8);
        a.connect().await.unwrap();
        b.connect().await.unwrap();
        let mut rx_b = b.subscribe().unwrap();

        let burst = INBOX_CAPACITY as i64 + 76;
        for at in 0..burst {
            a.publish_direct(ShardId(1), heartbeat(0, at)).await.unwrap();
        }

        for at in 0..burst {
            let message = tokio::time::timeout(Duration::from_secs(2), rx_b.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(message, heartbeat(0, at));
        }
    }

    #[tokio::test]
    async fn test_single_subscriber() {
        let broker = MemoryBroker::new();
        let a = broker.transport(ShardId(0), 8);
        assert!(a.subscribe().is_ok());
        assert!(a.subscribe().is_err());
    }

    #[tokio::test]
    async fn test_close_unbinds() {
        let broker = MemoryBroker::new();
        let a = broker.transport(ShardId(0), 8);
        a.connect().await.unwrap();
        a.close().await.unwrap();
        a.close().await.unwrap();

        assert!(!a.is_connected());
        assert!(broker.bound_shards().await.is_empty());
    }
}
