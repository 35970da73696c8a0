use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    ConfirmSelectOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind};
use shardlink_core::cluster::{ClusterMessage, ShardId};
use shardlink_core::config::BrokerConfig;
use shardlink_core::{Result, ShardError};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::backoff::Backoff;
use super::outbox::Outbox;
use super::{BoxFuture, Inbox, Transport, INBOX_CAPACITY};

const DEFAULT_EXCHANGE: &str = "";
const CONTENT_TYPE: &str = "application/json";
const REPLY_SUCCESS: u16 = 200;
const PREFETCH_COUNT: u16 = INBOX_CAPACITY as u16;

fn transport_error(e: lapin::Error) -> ShardError {
    ShardError::Transport(e.to_string())
}

/// [`Transport`] over an AMQP 0-9-1 broker.
///
/// Topology: one non-durable fanout exchange shared by every shard and one
/// exclusive, auto-deleted queue per shard bound to it. Direct messages go
/// through the default exchange, routed by queue name. Publisher confirms are
/// enabled. Deliveries are acked only once queued on the inbox, and at most
/// one inbox worth of deliveries is unacked at a time.
pub struct AmqpTransport {
    inner: Arc<AmqpInner>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

struct AmqpInner {
    shard_id: ShardId,
    config: BrokerConfig,
    consumer_tag: String,
    inbox: Inbox,
    session: RwLock<Option<Session>>,
    outbox: Mutex<Outbox<ClusterMessage>>,
    connected: AtomicBool,
    generation: AtomicU64,
    lost_tx: mpsc::UnboundedSender<u64>,
    lost_rx: Mutex<Option<mpsc::UnboundedReceiver<u64>>>,
    shutdown: CancellationToken,
}

/// One live broker connection.
struct Session {
    connection: Connection,
    channel: Channel,
    pump: JoinHandle<()>,
}

impl AmqpTransport {
    /// Create a transport for `shard_id`. Nothing is opened until `connect`.
    pub fn new(shard_id: ShardId, config: BrokerConfig) -> Self {
        let (lost_tx, lost_rx) = mpsc::unbounded_channel();
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "shardlink".to_string());
        let consumer_tag = format!("{}-shard-{}-{}", host, shard_id, Uuid::new_v4());

        Self {
            inner: Arc::new(AmqpInner {
                shard_id,
                outbox: Mutex::new(Outbox::new(config.outbox_capacity)),
                config,
                consumer_tag,
                inbox: Inbox::new(),
                session: RwLock::new(None),
                connected: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                lost_tx,
                lost_rx: Mutex::new(Some(lost_rx)),
                shutdown: CancellationToken::new(),
            }),
            supervisor: Mutex::new(None),
        }
    }

    /// Name of this shard's private queue.
    pub fn queue_name(&self) -> String {
        self.inner.config.queue_name(self.inner.shard_id.as_u32())
    }
}

impl AmqpInner {
    /// Open a connection and declare the topology.
    async fn open_session(&self) -> Result<Session> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let connection = Connection::connect(&self.config.url, ConnectionProperties::default())
            .await
            .map_err(transport_error)?;
        let channel = connection.create_channel().await.map_err(transport_error)?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(transport_error)?;
        channel
            .basic_qos(PREFETCH_COUNT, BasicQosOptions::default())
            .await
            .map_err(transport_error)?;

        channel
            .exchange_declare(
                &self.config.exchange,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions {
                    durable: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(transport_error)?;

        let queue = self.config.queue_name(self.shard_id.as_u32());
        channel
            .queue_declare(
                &queue,
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(transport_error)?;
        channel
            .queue_bind(
                &queue,
                &self.config.exchange,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(transport_error)?;

        let consumer = channel
            .basic_consume(
                &queue,
                &self.consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(transport_error)?;

        let lost_tx = self.lost_tx.clone();
        connection.on_error(move |e| {
            tracing::warn!("Broker connection error: {}", e);
            let _ = lost_tx.send(generation);
        });

        let pump = tokio::spawn(pump(
            consumer,
            self.inbox.sender(),
            self.lost_tx.clone(),
            generation,
        ));

        tracing::info!(
            exchange = %self.config.exchange,
            queue = %queue,
            "Connected to broker"
        );

        Ok(Session {
            connection,
            channel,
            pump,
        })
    }

    async fn install(&self, session: Session) {
        let previous = self.session.write().await.replace(session);
        if let Some(previous) = previous {
            previous.pump.abort();
        }
        self.connected.store(true, Ordering::SeqCst);
    }

    async fn channel(&self) -> Result<Channel> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.channel.clone())
            .ok_or_else(|| ShardError::Transport("Not connected to broker".to_string()))
    }

    async fn publish(&self, exchange: &str, routing_key: &str, message: &ClusterMessage) -> Result<()> {
        let payload = message.to_bytes()?;
        let channel = self.channel().await?;

        let confirm = channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_content_type(CONTENT_TYPE.into()),
            )
            .await
            .map_err(transport_error)?
            .await
            .map_err(transport_error)?;

        if confirm.is_nack() {
            return Err(ShardError::Transport(format!(
                "Broker rejected {} message",
                message.kind()
            )));
        }
        Ok(())
    }

    async fn buffer(&self, message: ClusterMessage) {
        let mut outbox = self.outbox.lock().await;
        if outbox.push(message).is_some() {
            tracing::warn!(
                dropped_total = outbox.dropped_total(),
                "Outbox full, dropped oldest broadcast"
            );
        }
    }

    async fn flush_outbox(&self) {
        let mut flushed = 0usize;
        loop {
            let Some(message) = self.outbox.lock().await.pop_front() else {
                break;
            };
            if let Err(e) = self.publish(&self.config.exchange, "", &message).await {
                tracing::warn!("Failed to flush outbox: {}", e);
                self.outbox.lock().await.push_front(message);
                break;
            }
            flushed += 1;
        }
        if flushed > 0 {
            tracing::debug!(flushed, "Flushed buffered broadcasts");
        }
    }

    async fn teardown(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        let Some(session) = self.session.write().await.take() else {
            return Ok(());
        };
        session.pump.abort();

        let channel_result = session
            .channel
            .close(REPLY_SUCCESS, "shard shutting down")
            .await
            .map_err(transport_error);
        let connection_result = session
            .connection
            .close(REPLY_SUCCESS, "shard shutting down")
            .await
            .map_err(transport_error);

        channel_result.and(connection_result)
    }

    /// Reconnect after every connection loss until shutdown.
    async fn supervise(self: Arc<Self>, mut lost_rx: mpsc::UnboundedReceiver<u64>) {
        let mut backoff = Backoff::new(self.config.initial_backoff(), self.config.max_backoff());
        loop {
            let generation = tokio::select! {
                _ = self.shutdown.cancelled() => return,
                lost = lost_rx.recv() => match lost {
                    Some(generation) => generation,
                    None => return,
                },
            };
            if generation != self.generation.load(Ordering::SeqCst) {
                continue;
            }

            tracing::warn!("Lost broker connection");
            if let Err(e) = self.teardown().await {
                tracing::debug!("Error closing dead connection: {}", e);
            }

            loop {
                let delay = backoff.next_delay();
                tracing::info!(
                    attempt = backoff.attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "Reconnecting to broker"
                );

                tokio::select! {
                    _ = self.shutdown.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }

                match self.open_session().await {
                    Ok(session) => {
                        self.install(session).await;
                        tracing::info!(attempts = backoff.attempts(), "Reconnected to broker");
                        backoff.reset();
                        self.flush_outbox().await;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Reconnect attempt failed: {}", e);
                    }
                }
            }
        }
    }
}

/// Forward deliveries to the inbox until the consumer stream ends.
///
/// A delivery is acked after the inbox accepted it; while the inbox is full
/// the pump waits and the broker keeps the rest unacked.
async fn pump(
    mut consumer: Consumer,
    inbox: mpsc::Sender<ClusterMessage>,
    lost_tx: mpsc::UnboundedSender<u64>,
    generation: u64,
) {
    while let Some(delivery) = consumer.next().await {
        let delivery = match delivery {
            Ok(delivery) => delivery,
            Err(e) => {
                tracing::warn!("Consumer error: {}", e);
                break;
            }
        };

        match ClusterMessage::from_bytes(&delivery.data) {
            Ok(message) => {
                if inbox.send(message).await.is_err() {
                    tracing::debug!("Inbox dropped, leaving delivery unacked");
                    return;
                }
            }
            Err(e) => {
                tracing::warn!("Dropping malformed message: {}", e);
            }
        }

        if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
            tracing::warn!("Failed to ack delivery: {}", e);
        }
    }

    let _ = lost_tx.send(generation);
}

impl Transport for AmqpTransport {
    fn connect(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut supervisor = self.supervisor.lock().await;
            if supervisor.is_some() {
                return Ok(());
            }

            let timeout = self.inner.config.connect_timeout();
            tracing::info!(url = %self.inner.config.url, "Connecting to broker");
            let session = tokio::time::timeout(timeout, self.inner.open_session())
                .await
                .map_err(|_| {
                    ShardError::Timeout(format!(
                        "Broker not reachable within {}s",
                        timeout.as_secs()
                    ))
                })??;
            self.inner.install(session).await;
            self.inner.flush_outbox().await;

            let lost_rx = self.inner.lost_rx.lock().await.take().ok_or_else(|| {
                ShardError::InvalidState("Transport supervisor already started".to_string())
            })?;
            *supervisor = Some(tokio::spawn(self.inner.clone().supervise(lost_rx)));
            Ok(())
        })
    }

    fn publish_broadcast(&self, message: ClusterMessage) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if !self.inner.connected.load(Ordering::SeqCst) {
                self.inner.buffer(message).await;
                return Ok(());
            }

            if let Err(e) = self
                .inner
                .publish(&self.inner.config.exchange, "", &message)
                .await
            {
                tracing::warn!("Broadcast failed, buffering: {}", e);
                self.inner.buffer(message).await;
            }
            Ok(())
        })
    }

    fn publish_direct(&self, target: ShardId, message: ClusterMessage) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if !self.inner.connected.load(Ordering::SeqCst) {
                return Err(ShardError::Transport(
                    "Cannot send direct message while disconnected".to_string(),
                ));
            }
            let queue = self.inner.config.queue_name(target.as_u32());
            self.inner.publish(DEFAULT_EXCHANGE, &queue, &message).await
        })
    }

    fn subscribe(&self) -> Result<mpsc::Receiver<ClusterMessage>> {
        self.inner.inbox.take()
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.inner.shutdown.cancel();
            if let Some(handle) = self.supervisor.lock().await.take() {
                let _ = handle.await;
            }

            if self.inner.connected.load(Ordering::SeqCst) {
                self.inner.flush_outbox().await;
            }
            let result = self.inner.teardown().await;
            tracing::info!("Broker connection closed");
            result
        })
    }
}
