use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use shardlink_core::cluster::LifecyclePhase;
use shardlink_core::config::ShutdownSettings;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::transport::Transport;

/// Shutdown configuration.
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Upper bound on closing the transport.
    pub grace_period: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
        }
    }
}

impl From<&ShutdownSettings> for ShutdownConfig {
    fn from(settings: &ShutdownSettings) -> Self {
        Self {
            grace_period: settings.grace_period(),
        }
    }
}

/// How a shutdown finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Transport closed within the grace period.
    Clean,
    /// Transport close returned an error.
    CloseFailed(String),
    /// Transport close did not finish within the grace period.
    TimedOut,
    /// Another caller already ran the shutdown.
    AlreadyRequested,
}

/// Drives a shard through `Running -> Draining -> Closed`.
pub struct ShutdownCoordinator {
    config: ShutdownConfig,
    phase: AtomicU8,
    closing: AtomicBool,
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new(config: ShutdownConfig) -> Self {
        Self {
            config,
            phase: AtomicU8::new(LifecyclePhase::Running.as_u8()),
            closing: AtomicBool::new(false),
            token: CancellationToken::new(),
        }
    }

    /// Get the current phase.
    pub fn phase(&self) -> LifecyclePhase {
        LifecyclePhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Check if shutdown has begun.
    pub fn is_draining(&self) -> bool {
        self.phase() != LifecyclePhase::Running
    }

    /// Check if elections may still be triggered.
    pub fn should_accept_elections(&self) -> bool {
        self.phase() == LifecyclePhase::Running
    }

    /// Token cancelled as soon as shutdown is requested.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Enter `Draining` and cancel the token. Does not touch the transport.
    pub fn request(&self) {
        let previous = self.phase.compare_exchange(
            LifecyclePhase::Running.as_u8(),
            LifecyclePhase::Draining.as_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        if previous.is_ok() {
            tracing::info!("Shutdown requested, draining");
        }
        self.token.cancel();
    }

    /// Grace period.
    pub fn grace_period(&self) -> Duration {
        self.config.grace_period
    }

    /// Drain and close the transport within the grace period.
    ///
    /// Only the first call does any work.
    pub async fn shutdown(&self, transport: &dyn Transport) -> ShutdownOutcome {
        self.shutdown_by(transport, Instant::now() + self.config.grace_period)
            .await
    }

    /// Drain and close the transport before `deadline`.
    ///
    /// Callers that have more to wait for after the close pass the same
    /// deadline on, so the whole shutdown stays within one grace period.
    pub async fn shutdown_by(
        &self,
        transport: &dyn Transport,
        deadline: Instant,
    ) -> ShutdownOutcome {
        if self.closing.swap(true, Ordering::SeqCst) {
            return ShutdownOutcome::AlreadyRequested;
        }

        self.request();

        let outcome = match tokio::time::timeout_at(deadline, transport.close()).await {
            Ok(Ok(())) => ShutdownOutcome::Clean,
            Ok(Err(e)) => ShutdownOutcome::CloseFailed(e.to_string()),
            Err(_) => ShutdownOutcome::TimedOut,
        };

        match &outcome {
            ShutdownOutcome::Clean => tracing::info!("Transport closed"),
            ShutdownOutcome::CloseFailed(e) => {
                tracing::warn!("Failed to close transport: {}", e)
            }
            ShutdownOutcome::TimedOut => tracing::warn!(
                "Transport close exceeded grace period of {}ms, exiting anyway",
                self.config.grace_period.as_millis()
            ),
            ShutdownOutcome::AlreadyRequested => {}
        }

        self.phase
            .store(LifecyclePhase::Closed.as_u8(), Ordering::SeqCst);
        tracing::info!("Shutdown complete");
        outcome
    }
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("config", &self.config)
            .field("phase", &self.phase())
            .finish()
    }
}

/// Wait for Ctrl-C, or SIGTERM on Unix.
pub async fn wait_for_signal() -> shardlink_core::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{BoxFuture, MemoryBroker};
    use shardlink_core::cluster::{ClusterMessage, ShardId};
    use shardlink_core::{Result, ShardError};
    use crate::transport::Inbox;
    use tokio::sync::mpsc;

    /// Transport whose close never finishes or always fails.
    struct StuckTransport {
        fail: bool,
        inbox: Inbox,
    }

    impl StuckTransport {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                inbox: Inbox::new(),
            }
        }
    }

    impl Transport for StuckTransport {
        fn connect(&self) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Ok(()) })
        }

        fn publish_broadcast(&self, _message: ClusterMessage) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Ok(()) })
        }

        fn publish_direct(&self, _target: ShardId, _message: ClusterMessage) -> BoxFuture<'_, Result<()>> {
            Box::pin(async { Ok(()) })
        }

        fn subscribe(&self) -> Result<mpsc::Receiver<ClusterMessage>> {
            self.inbox.take()
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn close(&self) -> BoxFuture<'_, Result<()>> {
            let fail = self.fail;
            Box::pin(async move {
                if fail {
                    return Err(ShardError::Transport("connection reset".to_string()));
                }
                std::future::pending::<()>().await;
                Ok(())
            })
        }
    }

    fn coordinator(grace_ms: u64) -> ShutdownCoordinator {
        ShutdownCoordinator::new(ShutdownConfig {
            grace_period: Duration::from_millis(grace_ms),
        })
    }

    #[test]
    fn test_config_from_settings() {
        let config = ShutdownConfig::from(&ShutdownSettings {
            grace_period_ms: 1500,
        });
        assert_eq!(config.grace_period, Duration::from_millis(1500));
    }

    #[test]
    fn test_request_enters_draining() {
        let shutdown = coordinator(100);
        assert_eq!(shutdown.phase(), LifecyclePhase::Running);
        assert!(shutdown.should_accept_elections());

        shutdown.request();
        assert_eq!(shutdown.phase(), LifecyclePhase::Draining);
        assert!(shutdown.is_draining());
        assert!(!shutdown.should_accept_elections());
        assert!(shutdown.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_clean_shutdown() {
        let broker = MemoryBroker::new();
        let transport = broker.transport(ShardId(0), 4);
        transport.connect().await.unwrap();

        let shutdown = coordinator(1_000);
        assert_eq!(shutdown.shutdown(&transport).await, ShutdownOutcome::Clean);
        assert_eq!(shutdown.phase(), LifecyclePhase::Closed);
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let broker = MemoryBroker::new();
        let transport = broker.transport(ShardId(0), 4);
        let shutdown = coordinator(1_000);

        shutdown.shutdown(&transport).await;
        assert_eq!(
            shutdown.shutdown(&transport).await,
            ShutdownOutcome::AlreadyRequested
        );
        assert_eq!(shutdown.phase(), LifecyclePhase::Closed);
    }

    #[tokio::test]
    async fn test_stuck_close_is_bounded() {
        let shutdown = coordinator(50);
        let started = std::time::Instant::now();

        let outcome = shutdown.shutdown(&StuckTransport::new(false)).await;
        assert_eq!(outcome, ShutdownOutcome::TimedOut);
        assert_eq!(shutdown.phase(), LifecyclePhase::Closed);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_close_bounded_by_deadline() {
        let shutdown = coordinator(5_000);
        let deadline = Instant::now() + Duration::from_millis(50);

        let outcome = shutdown
            .shutdown_by(&StuckTransport::new(false), deadline)
            .await;
        assert_eq!(outcome, ShutdownOutcome::TimedOut);
        assert!(Instant::now() < deadline + Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_failed_close_still_closes() {
        let shutdown = coordinator(1_000);
        let outcome = shutdown.shutdown(&StuckTransport::new(true)).await;
        assert!(matches!(outcome, ShutdownOutcome::CloseFailed(_)));
        assert_eq!(shutdown.phase(), LifecyclePhase::Closed);
    }
}
