use std::sync::Mutex;

use shardlink_core::cluster::ClusterMessage;
use shardlink_core::{Result, ShardError};
use tokio::sync::mpsc;

use super::INBOX_CAPACITY;

/// Bounded single-consumer channel for inbound messages.
///
/// Producers wait for capacity instead of dropping, so a slow consumer pushes
/// back on the broker rather than losing deliveries.
pub(crate) struct Inbox {
    tx: mpsc::Sender<ClusterMessage>,
    rx: Mutex<Option<mpsc::Receiver<ClusterMessage>>>,
}

impl Inbox {
    pub(crate) fn new() -> Self {
        Self::with_capacity(INBOX_CAPACITY)
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    pub(crate) fn sender(&self) -> mpsc::Sender<ClusterMessage> {
        self.tx.clone()
    }

    /// Hand out the receiving end. Only the first call succeeds.
    pub(crate) fn take(&self) -> Result<mpsc::Receiver<ClusterMessage>> {
        self.rx
            .lock()
            .map_err(|_| ShardError::Internal("Inbox lock poisoned".to_string()))?
            .take()
            .ok_or_else(|| ShardError::InvalidState("Inbox already has a subscriber".to_string()))
    }
}
