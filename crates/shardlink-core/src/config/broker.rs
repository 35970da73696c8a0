use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Message broker connection and topology settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// AMQP URI.
    #[serde(default = "default_url")]
    pub url: String,

    /// Fanout exchange shared by every shard.
    #[serde(default = "default_exchange")]
    pub exchange: String,

    /// Prefix of the per-shard private queue name.
    #[serde(default = "default_queue_prefix")]
    pub queue_prefix: String,

    /// Deadline for the first connection at startup, in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// First reconnect delay, in milliseconds.
    #[serde(default = "default_initial_backoff")]
    pub reconnect_initial_backoff_ms: u64,

    /// Reconnect delay cap, in milliseconds.
    #[serde(default = "default_max_backoff")]
    pub reconnect_max_backoff_ms: u64,

    /// Broadcasts kept while disconnected.
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            exchange: default_exchange(),
            queue_prefix: default_queue_prefix(),
            connect_timeout_secs: default_connect_timeout(),
            reconnect_initial_backoff_ms: default_initial_backoff(),
            reconnect_max_backoff_ms: default_max_backoff(),
            outbox_capacity: default_outbox_capacity(),
        }
    }
}

impl BrokerConfig {
    /// Private queue name of a shard.
    pub fn queue_name(&self, shard: u32) -> String {
        format!("{}{}", self.queue_prefix, shard)
    }

    /// Startup connection deadline.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// First reconnect delay.
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_backoff_ms)
    }

    /// Reconnect delay cap.
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_backoff_ms)
    }
}

fn default_url() -> String {
    "amqp://127.0.0.1:5672/%2f".to_string()
}

fn default_exchange() -> String {
    "shardlink.events".to_string()
}

fn default_queue_prefix() -> String {
    "shardlink.shard.".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_initial_backoff() -> u64 {
    1000
}

fn default_max_backoff() -> u64 {
    30_000
}

fn default_outbox_capacity() -> usize {
    64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_broker_config() {
        let config = BrokerConfig::default();
        assert_eq!(config.exchange, "shardlink.events");
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.initial_backoff(), Duration::from_secs(1));
        assert_eq!(config.max_backoff(), Duration::from_secs(30));
        assert_eq!(config.outbox_capacity, 64);
    }

    #[test]
    fn test_queue_name() {
        let config = BrokerConfig {
            queue_prefix: "shard-".to_string(),
            ..Default::default()
        };
        assert_eq!(config.queue_name(3), "shard-3");
    }
}
