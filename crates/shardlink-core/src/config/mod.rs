mod broker;
mod cluster;

pub use broker::BrokerConfig;
pub use cluster::ClusterConfig;

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::cluster::{ShardId, ShardTopology};
use crate::error::{Result, ShardError};

/// Environment variable overriding the local shard id.
pub const SHARD_ID_ENV: &str = "MY_SHARD_ID";
/// Environment variable overriding the shard count.
pub const SHARD_COUNT_ENV: &str = "NUM_SHARDS";
/// Environment variable overriding the broker URL.
pub const BROKER_URL_ENV: &str = "SHARDLINK_BROKER_URL";

/// Root configuration for a shard process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShardConfig {
    /// Identity of this shard.
    #[serde(default)]
    pub shard: ShardSection,

    /// Broker configuration.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Heartbeat and election timing.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Shutdown behaviour.
    #[serde(default)]
    pub shutdown: ShutdownSettings,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ShardConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ShardError::Config(format!("Failed to read config file: {}", e)))?;

        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let content = substitute_env_vars(content);

        toml::from_str(&content)
            .map_err(|e| ShardError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Apply `MY_SHARD_ID`, `NUM_SHARDS` and `SHARDLINK_BROKER_URL` from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_with(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary lookup.
    pub fn apply_overrides_with(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(raw) = lookup(SHARD_ID_ENV) {
            self.shard.id = Some(parse_u32(SHARD_ID_ENV, &raw)?);
        }
        if let Some(raw) = lookup(SHARD_COUNT_ENV) {
            self.shard.count = Some(parse_u32(SHARD_COUNT_ENV, &raw)?);
        }
        if let Some(url) = lookup(BROKER_URL_ENV) {
            self.broker.url = url;
        }
        Ok(())
    }

    /// Resolve the shard topology. Fails if the id or count is missing or inconsistent.
    pub fn topology(&self) -> Result<ShardTopology> {
        let id = self.shard.id.ok_or_else(|| {
            ShardError::Config(format!(
                "shard id is not configured (set [shard] id or {})",
                SHARD_ID_ENV
            ))
        })?;
        let count = self.shard.count.ok_or_else(|| {
            ShardError::Config(format!(
                "shard count is not configured (set [shard] count or {})",
                SHARD_COUNT_ENV
            ))
        })?;

        ShardTopology::new(ShardId(id), count)
    }

    /// Check the configuration for values the runtime cannot work with.
    pub fn validate(&self) -> Result<ShardTopology> {
        let topology = self.topology()?;

        if self.cluster.heartbeat_interval_ms == 0 || self.cluster.scan_interval_ms == 0 {
            return Err(ShardError::Config(
                "heartbeat and scan intervals must be positive".to_string(),
            ));
        }
        if self.cluster.heartbeat_timeout_ms <= self.cluster.heartbeat_interval_ms {
            return Err(ShardError::Config(format!(
                "heartbeat timeout ({} ms) must exceed the heartbeat interval ({} ms)",
                self.cluster.heartbeat_timeout_ms, self.cluster.heartbeat_interval_ms
            )));
        }
        if !topology.contains(ShardId(self.cluster.initial_leader)) {
            return Err(ShardError::Config(format!(
                "initial leader {} is not a shard of this cluster",
                self.cluster.initial_leader
            )));
        }
        if self.broker.outbox_capacity == 0 {
            return Err(ShardError::Config(
                "broker outbox capacity must be at least 1".to_string(),
            ));
        }

        Ok(topology)
    }
}

/// Shard identity. Usually supplied by the process manager through the environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShardSection {
    /// Local shard id.
    pub id: Option<u32>,

    /// Number of shards in the cluster.
    pub count: Option<u32>,
}

/// Shutdown configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownSettings {
    /// Upper bound on transport cleanup before the process exits, in milliseconds.
    #[serde(default = "default_grace_period")]
    pub grace_period_ms: u64,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period(),
        }
    }
}

impl ShutdownSettings {
    /// Grace period as a duration.
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

fn default_grace_period() -> u64 {
    5000
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output JSON format.
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn parse_u32(name: &str, raw: &str) -> Result<u32> {
    raw.trim()
        .parse()
        .map_err(|_| ShardError::Config(format!("{} must be a non-negative integer, got '{}'", name, raw)))
}

/// Substitute environment variables in the format ${VAR_NAME}.
fn substitute_env_vars(content: &str) -> String {
    let Ok(re) = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}") else {
        return content.to_string();
    };

    let mut result = content.to_string();
    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}
