use anyhow::Result;
use clap::Parser;
use console::style;
use shardlink_core::config::{LoggingConfig, ShardConfig};
use tracing::info;

use super::load_config;
use crate::runtime::Shard;

/// Run a shard.
#[derive(Parser)]
pub struct RunCommand {
    /// Configuration file path. Defaults apply if it does not exist.
    #[arg(short, long, default_value = "shardlink.toml")]
    pub config: String,

    /// Local shard id (overrides config and MY_SHARD_ID).
    #[arg(long)]
    pub shard_id: Option<u32>,

    /// Number of shards (overrides config and NUM_SHARDS).
    #[arg(long)]
    pub shard_count: Option<u32>,

    /// Broker URL (overrides config and SHARDLINK_BROKER_URL).
    #[arg(long)]
    pub broker_url: Option<String>,

    /// Enable development mode (verbose logging).
    #[arg(long)]
    pub dev: bool,
}

impl RunCommand {
    /// Execute the run command.
    pub async fn execute(self) -> Result<()> {
        let mut config = load_config(&self.config)?;
        self.apply_overrides(&mut config);

        init_logging(&config.logging, self.dev);

        println!();
        println!(
            "  {} v{}",
            style("SHARDLINK").bold().cyan(),
            env!("CARGO_PKG_VERSION")
        );
        println!();

        info!("Configuration: {}", self.config);

        let topology = config.validate()?;
        println!(
            "  {} Shard {} of {}",
            style("*").bold(),
            style(topology.local()).cyan(),
            topology.count()
        );
        println!(
            "  {} Broker {}",
            style("*").bold(),
            style(&config.broker.url).cyan()
        );
        if self.dev {
            println!("  {} Development mode enabled", style("*").bold());
        }
        println!();

        let shard = Shard::builder()
            .config(config)
            .build()
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        shard.run().await.map_err(|e| anyhow::anyhow!("{}", e))?;

        println!("\n  Goodbye!");

        Ok(())
    }

    fn apply_overrides(&self, config: &mut ShardConfig) {
        if let Some(id) = self.shard_id {
            config.shard.id = Some(id);
        }
        if let Some(count) = self.shard_count {
            config.shard.count = Some(count);
        }
        if let Some(url) = &self.broker_url {
            config.broker.url = url.clone();
        }
    }
}

/// Build the log filter: `RUST_LOG` wins, then `--dev`, then the configured level.
fn log_filter(logging: &LoggingConfig, dev: bool) -> String {
    if let Ok(filter) = std::env::var("RUST_LOG") {
        return filter;
    }
    if dev {
        "debug".to_string()
    } else {
        logging.level.clone()
    }
}

fn init_logging(logging: &LoggingConfig, dev: bool) {
    let filter = log_filter(logging, dev);
    if logging.json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command() -> RunCommand {
        RunCommand {
            config: "shardlink.toml".to_string(),
            shard_id: None,
            shard_count: None,
            broker_url: None,
            dev: false,
        }
    }

    #[test]
    fn test_run_command_defaults() {
        let cmd = command();
        assert_eq!(cmd.config, "shardlink.toml");
        assert!(!cmd.dev);
    }

    #[test]
    fn test_cli_overrides_win() {
        let cmd = RunCommand {
            shard_id: Some(2),
            shard_count: Some(5),
            broker_url: Some("amqp://rabbit:5672/%2f".to_string()),
            ..command()
        };

        let mut config = ShardConfig::default();
        config.shard.id = Some(0);
        cmd.apply_overrides(&mut config);

        assert_eq!(config.shard.id, Some(2));
        assert_eq!(config.shard.count, Some(5));
        assert_eq!(config.broker.url, "amqp://rabbit:5672/%2f");
    }

    #[test]
    fn test_no_overrides_keep_config() {
        let mut config = ShardConfig::default();
        config.shard.count = Some(3);
        command().apply_overrides(&mut config);
        assert_eq!(config.shard.count, Some(3));
    }

    #[test]
    fn test_dev_forces_debug() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let logging = LoggingConfig::default();
        assert_eq!(log_filter(&logging, true), "debug");
        assert_eq!(log_filter(&logging, false), "info");
    }
}
