mod config;
mod run;

pub use config::ConfigCommand;
pub use run::RunCommand;

use std::path::Path;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shardlink_core::config::ShardConfig;

/// Shardlink - shard coordination over a message broker
#[derive(Parser)]
#[command(name = "shardlink")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Run a shard until it receives a termination signal.
    Run(RunCommand),

    /// Print the resolved configuration.
    Config(ConfigCommand),
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        dotenvy::dotenv().ok();

        match self.command {
            Commands::Run(cmd) => cmd.execute().await,
            Commands::Config(cmd) => cmd.execute(),
        }
    }
}

/// Load the config file if it exists, otherwise start from defaults, then apply the environment.
pub(crate) fn load_config(path: &str) -> Result<ShardConfig> {
    let mut config = if Path::new(path).exists() {
        ShardConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path))?
    } else {
        ShardConfig::default()
    };

    config
        .apply_env_overrides()
        .context("Invalid shard environment")?;
    Ok(config)
}
