use anyhow::{Context, Result};
use clap::Parser;
use shardlink_core::config::ShardConfig;

use super::load_config;

/// Print the configuration a shard would run with.
#[derive(Parser)]
pub struct ConfigCommand {
    /// Configuration file path.
    #[arg(short, long, default_value = "shardlink.toml")]
    pub config: String,
}

impl ConfigCommand {
    /// Execute the config command.
    pub fn execute(self) -> Result<()> {
        let config = load_config(&self.config)?;
        print!("{}", render(&config)?);
        Ok(())
    }
}

fn render(config: &ShardConfig) -> Result<String> {
    toml::to_string_pretty(config).context("Failed to render configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_roundtrips() {
        let mut config = ShardConfig::default();
        config.shard.id = Some(1);
        config.shard.count = Some(2);

        let rendered = render(&config).unwrap();
        assert!(rendered.contains("[broker]"));

        let parsed = ShardConfig::parse_toml(&rendered).unwrap();
        assert_eq!(parsed.shard.id, Some(1));
        assert_eq!(parsed.broker.url, config.broker.url);
    }

    #[test]
    fn test_unset_identity_is_omitted() {
        let rendered = render(&ShardConfig::default()).unwrap();
        assert!(!rendered.contains("id ="));
    }
}
