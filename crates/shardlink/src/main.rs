mod cli;
mod runtime;

pub use runtime::prelude;
pub use runtime::{Shard, ShardBuilder};

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    cli.execute().await
}
