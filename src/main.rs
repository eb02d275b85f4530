//! CLI entry point.

use alchemy_core::cli::commands;
use alchemy_core::cli::parser::Cli;
use alchemy_core::config::AlchemyConfig;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = AlchemyConfig::from_env();
    if let Some(work_dir) = cli.work_dir {
        config.work_dir = work_dir;
    }

    commands::run(cli.command, &config).await?;
    Ok(())
}
