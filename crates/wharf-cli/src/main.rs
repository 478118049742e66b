//! wharf - operator commands for the artifact metadata and replication
//! services.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wharf=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Cache(args) => commands::cache::run(&cli.global, args).await,
        Commands::Adapters(args) => commands::adapters::run(&cli.global, &args),
        Commands::Registry(args) => commands::registry::run(&cli.global, args).await,
        Commands::Artifact(args) => commands::artifact::run(&cli.global, args).await,
        Commands::Version => {
            println!("wharf {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
