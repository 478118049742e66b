//! CLI commands, global options and the shared bootstrap.

pub mod adapters;
pub mod artifact;
pub mod cache;
pub mod registry;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use wharf_cache::{new_cache, Cache, CacheOptions};
use wharf_core::Database;

/// wharf - artifact metadata, caching and replication for an OCI registry
#[derive(Parser)]
#[command(name = "wharf")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Inspect and flush the metadata cache
    Cache(cache::CacheArgs),

    /// Show the registry adapters compiled in
    Adapters(adapters::AdaptersArgs),

    /// Manage replication endpoints
    Registry(registry::RegistryArgs),

    /// Record and list artifacts
    Artifact(artifact::ArtifactArgs),

    /// Print version information
    Version,
}

/// Options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// SQLite database URL
    #[arg(
        long,
        global = true,
        env = "WHARF_DATABASE_URL",
        default_value = "sqlite:wharf.db?mode=rwc"
    )]
    pub database_url: String,

    /// Cache address: memory://, redis://, redis+sentinel:// or redis+cluster://
    #[arg(long, global = true, env = "_REDIS_URL_CORE", default_value = "memory://")]
    pub cache_url: String,

    /// File holding the key that encrypts registry secrets
    #[arg(
        long,
        global = true,
        env = "WHARF_SECRET_KEY_PATH",
        default_value = "/etc/wharf/secretkey"
    )]
    pub secret_key_path: PathBuf,

    /// URL of the local registry
    #[arg(
        long,
        global = true,
        env = "WHARF_CORE_URL",
        default_value = "http://localhost:8080"
    )]
    pub core_url: String,

    /// Shared secret for the local registry
    #[arg(
        long,
        global = true,
        env = "WHARF_CORE_SECRET",
        default_value = "",
        hide_env_values = true,
        hide_default_value = true
    )]
    pub core_secret: String,

    /// Output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Output format of listings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Opens the database and applies every schema.
pub async fn open_database(global: &GlobalArgs) -> Result<Database> {
    let db = Database::connect(&global.database_url)
        .await
        .with_context(|| format!("Failed to open database {}", global.database_url))?;
    for migrations in [
        wharf_project::MIGRATIONS,
        wharf_artifact::MIGRATIONS,
        wharf_replication::MIGRATIONS,
    ] {
        db.migrate(migrations)
            .await
            .context("Failed to migrate database")?;
    }
    Ok(db)
}

/// Connects the cache at `--cache-url`.
pub async fn open_cache(global: &GlobalArgs) -> Result<Arc<dyn Cache>> {
    let cache = new_cache(&global.cache_url, CacheOptions::new(&global.cache_url))
        .await
        .with_context(|| format!("Failed to connect cache {}", global.cache_url))?;
    Ok(cache)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Global options over a database file in `dir` and the memory cache.
    pub fn global(dir: &tempfile::TempDir) -> GlobalArgs {
        GlobalArgs {
            database_url: format!("sqlite:{}?mode=rwc", dir.path().join("wharf.db").display()),
            cache_url: "memory://".into(),
            secret_key_path: dir.path().join("secretkey"),
            core_url: "http://127.0.0.1:1".into(),
            core_secret: String::new(),
            output: OutputFormat::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let cli = Cli::try_parse_from([
            "wharf",
            "registry",
            "list",
            "--output",
            "json",
            "--database-url",
            "sqlite::memory:",
        ])
        .unwrap();
        assert_eq!(cli.global.output, OutputFormat::Json);
        assert_eq!(cli.global.database_url, "sqlite::memory:");
        assert!(matches!(cli.command, Commands::Registry(_)));
    }

    #[tokio::test]
    async fn test_open_database_is_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        let global = testing::global(&dir);
        drop(open_database(&global).await.unwrap());
        open_database(&global).await.unwrap();
    }
}
