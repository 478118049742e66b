//! Cache command: ping, list keys and flush resources.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;
use wharf_artifact::{ArtifactDao, DefaultArtifactManager, DefaultRepositoryManager};
use wharf_cache::Cache;
use wharf_cached::{
    CacheAdmin, CachedArtifactManager, CachedMetadataManager, CachedProjectManager,
    CachedRepositoryManager, ManifestCache, RESOURCE_ARTIFACT, RESOURCE_MANIFEST,
    RESOURCE_PROJECT, RESOURCE_PROJECT_METADATA, RESOURCE_REPOSITORY,
};
use wharf_core::{Context, Database};
use wharf_project::{DefaultMetadataManager, DefaultProjectManager};

use super::{open_cache, open_database, print_json, GlobalArgs, OutputFormat};

/// Arguments for the cache command.
#[derive(Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

/// Cache subcommands.
#[derive(Subcommand)]
pub enum CacheCommand {
    /// Check that the cache answers
    Ping,

    /// List cached keys
    Keys {
        /// Only keys starting with one of these prefixes (comma-separated)
        #[arg(long, value_delimiter = ',')]
        prefix: Vec<String>,
    },

    /// Drop cached entries
    Flush {
        /// Resource to flush; every resource when omitted
        #[arg(long, value_enum)]
        resource: Option<Resource>,
    },
}

/// Cached resource namespaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Resource {
    Artifact,
    Repository,
    Project,
    ProjectMetadata,
    Manifest,
}

impl Resource {
    const fn namespace(self) -> &'static str {
        match self {
            Self::Artifact => RESOURCE_ARTIFACT,
            Self::Repository => RESOURCE_REPOSITORY,
            Self::Project => RESOURCE_PROJECT,
            Self::ProjectMetadata => RESOURCE_PROJECT_METADATA,
            Self::Manifest => RESOURCE_MANIFEST,
        }
    }
}

#[derive(Debug, Serialize)]
struct Flushed {
    resource: String,
    entries: usize,
}

/// Runs the cache command.
pub async fn run(global: &GlobalArgs, args: CacheArgs) -> Result<()> {
    let ctx = Context::new();
    let cache = open_cache(global).await?;

    match args.command {
        CacheCommand::Ping => {
            cache
                .ping(&ctx)
                .await
                .with_context(|| format!("Cache {} did not answer", global.cache_url))?;
            println!("{} ({}) is reachable", global.cache_url, cache.id());
        }
        CacheCommand::Keys { prefix } => {
            let prefixes: Vec<&str> = prefix.iter().map(String::as_str).collect();
            let keys = cache
                .keys(&ctx, &prefixes)
                .await
                .context("Failed to list cache keys")?;
            match global.output {
                OutputFormat::Text => keys.iter().for_each(|key| println!("{key}")),
                OutputFormat::Json => print_json(&keys)?,
            }
        }
        CacheCommand::Flush { resource } => {
            let db = open_database(global).await?;
            let flushed = flush(&ctx, &db, cache, resource).await?;
            match global.output {
                OutputFormat::Text => {
                    for f in &flushed {
                        println!("{:<18} {} entries flushed", f.resource, f.entries);
                    }
                }
                OutputFormat::Json => print_json(&flushed)?,
            }
        }
    }

    Ok(())
}

/// Every cached manager, as its administration handle.
fn admins(db: &Database, cache: &Arc<dyn Cache>) -> Vec<Box<dyn CacheAdmin>> {
    let artifacts = Arc::new(DefaultArtifactManager::new(ArtifactDao::new(db.clone())));
    let repositories = Arc::new(DefaultRepositoryManager::new(db.clone()));
    let projects = Arc::new(DefaultProjectManager::new(db.clone()));
    let metadata = Arc::new(DefaultMetadataManager::new(db.clone()));
    vec![
        Box::new(CachedArtifactManager::new(artifacts, Arc::clone(cache))),
        Box::new(CachedRepositoryManager::new(repositories, Arc::clone(cache))),
        Box::new(CachedProjectManager::new(projects, Arc::clone(cache))),
        Box::new(CachedMetadataManager::new(metadata, Arc::clone(cache))),
        Box::new(ManifestCache::new(Arc::clone(cache))),
    ]
}

async fn flush(
    ctx: &Context,
    db: &Database,
    cache: Arc<dyn Cache>,
    resource: Option<Resource>,
) -> Result<Vec<Flushed>> {
    let mut flushed = Vec::new();
    for admin in admins(db, &cache) {
        if resource.is_some_and(|r| r.namespace() != admin.resource_type()) {
            continue;
        }
        let entries = admin.count_cache(ctx).await?;
        admin
            .flush_all(ctx)
            .await
            .with_context(|| format!("Failed to flush {}", admin.resource_type()))?;
        info!(resource = admin.resource_type(), entries, "cache flushed");
        flushed.push(Flushed {
            resource: admin.resource_type().to_string(),
            entries,
        });
    }
    Ok(flushed)
}
