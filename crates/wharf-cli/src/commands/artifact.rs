//! Artifact command: record artifacts pushed to the local registry and
//! list what is recorded.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use wharf_artifact::{
    Abstractor, ArtifactController, ArtifactDao, BlobFetcher, DefaultArtifactManager,
    DefaultRepositoryManager, ListQuery, TagFilter,
};
use wharf_cache::Cache;
use wharf_cached::{CachedArtifactManager, CachedProjectManager, CachedRepositoryManager, ManifestCache};
use wharf_core::{Context, Database, ErrorCode};
use wharf_project::{DefaultProjectManager, Project, ProjectManager};
use wharf_registry::{is_digest, ClientConfig, RegistryAuth, RegistryClient};

use super::{open_cache, open_database, print_json, GlobalArgs, OutputFormat};

/// Arguments for the artifact command.
#[derive(Args)]
pub struct ArtifactArgs {
    #[command(subcommand)]
    pub command: ArtifactCommand,
}

/// Artifact subcommands.
#[derive(Subcommand)]
pub enum ArtifactCommand {
    /// Pull a manifest from the local registry and record the artifact
    Ingest {
        /// Repository, `<project>/<name>`
        repository: String,

        /// Tag or digest
        reference: String,

        /// Owner of the project when it has to be created
        #[arg(long, default_value = "1")]
        owner_id: i64,
    },

    /// List recorded artifacts
    List {
        /// Only artifacts of this repository
        #[arg(long)]
        repository: Option<String>,

        /// Tag condition: `*` for tagged, `nil` for untagged
        #[arg(long)]
        tags: Option<String>,

        /// 1-based page
        #[arg(long, default_value = "1")]
        page: u32,

        /// Page size, 0 for everything
        #[arg(long, default_value = "0")]
        page_size: u32,
    },
}

/// Managers wired the way the services run them: cached, over one
/// database and one cache.
struct Services {
    controller: ArtifactController,
    projects: Arc<dyn ProjectManager>,
    manifests: ManifestCache,
    fetcher: Arc<dyn BlobFetcher>,
}

impl Services {
    fn new(db: &Database, cache: &Arc<dyn Cache>, fetcher: Arc<dyn BlobFetcher>) -> Self {
        let artifacts = Arc::new(CachedArtifactManager::new(
            Arc::new(DefaultArtifactManager::new(ArtifactDao::new(db.clone()))),
            Arc::clone(cache),
        ));
        let repositories = Arc::new(CachedRepositoryManager::new(
            Arc::new(DefaultRepositoryManager::new(db.clone())),
            Arc::clone(cache),
        ));
        let projects = Arc::new(CachedProjectManager::new(
            Arc::new(DefaultProjectManager::new(db.clone())),
            Arc::clone(cache),
        ));
        let abstractor = Abstractor::new(artifacts.clone(), Arc::clone(&fetcher));
        Self {
            controller: ArtifactController::new(db.clone(), artifacts, repositories, abstractor),
            projects,
            manifests: ManifestCache::new(Arc::clone(cache)),
            fetcher,
        }
    }
}

#[derive(Debug, Serialize)]
struct Ingested {
    id: i64,
    created: bool,
    repository: String,
    digest: String,
}

#[derive(Debug, Serialize)]
struct Row {
    id: i64,
    #[serde(rename = "type")]
    artifact_type: String,
    repository: String,
    digest: String,
    size: i64,
    tags: Vec<String>,
}

/// Runs the artifact command.
pub async fn run(global: &GlobalArgs, args: ArtifactArgs) -> Result<()> {
    let ctx = Context::new();
    let db = open_database(global).await?;
    let cache = open_cache(global).await?;
    let auth = if global.core_secret.is_empty() {
        RegistryAuth::None
    } else {
        RegistryAuth::bearer(global.core_secret.clone())
    };
    let client = RegistryClient::new(ClientConfig::new(global.core_url.clone()).with_auth(auth))
        .with_context(|| format!("Invalid registry URL {}", global.core_url))?;
    let services = Services::new(&db, &cache, Arc::new(client));

    match args.command {
        ArtifactCommand::Ingest {
            repository,
            reference,
            owner_id,
        } => {
            let ingested = ingest(&ctx, &services, &repository, &reference, owner_id).await?;
            match global.output {
                OutputFormat::Text => {
                    let verb = if ingested.created { "recorded" } else { "already recorded" };
                    println!("{}@{} {verb} as artifact {}", ingested.repository, ingested.digest, ingested.id);
                }
                OutputFormat::Json => print_json(&ingested)?,
            }
        }
        ArtifactCommand::List {
            repository,
            tags,
            page,
            page_size,
        } => {
            let query = ListQuery {
                repository_name: repository,
                tags: tags.as_deref().map(str::parse::<TagFilter>).transpose()?.unwrap_or_default(),
                page,
                page_size,
                ..ListQuery::new()
            };
            let rows = list(&ctx, &services, &query).await?;
            match global.output {
                OutputFormat::Text => {
                    for r in &rows {
                        println!(
                            "{:>6}  {:<8} {}@{}  {} bytes  [{}]",
                            r.id,
                            r.artifact_type,
                            r.repository,
                            r.digest,
                            r.size,
                            r.tags.join(", ")
                        );
                    }
                }
                OutputFormat::Json => print_json(&rows)?,
            }
        }
    }

    Ok(())
}

/// Returns the id of project `name`, creating it when missing.
async fn ensure_project(ctx: &Context, projects: &dyn ProjectManager, name: &str, owner_id: i64) -> Result<i64> {
    match projects.get_by_name(ctx, name).await {
        Ok(project) => return Ok(project.project_id),
        Err(e) if e.is_code(ErrorCode::NotFound) => {}
        Err(e) => return Err(e.into()),
    }
    match projects.create(ctx, &Project::new(name, owner_id), &BTreeMap::new()).await {
        Ok(id) => {
            info!(id, name, "project created");
            Ok(id)
        }
        Err(e) if e.is_code(ErrorCode::Conflict) => Ok(projects.get_by_name(ctx, name).await?.project_id),
        Err(e) => Err(e).with_context(|| format!("Failed to create project {name}")),
    }
}

async fn ingest(
    ctx: &Context,
    services: &Services,
    repository: &str,
    reference: &str,
    owner_id: i64,
) -> Result<Ingested> {
    let (project, _) = repository
        .split_once('/')
        .with_context(|| format!("Repository {repository} is not <project>/<name>"))?;
    let project_id = ensure_project(ctx, services.projects.as_ref(), project, owner_id).await?;

    let manifest = services
        .fetcher
        .pull_manifest(repository, reference)
        .await
        .with_context(|| format!("Failed to pull {repository}:{reference}"))?;
    if let Err(e) = services.manifests.save(ctx, &manifest.digest, &manifest.payload).await {
        warn!(digest = %manifest.digest, error = %e, "failed to cache manifest");
    }

    services
        .controller
        .ensure_repository(ctx, project_id, repository)
        .await
        .with_context(|| format!("Failed to record repository {repository}"))?;
    let tags = if is_digest(reference) {
        Vec::new()
    } else {
        vec![reference.to_string()]
    };
    let (created, id) = services
        .controller
        .ensure(ctx, repository, &manifest.digest, &tags)
        .await
        .with_context(|| format!("Failed to record {repository}@{}", manifest.digest))?;

    Ok(Ingested {
        id,
        created,
        repository: repository.to_string(),
        digest: manifest.digest,
    })
}

async fn list(ctx: &Context, services: &Services, query: &ListQuery) -> Result<Vec<Row>> {
    let artifacts = services
        .controller
        .list(ctx, query)
        .await
        .context("Failed to list artifacts")?;
    let mut rows = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        let tags = services.controller.list_tags(ctx, artifact.id).await?;
        rows.push(Row {
            id: artifact.id,
            artifact_type: artifact.artifact_type,
            repository: artifact.repository_name,
            digest: artifact.digest,
            size: artifact.size,
            tags: tags.into_iter().map(|t| t.name).collect(),
        });
    }
    Ok(rows)
}
