//! Registry command: add, list and ping replication endpoints.

use anyhow::{bail, Context as _, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use wharf_core::Context;
use wharf_replication::{
    adapter, Credential, CredentialType, DefaultRegistryManager, Encryptor, HealthStatus,
    LocalRegistry, Registry, RegistryManager, RegistryQuery, LOCAL_REGISTRY_ID,
    REGISTRY_TYPE_DOCKER_REGISTRY,
};

use super::{open_database, print_json, GlobalArgs, OutputFormat};

/// Arguments for the registry command.
#[derive(Args)]
pub struct RegistryArgs {
    #[command(subcommand)]
    pub command: RegistryCommand,
}

/// Registry subcommands.
#[derive(Subcommand)]
pub enum RegistryCommand {
    /// Register a remote registry
    Add(AddArgs),

    /// List registered registries
    List {
        /// Only names containing this text
        #[arg(long)]
        name: Option<String>,

        /// Only registries of this type
        #[arg(long = "type")]
        registry_type: Option<String>,
    },

    /// Check the health of a registry, by name or id
    Ping {
        /// Registry name or id
        registry: String,
    },
}

/// Arguments for `registry add`.
#[derive(Args)]
pub struct AddArgs {
    /// Unique name
    #[arg(long)]
    pub name: String,

    /// Registry type, see `wharf adapters list`
    #[arg(long = "type", default_value = REGISTRY_TYPE_DOCKER_REGISTRY)]
    pub registry_type: String,

    /// Endpoint URL
    #[arg(long)]
    pub url: String,

    /// Credential type: basic, oauth or secret
    #[arg(long, default_value = "basic")]
    pub credential_type: String,

    /// Username or key id
    #[arg(long, default_value = "")]
    pub access_key: String,

    /// Password, token or secret
    #[arg(long, env = "WHARF_REGISTRY_SECRET", default_value = "", hide_env_values = true)]
    pub access_secret: String,

    /// Skip TLS verification
    #[arg(long)]
    pub insecure: bool,

    /// Free-form description
    #[arg(long, default_value = "")]
    pub description: String,
}

/// Registry row as printed; never carries the secret.
#[derive(Debug, Serialize)]
struct Summary {
    id: i64,
    name: String,
    #[serde(rename = "type")]
    registry_type: String,
    url: String,
    insecure: bool,
    status: String,
    description: String,
}

impl From<Registry> for Summary {
    fn from(registry: Registry) -> Self {
        Self {
            id: registry.id,
            name: registry.name,
            registry_type: registry.registry_type,
            url: registry.url,
            insecure: registry.insecure,
            status: registry.status,
            description: registry.description,
        }
    }
}

/// Builds the registry manager the commands share.
pub fn manager(global: &GlobalArgs, db: wharf_core::Database) -> DefaultRegistryManager {
    adapter::register_builtins();
    DefaultRegistryManager::new(db)
        .with_encryptor(Encryptor::from_file(&global.secret_key_path))
        .with_local(LocalRegistry {
            url: global.core_url.clone(),
            secret: global.core_secret.clone(),
        })
}

/// Runs the registry command.
pub async fn run(global: &GlobalArgs, args: RegistryArgs) -> Result<()> {
    let ctx = Context::new();
    let db = open_database(global).await?;
    let manager = manager(global, db);

    match args.command {
        RegistryCommand::Add(add) => {
            let id = add_registry(&ctx, &manager, add).await?;
            println!("registry {id} created");
        }
        RegistryCommand::List {
            name,
            registry_type,
        } => {
            let query = RegistryQuery {
                name,
                registry_type,
                ..RegistryQuery::default()
            };
            let registries = list(&ctx, &manager, &query).await?;
            match global.output {
                OutputFormat::Text => {
                    for r in &registries {
                        println!(
                            "{:>4}  {:<20} {:<16} {:<10} {}",
                            r.id, r.name, r.registry_type, r.status, r.url
                        );
                    }
                }
                OutputFormat::Json => print_json(&registries)?,
            }
        }
        RegistryCommand::Ping { registry } => {
            let (name, status) = ping(&ctx, &manager, &registry).await?;
            println!("{name}: {status}");
            if status == HealthStatus::Unhealthy {
                bail!("registry {name} is unhealthy");
            }
        }
    }

    Ok(())
}

async fn add_registry(ctx: &Context, manager: &DefaultRegistryManager, add: AddArgs) -> Result<i64> {
    let mut registry = Registry::new(add.name, add.registry_type, add.url).with_insecure(add.insecure);
    registry.description = add.description;
    let credential = Credential {
        credential_type: CredentialType::parse(&add.credential_type),
        access_key: add.access_key,
        access_secret: add.access_secret,
    };
    if !credential.is_empty() {
        registry = registry.with_credential(credential);
    }

    // An unknown type would only fail later, at the first health check.
    if !manager.list_registry_provider_types().contains(&registry.registry_type) {
        bail!("No adapter for registry type {}", registry.registry_type);
    }

    let id = manager
        .create(ctx, &registry)
        .await
        .with_context(|| format!("Failed to add registry {}", registry.name))?;
    info!(id, name = %registry.name, "registry added");
    Ok(id)
}

async fn list(ctx: &Context, manager: &DefaultRegistryManager, query: &RegistryQuery) -> Result<Vec<Summary>> {
    let registries = manager
        .list(ctx, query)
        .await
        .context("Failed to list registries")?;
    Ok(registries.into_iter().map(Summary::from).collect())
}

async fn resolve(ctx: &Context, manager: &DefaultRegistryManager, registry: &str) -> Result<Registry> {
    let found = match registry.parse::<i64>() {
        Ok(id) => manager.get(ctx, id).await,
        Err(_) => manager.get_by_name(ctx, registry).await,
    };
    found.with_context(|| format!("Registry {registry} not found"))
}

/// Checks a registry and records the outcome as its status.
async fn ping(ctx: &Context, manager: &DefaultRegistryManager, registry: &str) -> Result<(String, HealthStatus)> {
    let mut registry = resolve(ctx, manager, registry).await?;
    let status = manager
        .health_check(ctx, &registry)
        .await
        .with_context(|| format!("Failed to check registry {}", registry.name))?;

    if registry.id != LOCAL_REGISTRY_ID && registry.status != status.as_str() {
        registry.status = status.to_string();
        if let Err(e) = manager.update(ctx, &registry, &["status"]).await {
            warn!(name = %registry.name, error = %e, "failed to record registry status");
        }
    }
    Ok((registry.name, status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing;

    fn add_args(name: &str, registry_type: &str) -> AddArgs {
        AddArgs {
            name: name.into(),
            registry_type: registry_type.into(),
            url: "http://127.0.0.1:1".into(),
            credential_type: "basic".into(),
            access_key: "robot".into(),
            access_secret: "secret".into(),
            insecure: true,
            description: String::new(),
        }
    }

    #[tokio::test]
    async fn test_add_list_and_ping() {
        let dir = tempfile::tempdir().unwrap();
        let global = testing::global(&dir);
        let manager = manager(&global, open_database(&global).await.unwrap());
        let ctx = Context::new();

        let id = add_registry(&ctx, &manager, add_args("mirror", REGISTRY_TYPE_DOCKER_REGISTRY))
            .await
            .unwrap();
        let err = add_registry(&ctx, &manager, add_args("mirror", REGISTRY_TYPE_DOCKER_REGISTRY))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("mirror"));
        assert!(add_registry(&ctx, &manager, add_args("quay", "quay")).await.is_err());

        let listed = list(&ctx, &manager, &RegistryQuery::default()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
        let json = serde_json::to_string(&listed).unwrap();
        assert!(!json.contains("secret"));

        let (name, status) = ping(&ctx, &manager, &id.to_string()).await.unwrap();
        assert_eq!(name, "mirror");
        assert_eq!(status, HealthStatus::Unhealthy);
        let listed = list(&ctx, &manager, &RegistryQuery::default()).await.unwrap();
        assert_eq!(listed[0].status, "unhealthy");

        assert!(ping(&ctx, &manager, "ghost").await.is_err());
    }
}
