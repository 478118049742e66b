//! Registry records, their persistence and the adapters built from them.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use wharf_core::{conflict_error, Context, Database, Error, Result};

use crate::adapter::{self, Adapter, FactoryRegistry};
use crate::model::{
    Credential, CredentialType, HealthStatus, ProviderInfos, Registry, RegistryQuery,
    REGISTRY_TYPE_HARBOR,
};
use crate::secret::Encryptor;

/// Id of the local self-reference.
pub const LOCAL_REGISTRY_ID: i64 = 0;
/// Name of the local self-reference.
pub const LOCAL_REGISTRY_NAME: &str = "Local";

/// Properties accepted by [`RegistryManager::update`].
pub const UPDATABLE_PROPERTIES: &[&str] = &[
    "url",
    "name",
    "credential_type",
    "access_key",
    "access_secret",
    "type",
    "insecure",
    "description",
    "status",
];

const SELECT_REGISTRY: &str = "SELECT id, url, name, credential_type, access_key, access_secret, \
    type, insecure, description, status, creation_time, update_time FROM registry";

/// Where this instance itself is reachable.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct LocalRegistry {
    /// Internal URL of the local registry.
    pub url: String,
    /// Secret shared with the local registry.
    pub secret: String,
}

impl std::fmt::Debug for LocalRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRegistry")
            .field("url", &self.url)
            .field("secret", &"***")
            .finish()
    }
}

impl LocalRegistry {
    /// The record returned for [`LOCAL_REGISTRY_ID`].
    #[must_use]
    pub fn to_registry(&self) -> Registry {
        let mut registry = Registry::new(LOCAL_REGISTRY_NAME, REGISTRY_TYPE_HARBOR, self.url.clone())
            .with_credential(Credential {
                credential_type: CredentialType::Secret,
                access_key: String::new(),
                access_secret: self.secret.clone(),
            })
            .with_insecure(true);
        registry.id = LOCAL_REGISTRY_ID;
        registry.status = HealthStatus::Healthy.as_str().to_string();
        registry
    }
}

#[derive(FromRow)]
struct RegistryRow {
    id: i64,
    url: String,
    name: String,
    credential_type: String,
    access_key: String,
    access_secret: String,
    #[sqlx(rename = "type")]
    registry_type: String,
    insecure: bool,
    description: String,
    status: String,
    creation_time: DateTime<Utc>,
    update_time: DateTime<Utc>,
}

/// Registry persistence and adapter access.
#[async_trait]
pub trait RegistryManager: Send + Sync {
    /// Stores a registry and returns its id.
    async fn create(&self, ctx: &Context, registry: &Registry) -> Result<i64>;
    /// Gets a registry by id; [`LOCAL_REGISTRY_ID`] is the local instance.
    async fn get(&self, ctx: &Context, id: i64) -> Result<Registry>;
    /// Gets a registry by name.
    async fn get_by_name(&self, ctx: &Context, name: &str) -> Result<Registry>;
    /// Counts registries matching `query`.
    async fn count(&self, ctx: &Context, query: &RegistryQuery) -> Result<i64>;
    /// Lists registries matching `query`, by id.
    async fn list(&self, ctx: &Context, query: &RegistryQuery) -> Result<Vec<Registry>>;
    /// Updates the named properties of [`UPDATABLE_PROPERTIES`]; all when
    /// empty.
    async fn update(&self, ctx: &Context, registry: &Registry, props: &[&str]) -> Result<()>;
    /// Deletes a registry.
    async fn delete(&self, ctx: &Context, id: i64) -> Result<()>;
    /// Registry types with an adapter, sorted.
    fn list_registry_provider_types(&self) -> Vec<String>;
    /// Adapter patterns of the registry types that publish one.
    fn list_registry_provider_infos(&self) -> ProviderInfos;
    /// Builds the adapter for `registry`.
    fn create_adapter(&self, registry: &Registry) -> Result<Arc<dyn Adapter>>;
    /// Checks the health of `registry` through its adapter.
    async fn health_check(&self, ctx: &Context, registry: &Registry) -> Result<HealthStatus>;
}

/// [`RegistryManager`] over the database with encrypted secrets.
#[derive(Debug, Clone)]
pub struct DefaultRegistryManager {
    db: Database,
    encryptor: Encryptor,
    factories: Arc<FactoryRegistry>,
    local: LocalRegistry,
}

impl DefaultRegistryManager {
    /// Creates a manager storing secrets in clear text and using the
    /// process-wide adapter factories.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            db,
            encryptor: Encryptor::disabled(),
            factories: adapter::factories(),
            local: LocalRegistry::default(),
        }
    }

    /// Sets the secret encryptor.
    #[must_use]
    pub fn with_encryptor(mut self, encryptor: Encryptor) -> Self {
        self.encryptor = encryptor;
        self
    }

    /// Sets the adapter factories.
    #[must_use]
    pub fn with_factories(mut self, factories: Arc<FactoryRegistry>) -> Self {
        self.factories = factories;
        self
    }

    /// Sets the local self-reference.
    #[must_use]
    pub fn with_local(mut self, local: LocalRegistry) -> Self {
        self.local = local;
        self
    }

    fn to_registry(&self, row: RegistryRow) -> Result<Registry> {
        let access_secret = self.encryptor.decrypt(&row.access_secret)?;
        let credential = Credential {
            credential_type: CredentialType::parse(&row.credential_type),
            access_key: row.access_key,
            access_secret,
        };
        Ok(Registry {
            id: row.id,
            name: row.name,
            registry_type: row.registry_type,
            url: row.url,
            credential: (!credential.is_empty()).then_some(credential),
            insecure: row.insecure,
            description: row.description,
            status: row.status,
            creation_time: row.creation_time,
            update_time: row.update_time,
        })
    }
}

/// Adds `http://` to a URL without a scheme and drops trailing slashes.
#[must_use]
pub fn normalize_url(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    if url.contains("://") {
        url.to_string()
    } else {
        format!("http://{url}")
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, Sqlite>, query: &RegistryQuery) {
    builder.push(" WHERE 1 = 1");
    if let Some(name) = &query.name {
        builder.push(" AND name LIKE ").push_bind(format!("%{name}%"));
    }
    if let Some(registry_type) = &query.registry_type {
        builder.push(" AND type = ").push_bind(registry_type.clone());
    }
}

#[async_trait]
impl RegistryManager for DefaultRegistryManager {
    async fn create(&self, ctx: &Context, registry: &Registry) -> Result<i64> {
        if registry.name.is_empty() {
            return Err(Error::bad_request("registry name must not be empty"));
        }
        let credential = registry.credential.clone().unwrap_or_default();
        let access_secret = self.encryptor.encrypt(&credential.access_secret)?;
        let duplicate = format!("registry {} already exists", registry.name);

        let mut conn = self.db.conn(ctx).await?;
        let result = sqlx::query(
            "INSERT INTO registry (url, name, credential_type, access_key, access_secret, type, \
             insecure, description, status, creation_time, update_time) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(normalize_url(&registry.url))
        .bind(registry.name.as_str())
        .bind(credential.credential_type.as_str())
        .bind(credential.access_key.as_str())
        .bind(access_secret)
        .bind(registry.registry_type.as_str())
        .bind(registry.insecure)
        .bind(registry.description.as_str())
        .bind(registry.status.as_str())
        .bind(registry.creation_time)
        .bind(registry.update_time)
        .execute(conn.get()?)
        .await
        .map_err(|e| conflict_error(e, &duplicate, &duplicate))?;
        let id = result.last_insert_rowid();
        tracing::info!(id, name = %registry.name, registry_type = %registry.registry_type, "registry created");
        Ok(id)
    }

    async fn get(&self, ctx: &Context, id: i64) -> Result<Registry> {
        if id == LOCAL_REGISTRY_ID {
            return Ok(self.local.to_registry());
        }
        let row = {
            let mut conn = self.db.conn(ctx).await?;
            let row = sqlx::query_as::<_, RegistryRow>(&format!("{SELECT_REGISTRY} WHERE id = ?"))
                .bind(id)
                .fetch_optional(conn.get()?)
                .await?;
            row
        };
        let row = row.ok_or_else(|| Error::not_found(format!("registry {id} not found")))?;
        self.to_registry(row)
    }

    async fn get_by_name(&self, ctx: &Context, name: &str) -> Result<Registry> {
        let row = {
            let mut conn = self.db.conn(ctx).await?;
            let row = sqlx::query_as::<_, RegistryRow>(&format!("{SELECT_REGISTRY} WHERE name = ?"))
                .bind(name)
                .fetch_optional(conn.get()?)
                .await?;
            row
        };
        let row = row.ok_or_else(|| Error::not_found(format!("registry {name} not found")))?;
        self.to_registry(row)
    }

    async fn count(&self, ctx: &Context, query: &RegistryQuery) -> Result<i64> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM registry");
        push_filters(&mut builder, query);
        let mut conn = self.db.conn(ctx).await?;
        let count = builder
            .build_query_scalar::<i64>()
            .fetch_one(conn.get()?)
            .await?;
        Ok(count)
    }

    async fn list(&self, ctx: &Context, query: &RegistryQuery) -> Result<Vec<Registry>> {
        let mut builder = QueryBuilder::<Sqlite>::new(SELECT_REGISTRY);
        push_filters(&mut builder, query);
        builder.push(" ORDER BY id");
        if query.page_size > 0 {
            let page = i64::from(query.page.max(1));
            let size = i64::from(query.page_size);
            builder
                .push(" LIMIT ")
                .push_bind(size)
                .push(" OFFSET ")
                .push_bind((page - 1) * size);
        }
        let rows = {
            let mut conn = self.db.conn(ctx).await?;
            let rows = builder
                .build_query_as::<RegistryRow>()
                .fetch_all(conn.get()?)
                .await?;
            rows
        };
        rows.into_iter().map(|row| self.to_registry(row)).collect()
    }

    async fn update(&self, ctx: &Context, registry: &Registry, props: &[&str]) -> Result<()> {
        if registry.id == LOCAL_REGISTRY_ID {
            return Err(Error::bad_request("the local registry cannot be updated"));
        }
        let props = if props.is_empty() { UPDATABLE_PROPERTIES } else { props };
        let credential = registry.credential.clone().unwrap_or_default();

        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE registry SET update_time = ");
        builder.push_bind(Utc::now());
        for prop in props {
            match *prop {
                "url" => {
                    builder.push(", url = ").push_bind(normalize_url(&registry.url));
                }
                "name" => {
                    builder.push(", name = ").push_bind(registry.name.clone());
                }
                "credential_type" => {
                    builder
                        .push(", credential_type = ")
                        .push_bind(credential.credential_type.as_str());
                }
                "access_key" => {
                    builder.push(", access_key = ").push_bind(credential.access_key.clone());
                }
                "access_secret" => {
                    let sealed = self.encryptor.encrypt(&credential.access_secret)?;
                    builder.push(", access_secret = ").push_bind(sealed);
                }
                "type" => {
                    builder.push(", type = ").push_bind(registry.registry_type.clone());
                }
                "insecure" => {
                    builder.push(", insecure = ").push_bind(registry.insecure);
                }
                "description" => {
                    builder.push(", description = ").push_bind(registry.description.clone());
                }
                "status" => {
                    builder.push(", status = ").push_bind(registry.status.clone());
                }
                other => {
                    return Err(Error::bad_request(format!(
                        "unsupported registry property {other}"
                    )))
                }
            }
        }
        builder.push(" WHERE id = ").push_bind(registry.id);

        let duplicate = format!("registry {} already exists", registry.name);
        let mut conn = self.db.conn(ctx).await?;
        let result = builder
            .build()
            .execute(conn.get()?)
            .await
            .map_err(|e| conflict_error(e, &duplicate, &duplicate))?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("registry {} not found", registry.id)));
        }
        Ok(())
    }

    async fn delete(&self, ctx: &Context, id: i64) -> Result<()> {
        let mut conn = self.db.conn(ctx).await?;
        let result = sqlx::query("DELETE FROM registry WHERE id = ?")
            .bind(id)
            .execute(conn.get()?)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("registry {id} not found")));
        }
        tracing::info!(id, "registry deleted");
        Ok(())
    }

    fn list_registry_provider_types(&self) -> Vec<String> {
        self.factories.list_registry_provider_types()
    }

    fn list_registry_provider_infos(&self) -> ProviderInfos {
        self.factories.list_provider_infos()
    }

    fn create_adapter(&self, registry: &Registry) -> Result<Arc<dyn Adapter>> {
        self.factories.create_adapter(registry)
    }

    async fn health_check(&self, _ctx: &Context, registry: &Registry) -> Result<HealthStatus> {
        let adapter = self.create_adapter(registry)?;
        let status = adapter.health_check().await?;
        tracing::debug!(name = %registry.name, %status, "registry health checked");
        Ok(status)
    }
}
