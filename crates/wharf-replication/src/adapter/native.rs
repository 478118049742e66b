//! Adapter for plain distribution registries.

use std::sync::Arc;

use async_trait::async_trait;
use wharf_core::Result;
use wharf_registry::{ClientConfig, Descriptor, PulledManifest, RegistryAuth, RegistryClient};

use super::{Adapter, AdapterFactory, ArtifactRegistry};
use crate::error::AdapterError;
use crate::filter;
use crate::model::{
    Artifact, CredentialType, Filter, FilterKind, FilterStyle, HealthStatus, Registry,
    RegistryInfo, Resource, ResourceType, TriggerType,
};
use crate::pool::WorkerPool;

pub(super) const USER_AGENT: &str = concat!("wharf-replication/", env!("CARGO_PKG_VERSION"));

/// Talks to a registry through the distribution API only. Serves both
/// plain distribution registries and Harbor instances, the local one
/// included.
#[derive(Debug)]
pub struct DockerRegistryAdapter {
    registry: Registry,
    client: RegistryClient,
    pool: WorkerPool,
}

impl DockerRegistryAdapter {
    /// Builds a client for `registry`.
    ///
    /// # Errors
    ///
    /// Returns `BAD_REQUEST` for a malformed URL.
    pub fn new(registry: Registry) -> Result<Self> {
        let config = client_config(&registry);
        let client = RegistryClient::new(config).map_err(AdapterError::from)?;
        Ok(Self {
            registry,
            client,
            pool: WorkerPool::default(),
        })
    }

    /// Replaces the worker pool used for tag listing.
    #[must_use]
    pub const fn with_pool(mut self, pool: WorkerPool) -> Self {
        self.pool = pool;
        self
    }

    /// The registry record this adapter serves.
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    async fn repositories(&self, filters: &[Filter]) -> Result<Vec<String>> {
        let names = match filter::name_pattern(filters).and_then(filter::specific_paths) {
            Some(paths) => {
                tracing::debug!(?paths, "name filter names repositories outright");
                paths
            }
            None => self.client.catalog().await.map_err(AdapterError::from)?,
        };
        Ok(filter::filter_repositories(names, filters)?)
    }
}

fn client_config(registry: &Registry) -> ClientConfig {
    let auth = registry
        .usable_credential()
        .map_or(RegistryAuth::None, |c| match c.credential_type {
            CredentialType::Basic => RegistryAuth::basic(&c.access_key, &c.access_secret),
            CredentialType::OAuth | CredentialType::Secret => RegistryAuth::bearer(&c.access_secret),
        });
    ClientConfig::new(registry.url.trim_end_matches('/'))
        .with_auth(auth)
        .with_insecure(registry.insecure)
        .with_user_agent(USER_AGENT)
}

pub(super) fn image_info(registry_type: &str) -> RegistryInfo {
    RegistryInfo {
        registry_type: registry_type.to_string(),
        description: String::new(),
        supported_resource_types: vec![ResourceType::Image],
        supported_resource_filters: vec![
            FilterStyle::text(FilterKind::Name),
            FilterStyle::text(FilterKind::Tag),
        ],
        supported_triggers: vec![TriggerType::Manual, TriggerType::Scheduled],
    }
}

#[async_trait]
impl Adapter for DockerRegistryAdapter {
    fn info(&self) -> RegistryInfo {
        image_info(&self.registry.registry_type)
    }

    async fn prepare_for_push(&self, _resources: &[Resource]) -> Result<()> {
        Ok(())
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        match self.client.ping().await {
            Ok(()) => Ok(HealthStatus::Healthy),
            Err(e) => {
                tracing::warn!(url = %self.registry.url, error = %e, "registry ping failed");
                Ok(HealthStatus::Unhealthy)
            }
        }
    }

    fn artifact_registry(&self) -> Option<&dyn ArtifactRegistry> {
        Some(self)
    }
}

#[async_trait]
impl ArtifactRegistry for DockerRegistryAdapter {
    async fn fetch_artifacts(&self, filters: &[Filter]) -> Result<Vec<Resource>> {
        let repositories = self.repositories(filters).await?;
        if repositories.is_empty() {
            return Ok(Vec::new());
        }

        let found = self
            .pool
            .run(repositories, |repository| async move {
                let tags = match self.client.list_tags(&repository).await {
                    Ok(tags) => tags,
                    Err(e) => {
                        return Err(wharf_core::Error::from(AdapterError::from(e))
                            .with_message(format!("list tags of {repository}")))
                    }
                };
                let artifacts = tags.into_iter().map(Artifact::tagged).collect();
                let artifacts = filter::filter_artifacts(artifacts, filters)?;
                if artifacts.is_empty() {
                    return Ok(None);
                }
                let mut resource = Resource::image(repository, artifacts);
                resource.registry = Some(self.registry.clone());
                Ok(Some(resource))
            })
            .await?;

        let resources: Vec<Resource> = found.into_iter().flatten().collect();
        tracing::debug!(count = resources.len(), url = %self.registry.url, "fetched artifacts");
        Ok(filter::filter_resources(resources, filters))
    }

    async fn manifest_exist(&self, repository: &str, reference: &str) -> Result<Option<Descriptor>> {
        Ok(self
            .client
            .manifest_exist(repository, reference)
            .await
            .map_err(AdapterError::from)?)
    }

    async fn pull_manifest(
        &self,
        repository: &str,
        reference: &str,
        accepted: &[&str],
    ) -> Result<PulledManifest> {
        Ok(self
            .client
            .pull_manifest(repository, reference, accepted)
            .await
            .map_err(AdapterError::from)?)
    }

    async fn push_manifest(
        &self,
        repository: &str,
        reference: &str,
        media_type: &str,
        payload: &[u8],
    ) -> Result<String> {
        Ok(self
            .client
            .push_manifest(repository, reference, media_type, payload)
            .await
            .map_err(AdapterError::from)?)
    }

    async fn delete_manifest(&self, repository: &str, reference: &str) -> Result<()> {
        Ok(self
            .client
            .delete_manifest(repository, reference)
            .await
            .map_err(AdapterError::from)?)
    }

    async fn blob_exist(&self, repository: &str, digest: &str) -> Result<bool> {
        Ok(self
            .client
            .blob_exist(repository, digest)
            .await
            .map_err(AdapterError::from)?)
    }

    async fn pull_blob(&self, repository: &str, digest: &str) -> Result<Vec<u8>> {
        Ok(self
            .client
            .pull_blob(repository, digest)
            .await
            .map_err(AdapterError::from)?)
    }

    async fn push_blob(&self, repository: &str, digest: &str, data: &[u8]) -> Result<()> {
        Ok(self
            .client
            .push_blob(repository, digest, data)
            .await
            .map_err(AdapterError::from)?)
    }

    async fn mount_blob(&self, source: &str, digest: &str, destination: &str) -> Result<()> {
        Ok(self
            .client
            .mount_blob(source, digest, destination)
            .await
            .map_err(AdapterError::from)?)
    }

    async fn can_be_mount(&self, _digest: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn delete_tag(&self, _repository: &str, _tag: &str) -> Result<()> {
        Err(AdapterError::Unsupported {
            operation: "delete tag".to_string(),
            registry_type: self.registry.registry_type.clone(),
        }
        .into())
    }

    async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        Ok(self
            .client
            .list_tags(repository)
            .await
            .map_err(AdapterError::from)?)
    }
}

/// Builds [`DockerRegistryAdapter`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct DockerRegistryFactory;

impl AdapterFactory for DockerRegistryFactory {
    fn create(&self, registry: &Registry) -> Result<Arc<dyn Adapter>> {
        Ok(Arc::new(DockerRegistryAdapter::new(registry.clone())?))
    }
}
