//! Pluggable clients for remote registries.
//!
//! Every adapter answers [`Adapter::info`], [`Adapter::prepare_for_push`]
//! and [`Adapter::health_check`]. Adapters that move images also implement
//! [`ArtifactRegistry`] and expose it through
//! [`Adapter::artifact_registry`].
//!
//! Adapters are built by an [`AdapterFactory`] registered under a registry
//! type tag. The process-wide [`factories`] registry starts empty;
//! [`register_builtins`] installs the adapters shipped with this crate and
//! is meant to be called once at startup.

mod dockerhub;
mod native;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use wharf_core::{Error, Result};
use wharf_registry::{Descriptor, PulledManifest};

use crate::model::{
    AdapterPattern, Filter, HealthStatus, ProviderInfos, Registry, RegistryInfo, Resource,
};

pub use dockerhub::{DockerHubAdapter, DockerHubFactory, HUB_URL, HUB_REGISTRY_URL};
pub use native::{DockerRegistryAdapter, DockerRegistryFactory};

/// A client for one remote registry.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Capabilities of the adapter.
    fn info(&self) -> RegistryInfo;

    /// Creates whatever the destination needs before `resources` are pushed,
    /// such as namespaces.
    async fn prepare_for_push(&self, resources: &[Resource]) -> Result<()>;

    /// Reports whether the registry is reachable with the configured
    /// credentials. An unreachable registry is `Unhealthy`, not an error.
    async fn health_check(&self) -> Result<HealthStatus>;

    /// The image surface, for adapters that move images.
    fn artifact_registry(&self) -> Option<&dyn ArtifactRegistry> {
        None
    }
}

/// Image transfer surface of an adapter.
#[async_trait]
pub trait ArtifactRegistry: Send + Sync {
    /// Lists the repositories and artifacts selected by `filters`.
    async fn fetch_artifacts(&self, filters: &[Filter]) -> Result<Vec<Resource>>;

    /// Descriptor of a manifest, `None` when absent.
    async fn manifest_exist(&self, repository: &str, reference: &str) -> Result<Option<Descriptor>>;

    /// Pulls a manifest; `accepted` empty means every known type.
    async fn pull_manifest(
        &self,
        repository: &str,
        reference: &str,
        accepted: &[&str],
    ) -> Result<PulledManifest>;

    /// Pushes a manifest and returns its digest.
    async fn push_manifest(
        &self,
        repository: &str,
        reference: &str,
        media_type: &str,
        payload: &[u8],
    ) -> Result<String>;

    /// Deletes a manifest by tag or digest.
    async fn delete_manifest(&self, repository: &str, reference: &str) -> Result<()>;

    /// Reports whether a blob exists.
    async fn blob_exist(&self, repository: &str, digest: &str) -> Result<bool>;

    /// Pulls a blob.
    async fn pull_blob(&self, repository: &str, digest: &str) -> Result<Vec<u8>>;

    /// Pushes a blob.
    async fn push_blob(&self, repository: &str, digest: &str, data: &[u8]) -> Result<()>;

    /// Mounts a blob of `source` into `destination` without transferring it.
    async fn mount_blob(&self, source: &str, digest: &str, destination: &str) -> Result<()>;

    /// Repository a blob can be mounted from, if the adapter knows one.
    async fn can_be_mount(&self, digest: &str) -> Result<Option<String>>;

    /// Deletes one tag, leaving the manifest.
    async fn delete_tag(&self, repository: &str, tag: &str) -> Result<()>;

    /// Lists the tags of a repository.
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>>;
}

/// Builds adapters of one registry type.
pub trait AdapterFactory: Send + Sync {
    /// Builds an adapter for `registry`.
    ///
    /// # Errors
    ///
    /// Returns an error when the record cannot be turned into a client,
    /// e.g. for a malformed URL.
    fn create(&self, registry: &Registry) -> Result<Arc<dyn Adapter>>;

    /// Endpoint and credential hints for UIs.
    fn adapter_pattern(&self) -> Option<AdapterPattern> {
        None
    }
}

/// Adapter factories by registry type tag.
#[derive(Default)]
pub struct FactoryRegistry {
    factories: RwLock<BTreeMap<String, Arc<dyn AdapterFactory>>>,
}

impl std::fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryRegistry")
            .field("types", &self.list_registry_provider_types())
            .finish()
    }
}

impl FactoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under `registry_type`.
    ///
    /// # Errors
    ///
    /// Returns `BAD_REQUEST` for an empty type and `CONFLICT` if the type is
    /// already registered.
    pub fn register_factory(&self, registry_type: &str, factory: Arc<dyn AdapterFactory>) -> Result<()> {
        if registry_type.is_empty() {
            return Err(Error::bad_request("registry type must not be empty"));
        }
        let mut factories = self.factories.write();
        if factories.contains_key(registry_type) {
            return Err(Error::conflict(format!(
                "adapter factory for {registry_type} already exists"
            )));
        }
        factories.insert(registry_type.to_string(), factory);
        tracing::info!(registry_type, "adapter factory registered");
        Ok(())
    }

    /// Returns the factory of `registry_type`.
    ///
    /// # Errors
    ///
    /// Returns `NOT_FOUND` when no factory is registered for it.
    pub fn get_factory(&self, registry_type: &str) -> Result<Arc<dyn AdapterFactory>> {
        self.factories
            .read()
            .get(registry_type)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("adapter factory for {registry_type} not found")))
    }

    /// Registered type tags, sorted.
    #[must_use]
    pub fn list_registry_provider_types(&self) -> Vec<String> {
        self.factories.read().keys().cloned().collect()
    }

    /// Adapter patterns of the registered types that publish one.
    #[must_use]
    pub fn list_provider_infos(&self) -> ProviderInfos {
        self.factories
            .read()
            .iter()
            .filter_map(|(registry_type, factory)| {
                factory
                    .adapter_pattern()
                    .map(|pattern| (registry_type.clone(), pattern))
            })
            .collect()
    }

    /// Builds an adapter for `registry` with the factory of its type.
    ///
    /// # Errors
    ///
    /// Returns `NOT_FOUND` for an unregistered type, or the factory's error.
    pub fn create_adapter(&self, registry: &Registry) -> Result<Arc<dyn Adapter>> {
        self.get_factory(&registry.registry_type)?.create(registry)
    }
}

static FACTORIES: Lazy<Arc<FactoryRegistry>> = Lazy::new(|| Arc::new(FactoryRegistry::new()));

/// Process-wide factory registry.
#[must_use]
pub fn factories() -> Arc<FactoryRegistry> {
    Arc::clone(&FACTORIES)
}

/// Registers `factory` in the process-wide registry.
///
/// # Errors
///
/// See [`FactoryRegistry::register_factory`].
pub fn register_factory(registry_type: &str, factory: Arc<dyn AdapterFactory>) -> Result<()> {
    FACTORIES.register_factory(registry_type, factory)
}

/// Installs the built-in adapters into `registry`. Types already present
/// are left alone, so calling this twice is harmless.
pub fn install_builtins(registry: &FactoryRegistry) {
    let builtins: [(&str, Arc<dyn AdapterFactory>); 3] = [
        (crate::model::REGISTRY_TYPE_DOCKER_REGISTRY, Arc::new(DockerRegistryFactory)),
        (crate::model::REGISTRY_TYPE_DOCKER_HUB, Arc::new(DockerHubFactory)),
        (crate::model::REGISTRY_TYPE_HARBOR, Arc::new(DockerRegistryFactory)),
    ];
    for (registry_type, factory) in builtins {
        if let Err(e) = registry.register_factory(registry_type, factory) {
            tracing::debug!(registry_type, error = %e, "adapter factory not registered");
        }
    }
}

/// Installs the built-in adapters into the process-wide registry.
pub fn register_builtins() {
    install_builtins(&FACTORIES);
}
