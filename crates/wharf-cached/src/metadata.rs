//! Cached project metadata manager.
//!
//! The whole map of a project is cached under one key; lookups of a subset
//! filter it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use wharf_cache::Cache;
use wharf_core::{Context, Result};
use wharf_project::{MetadataManager, ProjectMetadata};

use crate::base::{impl_cache_admin, CachedResource};
use crate::RESOURCE_PROJECT_METADATA;

/// [`MetadataManager`] reading through the cache by project id.
#[derive(Clone)]
pub struct CachedMetadataManager {
    delegate: Arc<dyn MetadataManager>,
    resource: CachedResource,
}

impl std::fmt::Debug for CachedMetadataManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedMetadataManager")
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

impl CachedMetadataManager {
    /// Wraps `delegate` with `cache`.
    #[must_use]
    pub fn new(delegate: Arc<dyn MetadataManager>, cache: Arc<dyn Cache>) -> Self {
        Self {
            delegate,
            resource: CachedResource::new(cache, RESOURCE_PROJECT_METADATA),
        }
    }

    /// Sets the TTL of cached entries.
    #[must_use]
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.resource = self.resource.with_expiration(expiration);
        self
    }

    fn key(&self, project_id: i64) -> String {
        self.resource.keys().one("projectID", project_id)
    }

    async fn invalidate(&self, ctx: &Context, project_id: i64) {
        self.resource.invalidate(ctx, &[self.key(project_id)]).await;
    }
}

#[async_trait]
impl MetadataManager for CachedMetadataManager {
    async fn add(&self, ctx: &Context, project_id: i64, metadata: &BTreeMap<String, String>) -> Result<()> {
        self.delegate.add(ctx, project_id, metadata).await?;
        self.invalidate(ctx, project_id).await;
        Ok(())
    }

    async fn get(&self, ctx: &Context, project_id: i64, names: &[&str]) -> Result<BTreeMap<String, String>> {
        let key = self.key(project_id);
        let all: BTreeMap<String, String> = self
            .resource
            .fetch_or_save(ctx, &key, || self.delegate.get(ctx, project_id, &[]))
            .await?;
        if names.is_empty() {
            return Ok(all);
        }
        Ok(all
            .into_iter()
            .filter(|(name, _)| names.contains(&name.as_str()))
            .collect())
    }

    async fn list(&self, ctx: &Context, name: Option<&str>, value: Option<&str>) -> Result<Vec<ProjectMetadata>> {
        self.delegate.list(ctx, name, value).await
    }

    async fn update(&self, ctx: &Context, project_id: i64, metadata: &BTreeMap<String, String>) -> Result<()> {
        self.delegate.update(ctx, project_id, metadata).await?;
        self.invalidate(ctx, project_id).await;
        Ok(())
    }

    async fn delete(&self, ctx: &Context, project_id: i64, names: &[&str]) -> Result<()> {
        self.delegate.delete(ctx, project_id, names).await?;
        self.invalidate(ctx, project_id).await;
        Ok(())
    }
}

impl_cache_admin!(CachedMetadataManager);
