//! Cached project manager.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use wharf_cache::Cache;
use wharf_core::{Context, Result};
use wharf_project::{Project, ProjectManager, ProjectQuery};

use crate::base::{impl_cache_admin, CachedResource};
use crate::RESOURCE_PROJECT;

/// [`ProjectManager`] reading through the cache by id and by name.
#[derive(Clone)]
pub struct CachedProjectManager {
    delegate: Arc<dyn ProjectManager>,
    resource: CachedResource,
}

impl std::fmt::Debug for CachedProjectManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedProjectManager")
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

impl CachedProjectManager {
    /// Wraps `delegate` with `cache`.
    #[must_use]
    pub fn new(delegate: Arc<dyn ProjectManager>, cache: Arc<dyn Cache>) -> Self {
        Self {
            delegate,
            resource: CachedResource::new(cache, RESOURCE_PROJECT),
        }
    }

    /// Sets the TTL of cached entries.
    #[must_use]
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.resource = self.resource.with_expiration(expiration);
        self
    }
}

#[async_trait]
impl ProjectManager for CachedProjectManager {
    async fn create(&self, ctx: &Context, project: &Project, metadata: &BTreeMap<String, String>) -> Result<i64> {
        self.delegate.create(ctx, project, metadata).await
    }

    async fn count(&self, ctx: &Context, query: &ProjectQuery) -> Result<i64> {
        self.delegate.count(ctx, query).await
    }

    async fn list(&self, ctx: &Context, query: &ProjectQuery) -> Result<Vec<Project>> {
        self.delegate.list(ctx, query).await
    }

    async fn get(&self, ctx: &Context, id: i64) -> Result<Project> {
        let key = self.resource.keys().one("id", id);
        self.resource
            .fetch_or_save(ctx, &key, || self.delegate.get(ctx, id))
            .await
    }

    async fn get_by_name(&self, ctx: &Context, name: &str) -> Result<Project> {
        let key = self.resource.keys().one("name", name);
        self.resource
            .fetch_or_save(ctx, &key, || self.delegate.get_by_name(ctx, name))
            .await
    }

    async fn delete(&self, ctx: &Context, id: i64) -> Result<()> {
        let project = self.delegate.get(ctx, id).await?;
        self.delegate.delete(ctx, id).await?;
        let keys = [
            self.resource.keys().one("id", id),
            self.resource.keys().one("name", &project.name),
        ];
        self.resource.invalidate(ctx, &keys).await;
        Ok(())
    }
}

impl_cache_admin!(CachedProjectManager);
