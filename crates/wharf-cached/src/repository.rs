//! Cached repository manager.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use wharf_artifact::{Repository, RepositoryManager, RepositoryQuery};
use wharf_cache::Cache;
use wharf_core::{Context, Result};

use crate::base::{impl_cache_admin, CachedResource};
use crate::RESOURCE_REPOSITORY;

/// [`RepositoryManager`] reading through the cache by id and by name.
#[derive(Clone)]
pub struct CachedRepositoryManager {
    delegate: Arc<dyn RepositoryManager>,
    resource: CachedResource,
}

impl std::fmt::Debug for CachedRepositoryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedRepositoryManager")
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

impl CachedRepositoryManager {
    /// Wraps `delegate` with `cache`.
    #[must_use]
    pub fn new(delegate: Arc<dyn RepositoryManager>, cache: Arc<dyn Cache>) -> Self {
        Self {
            delegate,
            resource: CachedResource::new(cache, RESOURCE_REPOSITORY),
        }
    }

    /// Sets the TTL of cached entries.
    #[must_use]
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.resource = self.resource.with_expiration(expiration);
        self
    }

    async fn invalidate(&self, ctx: &Context, repository: &Repository) {
        let keys = [
            self.resource.keys().one("id", repository.repository_id),
            self.resource.keys().one("name", &repository.name),
        ];
        self.resource.invalidate(ctx, &keys).await;
    }
}

#[async_trait]
impl RepositoryManager for CachedRepositoryManager {
    async fn count(&self, ctx: &Context, query: &RepositoryQuery) -> Result<i64> {
        self.delegate.count(ctx, query).await
    }

    async fn list(&self, ctx: &Context, query: &RepositoryQuery) -> Result<Vec<Repository>> {
        self.delegate.list(ctx, query).await
    }

    async fn get(&self, ctx: &Context, id: i64) -> Result<Repository> {
        let key = self.resource.keys().one("id", id);
        self.resource
            .fetch_or_save(ctx, &key, || self.delegate.get(ctx, id))
            .await
    }

    async fn get_by_name(&self, ctx: &Context, name: &str) -> Result<Repository> {
        let key = self.resource.keys().one("name", name);
        self.resource
            .fetch_or_save(ctx, &key, || self.delegate.get_by_name(ctx, name))
            .await
    }

    async fn create(&self, ctx: &Context, repository: &Repository) -> Result<i64> {
        self.delegate.create(ctx, repository).await
    }

    async fn delete(&self, ctx: &Context, id: i64) -> Result<()> {
        let repository = self.delegate.get(ctx, id).await?;
        self.delegate.delete(ctx, id).await?;
        self.invalidate(ctx, &repository).await;
        Ok(())
    }

    async fn update(&self, ctx: &Context, repository: &Repository, props: &[&str]) -> Result<()> {
        let stored = self.delegate.get(ctx, repository.repository_id).await?;
        self.delegate.update(ctx, repository, props).await?;
        self.invalidate(ctx, &stored).await;
        Ok(())
    }

    async fn add_pull_count(&self, ctx: &Context, id: i64) -> Result<()> {
        let repository = self.delegate.get(ctx, id).await?;
        self.delegate.add_pull_count(ctx, id).await?;
        self.invalidate(ctx, &repository).await;
        Ok(())
    }
}

impl_cache_admin!(CachedRepositoryManager);
