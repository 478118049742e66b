//! Cached artifact manager.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use wharf_artifact::{Artifact, ArtifactManager, ListQuery, Reference, ReferenceQuery};
use wharf_cache::Cache;
use wharf_core::{Context, Result};

use crate::base::{impl_cache_admin, CachedResource};
use crate::RESOURCE_ARTIFACT;

/// [`ArtifactManager`] reading through the cache by id and by digest.
#[derive(Clone)]
pub struct CachedArtifactManager {
    delegate: Arc<dyn ArtifactManager>,
    resource: CachedResource,
}

impl std::fmt::Debug for CachedArtifactManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedArtifactManager")
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

impl CachedArtifactManager {
    /// Wraps `delegate` with `cache`.
    #[must_use]
    pub fn new(delegate: Arc<dyn ArtifactManager>, cache: Arc<dyn Cache>) -> Self {
        Self {
            delegate,
            resource: CachedResource::new(cache, RESOURCE_ARTIFACT),
        }
    }

    /// Sets the TTL of cached entries.
    #[must_use]
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.resource = self.resource.with_expiration(expiration);
        self
    }

    fn id_key(&self, id: i64) -> String {
        self.resource.keys().one("id", id)
    }

    fn digest_key(&self, repository: &str, digest: &str) -> String {
        self.resource
            .keys()
            .format(&[("digest", digest.into()), ("repository", repository.into())])
    }

    async fn invalidate(&self, ctx: &Context, artifact: &Artifact) {
        let keys = [
            self.id_key(artifact.id),
            self.digest_key(&artifact.repository_name, &artifact.digest),
        ];
        self.resource.invalidate(ctx, &keys).await;
    }

    /// Drops the cached entries of `id` and reads it back through the cache.
    async fn refresh_cache(&self, ctx: &Context, artifact: &Artifact) -> Result<Artifact> {
        self.invalidate(ctx, artifact).await;
        self.get(ctx, artifact.id).await
    }
}

#[async_trait]
impl ArtifactManager for CachedArtifactManager {
    async fn count(&self, ctx: &Context, query: &ListQuery) -> Result<i64> {
        self.delegate.count(ctx, query).await
    }

    async fn list(&self, ctx: &Context, query: &ListQuery) -> Result<Vec<Artifact>> {
        self.delegate.list(ctx, query).await
    }

    async fn get(&self, ctx: &Context, id: i64) -> Result<Artifact> {
        let key = self.id_key(id);
        self.resource
            .fetch_or_save(ctx, &key, || self.delegate.get(ctx, id))
            .await
    }

    async fn get_by_digest(&self, ctx: &Context, repository: &str, digest: &str) -> Result<Artifact> {
        let key = self.digest_key(repository, digest);
        self.resource
            .fetch_or_save(ctx, &key, || self.delegate.get_by_digest(ctx, repository, digest))
            .await
    }

    async fn create(&self, ctx: &Context, artifact: &Artifact) -> Result<i64> {
        self.delegate.create(ctx, artifact).await
    }

    async fn delete(&self, ctx: &Context, id: i64) -> Result<()> {
        let artifact = self.delegate.get(ctx, id).await?;
        self.delegate.delete(ctx, id).await?;
        self.invalidate(ctx, &artifact).await;
        Ok(())
    }

    async fn update(&self, ctx: &Context, artifact: &Artifact, props: &[&str]) -> Result<()> {
        self.delegate.update(ctx, artifact, props).await?;
        self.invalidate(ctx, artifact).await;
        Ok(())
    }

    async fn update_pull_time(&self, ctx: &Context, id: i64, time: DateTime<Utc>) -> Result<()> {
        let artifact = self.delegate.get(ctx, id).await?;
        self.delegate.update_pull_time(ctx, id, time).await?;
        self.refresh_cache(ctx, &artifact).await?;
        Ok(())
    }

    async fn list_references(&self, ctx: &Context, query: &ReferenceQuery) -> Result<Vec<Reference>> {
        self.delegate.list_references(ctx, query).await
    }

    async fn get_reference(&self, ctx: &Context, id: i64) -> Result<Reference> {
        self.delegate.get_reference(ctx, id).await
    }

    async fn delete_reference(&self, ctx: &Context, id: i64) -> Result<()> {
        let reference = self.delegate.get_reference(ctx, id).await?;
        let parent = self.delegate.get(ctx, reference.parent_id).await?;
        self.delegate.delete_reference(ctx, id).await?;
        // the parent's cached copy embeds its references
        self.invalidate(ctx, &parent).await;
        Ok(())
    }
}

impl_cache_admin!(CachedArtifactManager);
