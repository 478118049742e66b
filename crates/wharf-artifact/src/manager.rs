//! Artifact manager: assembles artifacts with their references on top of
//! [`ArtifactDao`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use wharf_core::{with_transaction, Context, Result};

use crate::dao::ArtifactDao;
use crate::model::{Artifact, ListQuery, Reference, ReferenceQuery};

/// Artifact persistence contract shared by the plain and cached managers.
#[async_trait]
pub trait ArtifactManager: Send + Sync {
    /// Counts artifacts matching `query`.
    async fn count(&self, ctx: &Context, query: &ListQuery) -> Result<i64>;

    /// Lists artifacts matching `query`, each with its references.
    async fn list(&self, ctx: &Context, query: &ListQuery) -> Result<Vec<Artifact>>;

    /// Gets an artifact with its references.
    async fn get(&self, ctx: &Context, id: i64) -> Result<Artifact>;

    /// Gets an artifact by repository name and digest.
    async fn get_by_digest(&self, ctx: &Context, repository: &str, digest: &str) -> Result<Artifact>;

    /// Creates the artifact and then each of its references.
    async fn create(&self, ctx: &Context, artifact: &Artifact) -> Result<i64>;

    /// Deletes the artifact's outgoing references and then the artifact.
    async fn delete(&self, ctx: &Context, id: i64) -> Result<()>;

    /// Updates the named properties (all when empty).
    async fn update(&self, ctx: &Context, artifact: &Artifact, props: &[&str]) -> Result<()>;

    /// Moves the pull time forward.
    async fn update_pull_time(&self, ctx: &Context, id: i64, time: DateTime<Utc>) -> Result<()>;

    /// Lists references by either end.
    async fn list_references(&self, ctx: &Context, query: &ReferenceQuery) -> Result<Vec<Reference>>;

    /// Gets one reference by id.
    async fn get_reference(&self, ctx: &Context, id: i64) -> Result<Reference>;

    /// Deletes one reference.
    async fn delete_reference(&self, ctx: &Context, id: i64) -> Result<()>;
}

/// [`ArtifactManager`] backed directly by the database.
#[derive(Debug, Clone)]
pub struct DefaultArtifactManager {
    dao: ArtifactDao,
}

impl DefaultArtifactManager {
    /// Creates a manager over `dao`.
    #[must_use]
    pub const fn new(dao: ArtifactDao) -> Self {
        Self { dao }
    }

    async fn assemble(&self, ctx: &Context, mut artifact: Artifact) -> Result<Artifact> {
        artifact.references = self
            .dao
            .list_references(ctx, &ReferenceQuery::parent(artifact.id))
            .await?;
        Ok(artifact)
    }
}

#[async_trait]
impl ArtifactManager for DefaultArtifactManager {
    async fn count(&self, ctx: &Context, query: &ListQuery) -> Result<i64> {
        self.dao.count(ctx, query).await
    }

    async fn list(&self, ctx: &Context, query: &ListQuery) -> Result<Vec<Artifact>> {
        let artifacts = self.dao.list(ctx, query).await?;
        let mut assembled = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            assembled.push(self.assemble(ctx, artifact).await?);
        }
        Ok(assembled)
    }

    async fn get(&self, ctx: &Context, id: i64) -> Result<Artifact> {
        let artifact = self.dao.get(ctx, id).await?;
        self.assemble(ctx, artifact).await
    }

    async fn get_by_digest(&self, ctx: &Context, repository: &str, digest: &str) -> Result<Artifact> {
        let artifact = self.dao.get_by_digest(ctx, repository, digest).await?;
        self.assemble(ctx, artifact).await
    }

    async fn create(&self, ctx: &Context, artifact: &Artifact) -> Result<i64> {
        let dao = &self.dao;
        with_transaction(dao.database(), ctx, |ctx| async move {
            let id = dao.create(&ctx, artifact).await?;
            for reference in &artifact.references {
                let reference = Reference {
                    parent_id: id,
                    ..reference.clone()
                };
                dao.create_reference(&ctx, &reference).await?;
            }
            Ok(id)
        })
        .await
    }

    async fn delete(&self, ctx: &Context, id: i64) -> Result<()> {
        let dao = &self.dao;
        with_transaction(dao.database(), ctx, |ctx| async move {
            dao.delete_references(&ctx, id).await?;
            dao.delete(&ctx, id).await
        })
        .await
    }

    async fn update(&self, ctx: &Context, artifact: &Artifact, props: &[&str]) -> Result<()> {
        self.dao.update(ctx, artifact, props).await
    }

    async fn update_pull_time(&self, ctx: &Context, id: i64, time: DateTime<Utc>) -> Result<()> {
        self.dao.update_pull_time(ctx, id, time).await
    }

    async fn list_references(&self, ctx: &Context, query: &ReferenceQuery) -> Result<Vec<Reference>> {
        self.dao.list_references(ctx, query).await
    }

    async fn get_reference(&self, ctx: &Context, id: i64) -> Result<Reference> {
        self.dao.get_reference(ctx, id).await
    }

    async fn delete_reference(&self, ctx: &Context, id: i64) -> Result<()> {
        self.dao.delete_reference(ctx, id).await
    }
}
