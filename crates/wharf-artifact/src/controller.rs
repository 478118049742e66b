//! Artifact lifecycle on top of the managers: idempotent ingestion with
//! tags, deep deletion and pull time tracking.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use wharf_core::{with_transaction, Context, Database, Error, ErrorCode, Result};
use wharf_registry::is_digest;

use crate::abstractor::Abstractor;
use crate::manager::ArtifactManager;
use crate::model::{Addition, Artifact, ListQuery, ReferenceQuery};
use crate::repository::{Repository, RepositoryManager};
use crate::tag::{Tag, TagManager, TagQuery};

type BoxedResult<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Entry point for artifact operations.
#[derive(Clone)]
pub struct ArtifactController {
    db: Database,
    artifacts: Arc<dyn ArtifactManager>,
    repositories: Arc<dyn RepositoryManager>,
    tags: TagManager,
    abstractor: Abstractor,
}

impl std::fmt::Debug for ArtifactController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactController")
            .field("db", &self.db)
            .field("abstractor", &self.abstractor)
            .finish_non_exhaustive()
    }
}

impl ArtifactController {
    /// Creates a controller. The managers may be cached wrappers.
    #[must_use]
    pub fn new(
        db: Database,
        artifacts: Arc<dyn ArtifactManager>,
        repositories: Arc<dyn RepositoryManager>,
        abstractor: Abstractor,
    ) -> Self {
        Self {
            tags: TagManager::new(db.clone()),
            db,
            artifacts,
            repositories,
            abstractor,
        }
    }

    /// Returns the repository `name`, creating it under `project_id` when
    /// missing. The flag is true when it was created.
    ///
    /// # Errors
    ///
    /// Returns any lookup or insert failure.
    pub async fn ensure_repository(&self, ctx: &Context, project_id: i64, name: &str) -> Result<(bool, Repository)> {
        match self.repositories.get_by_name(ctx, name).await {
            Ok(repository) => return Ok((false, repository)),
            Err(e) if e.is_code(ErrorCode::NotFound) => {}
            Err(e) => return Err(e),
        }
        let created = match self.repositories.create(ctx, &Repository::new(project_id, name)).await {
            Ok(_) => true,
            // Lost a race with a concurrent push.
            Err(e) if e.is_code(ErrorCode::Conflict) => false,
            Err(e) => return Err(e),
        };
        let repository = self.repositories.get_by_name(ctx, name).await?;
        Ok((created, repository))
    }

    /// Makes sure `repository@digest` is recorded and carries `tags`.
    ///
    /// Returns whether the artifact was created and its id.
    ///
    /// # Errors
    ///
    /// Returns `NOT_FOUND` if the repository does not exist or an index
    /// child has not been pushed, and any abstraction failure.
    pub async fn ensure(&self, ctx: &Context, repository: &str, digest: &str, tags: &[String]) -> Result<(bool, i64)> {
        let (created, id) = self.ensure_artifact(ctx, repository, digest).await?;
        if !tags.is_empty() {
            let repository_id = self.artifacts.get(ctx, id).await?.repository_id;
            for tag in tags {
                self.ensure_tag(ctx, repository_id, id, tag).await?;
            }
        }
        Ok((created, id))
    }

    async fn ensure_artifact(&self, ctx: &Context, repository: &str, digest: &str) -> Result<(bool, i64)> {
        match self.artifacts.get_by_digest(ctx, repository, digest).await {
            Ok(artifact) => return Ok((false, artifact.id)),
            Err(e) if e.is_code(ErrorCode::NotFound) => {}
            Err(e) => return Err(e),
        }

        let repo = self.repositories.get_by_name(ctx, repository).await?;
        let mut artifact = Artifact::new(repo.project_id, repo.repository_id, repository, digest);
        self.abstractor.abstract_metadata(ctx, &mut artifact).await?;

        let artifacts = &self.artifacts;
        let artifact = &artifact;
        let created = with_transaction(&self.db, ctx, |ctx| async move {
            artifacts.create(&ctx, artifact).await
        })
        .await;
        match created {
            Ok(id) => {
                tracing::info!(repository, digest, id, "artifact created");
                Ok((true, id))
            }
            Err(e) if e.is_code(ErrorCode::Conflict) => {
                let existing = self.artifacts.get_by_digest(ctx, repository, digest).await?;
                Ok((false, existing.id))
            }
            Err(e) => Err(e),
        }
    }

    async fn ensure_tag(&self, ctx: &Context, repository_id: i64, artifact_id: i64, name: &str) -> Result<()> {
        let existing = self
            .tags
            .list(ctx, &TagQuery::named(repository_id, name))
            .await?;
        match existing.first() {
            Some(tag) if tag.artifact_id == artifact_id => Ok(()),
            Some(tag) => {
                tracing::debug!(tag = name, from = tag.artifact_id, to = artifact_id, "moving tag");
                self.tags.move_to(ctx, tag.id, artifact_id).await
            }
            None => match self.tags.create(ctx, &Tag::new(repository_id, artifact_id, name)).await {
                Ok(_) => Ok(()),
                Err(e) if e.is_code(ErrorCode::Conflict) => Ok(()),
                Err(e) => Err(e),
            },
        }
    }

    /// Counts artifacts.
    ///
    /// # Errors
    ///
    /// Returns any query failure.
    pub async fn count(&self, ctx: &Context, query: &ListQuery) -> Result<i64> {
        self.artifacts.count(ctx, query).await
    }

    /// Lists artifacts.
    ///
    /// # Errors
    ///
    /// Returns any query failure.
    pub async fn list(&self, ctx: &Context, query: &ListQuery) -> Result<Vec<Artifact>> {
        self.artifacts.list(ctx, query).await
    }

    /// Gets an artifact by id.
    ///
    /// # Errors
    ///
    /// Returns `NOT_FOUND` if it does not exist.
    pub async fn get(&self, ctx: &Context, id: i64) -> Result<Artifact> {
        self.artifacts.get(ctx, id).await
    }

    /// Gets an artifact by digest or tag.
    ///
    /// # Errors
    ///
    /// Returns `NOT_FOUND` if the repository, tag or digest does not exist.
    pub async fn get_by_reference(&self, ctx: &Context, repository: &str, reference: &str) -> Result<Artifact> {
        if is_digest(reference) {
            return self.artifacts.get_by_digest(ctx, repository, reference).await;
        }
        let repo = self.repositories.get_by_name(ctx, repository).await?;
        let tags = self
            .tags
            .list(ctx, &TagQuery::named(repo.repository_id, reference))
            .await?;
        let tag = tags
            .first()
            .ok_or_else(|| Error::not_found(format!("artifact {repository}:{reference} not found")))?;
        self.artifacts.get(ctx, tag.artifact_id).await
    }

    /// Tags attached to an artifact.
    ///
    /// # Errors
    ///
    /// Returns any query failure.
    pub async fn list_tags(&self, ctx: &Context, artifact_id: i64) -> Result<Vec<Tag>> {
        self.tags.list(ctx, &TagQuery::artifact(artifact_id)).await
    }

    /// Deletes an artifact, its tags, and every child no longer tagged or
    /// referenced elsewhere, in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `NOT_FOUND` if the artifact does not exist and `CONFLICT` if
    /// another artifact references it.
    pub async fn delete(&self, ctx: &Context, id: i64) -> Result<()> {
        with_transaction(&self.db, ctx, |ctx| async move { self.delete_deeply(&ctx, id, true).await }).await?;
        tracing::info!(id, "artifact deleted");
        Ok(())
    }

    fn delete_deeply<'a>(&'a self, ctx: &'a Context, id: i64, is_root: bool) -> BoxedResult<'a> {
        Box::pin(async move {
            let artifact = match self.artifacts.get(ctx, id).await {
                Ok(artifact) => artifact,
                Err(e) if !is_root && e.is_code(ErrorCode::NotFound) => return Ok(()),
                Err(e) => return Err(e),
            };

            if !is_root && !self.tags.list(ctx, &TagQuery::artifact(id)).await?.is_empty() {
                return Ok(());
            }

            let parents = self
                .artifacts
                .list_references(ctx, &ReferenceQuery::child(id))
                .await?;
            if !parents.is_empty() {
                if is_root {
                    return Err(Error::conflict("the deleting artifact is referenced by others"));
                }
                return Ok(());
            }

            for reference in &artifact.references {
                self.artifacts.delete_reference(ctx, reference.id).await?;
                self.delete_deeply(ctx, reference.child_id, false).await?;
            }

            if is_root {
                self.tags.delete_of_artifact(ctx, id).await?;
            }

            match self.artifacts.delete(ctx, id).await {
                Err(e) if !is_root && e.is_code(ErrorCode::NotFound) => Ok(()),
                other => other,
            }
        })
    }

    /// Records a pull of the artifact and, when `tag_id` is set, of the tag.
    ///
    /// # Errors
    ///
    /// Returns `BAD_REQUEST` if the tag belongs to another artifact.
    pub async fn update_pull_time(
        &self,
        ctx: &Context,
        artifact_id: i64,
        tag_id: Option<i64>,
        time: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(tag_id) = tag_id {
            let tag = self.tags.get(ctx, tag_id).await?;
            if tag.artifact_id != artifact_id {
                return Err(Error::bad_request(format!(
                    "tag {tag_id} isn't attached to artifact {artifact_id}"
                )));
            }
            self.tags.update_pull_time(ctx, tag_id, time).await?;
        }
        self.artifacts.update_pull_time(ctx, artifact_id, time).await
    }

    /// Derives an addition of a stored artifact.
    ///
    /// # Errors
    ///
    /// Returns `NOT_FOUND` if the artifact does not exist and `BAD_REQUEST`
    /// if the addition is not supported for its type.
    pub async fn get_addition(&self, ctx: &Context, id: i64, addition_type: &str) -> Result<Addition> {
        let artifact = self.artifacts.get(ctx, id).await?;
        self.abstractor.abstract_addition(ctx, &artifact, addition_type).await
    }
}
