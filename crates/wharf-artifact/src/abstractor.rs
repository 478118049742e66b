//! Turns a pushed manifest into a typed artifact record.
//!
//! The abstractor pulls the manifest, resolves the artifact media type and
//! size, links index children (which must already be persisted) and hands
//! the result to the processor registered for the media type.

use std::sync::Arc;

use wharf_core::{Context, Error, Result};
use wharf_registry::{Index, Manifest, MediaType};

use crate::manager::ArtifactManager;
use crate::model::{Addition, Artifact, Reference, ANNOTATION_ARTIFACT_TYPE};
use crate::processor::{BlobFetcher, ProcessorRegistry};

/// Resolves artifact metadata from registry content.
#[derive(Clone)]
pub struct Abstractor {
    artifacts: Arc<dyn ArtifactManager>,
    fetcher: Arc<dyn BlobFetcher>,
    processors: Arc<ProcessorRegistry>,
}

impl std::fmt::Debug for Abstractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Abstractor")
            .field("processors", &self.processors)
            .finish_non_exhaustive()
    }
}

impl Abstractor {
    /// Creates an abstractor using the process-wide processor registry.
    #[must_use]
    pub fn new(artifacts: Arc<dyn ArtifactManager>, fetcher: Arc<dyn BlobFetcher>) -> Self {
        Self::with_processors(artifacts, fetcher, crate::processor::registry())
    }

    /// Creates an abstractor over an explicit processor registry.
    #[must_use]
    pub fn with_processors(
        artifacts: Arc<dyn ArtifactManager>,
        fetcher: Arc<dyn BlobFetcher>,
        processors: Arc<ProcessorRegistry>,
    ) -> Self {
        Self {
            artifacts,
            fetcher,
            processors,
        }
    }

    /// Fills in everything derivable from the manifest of
    /// `artifact.repository_name@artifact.digest`.
    ///
    /// # Errors
    ///
    /// Returns `BAD_REQUEST` for an unsupported manifest media type,
    /// `NOT_FOUND` when an index child has not been pushed yet, and any
    /// registry or processor failure.
    pub async fn abstract_metadata(&self, ctx: &Context, artifact: &mut Artifact) -> Result<()> {
        let pulled = self
            .fetcher
            .pull_manifest(&artifact.repository_name, &artifact.digest)
            .await?;
        artifact.manifest_media_type = MediaType::normalize(&pulled.media_type).to_string();
        let payload = pulled.payload;

        let manifest_media_type = artifact.manifest_media_type.clone();
        match manifest_media_type.as_str() {
            MediaType::DOCKER_V1_SIGNED => {
                artifact.media_type.clone_from(&artifact.manifest_media_type);
            }
            MediaType::DOCKER_V2 | MediaType::OCI_MANIFEST => {
                abstract_manifest(artifact, &payload)?;
            }
            MediaType::OCI_INDEX | MediaType::DOCKER_LIST => {
                self.abstract_index(ctx, artifact, &payload).await?;
            }
            other => {
                return Err(Error::bad_request(format!(
                    "unsupported manifest media type: {other}"
                )))
            }
        }

        let processor = self.processors.get(&artifact.media_type);
        processor
            .abstract_metadata(ctx, self.fetcher.as_ref(), artifact, &payload)
            .await?;
        artifact.artifact_type = processor.artifact_type(artifact);

        tracing::debug!(
            repository = %artifact.repository_name,
            digest = %artifact.digest,
            media_type = %artifact.media_type,
            artifact_type = %artifact.artifact_type,
            size = artifact.size,
            "abstracted artifact metadata"
        );
        Ok(())
    }

    /// Abstracts `artifact` and persists it with its references.
    ///
    /// # Errors
    ///
    /// Returns the abstraction error, or `CONFLICT` if the digest already
    /// exists in the repository.
    pub async fn ingest(&self, ctx: &Context, artifact: &mut Artifact) -> Result<i64> {
        self.abstract_metadata(ctx, artifact).await?;
        let id = self.artifacts.create(ctx, artifact).await?;
        artifact.id = id;
        Ok(id)
    }

    /// Derives the addition named `addition_type` for a stored artifact.
    ///
    /// # Errors
    ///
    /// Returns `BAD_REQUEST` if the artifact's processor does not support it.
    pub async fn abstract_addition(
        &self,
        ctx: &Context,
        artifact: &Artifact,
        addition_type: &str,
    ) -> Result<Addition> {
        self.processors
            .get(&artifact.media_type)
            .abstract_addition(ctx, self.fetcher.as_ref(), artifact, addition_type)
            .await
    }

    /// Additions available for a stored artifact.
    #[must_use]
    pub fn addition_types(&self, artifact: &Artifact) -> Vec<String> {
        self.processors.get(&artifact.media_type).addition_types(artifact)
    }

    async fn abstract_index(&self, ctx: &Context, artifact: &mut Artifact, payload: &[u8]) -> Result<()> {
        artifact.media_type.clone_from(&artifact.manifest_media_type);
        let index: Index = serde_json::from_slice(payload)?;
        artifact.annotations = index.annotations.unwrap_or_default();
        artifact.size = i64::try_from(payload.len()).unwrap_or(i64::MAX);

        artifact.references.clear();
        for descriptor in index.manifests {
            let child = self
                .artifacts
                .get_by_digest(ctx, &artifact.repository_name, &descriptor.digest)
                .await?;
            artifact.size += child.size;
            artifact.references.push(Reference {
                parent_id: artifact.id,
                child_id: child.id,
                child_digest: descriptor.digest,
                platform: descriptor.platform,
                urls: descriptor.urls.unwrap_or_default(),
                annotations: descriptor.annotations.unwrap_or_default(),
                ..Reference::default()
            });
        }

        if let Some(artifact_type) = index.artifact_type {
            artifact.media_type = artifact_type;
        }
        if let Some(artifact_type) = artifact.annotations.get(ANNOTATION_ARTIFACT_TYPE) {
            artifact.media_type.clone_from(artifact_type);
        }
        Ok(())
    }
}

fn abstract_manifest(artifact: &mut Artifact, payload: &[u8]) -> Result<()> {
    let manifest: Manifest = serde_json::from_slice(payload)?;
    artifact.size = i64::try_from(payload.len()).unwrap_or(i64::MAX) + manifest.content_size();
    let config_type = manifest.config.media_type.as_str();
    artifact.media_type = match manifest.artifact_type {
        Some(artifact_type) if config_type.is_empty() || config_type == MediaType::OCI_EMPTY => {
            artifact_type
        }
        _ => config_type.to_string(),
    };
    artifact.annotations = manifest.annotations.unwrap_or_default();
    Ok(())
}
