//! Media-type dispatch for artifact metadata.
//!
//! A [`Processor`] fills in the type-specific parts of an [`Artifact`]
//! (type tag, extra attributes) and derives additions such as an image's
//! build history. Processors are looked up by the artifact's resolved media
//! type in a [`ProcessorRegistry`]; unregistered types fall back to
//! [`DefaultProcessor`].
//!
//! Processors reach registry content through the [`BlobFetcher`] passed to
//! each call.

mod base;
mod cnab;
mod default;
mod image;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use wharf_core::{Context, Error, Result};
use wharf_registry::{MediaType, PulledManifest, RegistryClient};

use crate::model::{Addition, Artifact};

pub use base::{IndexProcessor, ManifestProcessor};
pub use cnab::{CnabProcessor, ANNOTATION_CNAB_MANIFEST_TYPE, CNAB_MANIFEST_TYPE_CONFIG, TYPE_CNAB};
pub use default::{derive_type, DefaultProcessor, ANNOTATION_SKIP_LIST};
pub use image::{
    ImageIndexProcessor, ImageProcessor, V1Processor, ADDITION_BUILD_HISTORY, IMAGE_PROPERTIES,
    TYPE_IMAGE,
};

/// Read access to registry content.
#[async_trait]
pub trait BlobFetcher: Send + Sync {
    /// Pulls a manifest by tag or digest.
    async fn pull_manifest(&self, repository: &str, reference: &str) -> Result<PulledManifest>;

    /// Pulls a blob by digest.
    async fn pull_blob(&self, repository: &str, digest: &str) -> Result<Vec<u8>>;
}

#[async_trait]
impl BlobFetcher for RegistryClient {
    async fn pull_manifest(&self, repository: &str, reference: &str) -> Result<PulledManifest> {
        let manifest =
            Self::pull_manifest(self, repository, reference, &MediaType::ACCEPTED_MANIFESTS).await?;
        Ok(manifest)
    }

    async fn pull_blob(&self, repository: &str, digest: &str) -> Result<Vec<u8>> {
        let blob = Self::pull_blob(self, repository, digest).await?;
        Ok(blob)
    }
}

/// Extracts type-specific metadata for one family of media types.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Uppercase type tag for `artifact`.
    fn artifact_type(&self, artifact: &Artifact) -> String;

    /// Additions this processor can derive.
    fn addition_types(&self, _artifact: &Artifact) -> Vec<String> {
        Vec::new()
    }

    /// Fills in metadata from the raw `manifest` document.
    async fn abstract_metadata(
        &self,
        ctx: &Context,
        fetcher: &dyn BlobFetcher,
        artifact: &mut Artifact,
        manifest: &[u8],
    ) -> Result<()>;

    /// Derives the addition named `addition_type`.
    async fn abstract_addition(
        &self,
        _ctx: &Context,
        _fetcher: &dyn BlobFetcher,
        artifact: &Artifact,
        addition_type: &str,
    ) -> Result<Addition> {
        Err(unsupported_addition(artifact, addition_type))
    }
}

pub(crate) fn unsupported_addition(artifact: &Artifact, addition_type: &str) -> Error {
    Error::bad_request(format!(
        "addition {addition_type} isn't supported for {} artifacts",
        artifact.artifact_type
    ))
}

/// Media type to processor mapping; the first registration of a media type
/// wins.
pub struct ProcessorRegistry {
    processors: RwLock<HashMap<String, Arc<dyn Processor>>>,
    fallback: Arc<dyn Processor>,
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("media_types", &self.media_types())
            .finish_non_exhaustive()
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessorRegistry {
    /// Creates a registry with nothing registered.
    #[must_use]
    pub fn new() -> Self {
        Self {
            processors: RwLock::new(HashMap::new()),
            fallback: Arc::new(DefaultProcessor),
        }
    }

    /// Creates a registry holding the built-in processors.
    #[must_use]
    pub fn with_builtins() -> Self {
        let image: Arc<dyn Processor> = Arc::new(ImageProcessor::new());
        let index: Arc<dyn Processor> = Arc::new(ImageIndexProcessor::new());
        let builtins: [(&str, Arc<dyn Processor>); 6] = [
            (MediaType::DOCKER_V1_SIGNED, Arc::new(V1Processor)),
            (MediaType::DOCKER_IMAGE_CONFIG, Arc::clone(&image)),
            (MediaType::OCI_IMAGE_CONFIG, image),
            (MediaType::OCI_INDEX, Arc::clone(&index)),
            (MediaType::DOCKER_LIST, index),
            (MediaType::CNAB, Arc::new(CnabProcessor::new())),
        ];

        let registry = Self::new();
        registry.processors.write().extend(
            builtins
                .into_iter()
                .map(|(media_type, processor)| (media_type.to_string(), processor)),
        );
        registry
    }

    /// Registers `processor` for each of `media_types`.
    ///
    /// # Errors
    ///
    /// Returns `CONFLICT` if any media type already has a processor; nothing
    /// is registered in that case.
    pub fn register(&self, processor: Arc<dyn Processor>, media_types: &[&str]) -> Result<()> {
        let mut processors = self.processors.write();
        if let Some(taken) = media_types.iter().find(|mt| processors.contains_key(**mt)) {
            return Err(Error::conflict(format!(
                "processor for media type {taken} already exists"
            )));
        }
        for media_type in media_types {
            processors.insert((*media_type).to_string(), Arc::clone(&processor));
        }
        tracing::debug!(?media_types, "registered artifact processor");
        Ok(())
    }

    /// Returns the processor for `media_type`, or the default processor.
    #[must_use]
    pub fn get(&self, media_type: &str) -> Arc<dyn Processor> {
        self.processors.read().get(media_type).map_or_else(
            || {
                tracing::debug!(media_type, "no processor registered, using default");
                Arc::clone(&self.fallback)
            },
            Arc::clone,
        )
    }

    /// Registered media types, sorted.
    #[must_use]
    pub fn media_types(&self) -> Vec<String> {
        let mut media_types: Vec<String> = self.processors.read().keys().cloned().collect();
        media_types.sort();
        media_types
    }
}

static PROCESSORS: Lazy<Arc<ProcessorRegistry>> =
    Lazy::new(|| Arc::new(ProcessorRegistry::with_builtins()));

/// Process-wide registry, holding the built-ins on first use.
#[must_use]
pub fn registry() -> Arc<ProcessorRegistry> {
    Arc::clone(&PROCESSORS)
}

/// Registers `processor` in the process-wide registry.
///
/// # Errors
///
/// Returns `CONFLICT` if a media type is already taken.
pub fn register(processor: Arc<dyn Processor>, media_types: &[&str]) -> Result<()> {
    PROCESSORS.register(processor, media_types)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;

    use super::*;
    use wharf_registry::compute_digest;

    /// In-memory content keyed by digest or tag.
    #[derive(Default)]
    pub struct StaticFetcher {
        pub manifests: HashMap<String, (String, Vec<u8>)>,
        pub blobs: HashMap<String, Vec<u8>>,
    }

    impl StaticFetcher {
        pub fn blob(mut self, data: &[u8]) -> (Self, String) {
            let digest = compute_digest(data);
            self.blobs.insert(digest.clone(), data.to_vec());
            (self, digest)
        }

        pub fn manifest(mut self, media_type: &str, data: &[u8]) -> (Self, String) {
            let digest = compute_digest(data);
            self.manifests
                .insert(digest.clone(), (media_type.to_string(), data.to_vec()));
            (self, digest)
        }
    }

    #[async_trait]
    impl BlobFetcher for StaticFetcher {
        async fn pull_manifest(&self, _repository: &str, reference: &str) -> Result<PulledManifest> {
            let (media_type, payload) = self
                .manifests
                .get(reference)
                .ok_or_else(|| Error::not_found(format!("manifest {reference} not found")))?;
            Ok(PulledManifest {
                media_type: media_type.clone(),
                digest: compute_digest(payload),
                payload: payload.clone(),
            })
        }

        async fn pull_blob(&self, _repository: &str, digest: &str) -> Result<Vec<u8>> {
            self.blobs
                .get(digest)
                .cloned()
                .ok_or_else(|| Error::not_found(format!("blob {digest} not found")))
        }
    }
}
