//! Cloud Native Application Bundles.
//!
//! A bundle is pushed as an index whose children include a config manifest
//! marked by [`ANNOTATION_CNAB_MANIFEST_TYPE`]; the bundle metadata lives in
//! that manifest's config blob.

use async_trait::async_trait;
use wharf_core::{Context, Result};

use super::base::{IndexProcessor, ManifestProcessor};
use super::{BlobFetcher, Processor};
use crate::model::Artifact;

/// Type tag of bundles.
pub const TYPE_CNAB: &str = "CNAB";

/// Descriptor annotation naming the role of a bundle child.
pub const ANNOTATION_CNAB_MANIFEST_TYPE: &str = "io.cnab.manifest.type";

/// Role of the child carrying the bundle config.
pub const CNAB_MANIFEST_TYPE_CONFIG: &str = "config";

/// Extracts bundle metadata from the config child.
#[derive(Debug, Clone, Default)]
pub struct CnabProcessor {
    index: IndexProcessor,
    manifest: ManifestProcessor,
}

impl CnabProcessor {
    /// Creates the processor; every config attribute is kept.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Processor for CnabProcessor {
    fn artifact_type(&self, _artifact: &Artifact) -> String {
        TYPE_CNAB.to_string()
    }

    async fn abstract_metadata(
        &self,
        ctx: &Context,
        fetcher: &dyn BlobFetcher,
        artifact: &mut Artifact,
        _manifest: &[u8],
    ) -> Result<()> {
        self.index.abstract_metadata(ctx, artifact).await?;

        let config = artifact.references.iter().find(|reference| {
            reference
                .annotations
                .get(ANNOTATION_CNAB_MANIFEST_TYPE)
                .is_some_and(|role| role == CNAB_MANIFEST_TYPE_CONFIG)
        });
        let Some(config) = config else {
            tracing::debug!(digest = %artifact.digest, "bundle has no config manifest");
            return Ok(());
        };

        let pulled = fetcher
            .pull_manifest(&artifact.repository_name, &config.child_digest)
            .await?;
        self.manifest
            .abstract_metadata(fetcher, artifact, &pulled.payload)
            .await
    }
}
