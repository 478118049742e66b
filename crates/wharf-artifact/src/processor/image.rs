//! Container image processors: schema 1, schema 2 / OCI image and the
//! multi-platform index.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use wharf_core::{Context, Result};
use wharf_registry::Manifest;

use super::base::{fetch_config, IndexProcessor, ManifestProcessor};
use super::{unsupported_addition, BlobFetcher, Processor};
use crate::model::{Addition, Artifact};

/// Type tag of container images.
pub const TYPE_IMAGE: &str = "IMAGE";

/// Addition holding the config `history` array.
pub const ADDITION_BUILD_HISTORY: &str = "BUILD_HISTORY";

/// Config attributes kept on image artifacts.
pub const IMAGE_PROPERTIES: &[&str] = &["created", "author", "architecture", "os"];

const JSON_UTF8: &str = "application/json; charset=utf-8";

/// Docker schema 1 signed manifests. Nothing is extracted.
#[derive(Debug, Clone, Copy, Default)]
pub struct V1Processor;

#[async_trait]
impl Processor for V1Processor {
    fn artifact_type(&self, _artifact: &Artifact) -> String {
        TYPE_IMAGE.to_string()
    }

    async fn abstract_metadata(
        &self,
        _ctx: &Context,
        _fetcher: &dyn BlobFetcher,
        _artifact: &mut Artifact,
        _manifest: &[u8],
    ) -> Result<()> {
        Ok(())
    }
}

/// Schema 2 and OCI image manifests.
#[derive(Debug, Clone)]
pub struct ImageProcessor {
    manifest: ManifestProcessor,
}

impl Default for ImageProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageProcessor {
    /// Keeps [`IMAGE_PROPERTIES`] from the config.
    #[must_use]
    pub fn new() -> Self {
        Self {
            manifest: ManifestProcessor::new(IMAGE_PROPERTIES),
        }
    }
}

#[derive(Deserialize)]
struct ImageConfig {
    #[serde(default)]
    history: Vec<Value>,
}

#[async_trait]
impl Processor for ImageProcessor {
    fn artifact_type(&self, _artifact: &Artifact) -> String {
        TYPE_IMAGE.to_string()
    }

    fn addition_types(&self, _artifact: &Artifact) -> Vec<String> {
        vec![ADDITION_BUILD_HISTORY.to_string()]
    }

    async fn abstract_metadata(
        &self,
        _ctx: &Context,
        fetcher: &dyn BlobFetcher,
        artifact: &mut Artifact,
        manifest: &[u8],
    ) -> Result<()> {
        self.manifest.abstract_metadata(fetcher, artifact, manifest).await
    }

    async fn abstract_addition(
        &self,
        _ctx: &Context,
        fetcher: &dyn BlobFetcher,
        artifact: &Artifact,
        addition_type: &str,
    ) -> Result<Addition> {
        if addition_type != ADDITION_BUILD_HISTORY {
            return Err(unsupported_addition(artifact, addition_type));
        }

        let pulled = fetcher
            .pull_manifest(&artifact.repository_name, &artifact.digest)
            .await?;
        let manifest: Manifest = serde_json::from_slice(&pulled.payload)?;
        let history = match fetch_config(fetcher, &artifact.repository_name, &manifest).await? {
            Some(config) => serde_json::from_value::<ImageConfig>(Value::Object(config))?.history,
            None => Vec::new(),
        };

        Ok(Addition {
            content: serde_json::to_vec(&history)?,
            content_type: JSON_UTF8.to_string(),
        })
    }
}

/// OCI image indexes and Docker manifest lists.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageIndexProcessor {
    index: IndexProcessor,
}

impl ImageIndexProcessor {
    /// Creates the processor.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            index: IndexProcessor,
        }
    }
}

#[async_trait]
impl Processor for ImageIndexProcessor {
    fn artifact_type(&self, _artifact: &Artifact) -> String {
        TYPE_IMAGE.to_string()
    }

    async fn abstract_metadata(
        &self,
        ctx: &Context,
        _fetcher: &dyn BlobFetcher,
        artifact: &mut Artifact,
        _manifest: &[u8],
    ) -> Result<()> {
        self.index.abstract_metadata(ctx, artifact).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::testing::StaticFetcher;
    use wharf_core::ErrorCode;
    use wharf_registry::{Descriptor, MediaType};

    const CONFIG: &str = r#"{
        "architecture": "amd64",
        "os": "linux",
        "created": "2024-01-02T03:04:05Z",
        "config": {"Cmd": ["/hello"]},
        "history": [
            {"created": "2024-01-02T03:04:05Z", "created_by": "COPY hello /"},
            {"created": "2024-01-02T03:04:05Z", "created_by": "CMD [\"/hello\"]", "empty_layer": true}
        ]
    }"#;

    fn setup() -> (StaticFetcher, Artifact) {
        let (fetcher, config) = StaticFetcher::default().blob(CONFIG.as_bytes());
        let manifest = Manifest::new(
            Descriptor::new(MediaType::DOCKER_IMAGE_CONFIG, config, CONFIG.len() as i64),
            Vec::new(),
        );
        let (fetcher, digest) =
            fetcher.manifest(MediaType::DOCKER_V2, &serde_json::to_vec(&manifest).unwrap());
        let artifact = Artifact {
            artifact_type: TYPE_IMAGE.into(),
            repository_name: "library/hello".into(),
            digest,
            ..Artifact::default()
        };
        (fetcher, artifact)
    }

    #[tokio::test]
    async fn test_image_metadata_keeps_image_properties() {
        let (fetcher, mut artifact) = setup();
        let payload = fetcher.manifests[&artifact.digest].1.clone();
        ImageProcessor::new()
            .abstract_metadata(&Context::new(), &fetcher, &mut artifact, &payload)
            .await
            .unwrap();
        let mut keys: Vec<_> = artifact.extra_attrs.keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["architecture", "created", "os"]);
    }

    #[tokio::test]
    async fn test_build_history_addition() {
        let (fetcher, artifact) = setup();
        let processor = ImageProcessor::new();
        assert_eq!(processor.addition_types(&artifact), vec![ADDITION_BUILD_HISTORY]);

        let addition = processor
            .abstract_addition(&Context::new(), &fetcher, &artifact, ADDITION_BUILD_HISTORY)
            .await
            .unwrap();
        assert_eq!(addition.content_type, "application/json; charset=utf-8");
        let history: Vec<Value> = serde_json::from_slice(&addition.content).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0]["created_by"], "COPY hello /");

        let err = processor
            .abstract_addition(&Context::new(), &fetcher, &artifact, "README.MD")
            .await
            .unwrap_err();
        assert!(err.is_code(ErrorCode::BadRequest));
    }
}
