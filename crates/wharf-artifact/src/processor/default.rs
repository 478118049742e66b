//! Fallback for media types without a registered processor.
//!
//! The type tag is derived from config media types shaped like
//! `application/vnd.<vendor>.<type>.config.<version>+json`. For those, the
//! config blob is decoded into `extra_attrs`.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use wharf_core::{Context, Result};
use wharf_registry::Manifest;

use super::base::fetch_config;
use super::{BlobFetcher, Processor};
use crate::model::{Artifact, TYPE_UNKNOWN};

/// Config annotation listing top-level keys to drop, comma separated.
pub const ANNOTATION_SKIP_LIST: &str = "io.goharbor.artifact.v1alpha1.skip-list";

static CONFIG_MEDIA_TYPE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^application/vnd\.[^.]*\.(.*)\.config\.[^.]*\+json$").ok());

fn captured_type(media_type: &str) -> Option<String> {
    let captures = CONFIG_MEDIA_TYPE.as_ref()?.captures(media_type)?;
    Some(captures.get(1)?.as_str().to_uppercase())
}

/// Type tag for `media_type`: the uppercased `<type>` segment of a config
/// media type, else `UNKNOWN`.
///
/// ```
/// use wharf_artifact::processor::derive_type;
///
/// assert_eq!(derive_type("application/vnd.sylabs.sif.config.v1+json"), "SIF");
/// assert_eq!(derive_type("bagel"), "UNKNOWN");
/// ```
#[must_use]
pub fn derive_type(media_type: &str) -> String {
    captured_type(media_type).unwrap_or_else(|| TYPE_UNKNOWN.to_string())
}

/// Processor used for unregistered media types.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultProcessor;

#[async_trait]
impl Processor for DefaultProcessor {
    fn artifact_type(&self, artifact: &Artifact) -> String {
        derive_type(&artifact.media_type)
    }

    async fn abstract_metadata(
        &self,
        _ctx: &Context,
        fetcher: &dyn BlobFetcher,
        artifact: &mut Artifact,
        manifest: &[u8],
    ) -> Result<()> {
        if captured_type(&artifact.media_type).is_none() {
            return Ok(());
        }
        let Ok(manifest) = serde_json::from_slice::<Manifest>(manifest) else {
            return Ok(());
        };
        let config = match fetch_config(fetcher, &artifact.repository_name, &manifest).await {
            Ok(Some(config)) => config,
            Ok(None) => return Ok(()),
            Err(e) if e.is_code(wharf_core::ErrorCode::BadRequest) => {
                tracing::debug!(digest = %artifact.digest, error = %e, "config is not a json object");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        artifact.extra_attrs = strip_skipped(config, manifest.config.annotation(ANNOTATION_SKIP_LIST));
        Ok(())
    }
}

fn strip_skipped(mut config: Map<String, Value>, skip_list: Option<&str>) -> Map<String, Value> {
    for key in skip_list.unwrap_or_default().split(',') {
        config.remove(key.trim());
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::testing::StaticFetcher;
    use wharf_registry::{Descriptor, MediaType};

    const ORMB_CONFIG: &str = r#"{
        "format": "SavedModel",
        "framework": "TensorFlow",
        "version": "v1",
        "signature": {"inputs": [{"name": "input_1", "size": [224, 224, 3], "dtype": "float64"}]},
        "training": {"git": {"repository": "git@github.com:kleveross/ormb.git", "revision": "22f1d8406d464b0c0874075539c1f2e96c253775"}},
        "dataset": {"git": {"repository": "git@github.com:kleveross/ormb.git", "revision": "22f1d8406d464b0c0874075539c1f2e96c253775"}},
        "created": "2020-08-28T02:16:48Z",
        "author": "ormb",
        "description": "CNN model",
        "tags": ["cv"],
        "labels": {"tensorflow.version": "2.1.0"},
        "metrics": [{"name": "acc", "value": "0.9"}],
        "git": {"repository": "git@github.com:kleveross/ormb.git"}
    }"#;

    const MODEL_CONFIG: &str = "application/vnd.caicloud.model.config.v1alpha1+json";

    fn fixture(config_type: &str, skip_list: Option<&str>) -> (StaticFetcher, Artifact, Vec<u8>) {
        let (fetcher, digest) = StaticFetcher::default().blob(ORMB_CONFIG.as_bytes());
        let mut config = Descriptor::new(config_type, digest, ORMB_CONFIG.len() as i64);
        if let Some(skip) = skip_list {
            config = config.with_annotation(ANNOTATION_SKIP_LIST, skip);
        }
        let mut manifest = Manifest::new(config, Vec::new());
        manifest.media_type = Some(MediaType::new(MediaType::OCI_MANIFEST));
        let artifact = Artifact {
            media_type: config_type.into(),
            repository_name: "library/model".into(),
            ..Artifact::default()
        };
        (fetcher, artifact, serde_json::to_vec(&manifest).unwrap())
    }

    #[test]
    fn test_derive_type() {
        let cases = [
            ("", "UNKNOWN"),
            ("bagel", "UNKNOWN"),
            ("application/vnd.exmaple.config.v1+json", "UNKNOWN"),
            (MODEL_CONFIG, "MODEL"),
            ("application/vnd.sylabs.sif.config.v1+json", "SIF"),
            ("application/vnd.cncf.helm.chart.config.v1+json", "HELM.CHART"),
        ];
        for (media_type, expected) in cases {
            assert_eq!(derive_type(media_type), expected, "{media_type}");
        }
    }

    #[tokio::test]
    async fn test_config_extracted_with_skip_list() {
        let (fetcher, mut artifact, manifest) = fixture(MODEL_CONFIG, Some("metrics,git"));
        DefaultProcessor
            .abstract_metadata(&Context::new(), &fetcher, &mut artifact, &manifest)
            .await
            .unwrap();
        assert_eq!(artifact.extra_attrs.len(), 11);
        assert!(!artifact.extra_attrs.contains_key("metrics"));
        assert!(!artifact.extra_attrs.contains_key("git"));
        assert_eq!(artifact.extra_attrs["author"], "ormb");
    }

    #[tokio::test]
    async fn test_config_extracted_whole_without_skip_list() {
        let (fetcher, mut artifact, manifest) = fixture(MODEL_CONFIG, None);
        DefaultProcessor
            .abstract_metadata(&Context::new(), &fetcher, &mut artifact, &manifest)
            .await
            .unwrap();
        assert_eq!(artifact.extra_attrs.len(), 13);
    }

    #[tokio::test]
    async fn test_unmatched_media_type_leaves_attrs_empty() {
        let (fetcher, mut artifact, manifest) = fixture("application/vnd.exmaple.config.v1+json", None);
        DefaultProcessor
            .abstract_metadata(&Context::new(), &fetcher, &mut artifact, &manifest)
            .await
            .unwrap();
        assert!(artifact.extra_attrs.is_empty());
    }

    #[tokio::test]
    async fn test_non_json_config_leaves_attrs_empty() {
        let (fetcher, digest) = StaticFetcher::default().blob(b"\x00\x01binary");
        let manifest = Manifest::new(Descriptor::new(MODEL_CONFIG, digest, 8), Vec::new());
        let mut artifact = Artifact {
            media_type: MODEL_CONFIG.into(),
            ..Artifact::default()
        };
        DefaultProcessor
            .abstract_metadata(
                &Context::new(),
                &fetcher,
                &mut artifact,
                &serde_json::to_vec(&manifest).unwrap(),
            )
            .await
            .unwrap();
        assert!(artifact.extra_attrs.is_empty());
    }
}
