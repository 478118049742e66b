//! Building blocks shared by the concrete processors.

use serde_json::{Map, Value};
use wharf_core::{Context, Result};
use wharf_registry::{Manifest, MediaType};

use super::BlobFetcher;
use crate::model::Artifact;

/// Pulls and decodes the config blob of `manifest`; `None` when the manifest
/// has no config content.
pub(crate) async fn fetch_config(
    fetcher: &dyn BlobFetcher,
    repository: &str,
    manifest: &Manifest,
) -> Result<Option<Map<String, Value>>> {
    let config = &manifest.config;
    if config.digest.is_empty() || config.media_type == MediaType::OCI_EMPTY {
        return Ok(None);
    }
    let blob = fetcher.pull_blob(repository, &config.digest).await?;
    Ok(Some(serde_json::from_slice(&blob)?))
}

/// Copies config blob attributes of an image-style manifest into
/// `extra_attrs`.
#[derive(Debug, Clone, Default)]
pub struct ManifestProcessor {
    properties: Vec<String>,
}

impl ManifestProcessor {
    /// Copies only `properties`; an empty list copies every attribute.
    #[must_use]
    pub fn new(properties: &[&str]) -> Self {
        Self {
            properties: properties.iter().map(ToString::to_string).collect(),
        }
    }

    /// Decodes `manifest`, pulls its config and merges the selected keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest or config is not valid JSON or the
    /// config cannot be pulled.
    pub async fn abstract_metadata(
        &self,
        fetcher: &dyn BlobFetcher,
        artifact: &mut Artifact,
        manifest: &[u8],
    ) -> Result<()> {
        let manifest: Manifest = serde_json::from_slice(manifest)?;
        let Some(mut config) = fetch_config(fetcher, &artifact.repository_name, &manifest).await?
        else {
            return Ok(());
        };

        if self.properties.is_empty() {
            artifact.extra_attrs.append(&mut config);
            return Ok(());
        }
        for property in &self.properties {
            if let Some(value) = config.remove(property) {
                artifact.extra_attrs.insert(property.clone(), value);
            }
        }
        Ok(())
    }
}

/// Index handling at the processor level.
///
/// Child references are already resolved by the abstractor, so there is
/// nothing left to extract; specialized index processors compose this.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexProcessor;

impl IndexProcessor {
    /// No-op.
    ///
    /// # Errors
    ///
    /// Never fails.
    #[allow(clippy::unused_async)]
    pub async fn abstract_metadata(&self, _ctx: &Context, _artifact: &mut Artifact) -> Result<()> {
        Ok(())
    }
}
