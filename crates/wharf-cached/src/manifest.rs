//! Raw manifest bodies cached by digest.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use wharf_cache::{Cache, CacheError, CacheExt};
use wharf_core::{Context, Error, Result};

use crate::base::{impl_cache_admin, CachedResource};
use crate::RESOURCE_MANIFEST;

/// Cache of manifest bytes keyed by digest.
#[derive(Debug, Clone)]
pub struct ManifestCache {
    resource: CachedResource,
}

impl ManifestCache {
    /// Creates a manifest cache on `cache`.
    #[must_use]
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self {
            resource: CachedResource::new(cache, RESOURCE_MANIFEST),
        }
    }

    /// Sets the TTL of cached entries.
    #[must_use]
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.resource = self.resource.with_expiration(expiration);
        self
    }

    fn key(&self, digest: &str) -> String {
        self.resource.keys().one("digest", digest)
    }

    /// Stores `manifest` under `digest`.
    ///
    /// # Errors
    ///
    /// Returns any cache failure.
    pub async fn save(&self, ctx: &Context, digest: &str, manifest: &[u8]) -> Result<()> {
        let encoded = STANDARD.encode(manifest);
        self.resource
            .cache()
            .save(ctx, &self.key(digest), &encoded, None)
            .await?;
        Ok(())
    }

    /// Returns the manifest stored under `digest`.
    ///
    /// # Errors
    ///
    /// Returns `NOT_FOUND` on a miss and `UNKNOWN` for a corrupted entry.
    pub async fn get(&self, ctx: &Context, digest: &str) -> Result<Vec<u8>> {
        let encoded: String = match self.resource.cache().fetch(ctx, &self.key(digest)).await {
            Ok(encoded) => encoded,
            Err(CacheError::NotFound) => {
                return Err(Error::not_found(format!("manifest {digest} not found in cache")))
            }
            Err(e) => return Err(e.into()),
        };
        STANDARD
            .decode(encoded)
            .map_err(|e| Error::unknown(format!("corrupted manifest {digest} in cache")).with_cause(e))
    }

    /// Drops the manifest stored under `digest`.
    pub async fn delete(&self, ctx: &Context, digest: &str) {
        self.resource.invalidate(ctx, &[self.key(digest)]).await;
    }
}

impl_cache_admin!(ManifestCache);
