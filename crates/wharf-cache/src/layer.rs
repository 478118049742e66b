//! Transaction-aware cache wrapper used by the cached managers.
//!
//! Inside an uncommitted transaction saves are dropped, since the data may
//! still roll back. Deletes always go through and are repeated once the
//! transaction commits, so a reader that refilled the key mid-transaction
//! cannot leave a stale entry behind.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use wharf_core::retry::{retry, RetryOptions};
use wharf_core::Context;

use crate::cache::Cache;
use crate::codec::Codec;
use crate::error::CacheResult;

/// Wraps a cache with transaction-aware save and delete.
#[derive(Clone)]
pub struct LayerCache {
    inner: Arc<dyn Cache>,
    expiration: Option<Duration>,
}

impl std::fmt::Debug for LayerCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerCache")
            .field("id", &self.inner.id())
            .field("expiration", &self.expiration)
            .finish()
    }
}

impl LayerCache {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn Cache>) -> Self {
        Self {
            inner,
            expiration: None,
        }
    }

    /// Sets the TTL used when a save passes none.
    #[must_use]
    pub const fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// Returns the wrapped cache.
    #[must_use]
    pub const fn inner(&self) -> &Arc<dyn Cache> {
        &self.inner
    }

    /// Deletes `key`, retrying transient failures with the default retry
    /// options. Failures are logged, not returned.
    pub async fn delete_with_retry(&self, ctx: &Context, key: &str) {
        let options = RetryOptions::default();
        let result = retry(ctx, &options, || async {
            self.delete(ctx, key).await.map_err(wharf_core::Error::from)
        })
        .await;
        if let Err(err) = result {
            tracing::warn!(key, error = %err, "failed to invalidate cache entry");
        }
    }
}

#[async_trait]
impl Cache for LayerCache {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn codec(&self) -> Arc<dyn Codec> {
        self.inner.codec()
    }

    async fn contains(&self, ctx: &Context, key: &str) -> bool {
        self.inner.contains(ctx, key).await
    }

    async fn delete(&self, ctx: &Context, key: &str) -> CacheResult<()> {
        self.inner.delete(ctx, key).await?;

        if let Some(tx) = ctx.transaction().filter(|_| ctx.in_uncommitted_transaction()) {
            let inner = Arc::clone(&self.inner);
            let key = key.to_string();
            tx.on_commit(move || async move {
                if let Err(err) = inner.delete(&Context::new(), &key).await {
                    tracing::warn!(key = %key, error = %err, "post-commit cache invalidation failed");
                }
            });
        }
        Ok(())
    }

    async fn fetch_bytes(&self, ctx: &Context, key: &str) -> CacheResult<Vec<u8>> {
        self.inner.fetch_bytes(ctx, key).await
    }

    async fn save_bytes(
        &self,
        ctx: &Context,
        key: &str,
        data: Vec<u8>,
        expiration: Option<Duration>,
    ) -> CacheResult<()> {
        if ctx.in_uncommitted_transaction() {
            tracing::debug!(key, "skipping cache save inside uncommitted transaction");
            return Ok(());
        }
        self.inner
            .save_bytes(ctx, key, data, expiration.or(self.expiration))
            .await
    }

    async fn ping(&self, ctx: &Context) -> CacheResult<()> {
        self.inner.ping(ctx).await
    }

    async fn keys(&self, ctx: &Context, prefixes: &[&str]) -> CacheResult<Vec<String>> {
        self.inner.keys(ctx, prefixes).await
    }
}
