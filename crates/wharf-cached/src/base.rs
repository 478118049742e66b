//! Plumbing shared by every cached manager.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use wharf_cache::{fetch_or_save, Cache, KeyFormatter, LayerCache};
use wharf_core::{Context, Result};

/// Cache administration exposed by every cached manager.
#[async_trait]
pub trait CacheAdmin: Send + Sync {
    /// Namespace of the cached resource, e.g. `artifact`.
    fn resource_type(&self) -> &str;

    /// Number of entries currently cached for the resource.
    async fn count_cache(&self, ctx: &Context) -> Result<usize>;

    /// Drops one entry.
    async fn delete_cache(&self, ctx: &Context, key: &str) -> Result<()>;

    /// Drops every entry of the resource.
    async fn flush_all(&self, ctx: &Context) -> Result<()>;
}

/// A namespaced, transaction-aware cache.
#[derive(Debug, Clone)]
pub(crate) struct CachedResource {
    cache: LayerCache,
    keys: KeyFormatter,
}

impl CachedResource {
    pub(crate) fn new(cache: Arc<dyn Cache>, namespace: &str) -> Self {
        Self {
            cache: LayerCache::new(cache),
            keys: KeyFormatter::new(namespace),
        }
    }

    pub(crate) fn with_expiration(mut self, expiration: Duration) -> Self {
        self.cache = self.cache.with_expiration(expiration);
        self
    }

    pub(crate) const fn keys(&self) -> &KeyFormatter {
        &self.keys
    }

    pub(crate) const fn cache(&self) -> &LayerCache {
        &self.cache
    }

    pub(crate) async fn fetch_or_save<T, F, Fut>(&self, ctx: &Context, key: &str, builder: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        fetch_or_save(ctx, &self.cache, key, builder, None).await
    }

    /// Deletes every key, absorbing transient failures.
    pub(crate) async fn invalidate(&self, ctx: &Context, keys: &[String]) {
        for key in keys {
            self.cache.delete_with_retry(ctx, key).await;
        }
    }

    pub(crate) fn resource_type(&self) -> &str {
        self.keys.namespace()
    }

    pub(crate) async fn count(&self, ctx: &Context) -> Result<usize> {
        let prefix = self.keys.prefix();
        let keys = self.cache.keys(ctx, &[prefix.as_str()]).await?;
        Ok(keys.len())
    }

    pub(crate) async fn delete(&self, ctx: &Context, key: &str) -> Result<()> {
        self.cache.delete(ctx, key).await?;
        Ok(())
    }

    pub(crate) async fn flush(&self, ctx: &Context) -> Result<()> {
        let prefix = self.keys.prefix();
        let keys = self.cache.keys(ctx, &[prefix.as_str()]).await?;
        tracing::info!(resource = self.resource_type(), count = keys.len(), "flushing cache");
        self.invalidate(ctx, &keys).await;
        Ok(())
    }
}

macro_rules! impl_cache_admin {
    ($manager:ty) => {
        #[async_trait::async_trait]
        impl $crate::base::CacheAdmin for $manager {
            fn resource_type(&self) -> &str {
                self.resource.resource_type()
            }

            async fn count_cache(&self, ctx: &wharf_core::Context) -> wharf_core::Result<usize> {
                self.resource.count(ctx).await
            }

            async fn delete_cache(&self, ctx: &wharf_core::Context, key: &str) -> wharf_core::Result<()> {
                self.resource.delete(ctx, key).await
            }

            async fn flush_all(&self, ctx: &wharf_core::Context) -> wharf_core::Result<()> {
                self.resource.flush(ctx).await
            }
        }
    };
}

pub(crate) use impl_cache_admin;
