//! The cache contract.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use wharf_core::Context;

use crate::codec::Codec;
use crate::error::{CacheError, CacheResult};

/// A key/value store with TTL, prefix namespacing and prefix scans.
///
/// Backends move raw encoded bytes; [`CacheExt`] adds typed access through
/// the cache's codec.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Identity of this instance, unique per process.
    fn id(&self) -> &str;

    /// Codec used to encode values.
    fn codec(&self) -> Arc<dyn Codec>;

    /// Returns true when `key` is present.
    async fn contains(&self, ctx: &Context, key: &str) -> bool;

    /// Removes `key`. Removing an absent key succeeds.
    async fn delete(&self, ctx: &Context, key: &str) -> CacheResult<()>;

    /// Returns the encoded value under `key`, or [`CacheError::NotFound`].
    async fn fetch_bytes(&self, ctx: &Context, key: &str) -> CacheResult<Vec<u8>>;

    /// Stores encoded bytes under `key`. `None` falls back to the configured
    /// expiration.
    async fn save_bytes(
        &self,
        ctx: &Context,
        key: &str,
        data: Vec<u8>,
        expiration: Option<Duration>,
    ) -> CacheResult<()>;

    /// Checks that the backend is reachable.
    async fn ping(&self, ctx: &Context) -> CacheResult<()>;

    /// Lists keys (without the configured prefix) starting with any of
    /// `prefixes`; an empty slice lists every key.
    async fn keys(&self, ctx: &Context, prefixes: &[&str]) -> CacheResult<Vec<String>>;
}

/// Typed fetch and save on top of [`Cache`].
#[async_trait]
pub trait CacheExt: Cache {
    /// Fetches and decodes the value under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NotFound`] on a miss.
    async fn fetch<T>(&self, ctx: &Context, key: &str) -> CacheResult<T>
    where
        T: DeserializeOwned + Send,
    {
        let data = self.fetch_bytes(ctx, key).await?;
        let value = self.codec().decode(&data)?;
        serde_json::from_value(value).map_err(|e| CacheError::decode(e.to_string()))
    }

    /// Encodes and stores `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::BadValue`] when the codec rejects the value.
    async fn save<T>(
        &self,
        ctx: &Context,
        key: &str,
        value: &T,
        expiration: Option<Duration>,
    ) -> CacheResult<()>
    where
        T: Serialize + Sync,
    {
        let value = serde_json::to_value(value).map_err(|e| CacheError::bad_value(e.to_string()))?;
        let data = self.codec().encode(&value)?;
        self.save_bytes(ctx, key, data, expiration).await
    }
}

impl<C: Cache + ?Sized> CacheExt for C {}
