//! Scheme-keyed registry of cache factories.

use std::collections::HashMap;
use std::sync::{Arc, Once};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::cache::Cache;
use crate::error::{CacheError, CacheResult};
use crate::memory::MemoryCache;
use crate::options::CacheOptions;
use crate::redis::address::{SCHEME_CLUSTER, SCHEME_REDIS, SCHEME_SENTINEL};
use crate::redis::RedisFactory;

/// Scheme of the in-process backend.
pub const SCHEME_MEMORY: &str = "memory";

/// Environment variable holding the core service cache address.
pub const ENV_REDIS_URL_CORE: &str = "_REDIS_URL_CORE";

/// Environment variable holding the registry cache address.
pub const ENV_REDIS_URL_REG: &str = "_REDIS_URL_REG";

/// Environment variable holding the shared cache address.
pub const ENV_REDIS_URL_HARBOR: &str = "_REDIS_URL_HARBOR";

/// Builds cache instances for one address scheme.
#[async_trait]
pub trait CacheFactory: Send + Sync {
    /// Creates a cache from `options`; `options.address` carries the URL.
    async fn create(&self, options: CacheOptions) -> CacheResult<Arc<dyn Cache>>;
}

/// Factory for [`MemoryCache`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryFactory;

#[async_trait]
impl CacheFactory for MemoryFactory {
    async fn create(&self, options: CacheOptions) -> CacheResult<Arc<dyn Cache>> {
        Ok(Arc::new(MemoryCache::new(options)))
    }
}

static FACTORIES: Lazy<RwLock<HashMap<String, Arc<dyn CacheFactory>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

static BOOTSTRAP: Once = Once::new();

/// Registers `factory` for `scheme`, replacing any previous registration.
pub fn register(scheme: impl Into<String>, factory: Arc<dyn CacheFactory>) {
    let scheme = scheme.into();
    tracing::debug!(scheme = %scheme, "registered cache factory");
    FACTORIES.write().insert(scheme, factory);
}

/// Registers the built-in backends. Safe to call more than once.
pub fn bootstrap() {
    BOOTSTRAP.call_once(|| {
        register(SCHEME_MEMORY, Arc::new(MemoryFactory));
        for scheme in [SCHEME_REDIS, SCHEME_SENTINEL, SCHEME_CLUSTER] {
            register(scheme, Arc::new(RedisFactory));
        }
    });
}

/// Returns the registered schemes, sorted.
#[must_use]
pub fn schemes() -> Vec<String> {
    bootstrap();
    let mut schemes: Vec<String> = FACTORIES.read().keys().cloned().collect();
    schemes.sort();
    schemes
}

/// Creates a cache for `address`, resolving its scheme in the registry.
///
/// # Errors
///
/// Returns [`CacheError::UnknownScheme`] when no factory handles the scheme,
/// or the factory's error (bad address, unknown parameters, unknown codec).
pub async fn new_cache(address: &str, options: CacheOptions) -> CacheResult<Arc<dyn Cache>> {
    bootstrap();
    let scheme = address
        .split_once("://")
        .map(|(scheme, _)| scheme)
        .ok_or_else(|| CacheError::invalid_address(address, "missing scheme"))?;
    let factory = FACTORIES
        .read()
        .get(scheme)
        .cloned()
        .ok_or_else(|| CacheError::UnknownScheme {
            scheme: scheme.to_string(),
        })?;

    factory
        .create(CacheOptions {
            address: address.to_string(),
            ..options
        })
        .await
}

/// Reads a cache address from `variable`, defaulting to `memory://`.
#[must_use]
pub fn address_from_env(variable: &str) -> String {
    std::env::var(variable)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| crate::options::DEFAULT_ADDRESS.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheExt;
    use wharf_core::Context;

    #[tokio::test]
    async fn test_memory_scheme() {
        let cache = new_cache("memory://", CacheOptions::default()).await.unwrap();
        let ctx = Context::new();
        cache.save(&ctx, "k", &"v", None).await.unwrap();
        assert_eq!(cache.fetch::<String>(&ctx, "k").await.unwrap(), "v");
    }

    #[tokio::test]
    async fn test_unknown_scheme() {
        let err = new_cache("memcached://localhost", CacheOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CacheError::UnknownScheme { .. }));
    }

    #[tokio::test]
    async fn test_missing_scheme() {
        let err = new_cache("localhost:6379", CacheOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CacheError::InvalidAddress { .. }));
    }

    #[tokio::test]
    async fn test_redis_unknown_parameters_fail_before_connecting() {
        let err = new_cache("redis://localhost:6379/0?nope=1", CacheOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CacheError::UnknownParameters { .. }));
    }

    #[tokio::test]
    async fn test_custom_factory() {
        register("scratch", Arc::new(MemoryFactory));
        assert!(schemes().contains(&"scratch".to_string()));
        assert!(new_cache("scratch://", CacheOptions::default()).await.is_ok());
    }

    #[test]
    fn test_builtin_schemes() {
        let schemes = schemes();
        for scheme in ["memory", "redis", "redis+cluster", "redis+sentinel"] {
            assert!(schemes.iter().any(|s| s == scheme), "{scheme} missing");
        }
    }
}
