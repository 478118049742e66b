//! Fetch-or-build with at most one concurrent builder per key.

use std::future::Future;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::Serialize;
use wharf_core::{Context, KeyMutex};

use crate::cache::{Cache, CacheExt};
use crate::codec::default_codec;
use crate::error::CacheError;

static LOCKS: Lazy<KeyMutex<String>> = Lazy::new(KeyMutex::new);

/// Returns the cached value under `key`, building and caching it on a miss.
///
/// Concurrent callers missing the same key on the same cache instance
/// serialize on a key mutex; only the first runs `builder`, the others see
/// its write-back. A failed save is logged and the built value returned
/// after a round trip through the default codec, so it has the shape a hit
/// would have.
///
/// Inside an uncommitted transaction the cache is bypassed: `builder` runs
/// directly, without the key mutex. The transaction may hold the only
/// database connection a concurrent builder of the same key is waiting for.
///
/// # Errors
///
/// Returns cache errors other than a miss, and the builder's error.
pub async fn fetch_or_save<T, F, Fut>(
    ctx: &Context,
    cache: &dyn Cache,
    key: &str,
    builder: F,
    expiration: Option<Duration>,
) -> wharf_core::Result<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = wharf_core::Result<T>> + Send,
{
    if ctx.in_uncommitted_transaction() {
        tracing::debug!(key, "bypassing cache inside uncommitted transaction");
        return builder().await;
    }

    if let Some(value) = cached(ctx, cache, key).await? {
        return Ok(value);
    }

    let _guard = LOCKS.lock(format!("{}:{key}", cache.id())).await;

    if let Some(value) = cached(ctx, cache, key).await? {
        return Ok(value);
    }

    let value = builder().await?;
    if let Err(err) = cache.save(ctx, key, &value, expiration).await {
        tracing::warn!(key, error = %err, "failed to save built value to cache");
        return Ok(normalize(value));
    }

    match cached(ctx, cache, key).await {
        Ok(Some(stored)) => Ok(stored),
        // expired or evicted between the save and the read
        Ok(None) => Ok(normalize(value)),
        Err(err) => Err(err),
    }
}

/// Passes `value` through the default codec; keeps it unchanged when the
/// codec cannot represent it.
fn normalize<T>(value: T) -> T
where
    T: Serialize + DeserializeOwned,
{
    let codec = default_codec();
    serde_json::to_value(&value)
        .ok()
        .and_then(|encoded| codec.encode(&encoded).ok())
        .and_then(|data| codec.decode(&data).ok())
        .and_then(|decoded| serde_json::from_value(decoded).ok())
        .unwrap_or(value)
}

async fn cached<T>(ctx: &Context, cache: &dyn Cache, key: &str) -> wharf_core::Result<Option<T>>
where
    T: DeserializeOwned + Send,
{
    match cache.fetch(ctx, key).await {
        Ok(value) => {
            tracing::debug!(key, "cache hit");
            Ok(Some(value))
        }
        Err(CacheError::NotFound) => {
            tracing::debug!(key, "cache miss");
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCache;
    use crate::options::CacheOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use wharf_core::{Error, ErrorCode};

    #[tokio::test]
    async fn test_builds_on_miss_then_serves_hit() {
        let ctx = Context::new();
        let cache = MemoryCache::new(CacheOptions::default());
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: String = fetch_or_save(
                &ctx,
                &cache,
                "manifest:digest:sha256:1",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("body".to_string())
                },
                None,
            )
            .await
            .unwrap();
            assert_eq!(value, "body");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_builder_error_propagates_and_nothing_cached() {
        let ctx = Context::new();
        let cache = MemoryCache::new(CacheOptions::default());
        let err = fetch_or_save::<String, _, _>(
            &ctx,
            &cache,
            "k",
            || async { Err(Error::not_found("artifact 1 not found")) },
            None,
        )
        .await
        .unwrap_err();
        assert!(err.is_code(ErrorCode::NotFound));
        assert!(!cache.contains(&ctx, "k").await);
    }

    #[tokio::test]
    async fn test_save_failure_still_returns_value() {
        let ctx = Context::new();
        let cache = MemoryCache::new(
            CacheOptions::default().with_codec(crate::codec::codec("session").unwrap()),
        );
        let value: Vec<i32> = fetch_or_save(&ctx, &cache, "k", || async { Ok(vec![1, 2]) }, None)
            .await
            .unwrap();
        assert_eq!(value, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_save_failure_returns_cached_shape() {
        let ctx = Context::new();
        let rejecting = MemoryCache::new(
            CacheOptions::default().with_codec(crate::codec::codec("session").unwrap()),
        );
        let built: Vec<Option<Option<u8>>> =
            fetch_or_save(&ctx, &rejecting, "k", || async { Ok(vec![Some(None)]) }, None)
                .await
                .unwrap();
        assert_eq!(built, vec![None]);

        let accepting = MemoryCache::new(CacheOptions::default());
        let first: Vec<Option<Option<u8>>> =
            fetch_or_save(&ctx, &accepting, "k", || async { Ok(vec![Some(None)]) }, None)
                .await
                .unwrap();
        assert_eq!(first, built);
    }

    #[tokio::test]
    async fn test_uncommitted_transaction_reads_through() {
        let db = wharf_core::Database::in_memory().await.unwrap();
        let cache = MemoryCache::new(CacheOptions::default());
        let calls = AtomicUsize::new(0);
        cache.save(&Context::new(), "artifact:id:1", &1_i64, None).await.unwrap();

        let (cache, calls) = (&cache, &calls);
        wharf_core::with_transaction(&db, &Context::new(), |tx| async move {
            for _ in 0..2 {
                let value: i64 = fetch_or_save(
                    &tx,
                    cache,
                    "artifact:id:1",
                    || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(2_i64)
                    },
                    None,
                )
                .await?;
                assert_eq!(value, 2);
            }
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let stored: i64 = cache.fetch(&Context::new(), "artifact:id:1").await.unwrap();
        assert_eq!(stored, 1);
    }

    #[tokio::test]
    async fn test_transaction_read_does_not_wait_for_key_holder() {
        let db = wharf_core::Database::in_memory().await.unwrap();
        let cache = MemoryCache::new(CacheOptions::default());
        let key = format!("{}:artifact:id:1", cache.id());
        let _held = LOCKS.lock(key.clone()).await;

        let cache = &cache;
        let ctx = Context::new();
        let read = wharf_core::with_transaction(&db, &ctx, |tx| async move {
            fetch_or_save(&tx, cache, "artifact:id:1", || async { Ok(7_i64) }, None).await
        });
        let value = tokio::time::timeout(Duration::from_secs(5), read)
            .await
            .expect("read inside the transaction waited on the key mutex")
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_stampede_builds_once() {
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new(CacheOptions::default()));
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..1000)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    let ctx = Context::new();
                    fetch_or_save(
                        &ctx,
                        cache.as_ref(),
                        "artifact:id:1",
                        || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::task::yield_now().await;
                            Ok(42_i64)
                        },
                        None,
                    )
                    .await
                    .unwrap()
                })
            })
            .collect();

        for task in futures::future::join_all(tasks).await {
            assert_eq!(task.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
