//! In-process cache backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use wharf_core::Context;

use crate::cache::Cache;
use crate::codec::Codec;
use crate::error::{CacheError, CacheResult};
use crate::options::CacheOptions;

#[derive(Debug)]
struct Entry {
    data: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Concurrent map of encoded values with lazy expiry.
#[derive(Debug)]
pub struct MemoryCache {
    id: String,
    options: CacheOptions,
    entries: DashMap<String, Entry>,
}

impl MemoryCache {
    /// Creates an empty memory cache.
    #[must_use]
    pub fn new(options: CacheOptions) -> Self {
        Self {
            id: format!("memory-{}", uuid::Uuid::now_v7()),
            options,
            entries: DashMap::new(),
        }
    }

    fn live(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        let data = self.entries.get(key).and_then(|entry| {
            (!entry.is_expired(now)).then(|| entry.data.clone())
        });
        if data.is_none() {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        data
    }
}

#[async_trait]
impl Cache for MemoryCache {
    fn id(&self) -> &str {
        &self.id
    }

    fn codec(&self) -> Arc<dyn Codec> {
        Arc::clone(&self.options.codec)
    }

    async fn contains(&self, _ctx: &Context, key: &str) -> bool {
        self.live(&self.options.key(key)).is_some()
    }

    async fn delete(&self, _ctx: &Context, key: &str) -> CacheResult<()> {
        self.entries.remove(&self.options.key(key));
        Ok(())
    }

    async fn fetch_bytes(&self, _ctx: &Context, key: &str) -> CacheResult<Vec<u8>> {
        self.live(&self.options.key(key)).ok_or(CacheError::NotFound)
    }

    async fn save_bytes(
        &self,
        _ctx: &Context,
        key: &str,
        data: Vec<u8>,
        expiration: Option<Duration>,
    ) -> CacheResult<()> {
        let expires_at = self.options.ttl(expiration).map(|ttl| Instant::now() + ttl);
        self.entries
            .insert(self.options.key(key), Entry { data, expires_at });
        Ok(())
    }

    async fn ping(&self, _ctx: &Context) -> CacheResult<()> {
        Ok(())
    }

    async fn keys(&self, _ctx: &Context, prefixes: &[&str]) -> CacheResult<Vec<String>> {
        let now = Instant::now();
        let mut expired = Vec::new();
        let mut keys = Vec::new();
        for entry in &self.entries {
            if entry.is_expired(now) {
                expired.push(entry.key().clone());
                continue;
            }
            let key = self.options.strip(entry.key());
            if prefixes.is_empty() || prefixes.iter().any(|p| key.starts_with(p)) {
                keys.push(key.to_string());
            }
        }
        for key in expired {
            self.entries.remove_if(&key, |_, entry| entry.is_expired(now));
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheExt;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        id: i64,
        name: String,
    }

    fn cache() -> MemoryCache {
        MemoryCache::new(CacheOptions::default())
    }

    #[tokio::test]
    async fn test_save_fetch_delete() {
        let ctx = Context::new();
        let cache = cache();
        let record = Record {
            id: 7,
            name: "library/hello".into(),
        };

        cache.save(&ctx, "repository:id:7", &record, None).await.unwrap();
        assert!(cache.contains(&ctx, "repository:id:7").await);
        let back: Record = cache.fetch(&ctx, "repository:id:7").await.unwrap();
        assert_eq!(back, record);

        cache.delete(&ctx, "repository:id:7").await.unwrap();
        assert!(!cache.contains(&ctx, "repository:id:7").await);
        let miss = cache.fetch::<Record>(&ctx, "repository:id:7").await;
        assert!(matches!(miss, Err(CacheError::NotFound)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_lazily() {
        let ctx = Context::new();
        let cache = cache();
        cache
            .save(&ctx, "k", &1_i64, Some(Duration::from_secs(10)))
            .await
            .unwrap();
        cache.save(&ctx, "forever", &2_i64, None).await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;

        assert!(!cache.contains(&ctx, "k").await);
        assert_eq!(cache.keys(&ctx, &[]).await.unwrap(), vec!["forever"]);
        assert_eq!(cache.entries.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_expiration_applies() {
        let ctx = Context::new();
        let cache = MemoryCache::new(
            CacheOptions::default().with_expiration(Duration::from_secs(5)),
        );
        cache.save(&ctx, "k", &"v", None).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.fetch::<String>(&ctx, "k").await.is_err());
    }

    #[tokio::test]
    async fn test_keys_filter_by_prefix_and_strip() {
        let ctx = Context::new();
        let cache = cache();
        for key in ["artifact:id:1", "artifact:id:2", "project:id:1"] {
            cache.save(&ctx, key, &key, None).await.unwrap();
        }

        let keys = cache.keys(&ctx, &["artifact:"]).await.unwrap();
        assert_eq!(keys, vec!["artifact:id:1", "artifact:id:2"]);

        let all = cache.keys(&ctx, &[]).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_session_codec_rejects_non_bag() {
        let ctx = Context::new();
        let cache = MemoryCache::new(
            CacheOptions::default().with_codec(crate::codec::codec("session").unwrap()),
        );
        let err = cache.save(&ctx, "s", &vec![1, 2], None).await.unwrap_err();
        assert!(matches!(err, CacheError::BadValue { .. }));
    }
}
