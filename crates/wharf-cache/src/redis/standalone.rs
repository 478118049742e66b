//! Cache backed by one Redis master, reached directly or through sentinels.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::FromRedisValue;
use wharf_core::Context;

use super::address::{RedisAddress, Topology};
use super::pool::{Connector, PoolConfig, PoolRegistry, RedisPool};
use super::{is_retryable, Backoff};
use crate::cache::Cache;
use crate::codec::Codec;
use crate::error::{CacheError, CacheResult};
use crate::options::CacheOptions;

static POOLS: Lazy<PoolRegistry<RedisPool>> = Lazy::new(PoolRegistry::new);

/// Single-node or sentinel-managed Redis cache.
#[derive(Debug)]
pub struct RedisCache {
    id: String,
    options: CacheOptions,
    pool: Arc<RedisPool>,
    backoff: Backoff,
    command_timeout: Option<Duration>,
}

impl RedisCache {
    /// Creates a cache for a single-node or sentinel address. The connection
    /// pool is shared with every other cache built from the same address.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidAddress`] for a cluster address.
    pub fn new(options: CacheOptions, address: &RedisAddress) -> CacheResult<Self> {
        let connector = match &address.topology {
            Topology::Single => Connector::Single {
                url: address.node_url(&address.hosts[0], address.db),
            },
            Topology::Sentinel { master } => Connector::Sentinel {
                sentinels: address
                    .hosts
                    .iter()
                    .map(|host| format!("redis://{host}"))
                    .collect(),
                master: master.clone(),
                userinfo: address.userinfo.clone(),
                db: address.db,
            },
            Topology::Cluster => {
                return Err(CacheError::invalid_address(
                    &options.address,
                    "cluster addresses need the cluster backend",
                ))
            }
        };

        let config = PoolConfig::from_env().with_params(&address.params);
        let pool = POOLS.get_or_try_insert(&options.address, || {
            Ok(RedisPool::new(options.address.clone(), connector, config))
        })?;

        Ok(Self {
            id: format!("redis-{}", uuid::Uuid::now_v7()),
            backoff: Backoff::from_params(&address.params),
            command_timeout: super::command_timeout(&address.params),
            options,
            pool,
        })
    }

    async fn query<T: FromRedisValue>(&self, ctx: &Context, cmd: &redis::Cmd) -> CacheResult<T> {
        let mut attempt = 0;
        loop {
            let result = self.query_once(cmd).await;
            match result {
                Err(CacheError::Redis { ref source })
                    if is_retryable(source) && attempt < self.backoff.max_retries && !ctx.is_cancelled() =>
                {
                    let sleep = self.backoff.delay(attempt);
                    tracing::debug!(error = %source, attempt, sleep = ?sleep, "retrying redis command");
                    tokio::time::sleep(sleep).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn query_once<T: FromRedisValue>(&self, cmd: &redis::Cmd) -> CacheResult<T> {
        let mut conn = self.pool.get().await?;
        let reply = super::with_timeout(self.command_timeout, cmd.query_async(&mut *conn)).await;
        if let Err(err) = &reply {
            if is_retryable(err) {
                conn.discard();
            }
        }
        Ok(reply?)
    }
}

#[async_trait]
impl Cache for RedisCache {
    fn id(&self) -> &str {
        &self.id
    }

    fn codec(&self) -> Arc<dyn Codec> {
        Arc::clone(&self.options.codec)
    }

    async fn contains(&self, ctx: &Context, key: &str) -> bool {
        let cmd = redis::cmd("EXISTS").arg(self.options.key(key)).clone();
        self.query::<bool>(ctx, &cmd).await.unwrap_or(false)
    }

    async fn delete(&self, ctx: &Context, key: &str) -> CacheResult<()> {
        let cmd = redis::cmd("DEL").arg(self.options.key(key)).clone();
        self.query::<i64>(ctx, &cmd).await.map(|_| ())
    }

    async fn fetch_bytes(&self, ctx: &Context, key: &str) -> CacheResult<Vec<u8>> {
        let cmd = redis::cmd("GET").arg(self.options.key(key)).clone();
        self.query::<Option<Vec<u8>>>(ctx, &cmd)
            .await?
            .ok_or(CacheError::NotFound)
    }

    async fn save_bytes(
        &self,
        ctx: &Context,
        key: &str,
        data: Vec<u8>,
        expiration: Option<Duration>,
    ) -> CacheResult<()> {
        let cmd = super::set_command(&self.options.key(key), data, self.options.ttl(expiration));
        self.query::<()>(ctx, &cmd).await
    }

    async fn ping(&self, ctx: &Context) -> CacheResult<()> {
        let cmd = redis::cmd("PING");
        self.query::<String>(ctx, &cmd).await.map(|_| ())
    }

    async fn keys(&self, ctx: &Context, prefixes: &[&str]) -> CacheResult<Vec<String>> {
        let mut keys = BTreeSet::new();
        for pattern in super::patterns(&self.options, prefixes) {
            let cmd = redis::cmd("KEYS").arg(&pattern).clone();
            let found: Vec<String> = self.query(ctx, &cmd).await?;
            keys.extend(found.iter().map(|k| self.options.strip(k).to_string()));
        }
        Ok(keys.into_iter().collect())
    }
}
