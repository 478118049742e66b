//! Cache backed by a Redis cluster.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::FromRedisValue;
use tokio::sync::OnceCell;
use wharf_core::Context;

use super::address::RedisAddress;
use super::pool::PoolRegistry;
use crate::cache::Cache;
use crate::codec::Codec;
use crate::error::{CacheError, CacheResult};
use crate::options::CacheOptions;

static POOLS: Lazy<PoolRegistry<ClusterPool>> = Lazy::new(PoolRegistry::new);

/// A cluster client and its lazily established connection.
pub struct ClusterPool {
    client: ClusterClient,
    conn: OnceCell<ClusterConnection>,
}

impl std::fmt::Debug for ClusterPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterPool")
            .field("connected", &self.conn.initialized())
            .finish_non_exhaustive()
    }
}

impl ClusterPool {
    fn new(address: &RedisAddress) -> CacheResult<Self> {
        let nodes: Vec<String> = address
            .hosts
            .iter()
            .map(|host| address.node_url(host, 0))
            .collect();
        let mut builder = ClusterClient::builder(nodes).retries(address.params.max_retries);
        if let Some(dial) = address.params.dial_timeout {
            builder = builder.connection_timeout(dial);
        }
        if let Some(timeout) = super::command_timeout(&address.params) {
            builder = builder.response_timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            conn: OnceCell::new(),
        })
    }

    async fn connection(&self) -> CacheResult<ClusterConnection> {
        let conn = self
            .conn
            .get_or_try_init(|| async { self.client.get_async_connection().await })
            .await?;
        Ok(conn.clone())
    }
}

/// Redis cluster cache. Prefix scans visit every master.
#[derive(Debug)]
pub struct ClusterCache {
    id: String,
    options: CacheOptions,
    address: RedisAddress,
    pool: Arc<ClusterPool>,
    command_timeout: Option<Duration>,
}

impl ClusterCache {
    /// Creates a cluster cache sharing its client with other caches built
    /// from the same address.
    ///
    /// # Errors
    ///
    /// Returns an error if the cluster client cannot be configured.
    pub fn new(options: CacheOptions, address: RedisAddress) -> CacheResult<Self> {
        let pool = POOLS.get_or_try_insert(&options.address, || ClusterPool::new(&address))?;
        Ok(Self {
            id: format!("redis-cluster-{}", uuid::Uuid::now_v7()),
            command_timeout: super::command_timeout(&address.params),
            options,
            address,
            pool,
        })
    }

    async fn query<T: FromRedisValue>(&self, cmd: &redis::Cmd) -> CacheResult<T> {
        let mut conn = self.pool.connection().await?;
        Ok(super::with_timeout(self.command_timeout, cmd.query_async(&mut conn)).await?)
    }

    async fn masters(&self) -> CacheResult<Vec<String>> {
        let nodes: String = self.query(&redis::cmd("CLUSTER").arg("NODES").clone()).await?;
        Ok(parse_masters(&nodes))
    }
}

/// Extracts `host:port` of every healthy master from `CLUSTER NODES` output.
fn parse_masters(nodes: &str) -> Vec<String> {
    nodes
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let addr = fields.nth(1)?;
            let flags = fields.next()?;
            let flags: Vec<&str> = flags.split(',').collect();
            if !flags.contains(&"master") || flags.iter().any(|f| f.starts_with("fail")) {
                return None;
            }
            let addr = addr.split(['@', ',']).next()?;
            (!addr.is_empty() && !addr.starts_with(':')).then(|| addr.to_string())
        })
        .collect()
}

#[async_trait]
impl Cache for ClusterCache {
    fn id(&self) -> &str {
        &self.id
    }

    fn codec(&self) -> Arc<dyn Codec> {
        Arc::clone(&self.options.codec)
    }

    async fn contains(&self, _ctx: &Context, key: &str) -> bool {
        let cmd = redis::cmd("EXISTS").arg(self.options.key(key)).clone();
        self.query::<bool>(&cmd).await.unwrap_or(false)
    }

    async fn delete(&self, _ctx: &Context, key: &str) -> CacheResult<()> {
        let cmd = redis::cmd("DEL").arg(self.options.key(key)).clone();
        self.query::<i64>(&cmd).await.map(|_| ())
    }

    async fn fetch_bytes(&self, _ctx: &Context, key: &str) -> CacheResult<Vec<u8>> {
        let cmd = redis::cmd("GET").arg(self.options.key(key)).clone();
        self.query::<Option<Vec<u8>>>(&cmd)
            .await?
            .ok_or(CacheError::NotFound)
    }

    async fn save_bytes(
        &self,
        _ctx: &Context,
        key: &str,
        data: Vec<u8>,
        expiration: Option<Duration>,
    ) -> CacheResult<()> {
        let cmd = super::set_command(&self.options.key(key), data, self.options.ttl(expiration));
        self.query::<()>(&cmd).await
    }

    async fn ping(&self, _ctx: &Context) -> CacheResult<()> {
        self.query::<String>(&redis::cmd("PING")).await.map(|_| ())
    }

    async fn keys(&self, _ctx: &Context, prefixes: &[&str]) -> CacheResult<Vec<String>> {
        let patterns = super::patterns(&self.options, prefixes);
        let mut keys = BTreeSet::new();
        for master in self.masters().await? {
            let client = redis::Client::open(self.address.node_url(&master, 0).as_str())?;
            let mut conn = client.get_multiplexed_async_connection().await?;
            for pattern in &patterns {
                let found: Vec<String> = redis::cmd("KEYS")
                    .arg(pattern)
                    .query_async(&mut conn)
                    .await?;
                keys.extend(found.iter().map(|k| self.options.strip(k).to_string()));
            }
        }
        Ok(keys.into_iter().collect())
    }
}
