//! Redis backends: single node, sentinel and cluster.

pub mod address;
pub mod cluster;
pub mod pool;
pub mod standalone;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

pub use address::{RedisAddress, RedisParams, Topology};
pub use cluster::ClusterCache;
pub use pool::{PoolConfig, PoolRegistry, RedisPool};
pub use standalone::RedisCache;

use crate::cache::Cache;
use crate::codec;
use crate::error::CacheResult;
use crate::factory::CacheFactory;
use crate::options::CacheOptions;

const DEFAULT_MIN_RETRY_BACKOFF: Duration = Duration::from_millis(8);
const DEFAULT_MAX_RETRY_BACKOFF: Duration = Duration::from_millis(512);

/// Builds Redis caches for all three Redis schemes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedisFactory;

#[async_trait]
impl CacheFactory for RedisFactory {
    async fn create(&self, mut options: CacheOptions) -> CacheResult<Arc<dyn Cache>> {
        let address = RedisAddress::parse(&options.address)?;
        if let Some(name) = &address.params.codec {
            options.codec = codec::codec(name)?;
        }
        tracing::debug!(
            address = %crate::options::redact(&options.address),
            topology = ?address.topology,
            "creating redis cache"
        );

        let cache: Arc<dyn Cache> = match address.topology {
            Topology::Cluster => Arc::new(ClusterCache::new(options, address)?),
            Topology::Single | Topology::Sentinel { .. } => {
                Arc::new(RedisCache::new(options, &address)?)
            }
        };
        Ok(cache)
    }
}

/// Exponential retry delays for failed commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Backoff {
    pub(crate) max_retries: u32,
    min: Duration,
    max: Duration,
}

impl Backoff {
    pub(crate) fn from_params(params: &RedisParams) -> Self {
        let min = params.min_retry_backoff.unwrap_or(DEFAULT_MIN_RETRY_BACKOFF);
        Self {
            max_retries: params.max_retries,
            min,
            max: params.max_retry_backoff.unwrap_or(DEFAULT_MAX_RETRY_BACKOFF).max(min),
        }
    }

    pub(crate) fn delay(&self, attempt: u32) -> Duration {
        self.min
            .checked_mul(1 << attempt.min(16))
            .map_or(self.max, |d| d.min(self.max))
    }
}

/// Connection-level failures worth a retry on a fresh connection.
pub(crate) fn is_retryable(err: &redis::RedisError) -> bool {
    err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout()
}

/// Bound on one command round trip: read plus write timeout.
pub(crate) fn command_timeout(params: &RedisParams) -> Option<Duration> {
    match (params.read_timeout, params.write_timeout) {
        (None, None) => None,
        (read, write) => Some(read.unwrap_or_default() + write.unwrap_or_default()),
    }
}

pub(crate) async fn with_timeout<T>(
    limit: Option<Duration>,
    reply: impl Future<Output = redis::RedisResult<T>>,
) -> redis::RedisResult<T> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, reply).await.unwrap_or_else(|_| {
            Err(redis::RedisError::from(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "command timed out",
            )))
        }),
        None => reply.await,
    }
}

pub(crate) fn set_command(key: &str, data: Vec<u8>, ttl: Option<Duration>) -> redis::Cmd {
    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg(data);
    if let Some(ttl) = ttl {
        cmd.arg("EX").arg(ttl.as_secs().max(1));
    }
    cmd
}

/// `KEYS` patterns for `prefixes` under the configured prefix.
pub(crate) fn patterns(options: &CacheOptions, prefixes: &[&str]) -> Vec<String> {
    if prefixes.is_empty() {
        return vec![format!("{}*", options.prefix)];
    }
    prefixes
        .iter()
        .map(|prefix| format!("{}{prefix}*", options.prefix))
        .collect()
}
