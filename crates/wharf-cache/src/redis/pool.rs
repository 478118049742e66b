//! Connection pooling for the single-node and sentinel backends, plus the
//! process-wide pool registry shared by every Redis backend.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::Instant;

use super::address::RedisParams;
use crate::error::{CacheError, CacheResult};

/// Maximum idle connections kept per pool.
pub const ENV_MAX_IDLE: &str = "REDIS_POOL_MAX_IDLE";

/// Maximum connections open at once per pool; non-positive is unlimited.
pub const ENV_MAX_ACTIVE: &str = "REDIS_POOL_MAX_ACTIVE";

/// Seconds after which an idle connection is closed.
pub const ENV_IDLE_TIMEOUT: &str = "REDIS_POOL_IDLE_TIMEOUT";

const DEFAULT_MAX_IDLE: usize = 30;
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(240);
const PING_AFTER_IDLE: Duration = Duration::from_secs(60);

/// Pool sizing and connection lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Idle connections kept for reuse.
    pub max_idle: usize,
    /// Open connections allowed at once; `None` is unlimited.
    pub max_active: Option<usize>,
    /// Idle connections older than this are closed on checkout.
    pub idle_timeout: Option<Duration>,
    /// Connections older than this are closed on checkout.
    pub max_conn_age: Option<Duration>,
    /// How long a checkout waits for a free slot; `None` waits forever.
    pub wait_timeout: Option<Duration>,
    /// Connect timeout.
    pub dial_timeout: Option<Duration>,
    /// Reuse oldest idle connections first.
    pub fifo: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle: DEFAULT_MAX_IDLE,
            max_active: None,
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            max_conn_age: None,
            wait_timeout: None,
            dial_timeout: None,
            fifo: false,
        }
    }
}

impl PoolConfig {
    /// Reads the `REDIS_POOL_*` environment variables over the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let int = |name: &str| -> Option<i64> {
            let raw = lookup(name)?;
            match raw.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(variable = name, value = %raw, "ignoring non-integer pool setting");
                    None
                }
            }
        };

        Self {
            max_idle: int(ENV_MAX_IDLE)
                .and_then(|v| usize::try_from(v).ok())
                .unwrap_or(defaults.max_idle),
            max_active: int(ENV_MAX_ACTIVE).map_or(defaults.max_active, |v| {
                usize::try_from(v).ok().filter(|n| *n > 0)
            }),
            idle_timeout: int(ENV_IDLE_TIMEOUT).map_or(defaults.idle_timeout, |v| {
                u64::try_from(v).ok().filter(|s| *s > 0).map(Duration::from_secs)
            }),
            ..defaults
        }
    }

    /// Applies the tuning carried in an address query.
    #[must_use]
    pub fn with_params(mut self, params: &RedisParams) -> Self {
        if params.pool_size.is_some() {
            self.max_active = params.pool_size;
        }
        if let Some(min_idle) = params.min_idle_conns {
            self.max_idle = self.max_idle.max(min_idle);
        }
        if params.idle_timeout.is_some() {
            self.idle_timeout = params.idle_timeout;
        }
        self.max_conn_age = params.max_conn_age.or(self.max_conn_age);
        self.wait_timeout = params.pool_timeout.or(self.wait_timeout);
        self.dial_timeout = params.dial_timeout.or(self.dial_timeout);
        self.fifo = params.pool_fifo;
        self
    }

    /// Sets the idle connection limit.
    #[must_use]
    pub const fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    /// Sets the open connection limit.
    #[must_use]
    pub const fn with_max_active(mut self, max_active: usize) -> Self {
        self.max_active = Some(max_active);
        self
    }

    /// Sets the checkout wait limit.
    #[must_use]
    pub const fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }
}

/// How new connections are made and checked.
#[derive(Debug, Clone)]
pub enum Connector {
    /// Connect straight to one server.
    Single {
        /// `redis://` URL of the server.
        url: String,
    },
    /// Ask the sentinels for the current master and connect to it.
    Sentinel {
        /// `redis://` URLs of the sentinels.
        sentinels: Vec<String>,
        /// Master group name.
        master: String,
        /// `user:pass` for the master, still percent-encoded.
        userinfo: Option<String>,
        /// Logical database on the master.
        db: i64,
    },
}

impl Connector {
    async fn connect(&self) -> CacheResult<MultiplexedConnection> {
        match self {
            Self::Single { url } => {
                let client = redis::Client::open(url.as_str())?;
                Ok(client.get_multiplexed_async_connection().await?)
            }
            Self::Sentinel {
                sentinels,
                master,
                userinfo,
                db,
            } => {
                let host = resolve_master(sentinels, master).await?;
                let url = match userinfo {
                    Some(userinfo) => format!("redis://{userinfo}@{host}/{db}"),
                    None => format!("redis://{host}/{db}"),
                };
                let client = redis::Client::open(url.as_str())?;
                let mut conn = client.get_multiplexed_async_connection().await?;
                if !is_master(&mut conn).await {
                    return Err(CacheError::Protocol {
                        message: format!("{host} reported by sentinel is not a master"),
                    });
                }
                Ok(conn)
            }
        }
    }

    async fn verify(&self, conn: &mut MultiplexedConnection, idle_for: Duration) -> bool {
        match self {
            Self::Single { .. } => {
                if idle_for < PING_AFTER_IDLE {
                    return true;
                }
                let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(conn).await;
                pong.is_ok()
            }
            Self::Sentinel { .. } => is_master(conn).await,
        }
    }
}

async fn resolve_master(sentinels: &[String], master: &str) -> CacheResult<String> {
    let mut last = None;
    for url in sentinels {
        let attempt = async {
            let client = redis::Client::open(url.as_str())?;
            let mut conn = client.get_multiplexed_async_connection().await?;
            let addr: Option<(String, u16)> = redis::cmd("SENTINEL")
                .arg("get-master-addr-by-name")
                .arg(master)
                .query_async(&mut conn)
                .await?;
            Ok::<_, CacheError>(addr)
        };
        match attempt.await {
            Ok(Some((host, port))) => return Ok(format!("{host}:{port}")),
            Ok(None) => {
                tracing::debug!(sentinel = %url, master, "sentinel does not know the master");
            }
            Err(err) => {
                tracing::debug!(sentinel = %url, error = %err, "sentinel unreachable");
                last = Some(err);
            }
        }
    }
    Err(last.unwrap_or_else(|| CacheError::Protocol {
        message: format!("no sentinel knows master '{master}'"),
    }))
}

async fn is_master(conn: &mut MultiplexedConnection) -> bool {
    let role: redis::RedisResult<Vec<redis::Value>> = redis::cmd("ROLE").query_async(conn).await;
    role.ok()
        .and_then(|parts| parts.into_iter().next())
        .and_then(|first| redis::from_redis_value::<String>(&first).ok())
        .is_some_and(|role| role == "master")
}

struct Idle {
    conn: MultiplexedConnection,
    created: Instant,
    returned: Instant,
}

/// A bounded pool of multiplexed connections.
pub struct RedisPool {
    name: String,
    connector: Connector,
    config: PoolConfig,
    idle: Mutex<VecDeque<Idle>>,
    active: Semaphore,
}

impl std::fmt::Debug for RedisPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisPool")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("idle", &self.idle.lock().len())
            .finish_non_exhaustive()
    }
}

impl RedisPool {
    /// Creates a pool. No connection is opened until the first checkout.
    #[must_use]
    pub fn new(name: impl Into<String>, connector: Connector, config: PoolConfig) -> Self {
        let permits = config
            .max_active
            .unwrap_or(Semaphore::MAX_PERMITS)
            .min(Semaphore::MAX_PERMITS);
        Self {
            name: name.into(),
            connector,
            config,
            idle: Mutex::new(VecDeque::new()),
            active: Semaphore::new(permits),
        }
    }

    /// Returns the pool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the pool configuration.
    #[must_use]
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Number of idle connections.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Checks out a connection, reusing a verified idle one when possible.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::PoolTimeout`] when no slot frees up in time, or
    /// the connect error.
    pub async fn get(&self) -> CacheResult<PooledConnection<'_>> {
        let acquire = self.active.acquire();
        let permit = match self.config.wait_timeout {
            Some(wait) => tokio::time::timeout(wait, acquire)
                .await
                .map_err(|_| self.timeout())?,
            None => acquire.await,
        }
        .map_err(|_| self.timeout())?;

        while let Some(idle) = self.take_idle() {
            if self.is_stale(&idle) {
                continue;
            }
            let mut conn = idle.conn;
            if self.connector.verify(&mut conn, idle.returned.elapsed()).await {
                return Ok(PooledConnection {
                    pool: self,
                    conn,
                    created: idle.created,
                    discarded: false,
                    _permit: permit,
                });
            }
            tracing::debug!(pool = %self.name, "dropping connection that failed verification");
        }

        let conn = match self.config.dial_timeout {
            Some(dial) => tokio::time::timeout(dial, self.connector.connect())
                .await
                .map_err(|_| {
                    CacheError::from(redis::RedisError::from(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "dial timeout",
                    )))
                })??,
            None => self.connector.connect().await?,
        };
        Ok(PooledConnection {
            pool: self,
            conn,
            created: Instant::now(),
            discarded: false,
            _permit: permit,
        })
    }

    fn timeout(&self) -> CacheError {
        CacheError::PoolTimeout {
            pool: self.name.clone(),
        }
    }

    fn take_idle(&self) -> Option<Idle> {
        let mut idle = self.idle.lock();
        if self.config.fifo {
            idle.pop_front()
        } else {
            idle.pop_back()
        }
    }

    fn is_stale(&self, idle: &Idle) -> bool {
        let expired = |limit: Option<Duration>, since: Instant| {
            limit.is_some_and(|limit| since.elapsed() >= limit)
        };
        expired(self.config.idle_timeout, idle.returned) || expired(self.config.max_conn_age, idle.created)
    }

    fn put(&self, conn: MultiplexedConnection, created: Instant) {
        let mut idle = self.idle.lock();
        if idle.len() < self.config.max_idle {
            idle.push_back(Idle {
                conn,
                created,
                returned: Instant::now(),
            });
        }
    }
}

/// A checked-out connection, returned to the pool on drop.
pub struct PooledConnection<'a> {
    pool: &'a RedisPool,
    conn: MultiplexedConnection,
    created: Instant,
    discarded: bool,
    _permit: SemaphorePermit<'a>,
}

impl std::fmt::Debug for PooledConnection<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("created", &self.created)
            .field("discarded", &self.discarded)
            .finish_non_exhaustive()
    }
}

impl PooledConnection<'_> {
    /// Closes the connection instead of returning it to the pool.
    pub fn discard(mut self) {
        self.discarded = true;
    }
}

impl Deref for PooledConnection<'_> {
    type Target = MultiplexedConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if !self.discarded {
            self.pool.put(self.conn.clone(), self.created);
        }
    }
}

/// One pool per name; installation is serialized, lookups are lock-free.
pub struct PoolRegistry<P> {
    pools: DashMap<String, Arc<P>>,
    install: Mutex<()>,
}

impl<P> Default for PoolRegistry<P> {
    fn default() -> Self {
        Self {
            pools: DashMap::new(),
            install: Mutex::new(()),
        }
    }
}

impl<P> std::fmt::Debug for PoolRegistry<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("pools", &self.pools.len())
            .finish()
    }
}

impl<P> PoolRegistry<P> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the pool named `name`, building it with `build` on first use.
    ///
    /// # Errors
    ///
    /// Returns the error of `build`.
    pub fn get_or_try_insert(
        &self,
        name: &str,
        build: impl FnOnce() -> CacheResult<P>,
    ) -> CacheResult<Arc<P>> {
        if let Some(pool) = self.pools.get(name) {
            return Ok(Arc::clone(pool.value()));
        }

        let _install = self.install.lock();
        if let Some(pool) = self.pools.get(name) {
            return Ok(Arc::clone(pool.value()));
        }
        let pool = Arc::new(build()?);
        self.pools.insert(name.to_string(), Arc::clone(&pool));
        tracing::debug!(pool = name, "installed cache connection pool");
        Ok(pool)
    }

    /// Number of installed pools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    /// Returns true when no pool is installed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_config_from_lookup() {
        let vars: HashMap<&str, &str> = [
            (ENV_MAX_IDLE, "5"),
            (ENV_MAX_ACTIVE, "0"),
            (ENV_IDLE_TIMEOUT, "90"),
        ]
        .into_iter()
        .collect();
        let config = PoolConfig::from_lookup(|name| vars.get(name).map(ToString::to_string));
        assert_eq!(config.max_idle, 5);
        assert_eq!(config.max_active, None);
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_config_ignores_garbage() {
        let config = PoolConfig::from_lookup(|name| (name == ENV_MAX_IDLE).then(|| "lots".to_string()));
        assert_eq!(config, PoolConfig::default());
    }

    #[test]
    fn test_params_override_env() {
        let params = RedisParams {
            pool_size: Some(8),
            pool_timeout: Some(Duration::from_secs(2)),
            pool_fifo: true,
            ..RedisParams::default()
        };
        let config = PoolConfig::default().with_params(&params);
        assert_eq!(config.max_active, Some(8));
        assert_eq!(config.wait_timeout, Some(Duration::from_secs(2)));
        assert!(config.fifo);
        assert_eq!(config.idle_timeout, Some(DEFAULT_IDLE_TIMEOUT));
    }

    #[test]
    fn test_registry_builds_once_per_name() {
        let registry: PoolRegistry<String> = PoolRegistry::new();
        let builds = AtomicUsize::new(0);
        let build = || {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok("pool".to_string())
        };

        let a = registry.get_or_try_insert("core", build).unwrap();
        let b = registry
            .get_or_try_insert("core", || {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok("other".to_string())
            })
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_does_not_cache_failures() {
        let registry: PoolRegistry<u8> = PoolRegistry::new();
        assert!(registry
            .get_or_try_insert("reg", || Err(CacheError::bad_value("boom")))
            .is_err());
        assert!(registry.is_empty());
        assert_eq!(*registry.get_or_try_insert("reg", || Ok(1)).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_checkout_times_out_when_exhausted() {
        let pool = RedisPool::new(
            "exhausted",
            Connector::Single {
                url: "redis://127.0.0.1:1/0".into(),
            },
            PoolConfig::default()
                .with_max_active(0)
                .with_wait_timeout(Duration::from_millis(20)),
        );
        let err = pool.get().await.unwrap_err();
        assert!(matches!(err, CacheError::PoolTimeout { .. }));
    }
}
