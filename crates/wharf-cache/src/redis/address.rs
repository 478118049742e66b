//! Parsing of `redis://`, `redis+sentinel://` and `redis+cluster://` addresses.
//!
//! Sentinel and cluster addresses carry comma-separated host lists in the
//! authority, which generic URL parsers reject, so the authority is split by
//! hand and only the query goes through `form_urlencoded`.

use std::collections::BTreeSet;
use std::time::Duration;

use regex::Regex;

use crate::error::{CacheError, CacheResult};

/// Scheme of a single-node address.
pub const SCHEME_REDIS: &str = "redis";

/// Scheme of a sentinel-managed address.
pub const SCHEME_SENTINEL: &str = "redis+sentinel";

/// Scheme of a cluster address.
pub const SCHEME_CLUSTER: &str = "redis+cluster";

/// Characters a cluster address may contain.
pub const CLUSTER_ADDRESS_PATTERN: &str = r"^[A-Za-z0-9+://@?&.,=_]+$";

/// Deployment shape named by the address scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topology {
    /// One server.
    Single,
    /// A master resolved through a sentinel set.
    Sentinel {
        /// Master group name.
        master: String,
    },
    /// A cluster reached through any of its seed nodes.
    Cluster,
}

/// Connection tuning carried in the address query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedisParams {
    /// Close idle connections after this long.
    pub idle_timeout: Option<Duration>,
    /// Retries of a failed command.
    pub max_retries: u32,
    /// Lower bound of the retry backoff.
    pub min_retry_backoff: Option<Duration>,
    /// Upper bound of the retry backoff.
    pub max_retry_backoff: Option<Duration>,
    /// Connect timeout.
    pub dial_timeout: Option<Duration>,
    /// Reply timeout.
    pub read_timeout: Option<Duration>,
    /// Send timeout.
    pub write_timeout: Option<Duration>,
    /// Reuse idle connections oldest first instead of newest first.
    pub pool_fifo: bool,
    /// Maximum open connections.
    pub pool_size: Option<usize>,
    /// Idle connections to keep warm.
    pub min_idle_conns: Option<usize>,
    /// Close connections older than this.
    pub max_conn_age: Option<Duration>,
    /// How long to wait for a free connection.
    pub pool_timeout: Option<Duration>,
    /// Interval between idle connection sweeps.
    pub idle_check_frequency: Option<Duration>,
    /// Codec name.
    pub codec: Option<String>,
}

/// A parsed Redis address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisAddress {
    /// Deployment shape.
    pub topology: Topology,
    /// `host:port` entries.
    pub hosts: Vec<String>,
    /// `user:pass` exactly as written (still percent-encoded).
    pub userinfo: Option<String>,
    /// Logical database.
    pub db: i64,
    /// Query parameters.
    pub params: RedisParams,
}

impl RedisAddress {
    /// Parses `address`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidAddress`] for malformed addresses and
    /// [`CacheError::UnknownParameters`] for unrecognized query keys.
    pub fn parse(address: &str) -> CacheResult<Self> {
        let (scheme, rest) = address
            .split_once("://")
            .ok_or_else(|| CacheError::invalid_address(address, "missing scheme"))?;

        if scheme == SCHEME_CLUSTER {
            let pattern = Regex::new(CLUSTER_ADDRESS_PATTERN)
                .map_err(|e| CacheError::invalid_address(address, e.to_string()))?;
            if !pattern.is_match(address) {
                return Err(CacheError::invalid_address(
                    address,
                    "cluster address contains unsupported characters",
                ));
            }
        }

        let (location, query) = rest.split_once('?').unwrap_or((rest, ""));
        let (userinfo, location) = match location.rsplit_once('@') {
            Some((userinfo, location)) => (Some(userinfo.to_string()), location),
            None => (None, location),
        };
        let (authority, path) = location.split_once('/').unwrap_or((location, ""));

        let hosts: Vec<String> = authority
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(with_default_port(scheme))
            .collect();
        if hosts.is_empty() {
            return Err(CacheError::invalid_address(address, "no hosts"));
        }

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let (topology, db) = match scheme {
            SCHEME_REDIS => {
                if hosts.len() != 1 {
                    return Err(CacheError::invalid_address(address, "expected exactly one host"));
                }
                (Topology::Single, parse_db(address, segments.first().copied())?)
            }
            SCHEME_SENTINEL => {
                let master = segments
                    .first()
                    .ok_or_else(|| CacheError::invalid_address(address, "missing master name"))?;
                (
                    Topology::Sentinel {
                        master: (*master).to_string(),
                    },
                    parse_db(address, segments.get(1).copied())?,
                )
            }
            SCHEME_CLUSTER => (Topology::Cluster, 0),
            other => {
                return Err(CacheError::UnknownScheme {
                    scheme: other.to_string(),
                })
            }
        };

        Ok(Self {
            topology,
            hosts,
            userinfo,
            db,
            params: parse_params(address, query)?,
        })
    }

    /// Builds a plain `redis://` URL for one host of this address.
    #[must_use]
    pub fn node_url(&self, host: &str, db: i64) -> String {
        match &self.userinfo {
            Some(userinfo) => format!("redis://{userinfo}@{host}/{db}"),
            None => format!("redis://{host}/{db}"),
        }
    }
}

fn with_default_port(scheme: &str) -> impl Fn(&str) -> String + '_ {
    move |host| {
        if host.contains(':') {
            host.to_string()
        } else if scheme == SCHEME_SENTINEL {
            format!("{host}:26379")
        } else {
            format!("{host}:6379")
        }
    }
}

fn parse_db(address: &str, segment: Option<&str>) -> CacheResult<i64> {
    segment.map_or(Ok(0), |s| {
        s.parse()
            .map_err(|_| CacheError::invalid_address(address, format!("invalid database '{s}'")))
    })
}

/// Parses a duration as integer seconds or with a `ms`/`s`/`m`/`h` suffix.
/// Non-positive values disable the setting.
fn parse_duration(address: &str, key: &str, value: &str) -> CacheResult<Option<Duration>> {
    let invalid = || CacheError::invalid_address(address, format!("invalid duration for {key}: '{value}'"));
    let (number, unit) = match value.find(|c: char| c.is_ascii_alphabetic()) {
        Some(split) => value.split_at(split),
        None => (value, "s"),
    };
    let amount: i64 = number.parse().map_err(|_| invalid())?;
    if amount <= 0 {
        return Ok(None);
    }
    let amount = amount.unsigned_abs();
    let duration = match unit {
        "ms" => Duration::from_millis(amount),
        "s" => Duration::from_secs(amount),
        "m" => Duration::from_secs(amount * 60),
        "h" => Duration::from_secs(amount * 3600),
        _ => return Err(invalid()),
    };
    Ok(Some(duration))
}

fn parse_count(address: &str, key: &str, value: &str) -> CacheResult<Option<usize>> {
    let amount: i64 = value.parse().map_err(|_| {
        CacheError::invalid_address(address, format!("invalid integer for {key}: '{value}'"))
    })?;
    Ok(usize::try_from(amount).ok().filter(|n| *n > 0))
}

fn parse_params(address: &str, query: &str) -> CacheResult<RedisParams> {
    let mut params = RedisParams::default();
    let mut unknown = BTreeSet::new();

    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        let value = value.as_ref();
        match key.as_ref() {
            "idle_timeout_seconds" | "idle_timeout" => {
                params.idle_timeout = parse_duration(address, &key, value)?;
            }
            "max_retries" => {
                params.max_retries = parse_count(address, &key, value)?
                    .and_then(|n| u32::try_from(n).ok())
                    .unwrap_or(0);
            }
            "min_retry_backoff" => params.min_retry_backoff = parse_duration(address, &key, value)?,
            "max_retry_backoff" => params.max_retry_backoff = parse_duration(address, &key, value)?,
            "dial_timeout" => params.dial_timeout = parse_duration(address, &key, value)?,
            "read_timeout" => params.read_timeout = parse_duration(address, &key, value)?,
            "write_timeout" => params.write_timeout = parse_duration(address, &key, value)?,
            "pool_fifo" => {
                params.pool_fifo = value.parse().map_err(|_| {
                    CacheError::invalid_address(address, format!("invalid boolean for pool_fifo: '{value}'"))
                })?;
            }
            "pool_size" => params.pool_size = parse_count(address, &key, value)?,
            "min_idle_conns" => params.min_idle_conns = parse_count(address, &key, value)?,
            "max_conn_age" => params.max_conn_age = parse_duration(address, &key, value)?,
            "pool_timeout" => params.pool_timeout = parse_duration(address, &key, value)?,
            "idle_check_frequency" => {
                params.idle_check_frequency = parse_duration(address, &key, value)?;
            }
            "codec" => params.codec = Some(value.to_string()),
            other => {
                unknown.insert(other.to_string());
            }
        }
    }

    if !unknown.is_empty() {
        return Err(CacheError::UnknownParameters {
            names: unknown.into_iter().collect(),
        });
    }
    Ok(params)
}
