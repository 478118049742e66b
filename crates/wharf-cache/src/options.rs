//! Options shared by every cache backend.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::codec::{default_codec, Codec};

/// Default key prefix.
pub const DEFAULT_PREFIX: &str = "cache:";

/// Default backend address.
pub const DEFAULT_ADDRESS: &str = "memory://";

/// Options for a cache instance.
#[derive(Clone)]
pub struct CacheOptions {
    /// Driver URL, e.g. `redis://localhost:6379/0`.
    pub address: String,

    /// Value codec.
    pub codec: Arc<dyn Codec>,

    /// Prefix prepended to every key (default: `cache:`).
    pub prefix: String,

    /// TTL applied when a save does not pass one; `None` never expires.
    pub expiration: Option<Duration>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            codec: default_codec(),
            prefix: DEFAULT_PREFIX.to_string(),
            expiration: None,
        }
    }
}

impl fmt::Debug for CacheOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOptions")
            .field("address", &redact(&self.address))
            .field("codec", &self.codec.name())
            .field("prefix", &self.prefix)
            .field("expiration", &self.expiration)
            .finish()
    }
}

impl CacheOptions {
    /// Creates options for `address`.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    /// Sets the codec.
    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    /// Sets the key prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Sets the default TTL.
    #[must_use]
    pub const fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// Returns the backend key for `key`.
    #[must_use]
    pub fn key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    /// Strips the prefix from a backend key.
    #[must_use]
    pub fn strip<'a>(&self, key: &'a str) -> &'a str {
        key.strip_prefix(self.prefix.as_str()).unwrap_or(key)
    }

    /// Resolves the TTL for a save: the explicit one wins, zero disables.
    #[must_use]
    pub fn ttl(&self, expiration: Option<Duration>) -> Option<Duration> {
        expiration
            .or(self.expiration)
            .filter(|ttl| !ttl.is_zero())
    }
}

/// Hides the password of `user:pass@` in an address.
pub(crate) fn redact(address: &str) -> String {
    let Some((scheme, rest)) = address.split_once("://") else {
        return address.to_string();
    };
    match rest.rsplit_once('@') {
        Some((userinfo, hosts)) => {
            let user = userinfo.split_once(':').map_or(userinfo, |(user, _)| user);
            format!("{scheme}://{user}:***@{hosts}")
        }
        None => address.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = CacheOptions::default();
        assert_eq!(opts.address, "memory://");
        assert_eq!(opts.prefix, "cache:");
        assert_eq!(opts.codec.name(), "msgpack");
        assert!(opts.expiration.is_none());
    }

    #[test]
    fn test_key_and_strip() {
        let opts = CacheOptions::default();
        assert_eq!(opts.key("artifact:id:1"), "cache:artifact:id:1");
        assert_eq!(opts.strip("cache:artifact:id:1"), "artifact:id:1");
        assert_eq!(opts.strip("other"), "other");
    }

    #[test]
    fn test_ttl_resolution() {
        let opts = CacheOptions::default().with_expiration(Duration::from_secs(60));
        assert_eq!(opts.ttl(None), Some(Duration::from_secs(60)));
        assert_eq!(
            opts.ttl(Some(Duration::from_secs(5))),
            Some(Duration::from_secs(5))
        );
        assert_eq!(opts.ttl(Some(Duration::ZERO)), None);
        assert_eq!(CacheOptions::default().ttl(None), None);
    }

    #[test]
    fn test_redact_password() {
        assert_eq!(
            redact("redis+sentinel://admin:secret@s1:26379,s2:26379/mymaster/0"),
            "redis+sentinel://admin:***@s1:26379,s2:26379/mymaster/0"
        );
        assert_eq!(redact("redis://host:6379/0"), "redis://host:6379/0");
    }
}
