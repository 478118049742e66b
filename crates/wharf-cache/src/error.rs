//! Error types for cache operations.

use thiserror::Error;
use wharf_core::{Error as CoreError, ErrorCode};

/// Result alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur while talking to a cache backend.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The key is absent or expired.
    #[error("key not found in cache")]
    NotFound,

    /// A value could not be represented by the selected codec.
    #[error("bad value: {message}")]
    BadValue {
        /// Error message.
        message: String,
    },

    /// The cache address could not be understood.
    #[error("invalid cache address {address}: {message}")]
    InvalidAddress {
        /// Address as given.
        address: String,
        /// Error message.
        message: String,
    },

    /// The address carried query parameters no backend understands.
    #[error("unsupported cache query parameters: {}", .names.join(", "))]
    UnknownParameters {
        /// Offending parameter names, sorted.
        names: Vec<String>,
    },

    /// No factory is registered for the address scheme.
    #[error("no cache registered for scheme '{scheme}'")]
    UnknownScheme {
        /// Scheme of the address.
        scheme: String,
    },

    /// No codec is registered under the name.
    #[error("codec '{name}' is not registered")]
    UnknownCodec {
        /// Codec name.
        name: String,
    },

    /// Stored bytes could not be decoded.
    #[error("failed to decode cached value: {message}")]
    Decode {
        /// Error message.
        message: String,
    },

    /// No pooled connection became available in time.
    #[error("timed out waiting for a connection from pool '{pool}'")]
    PoolTimeout {
        /// Pool name.
        pool: String,
    },

    /// The backend answered with something unexpected.
    #[error("unexpected reply from cache backend: {message}")]
    Protocol {
        /// Error message.
        message: String,
    },

    /// Error returned by the Redis client.
    #[error("redis error: {source}")]
    Redis {
        /// Underlying error.
        #[source]
        source: redis::RedisError,
    },
}

impl CacheError {
    /// Returns true for a cache miss.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    pub(crate) fn bad_value(message: impl Into<String>) -> Self {
        Self::BadValue {
            message: message.into(),
        }
    }

    pub(crate) fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_address(address: &str, message: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.to_string(),
            message: message.into(),
        }
    }

    const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound => ErrorCode::NotFound,
            Self::BadValue { .. }
            | Self::InvalidAddress { .. }
            | Self::UnknownParameters { .. }
            | Self::UnknownScheme { .. }
            | Self::UnknownCodec { .. } => ErrorCode::BadRequest,
            Self::Decode { .. }
            | Self::PoolTimeout { .. }
            | Self::Protocol { .. }
            | Self::Redis { .. } => ErrorCode::Unknown,
        }
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        Self::Redis { source: err }
    }
}

impl From<CacheError> for CoreError {
    fn from(err: CacheError) -> Self {
        let code = err.code();
        Self::new(code, "").with_cause(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_parameters_lists_names() {
        let err = CacheError::UnknownParameters {
            names: vec!["bogus".into(), "other".into()],
        };
        assert_eq!(err.to_string(), "unsupported cache query parameters: bogus, other");
    }

    #[test]
    fn test_core_conversion_keeps_message_and_code() {
        let core: CoreError = CacheError::UnknownScheme {
            scheme: "mongo".into(),
        }
        .into();
        assert!(core.is_code(ErrorCode::BadRequest));
        assert_eq!(core.to_string(), "no cache registered for scheme 'mongo'");
    }

    #[test]
    fn test_miss_is_distinct_from_other_failures() {
        assert!(CacheError::NotFound.is_not_found());
        assert!(!CacheError::bad_value("x").is_not_found());
    }
}
