//! Error types for adapter operations.

use thiserror::Error;
use wharf_core::ErrorCode;
use wharf_registry::RegistryError;

/// Errors raised while talking to a remote registry's management API.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Distribution API failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Provider API answered with an unexpected status.
    #[error("{operation} failed with {status}: {body}")]
    Http {
        /// What was attempted.
        operation: String,
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The provider kept answering `429`.
    #[error("rate limited: {message}")]
    RateLimited {
        /// Error message.
        message: String,
    },

    /// A resource handed to the adapter is incomplete or malformed.
    #[error("invalid resource: {message}")]
    InvalidResource {
        /// Error message.
        message: String,
    },

    /// A filter pattern does not compile.
    #[error("invalid pattern {pattern}: {message}")]
    InvalidPattern {
        /// The pattern.
        pattern: String,
        /// Error message.
        message: String,
    },

    /// The operation is not offered by this provider.
    #[error("{operation} is not supported by {registry_type}")]
    Unsupported {
        /// What was attempted.
        operation: String,
        /// Registry type tag.
        registry_type: String,
    },

    /// Transport failure.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Response body could not be decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AdapterError {
    pub(crate) fn http(operation: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self::Http {
            operation: operation.into(),
            status,
            body: body.into(),
        }
    }

    pub(crate) fn invalid_resource(message: impl Into<String>) -> Self {
        Self::InvalidResource {
            message: message.into(),
        }
    }

    /// Returns the error code this failure surfaces as.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Registry(err) => err.code(),
            Self::Http { status, .. } => match *status {
                400 => ErrorCode::BadRequest,
                401 => ErrorCode::Unauthorized,
                403 => ErrorCode::Forbidden,
                404 => ErrorCode::NotFound,
                409 => ErrorCode::Conflict,
                412 => ErrorCode::Precondition,
                _ => ErrorCode::Unknown,
            },
            Self::InvalidResource { .. } | Self::InvalidPattern { .. } | Self::Unsupported { .. } => {
                ErrorCode::BadRequest
            }
            Self::RateLimited { .. } | Self::Request(_) | Self::Json(_) => ErrorCode::Unknown,
        }
    }
}

impl From<AdapterError> for wharf_core::Error {
    fn from(err: AdapterError) -> Self {
        let code = err.code();
        Self::wrap(err).with_code(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_codes() {
        assert_eq!(AdapterError::http("list", 404, "").code(), ErrorCode::NotFound);
        assert_eq!(AdapterError::http("create", 409, "").code(), ErrorCode::Conflict);
        assert_eq!(AdapterError::http("list", 502, "").code(), ErrorCode::Unknown);
    }

    #[test]
    fn test_registry_code_passes_through() {
        let err = AdapterError::from(RegistryError::NotFound {
            what: "manifest a:b".into(),
        });
        assert_eq!(err.code(), ErrorCode::NotFound);
        let core: wharf_core::Error = err.into();
        assert!(core.is_code(ErrorCode::NotFound));
        assert_eq!(core.to_string(), "manifest a:b not found");
    }
}
