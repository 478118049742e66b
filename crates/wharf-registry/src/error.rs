//! Error types for registry operations.

use thiserror::Error;
use wharf_core::ErrorCode;

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Failed to connect to registry.
    #[error("failed to connect to registry at {url}: {source}")]
    ConnectionFailed {
        /// Registry URL.
        url: String,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// Credentials were missing or rejected.
    #[error("unauthorized: {message}")]
    Unauthorized {
        /// Error message.
        message: String,
    },

    /// Credentials lack permission for the operation.
    #[error("forbidden: {message}")]
    Forbidden {
        /// Error message.
        message: String,
    },

    /// Repository, manifest or blob not found.
    #[error("{what} not found")]
    NotFound {
        /// What was looked up.
        what: String,
    },

    /// HTTP error from registry.
    #[error("registry returned {status}: {message}")]
    HttpError {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
    },

    /// Transport failure other than connecting.
    #[error("request failed: {source}")]
    Request {
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {source}")]
    JsonError {
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// Invalid URL.
    #[error("invalid URL {url}: {message}")]
    InvalidUrl {
        /// URL string.
        url: String,
        /// What is wrong with it.
        message: String,
    },

    /// A `WWW-Authenticate` challenge could not be answered.
    #[error("token service error: {message}")]
    TokenService {
        /// Error message.
        message: String,
    },

    /// Blob upload or mount failed.
    #[error("failed to upload blob: {message}")]
    UploadFailed {
        /// Error message.
        message: String,
    },

    /// Pulled content does not match its digest.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// Expected digest.
        expected: String,
        /// Computed digest.
        actual: String,
    },
}

impl RegistryError {
    /// Returns true for a missing repository, manifest or blob.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns the error code this failure surfaces as.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::Unauthorized { .. } | Self::TokenService { .. } => ErrorCode::Unauthorized,
            Self::Forbidden { .. } => ErrorCode::Forbidden,
            Self::InvalidUrl { .. } | Self::DigestMismatch { .. } => ErrorCode::BadRequest,
            Self::HttpError { status, .. } => match *status {
                400 => ErrorCode::BadRequest,
                409 => ErrorCode::Conflict,
                412 => ErrorCode::Precondition,
                _ => ErrorCode::Unknown,
            },
            _ => ErrorCode::Unknown,
        }
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            Self::ConnectionFailed {
                url: err
                    .url()
                    .map_or_else(|| "unknown".to_string(), ToString::to_string),
                source: err,
            }
        } else if err.is_status() {
            let status = err.status().map_or(0, |s| s.as_u16());
            Self::HttpError {
                status,
                message: err.to_string(),
            }
        } else {
            Self::Request { source: err }
        }
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError { source: err }
    }
}

impl From<RegistryError> for wharf_core::Error {
    fn from(err: RegistryError) -> Self {
        let code = err.code();
        Self::wrap(err).with_code(code)
    }
}
