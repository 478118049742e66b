//! Coded error values shared by every wharf crate.
//!
//! Every surface-level failure carries one of a closed set of
//! [`ErrorCode`]s, a human readable message and an optional cause chain.
//! Upstream policy (HTTP status mapping, cache-miss handling, conflict
//! detection) is driven by [`is_kind`] rather than by matching messages.

use std::fmt;

use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};

/// Result type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed cause carried by an [`Error`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The closed set of error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The requested resource does not exist.
    NotFound,
    /// The operation conflicts with existing state (duplicates, live references).
    Conflict,
    /// The caller is not authenticated.
    Unauthorized,
    /// The request is malformed or names an unsupported option.
    BadRequest,
    /// The caller is authenticated but not allowed.
    Forbidden,
    /// A precondition of the operation does not hold.
    Precondition,
    /// Anything else.
    Unknown,
}

impl ErrorCode {
    /// Returns the wire representation of the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::BadRequest => "BAD_REQUEST",
            Self::Forbidden => "FORBIDDEN",
            Self::Precondition => "PRECONDITION",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Returns the HTTP status an API layer reports for this code.
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Unauthorized => 401,
            Self::BadRequest => 400,
            Self::Forbidden => 403,
            Self::Precondition => 412,
            Self::Unknown => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A coded error with an optional cause chain.
pub struct Error {
    code: ErrorCode,
    message: String,
    detail: Option<serde_json::Value>,
    cause: Option<BoxError>,
}

impl Error {
    /// Creates an error with the given code and message and no cause.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
            cause: None,
        }
    }

    /// Wraps an arbitrary error.
    ///
    /// Wrapping is idempotent: if `cause` already is an [`Error`] it is
    /// returned unchanged instead of being nested a second time.
    #[must_use]
    pub fn wrap(cause: impl Into<BoxError>) -> Self {
        match cause.into().downcast::<Self>() {
            Ok(err) => *err,
            Err(other) => Self {
                code: ErrorCode::Unknown,
                message: String::new(),
                detail: None,
                cause: Some(other),
            },
        }
    }

    /// Creates a `NOT_FOUND` error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Creates a `CONFLICT` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    /// Creates an `UNAUTHORIZED` error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    /// Creates a `BAD_REQUEST` error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    /// Creates a `FORBIDDEN` error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    /// Creates a `PRECONDITION` error.
    #[must_use]
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Precondition, message)
    }

    /// Creates an `UNKNOWN` error.
    #[must_use]
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unknown, message)
    }

    /// Replaces the code.
    #[must_use]
    pub const fn with_code(mut self, code: ErrorCode) -> Self {
        self.code = code;
        self
    }

    /// Replaces the message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Attaches a structured detail rendered in the API envelope.
    #[must_use]
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Attaches a cause, keeping code and message.
    #[must_use]
    pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Returns the code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        self.code
    }

    /// Returns the message set on this value (without the cause chain).
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the structured detail, if any.
    #[must_use]
    pub const fn detail(&self) -> Option<&serde_json::Value> {
        self.detail.as_ref()
    }

    /// Returns true when this value carries `code`.
    #[must_use]
    pub fn is_code(&self, code: ErrorCode) -> bool {
        self.code == code
    }

    /// Returns the direct cause as a dynamic error.
    #[must_use]
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    /// Returns true when some error in the cause chain is a `T`.
    #[must_use]
    pub fn chain_contains<T: std::error::Error + 'static>(&self) -> bool {
        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(self);
        while let Some(err) = current {
            if err.is::<T>() {
                return true;
            }
            current = err.source();
        }
        false
    }

    /// Splits off the innermost [`crate::retry::Abort`] marker, if the
    /// chain holds one, returning the aborted cause.
    pub(crate) fn take_abort(self) -> std::result::Result<Self, Self> {
        let Self {
            code,
            message,
            detail,
            cause,
        } = self;
        let rebuild = |cause: Option<BoxError>| Self {
            code,
            message,
            detail,
            cause,
        };
        let Some(cause) = cause else {
            return Err(rebuild(None));
        };
        match cause.downcast::<crate::retry::Abort>() {
            Ok(abort) => Ok(abort.into_inner()),
            Err(cause) => match cause.downcast::<Self>() {
                Ok(inner) => match inner.take_abort() {
                    Ok(aborted) => Ok(aborted),
                    Err(inner) => Err(rebuild(Some(Box::new(inner)))),
                },
                Err(cause) => Err(rebuild(Some(cause))),
            },
        }
    }
}

/// Returns true when the top-level value of `err` is an [`Error`] carrying `code`.
#[must_use]
pub fn is_kind(err: &(dyn std::error::Error + 'static), code: ErrorCode) -> bool {
    err.downcast_ref::<Error>().is_some_and(|e| e.code == code)
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Error");
        s.field("code", &self.code).field("message", &self.message);
        if let Some(detail) = &self.detail {
            s.field("detail", detail);
        }
        if let Some(cause) = &self.cause {
            s.field("cause", cause);
        }
        s.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.message, &self.cause) {
            (m, Some(cause)) if m.is_empty() => write!(f, "{cause}"),
            (m, Some(cause)) => write!(f, "{m}: {cause}"),
            (m, None) if m.is_empty() => f.write_str(self.code.as_str()),
            (m, None) => f.write_str(m),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|c| c as &(dyn std::error::Error + 'static))
    }
}

impl Serialize for Error {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let fields = if self.detail.is_some() { 3 } else { 2 };
        let mut s = serializer.serialize_struct("Error", fields)?;
        s.serialize_field("code", &self.code)?;
        s.serialize_field("message", &self.to_string())?;
        if let Some(detail) = &self.detail {
            s.serialize_field("detail", detail)?;
        }
        s.end()
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::wrap(err).with_code(ErrorCode::BadRequest)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        let code = if err.kind() == std::io::ErrorKind::NotFound {
            ErrorCode::NotFound
        } else {
            ErrorCode::Unknown
        };
        Self::wrap(err).with_code(code)
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        let code = match &err {
            sqlx::Error::RowNotFound => ErrorCode::NotFound,
            sqlx::Error::Database(db)
                if db.is_unique_violation() || db.is_foreign_key_violation() =>
            {
                ErrorCode::Conflict
            }
            _ => ErrorCode::Unknown,
        };
        Self::wrap(err).with_code(code)
    }
}

/// Aggregates several failures; serializes as the API error envelope
/// `{"errors":[{"code":..,"message":..}]}`.
#[derive(Debug, Default)]
pub struct Errors(Vec<Error>);

impl Errors {
    /// Creates an empty aggregate.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Adds a failure.
    pub fn push(&mut self, err: impl Into<BoxError>) {
        self.0.push(Error::wrap(err));
    }

    /// Number of aggregated failures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when nothing was aggregated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates the aggregated failures.
    pub fn iter(&self) -> impl Iterator<Item = &Error> {
        self.0.iter()
    }

    /// Returns `Ok(())` when empty, otherwise `Err(self)`.
    ///
    /// # Errors
    ///
    /// Returns the aggregate when it holds at least one failure.
    pub fn into_result(self) -> std::result::Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl FromIterator<Error> for Errors {
    fn from_iter<I: IntoIterator<Item = Error>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<Error> for Errors {
    fn from(err: Error) -> Self {
        Self(vec![err])
    }
}

impl Serialize for Errors {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("errors", &self.0)?;
        map.end()
    }
}

impl fmt::Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => f.write_str("{\"errors\":[]}"),
        }
    }
}

impl std::error::Error for Errors {}

impl From<Errors> for Error {
    fn from(errs: Errors) -> Self {
        let code = match errs.0.as_slice() {
            [single] => single.code,
            _ => ErrorCode::Unknown,
        };
        Self::wrap(errs).with_code(code)
    }
}
