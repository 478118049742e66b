//! # Wharf Core
//!
//! Shared infrastructure for the wharf artifact and replication services:
//!
//! - [`Error`] / [`ErrorCode`] - coded errors with cause chains and the
//!   JSON error envelope ([`Errors`])
//! - [`retry`] - exponential backoff with jitter, timeout and abort
//! - [`KeyMutex`] - per-key async locking used by single-flight helpers
//! - [`Context`] - cancellation plus the optional transaction scope
//! - [`orm`] - SQLite pool, transaction scopes and post-commit hooks
//!
//! ## Example
//!
//! ```rust
//! use wharf_core::{is_kind, Error, ErrorCode};
//!
//! let err = Error::not_found("artifact 12 not found");
//! assert!(is_kind(&err, ErrorCode::NotFound));
//! assert_eq!(err.code().http_status(), 404);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod context;
pub mod error;
pub mod keymutex;
pub mod orm;
pub mod retry;


pub use context::Context;
pub use error::{is_kind, BoxError, Error, ErrorCode, Errors, Result};
pub use keymutex::{KeyMutex, KeyMutexGuard};
pub use orm::{conflict_error, with_transaction, Database};
