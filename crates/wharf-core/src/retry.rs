//! Retry with exponential backoff, jitter, timeout and abort.
//!
//! ```rust,no_run
//! use wharf_core::retry::{retry, RetryOptions};
//! use wharf_core::{Context, Error};
//!
//! # async fn example() -> Result<(), Error> {
//! let ctx = Context::new();
//! let value = retry(&ctx, &RetryOptions::default(), || async {
//!     Ok::<_, Error>(42)
//! })
//! .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::context::Context;
use crate::error::{Error, Result};

/// Default first sleep between attempts.
pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(100);

/// Default upper bound for a single sleep.
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(1);

/// Default overall deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const MULTIPLIER: u32 = 2;
const RANDOMIZATION_FACTOR: f64 = 0.5;

/// Callback invoked after each failed attempt with the error and the sleep
/// about to elapse.
pub type RetryCallback = Arc<dyn Fn(&Error, Duration) + Send + Sync>;

/// Options for [`retry`].
#[derive(Clone)]
pub struct RetryOptions {
    /// First sleep between attempts.
    pub initial_interval: Duration,
    /// Upper bound for the un-jittered sleep.
    pub max_interval: Duration,
    /// Overall deadline measured from the first attempt.
    pub timeout: Duration,
    /// When false every retry sleeps zero and only the timeout bounds the loop.
    pub backoff: bool,
    /// Optional per-failure callback.
    pub callback: Option<RetryCallback>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            max_interval: DEFAULT_MAX_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
            backoff: true,
            callback: None,
        }
    }
}

impl fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("initial_interval", &self.initial_interval)
            .field("max_interval", &self.max_interval)
            .field("timeout", &self.timeout)
            .field("backoff", &self.backoff)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

impl RetryOptions {
    /// Sets the first sleep.
    #[must_use]
    pub const fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Sets the sleep ceiling.
    #[must_use]
    pub const fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Sets the overall deadline.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Disables backoff sleeps.
    #[must_use]
    pub const fn without_backoff(mut self) -> Self {
        self.backoff = false;
        self
    }

    /// Installs a failure callback.
    #[must_use]
    pub fn with_callback(mut self, callback: impl Fn(&Error, Duration) + Send + Sync + 'static) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }
}

/// Marker wrapping a cause that must not be retried.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct Abort(Error);

impl Abort {
    pub(crate) fn into_inner(self) -> Error {
        self.0
    }
}

/// Marks `cause` as non-retryable. [`retry`] returns `cause` unchanged as
/// soon as an attempt fails with a value built by this function.
#[must_use]
pub fn abort(cause: impl Into<Error>) -> Error {
    let cause = cause.into();
    let code = cause.code();
    Error::new(code, "").with_cause(Abort(cause))
}

/// Cause attached to the error returned when the deadline elapses.
#[derive(Debug, thiserror::Error)]
pub struct RetryTimeout {
    #[source]
    last: Option<Error>,
}

impl fmt::Display for RetryTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.last {
            Some(last) => write!(f, "retry timeout: {last}"),
            None => f.write_str("retry timeout"),
        }
    }
}

/// Returns true when `err` was produced by [`retry`] giving up on its deadline.
#[must_use]
pub fn is_retry_timeout(err: &Error) -> bool {
    err.cause().is_some_and(|c| c.is::<RetryTimeout>())
}

fn retry_timeout(last: Option<Error>) -> Error {
    Error::unknown("").with_cause(RetryTimeout { last })
}

fn jittered(interval: Duration) -> Duration {
    let delta = RANDOMIZATION_FACTOR * interval.as_secs_f64();
    let low = interval.as_secs_f64() - delta;
    let high = interval.as_secs_f64() + delta;
    if high <= low {
        return interval;
    }
    Duration::from_secs_f64(rand::thread_rng().gen_range(low..high))
}

/// Invokes `f` until it succeeds, aborts, the deadline elapses or `ctx` is
/// cancelled.
///
/// # Errors
///
/// Returns the aborted cause unchanged, or an `UNKNOWN` error satisfying
/// [`is_retry_timeout`] that carries the last observed failure.
pub async fn retry<T, F, Fut>(ctx: &Context, options: &RetryOptions, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let deadline = Instant::now() + options.timeout;
    let mut interval = options.initial_interval;
    let mut last = None;

    loop {
        let err = match f().await {
            Ok(value) => return Ok(value),
            Err(err) => match err.take_abort() {
                Ok(cause) => return Err(cause),
                Err(err) => err,
            },
        };

        let sleep = if options.backoff {
            jittered(interval)
        } else {
            Duration::ZERO
        };
        if let Some(callback) = &options.callback {
            callback(&err, sleep);
        }
        tracing::debug!(error = %err, sleep = ?sleep, "attempt failed, retrying");
        last = Some(err);

        if Instant::now() + sleep >= deadline {
            break;
        }
        tokio::select! {
            () = tokio::time::sleep(sleep) => {}
            () = ctx.cancelled() => break,
        }
        interval = (interval * MULTIPLIER).min(options.max_interval);
    }

    Err(retry_timeout(last))
}
