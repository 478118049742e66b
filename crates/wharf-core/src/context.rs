//! Operation context passed explicitly to every cache, DAO and adapter call.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::orm::Transaction;

/// Cancellation-capable context, optionally scoped to a database transaction.
///
/// Cloning is cheap; clones share cancellation and transaction state.
#[derive(Clone, Default)]
pub struct Context {
    cancel: CancellationToken,
    transaction: Option<Arc<Transaction>>,
}

impl Context {
    /// Creates a root context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context whose cancellation follows `self` but can also be
    /// cancelled on its own.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            transaction: self.transaction.clone(),
        }
    }

    /// Cancels this context and every child.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns true once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the context is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Returns the transaction this context is scoped to, if any.
    #[must_use]
    pub fn transaction(&self) -> Option<&Arc<Transaction>> {
        self.transaction.as_ref()
    }

    /// Returns true while inside a transaction that has not committed yet.
    #[must_use]
    pub fn in_uncommitted_transaction(&self) -> bool {
        self.transaction.as_ref().is_some_and(|tx| !tx.is_committed())
    }

    pub(crate) fn with_transaction(&self, transaction: Arc<Transaction>) -> Self {
        Self {
            cancel: self.cancel.clone(),
            transaction: Some(transaction),
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.is_cancelled())
            .field("transaction", &self.transaction.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_follows_parent_cancellation() {
        let parent = Context::new();
        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_child_cancel_does_not_reach_parent() {
        let parent = Context::new();
        let child = parent.child();
        child.cancel();
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn test_root_is_not_transactional() {
        let ctx = Context::new();
        assert!(ctx.transaction().is_none());
        assert!(!ctx.in_uncommitted_transaction());
    }
}
