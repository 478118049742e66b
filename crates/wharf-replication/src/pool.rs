//! Bounded concurrency for bulk outbound calls.

use std::future::Future;

use futures::stream::{self, StreamExt, TryStreamExt};

/// Outbound calls an adapter keeps in flight by default.
pub const MAX_CONCURRENCY: usize = 100;

/// Runs tasks with at most `limit` in flight.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    limit: usize,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(MAX_CONCURRENCY)
    }
}

impl WorkerPool {
    /// Creates a pool; a zero limit is raised to one.
    #[must_use]
    pub const fn new(limit: usize) -> Self {
        Self {
            limit: if limit == 0 { 1 } else { limit },
        }
    }

    /// Concurrency limit.
    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Runs `task` for every input and gathers the outputs once all have
    /// finished. Output order is unspecified. The first failure stops
    /// scheduling and drops the tasks still running.
    ///
    /// # Errors
    ///
    /// Returns the first task error.
    pub async fn run<I, T, E, F, Fut>(&self, inputs: I, task: F) -> Result<Vec<T>, E>
    where
        I: IntoIterator,
        F: FnMut(I::Item) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        stream::iter(inputs)
            .map(task)
            .buffer_unordered(self.limit)
            .try_collect()
            .await
    }
}
