//! Bounded concurrency for enrichment fetches.
//!
//! At most `limit` tasks submitted through one limiter run at once; the
//! rest wait in submission order (tokio's semaphore is fair) and start as
//! slots free up. Each task's result is independent: an `Err` from one
//! task is just that task's output.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::Semaphore;

#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl ConcurrencyLimiter {
    /// A limit of 0 is treated as 1.
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Tasks currently holding a slot.
    pub fn active(&self) -> usize {
        self.limit - self.semaphore.available_permits()
    }

    /// Wait for a slot, then run `f` to completion while holding it.
    pub async fn run<T, F, Fut>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        // The semaphore is never closed, so acquire cannot fail.
        let _permit = self.semaphore.acquire().await.ok();
        f().await
    }

    /// Run every task through the limiter; results come back in input order.
    pub async fn run_all<T, F, Fut, I>(&self, tasks: I) -> Vec<T>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        join_all(tasks.into_iter().map(|task| self.run(task))).await
    }
}
