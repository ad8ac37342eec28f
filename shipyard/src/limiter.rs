//! Bounded concurrency limiter
//!
//! Runs submitted units of work with at most `max_concurrent` in flight.
//! Waiting tasks are admitted in submission order (the semaphore is fair).
//! A failing task never cancels its siblings: every task runs to completion
//! and every outcome is returned, in submission order.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::join_all;
use tokio::sync::Semaphore;

/// Concurrency-bounded task runner
#[derive(Debug, Clone, Copy)]
pub struct BoundedLimiter {
    max_concurrent: usize,
}

impl BoundedLimiter {
    /// Create a limiter. A cap of zero is treated as one.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Get the concurrency cap
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Run all tasks and collect their outcomes.
    ///
    /// `on_progress(completed, total)` is invoked after each task settles,
    /// whether it succeeded or failed.
    pub async fn submit<F, Fut, T, E, P>(&self, tasks: Vec<F>, on_progress: P) -> Vec<Result<T, E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(usize, usize),
    {
        let total = tasks.len();
        if total == 0 {
            return Vec::new();
        }

        let semaphore = Semaphore::new(self.max_concurrent);
        let completed = AtomicUsize::new(0);

        let runs = tasks.into_iter().map(|task| {
            let semaphore = &semaphore;
            let completed = &completed;
            let on_progress = &on_progress;
            async move {
                // The semaphore is never closed, so acquisition cannot fail.
                let _permit = semaphore.acquire().await;
                let result = task().await;
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                on_progress(done, total);
                result
            }
        });

        join_all(runs).await
    }
}

/// Split settled outcomes into successes, or the first failure in submission order.
pub fn collect_settled<T, E>(results: Vec<Result<T, E>>) -> Result<Vec<T>, E> {
    results.into_iter().collect()
}
