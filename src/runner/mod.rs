//! Bounded worker pool for bulk operations.
//!
//! Operations queue without blocking; draining starts a pool sized to the
//! batch, hands jobs to workers over a shared queue, and consumes exactly one
//! completion per queued operation before joining the workers. Completion
//! order across workers is not guaranteed and queued operations must not
//! depend on each other's side effects.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::warn;

use crate::ops::{OpError, OpOutcome, Operation};

/// Upper bound on concurrently running workers per drained batch.
pub const DEFAULT_PARALLELISM: usize = 4;

/// Executes queued operations concurrently and collects their results.
pub struct Runner {
    jobs: VecDeque<Operation>,
    parallelism: usize,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// Creates a runner with the default parallelism.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            jobs: VecDeque::new(),
            parallelism: DEFAULT_PARALLELISM,
        }
    }

    /// Overrides the worker bound. A batch never starts more workers than it
    /// has jobs, whatever the bound.
    #[must_use]
    pub const fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = if parallelism == 0 { 1 } else { parallelism };
        self
    }

    /// Enqueues one operation. Non-blocking.
    pub fn queue_op(&mut self, op: Operation) {
        self.jobs.push_back(op);
    }

    /// Number of operations queued since the last drain.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.jobs.len()
    }

    /// Runs the queued batch and returns only the successful outcomes, in
    /// completion order. Failed operations are consumed from the batch quota,
    /// logged, and dropped: callers relying on this method alone cannot
    /// distinguish an empty queue from a batch in which every operation
    /// failed. Use [`Runner::drain_detailed`] to observe per-item failures.
    pub async fn drain_results(&mut self) -> Vec<OpOutcome> {
        self.drain_labelled()
            .await
            .into_iter()
            .filter_map(|(label, result)| match result {
                Ok(outcome) => Some(outcome),
                Err(err) => {
                    warn!(op = %label, error = %err, "operation failed");
                    None
                }
            })
            .collect()
    }

    /// Runs the queued batch and returns every result, in completion order.
    pub async fn drain_detailed(&mut self) -> Vec<Result<OpOutcome, OpError>> {
        self.drain_labelled()
            .await
            .into_iter()
            .map(|(_, result)| result)
            .collect()
    }

    async fn drain_labelled(&mut self) -> Vec<(String, Result<OpOutcome, OpError>)> {
        let quota = self.jobs.len();
        if quota == 0 {
            return Vec::new();
        }

        let queue = Arc::new(Mutex::new(std::mem::take(&mut self.jobs)));
        let (tx, mut rx) = mpsc::channel(quota);

        let worker_count = self.parallelism.min(quota);
        let mut workers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let worker_queue = Arc::clone(&queue);
            let worker_tx = tx.clone();
            workers.push(tokio::spawn(async move {
                // Workers exit as soon as the shared queue runs dry; the
                // channel is sized to the batch so sends never block.
                loop {
                    let Some(op) = worker_queue.lock().await.pop_front() else {
                        return;
                    };
                    let label = op.label();
                    let result = op.run().await;
                    if worker_tx.send((label, result)).await.is_err() {
                        return;
                    }
                }
            }));
        }
        drop(tx);

        let mut results = Vec::with_capacity(quota);
        while results.len() < quota {
            match rx.recv().await {
                Some(entry) => results.push(entry),
                None => break,
            }
        }

        for worker in workers {
            worker.await.ok();
        }
        results
    }
}
