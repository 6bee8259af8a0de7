//! Bounded worker pool.
//!
//! Items are fed through a task queue whose capacity equals the worker count
//! and are drained by exactly that many spawned workers, so at most N items are
//! in flight. Each worker sends one [`BatchOutcome`] per item back over a
//! result channel owned by the single collector that holds the
//! [`OutcomeStream`].

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error};

use threadvault_shared::{BatchOutcome, WorkItem};

/// Display name used when an item's handler panics.
pub trait Labeled {
    fn label(&self) -> String;
}

impl Labeled for WorkItem {
    fn label(&self) -> String {
        self.title.clone()
    }
}

/// Fixed-size pool of async workers.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    /// A pool of `workers` workers. Zero is treated as one.
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Start processing `items` with `handler` and return the outcome stream.
    ///
    /// A handler that panics yields an error outcome for its item; the worker
    /// keeps going with the next item.
    pub fn spawn<T, F, Fut>(&self, items: Vec<T>, handler: F) -> OutcomeStream
    where
        T: Labeled + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = BatchOutcome> + Send + 'static,
    {
        let total = items.len();
        let (task_tx, task_rx) = mpsc::channel::<T>(self.workers);
        let (outcome_tx, outcome_rx) = mpsc::channel::<BatchOutcome>(self.workers);
        let task_rx = Arc::new(Mutex::new(task_rx));
        let handler = Arc::new(handler);

        let feeder = tokio::spawn(async move {
            for item in items {
                if task_tx.send(item).await.is_err() {
                    break;
                }
            }
        });

        let mut workers = JoinSet::new();
        for worker in 0..self.workers {
            let task_rx = task_rx.clone();
            let outcome_tx = outcome_tx.clone();
            let handler = handler.clone();

            workers.spawn(async move {
                loop {
                    let next = { task_rx.lock().await.recv().await };
                    let Some(item) = next else {
                        break;
                    };

                    let label = item.label();
                    let outcome = match tokio::spawn(handler(item)).await {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            error!(worker, item = %label, error = %e, "worker task failed");
                            BatchOutcome::error(label, format!("worker task failed: {e}"))
                        }
                    };

                    if outcome_tx.send(outcome).await.is_err() {
                        break;
                    }
                }
                debug!(worker, "worker finished");
            });
        }
        drop(outcome_tx);

        OutcomeStream {
            total,
            outcomes: outcome_rx,
            workers,
            feeder,
        }
    }
}

/// Receiving end of a running pool.
pub struct OutcomeStream {
    total: usize,
    outcomes: mpsc::Receiver<BatchOutcome>,
    workers: JoinSet<()>,
    feeder: JoinHandle<()>,
}

impl OutcomeStream {
    /// Number of items submitted.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Next finished item, or `None` once every worker has exited.
    pub async fn next(&mut self) -> Option<BatchOutcome> {
        self.outcomes.recv().await
    }

    /// Wait for the feeder and all workers to exit.
    pub async fn join(mut self) {
        self.outcomes.close();
        while let Some(result) = self.workers.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "worker exited abnormally");
            }
        }
        if let Err(e) = self.feeder.await {
            error!(error = %e, "feeder exited abnormally");
        }
    }
}
