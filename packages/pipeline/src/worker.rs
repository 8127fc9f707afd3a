//! Worker pools that bind a queue to a processing function.
//!
//! A pool is `concurrency` tokio tasks looping over
//! [`WorkQueue::next_ready`], so no more than `concurrency` jobs from the
//! queue are active at once. Handler errors never escape the loop: they are
//! classified, retried via the queue's policy, and finally routed through the
//! handler's terminal-failure hook.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{classify_error, ErrorKind};
use crate::queue::{FailDisposition, WorkQueue};

/// Processing function for one queue's payload type.
#[async_trait]
pub trait JobHandler<T>: Send + Sync {
    /// Run one attempt of a job. An `Err` triggers the queue's retry policy.
    async fn handle(&self, payload: &T, attempt: u32) -> anyhow::Result<()>;

    /// Called once, after the final attempt of a job has failed. This is the
    /// only place a stage learns that one of its jobs is terminally dead, so
    /// stages use it to record the failure in the status store.
    async fn on_exhausted(&self, _payload: &T, _error: &anyhow::Error) {}

    /// Classify a failure for the retry decision.
    fn classify(&self, error: &anyhow::Error) -> ErrorKind {
        classify_error(error)
    }
}

/// Handle to one queue's spawned worker tasks.
pub struct WorkerPool {
    queue_name: String,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `concurrency` worker tasks over `queue`.
    pub fn spawn<T: Send + Sync + 'static>(
        queue: WorkQueue<T>,
        concurrency: usize,
        handler: Arc<dyn JobHandler<T>>,
    ) -> Self {
        let queue_name = queue.name().to_string();
        let handles = (0..concurrency)
            .map(|slot| {
                let queue = queue.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    run_worker(queue, handler, slot).await;
                })
            })
            .collect();

        info!(queue = %queue_name, concurrency, "worker pool started");
        Self {
            queue_name,
            handles,
        }
    }

    /// Wait for every worker task to exit (they exit when the queue closes).
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
        debug!(queue = %self.queue_name, "worker pool stopped");
    }
}

async fn run_worker<T: Send + Sync + 'static>(
    queue: WorkQueue<T>,
    handler: Arc<dyn JobHandler<T>>,
    slot: usize,
) {
    debug!(queue = %queue.name(), slot, "worker started");

    while let Some(job) = queue.next_ready().await {
        match handler.handle(&job.payload, job.attempt).await {
            Ok(()) => queue.complete(job),
            Err(error) => {
                let retryable = handler.classify(&error).should_retry();
                match queue.fail(job, &error, retryable) {
                    FailDisposition::Retrying { .. } => {}
                    FailDisposition::Exhausted(job) => {
                        handler.on_exhausted(&job.payload, &error).await;
                    }
                }
            }
        }
    }

    debug!(queue = %queue.name(), slot, "worker exiting");
}
