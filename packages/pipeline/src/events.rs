//! Job lifecycle events.
//!
//! These events represent facts about the job lifecycle, not commands.
//! Queues emit them to an [`EventSink`] so failures and progress are
//! observable without the caller being notified synchronously.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A fact about one job's lifecycle inside a named queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobEvent {
    /// A job entered the waiting set.
    Enqueued {
        queue: String,
        job_id: Uuid,
        delay_ms: u64,
    },

    /// A worker picked the job up and the handler is running.
    Started {
        queue: String,
        job_id: Uuid,
        attempt: u32,
    },

    /// Handler returned Ok.
    Succeeded {
        queue: String,
        job_id: Uuid,
        attempt: u32,
        duration_ms: u64,
    },

    /// Handler failed.
    Failed {
        queue: String,
        job_id: Uuid,
        attempt: u32,
        error: String,
        will_retry: bool,
    },

    /// Retry budget exhausted (or failure was non-retryable); the job will
    /// never run again.
    DeadLettered {
        queue: String,
        job_id: Uuid,
        total_attempts: u32,
        final_error: String,
    },
}

/// Sink for job lifecycle events.
///
/// Implementations must be cheap and non-blocking; queues emit events from
/// their worker loops.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: JobEvent);
}

/// Default sink: forwards every event to `tracing` with structured fields.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: JobEvent) {
        match &event {
            JobEvent::Enqueued {
                queue,
                job_id,
                delay_ms,
            } => {
                tracing::debug!(queue = %queue, job_id = %job_id, delay_ms, "job enqueued");
            }
            JobEvent::Started {
                queue,
                job_id,
                attempt,
            } => {
                tracing::debug!(queue = %queue, job_id = %job_id, attempt, "job started");
            }
            JobEvent::Succeeded {
                queue,
                job_id,
                attempt,
                duration_ms,
            } => {
                tracing::info!(queue = %queue, job_id = %job_id, attempt, duration_ms, "job succeeded");
            }
            JobEvent::Failed {
                queue,
                job_id,
                attempt,
                error,
                will_retry,
            } => {
                tracing::warn!(
                    queue = %queue,
                    job_id = %job_id,
                    attempt,
                    error = %error,
                    will_retry,
                    "job failed"
                );
            }
            JobEvent::DeadLettered {
                queue,
                job_id,
                total_attempts,
                final_error,
            } => {
                tracing::error!(
                    queue = %queue,
                    job_id = %job_id,
                    total_attempts,
                    error = %final_error,
                    "job dead-lettered"
                );
            }
        }
    }
}
