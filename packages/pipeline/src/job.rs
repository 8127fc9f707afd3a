//! Job model for queued work.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Priority of a queued job. Lower `as_i16` value wins the dequeue race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Critical,
    High,
    #[default]
    Normal,
    Low,
}

impl JobPriority {
    /// Convert to integer for ordering (lower = higher priority)
    pub fn as_i16(&self) -> i16 {
        match self {
            JobPriority::Critical => 0,
            JobPriority::High => 1,
            JobPriority::Normal => 2,
            JobPriority::Low => 3,
        }
    }
}

/// Lifecycle state of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for a worker (including backoff delay before a retry).
    Waiting,
    /// Picked up by a worker, handler running.
    Active,
    /// Handler returned Ok.
    Completed,
    /// Handler failed with attempts remaining; re-queued after backoff.
    FailedRetryable,
    /// Retry budget exhausted. Retained for inspection, never retried.
    FailedTerminal,
}

/// Retry policy for a queue: bounded attempts with exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first (1 = no retries).
    pub max_attempts: u32,
    /// Backoff base; the delay before attempt `n+1` is `base * 2^(n-1)`.
    pub base_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay to apply before re-running a job that just failed its `attempt`-th try.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << shift);
        delay.min(self.max_delay)
    }
}

/// A unit of work owned by a [`WorkQueue`](crate::queue::WorkQueue).
///
/// Jobs are private to their queue: everything outside observes them through
/// lifecycle events, queue stats, and whatever the handler writes to the
/// status store.
#[derive(Debug)]
pub struct QueuedJob<T> {
    pub id: Uuid,
    pub payload: T,
    /// 1-based; incremented on every retry.
    pub attempt: u32,
    pub priority: JobPriority,
    pub enqueued_at: DateTime<Utc>,
    /// FIFO tiebreaker among equal priorities.
    pub(crate) seq: u64,
    /// Not eligible for dequeue before this instant (enqueue delay or backoff).
    pub(crate) eligible_at: tokio::time::Instant,
    pub(crate) started_at: Option<tokio::time::Instant>,
}

impl<T> QueuedJob<T> {
    pub(crate) fn new(payload: T, priority: JobPriority, delay: Duration, seq: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            attempt: 1,
            priority,
            enqueued_at: Utc::now(),
            seq,
            eligible_at: tokio::time::Instant::now() + delay,
            started_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering() {
        assert!(JobPriority::Critical.as_i16() < JobPriority::High.as_i16());
        assert!(JobPriority::High.as_i16() < JobPriority::Normal.as_i16());
        assert!(JobPriority::Normal.as_i16() < JobPriority::Low.as_i16());
        assert_eq!(JobPriority::default(), JobPriority::Normal);
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        };

        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        };

        assert_eq!(policy.delay_for(8), Duration::from_secs(5));
        // Large attempt counts must not overflow the shift.
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn new_job_starts_at_attempt_one() {
        let job = QueuedJob::new("payload", JobPriority::Normal, Duration::ZERO, 0);
        assert_eq!(job.attempt, 1);
        assert!(job.started_at.is_none());
    }
}
