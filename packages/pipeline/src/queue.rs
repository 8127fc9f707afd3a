//! In-process named work queue.
//!
//! A `WorkQueue<T>` owns a set of typed jobs: enqueue with optional delay and
//! priority, dequeue by worker pools, automatic retry with exponential
//! backoff, and terminal disposition with a bounded retained history for
//! stats. Jobs never leave the queue except through their handler's effects;
//! coordination with the rest of the pipeline happens through the status
//! store and the event sink.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::events::{EventSink, JobEvent, TracingSink};
use crate::job::{JobPriority, JobState, QueuedJob, RetryPolicy};

/// Point-in-time counters for one queue.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueStats {
    pub waiting: usize,
    pub active: usize,
    pub completed_recent: usize,
    pub failed_recent: usize,
}

/// Options for [`WorkQueue::enqueue_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EnqueueOptions {
    /// Hold the job back for this long before it becomes eligible.
    pub delay: Duration,
    pub priority: JobPriority,
}

/// What happened to a job that just failed.
pub(crate) enum FailDisposition<T> {
    /// Re-queued; will become eligible after the backoff delay.
    Retrying { delay: Duration },
    /// Retry budget exhausted (or queue closed); job handed back so the
    /// worker can run the terminal-failure hook.
    Exhausted(QueuedJob<T>),
}

/// Terminal outcome retained for inspection, then pruned.
struct FinishedJob {
    state: JobState,
    finished_at: Instant,
}

struct QueueState<T> {
    waiting: Vec<QueuedJob<T>>,
    active: usize,
    finished: VecDeque<FinishedJob>,
    next_seq: u64,
    closed: bool,
}

struct QueueInner<T> {
    name: String,
    retry: RetryPolicy,
    retention: Duration,
    state: Mutex<QueueState<T>>,
    notify: Notify,
    sink: Arc<dyn EventSink>,
}

/// A durable-in-process, named channel of typed jobs.
pub struct WorkQueue<T> {
    inner: Arc<QueueInner<T>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send + 'static> WorkQueue<T> {
    pub fn new(name: impl Into<String>, retry: RetryPolicy, retention: Duration) -> Self {
        Self::with_sink(name, retry, retention, Arc::new(TracingSink))
    }

    pub fn with_sink(
        name: impl Into<String>,
        retry: RetryPolicy,
        retention: Duration,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                name: name.into(),
                retry,
                retention,
                state: Mutex::new(QueueState {
                    waiting: Vec::new(),
                    active: 0,
                    finished: VecDeque::new(),
                    next_seq: 0,
                    closed: false,
                }),
                notify: Notify::new(),
                sink,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Enqueue a job with default options. Never blocks the caller.
    pub fn enqueue(&self, payload: T) -> Result<Uuid, PipelineError> {
        self.enqueue_with(payload, EnqueueOptions::default())
    }

    /// Enqueue a job with an initial delay and/or priority.
    ///
    /// Fails only with [`PipelineError::QueueUnavailable`] once the queue has
    /// been closed.
    pub fn enqueue_with(&self, payload: T, options: EnqueueOptions) -> Result<Uuid, PipelineError> {
        let job_id;
        {
            let mut state = self.lock_state();
            if state.closed {
                return Err(PipelineError::QueueUnavailable {
                    queue: self.inner.name.clone(),
                });
            }
            let seq = state.next_seq;
            state.next_seq += 1;
            let job = QueuedJob::new(payload, options.priority, options.delay, seq);
            job_id = job.id;
            state.waiting.push(job);
        }
        self.inner.notify.notify_one();
        self.inner.sink.emit(JobEvent::Enqueued {
            queue: self.inner.name.clone(),
            job_id,
            delay_ms: options.delay.as_millis() as u64,
        });
        Ok(job_id)
    }

    /// Wait for the next eligible job and claim it.
    ///
    /// Returns `None` once the queue is closed; worker loops treat that as
    /// their shutdown signal. Among eligible jobs, higher priority wins and
    /// enqueue order breaks ties.
    pub(crate) async fn next_ready(&self) -> Option<QueuedJob<T>> {
        loop {
            // `Notified` only hears notify_waiters() once registered, so it
            // must be enabled before the closed check; a close() between the
            // check and the select would otherwise be missed and the worker
            // would sleep out the full timer.
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let sleep_for;
            {
                let mut state = self.lock_state();
                if state.closed {
                    return None;
                }
                let now = Instant::now();
                if let Some(idx) = pick_eligible(&state.waiting, now) {
                    let mut job = state.waiting.remove(idx);
                    job.started_at = Some(now);
                    state.active += 1;
                    let event = JobEvent::Started {
                        queue: self.inner.name.clone(),
                        job_id: job.id,
                        attempt: job.attempt,
                    };
                    drop(state);
                    self.inner.sink.emit(event);
                    return Some(job);
                }
                // Nothing eligible yet: sleep until the earliest backoff /
                // delay expires, or until something is enqueued.
                sleep_for = state
                    .waiting
                    .iter()
                    .map(|j| j.eligible_at.saturating_duration_since(now))
                    .min()
                    .unwrap_or(Duration::from_secs(3600));
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
    }

    /// Mark a claimed job as completed.
    pub(crate) fn complete(&self, job: QueuedJob<T>) {
        let duration_ms = job
            .started_at
            .map(|s| s.elapsed().as_millis() as u64)
            .unwrap_or(0);
        {
            let mut state = self.lock_state();
            state.active = state.active.saturating_sub(1);
            state.finished.push_back(FinishedJob {
                state: JobState::Completed,
                finished_at: Instant::now(),
            });
            prune_finished(&mut state.finished, self.inner.retention);
        }
        self.inner.sink.emit(JobEvent::Succeeded {
            queue: self.inner.name.clone(),
            job_id: job.id,
            attempt: job.attempt,
            duration_ms,
        });
    }

    /// Mark a claimed job as failed.
    ///
    /// While the retry budget lasts (and the failure is retryable), the job
    /// goes back to the waiting set with an exponential backoff delay and the
    /// same id. Otherwise it is dead-lettered and handed back to the caller.
    pub(crate) fn fail(
        &self,
        mut job: QueuedJob<T>,
        error: &anyhow::Error,
        retryable: bool,
    ) -> FailDisposition<T> {
        let retry = self.inner.retry;
        let mut state = self.lock_state();
        state.active = state.active.saturating_sub(1);

        if retryable && job.attempt < retry.max_attempts && !state.closed {
            let delay = retry.delay_for(job.attempt);
            let attempt = job.attempt;
            let job_id = job.id;
            job.attempt += 1;
            job.eligible_at = Instant::now() + delay;
            job.started_at = None;
            state.waiting.push(job);
            state.finished.push_back(FinishedJob {
                state: JobState::FailedRetryable,
                finished_at: Instant::now(),
            });
            prune_finished(&mut state.finished, self.inner.retention);
            drop(state);
            self.inner.notify.notify_one();
            self.inner.sink.emit(JobEvent::Failed {
                queue: self.inner.name.clone(),
                job_id,
                attempt,
                error: error.to_string(),
                will_retry: true,
            });
            FailDisposition::Retrying { delay }
        } else {
            state.finished.push_back(FinishedJob {
                state: JobState::FailedTerminal,
                finished_at: Instant::now(),
            });
            prune_finished(&mut state.finished, self.inner.retention);
            drop(state);
            self.inner.sink.emit(JobEvent::DeadLettered {
                queue: self.inner.name.clone(),
                job_id: job.id,
                total_attempts: job.attempt,
                final_error: error.to_string(),
            });
            FailDisposition::Exhausted(job)
        }
    }

    /// Counters for the health endpoint. Retryable failures count toward
    /// `failed_recent` so flapping handlers are visible before dead-lettering.
    pub fn stats(&self) -> QueueStats {
        let mut state = self.lock_state();
        prune_finished(&mut state.finished, self.inner.retention);
        let completed_recent = state
            .finished
            .iter()
            .filter(|f| f.state == JobState::Completed)
            .count();
        let failed_recent = state.finished.len() - completed_recent;
        QueueStats {
            waiting: state.waiting.len(),
            active: state.active,
            completed_recent,
            failed_recent,
        }
    }

    /// Close the queue: pending jobs are abandoned, in-flight handlers
    /// finish, subsequent enqueues fail with `QueueUnavailable`.
    pub fn close(&self) {
        {
            let mut state = self.lock_state();
            state.closed = true;
            state.waiting.clear();
        }
        self.inner.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, QueueState<T>> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Index of the best eligible job: highest priority first, FIFO within a
/// priority level.
fn pick_eligible<T>(waiting: &[QueuedJob<T>], now: Instant) -> Option<usize> {
    waiting
        .iter()
        .enumerate()
        .filter(|(_, j)| j.eligible_at <= now)
        .min_by_key(|(_, j)| (j.priority.as_i16(), j.seq))
        .map(|(idx, _)| idx)
}

fn prune_finished(finished: &mut VecDeque<FinishedJob>, retention: Duration) {
    let now = Instant::now();
    while let Some(front) = finished.front() {
        if now.saturating_duration_since(front.finished_at) > retention {
            finished.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_queue() -> WorkQueue<&'static str> {
        WorkQueue::new("test", RetryPolicy::default(), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn enqueue_then_dequeue() {
        let queue = test_queue();
        let id = queue.enqueue("a").unwrap();

        let job = queue.next_ready().await.unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.payload, "a");
        assert_eq!(job.attempt, 1);
        assert_eq!(queue.stats().active, 1);
    }

    #[tokio::test]
    async fn priority_beats_fifo() {
        let queue = test_queue();
        queue.enqueue("normal").unwrap();
        queue
            .enqueue_with(
                "high",
                EnqueueOptions {
                    priority: JobPriority::High,
                    ..Default::default()
                },
            )
            .unwrap();

        let first = queue.next_ready().await.unwrap();
        assert_eq!(first.payload, "high");
        let second = queue.next_ready().await.unwrap();
        assert_eq!(second.payload, "normal");
    }

    #[tokio::test]
    async fn fifo_within_priority() {
        let queue = test_queue();
        queue.enqueue("first").unwrap();
        queue.enqueue("second").unwrap();

        assert_eq!(queue.next_ready().await.unwrap().payload, "first");
        assert_eq!(queue.next_ready().await.unwrap().payload, "second");
    }

    #[tokio::test]
    async fn delayed_job_waits_for_eligibility() {
        let queue = test_queue();
        queue
            .enqueue_with(
                "later",
                EnqueueOptions {
                    delay: Duration::from_millis(50),
                    ..Default::default()
                },
            )
            .unwrap();

        let start = Instant::now();
        let job = queue.next_ready().await.unwrap();
        assert_eq!(job.payload, "later");
        assert!(start.elapsed() >= Duration::from_millis(45));
    }

    #[tokio::test]
    async fn failed_job_retries_with_incremented_attempt() {
        let queue = WorkQueue::new(
            "test",
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(50),
            },
            Duration::from_secs(60),
        );
        queue.enqueue("flaky").unwrap();

        let job = queue.next_ready().await.unwrap();
        let err = anyhow::anyhow!("transient");
        assert!(matches!(
            queue.fail(job, &err, true),
            FailDisposition::Retrying { .. }
        ));

        let retry = queue.next_ready().await.unwrap();
        assert_eq!(retry.attempt, 2);
    }

    #[tokio::test]
    async fn exhausted_job_is_dead_lettered() {
        let queue = WorkQueue::new(
            "test",
            RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(10),
            },
            Duration::from_secs(60),
        );
        queue.enqueue("doomed").unwrap();
        let err = anyhow::anyhow!("always fails");

        let job = queue.next_ready().await.unwrap();
        assert!(matches!(
            queue.fail(job, &err, true),
            FailDisposition::Retrying { .. }
        ));
        let job = queue.next_ready().await.unwrap();
        assert_eq!(job.attempt, 2);
        match queue.fail(job, &err, true) {
            FailDisposition::Exhausted(job) => assert_eq!(job.attempt, 2),
            FailDisposition::Retrying { .. } => panic!("expected dead letter"),
        }

        let stats = queue.stats();
        assert_eq!(stats.waiting, 0);
        assert_eq!(stats.failed_recent, 2);
    }

    #[tokio::test]
    async fn non_retryable_failure_skips_retries() {
        let queue = test_queue();
        queue.enqueue("bad input").unwrap();

        let job = queue.next_ready().await.unwrap();
        let err = anyhow::anyhow!("invalid domain");
        assert!(matches!(
            queue.fail(job, &err, false),
            FailDisposition::Exhausted(_)
        ));
    }

    #[tokio::test]
    async fn closed_queue_rejects_enqueue() {
        let queue = test_queue();
        queue.close();

        let err = queue.enqueue("late").unwrap_err();
        assert!(matches!(err, PipelineError::QueueUnavailable { .. }));
        assert!(queue.next_ready().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn close_wakes_a_blocked_dequeue() {
        let queue = test_queue();
        let waiter = tokio::spawn({
            let queue = queue.clone();
            async move { queue.next_ready().await }
        });

        // Let the waiter park on the empty queue before closing from
        // another thread.
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("dequeue did not observe close")
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn complete_updates_stats() {
        let queue = test_queue();
        queue.enqueue("ok").unwrap();

        let job = queue.next_ready().await.unwrap();
        queue.complete(job);

        let stats = queue.stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.completed_recent, 1);
        assert_eq!(stats.failed_recent, 0);
    }
}
