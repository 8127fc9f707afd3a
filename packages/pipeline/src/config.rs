//! Pipeline configuration.

use std::time::Duration;

use crate::job::RetryPolicy;

/// Configuration for one stage's queue and worker pool.
#[derive(Debug, Clone, Copy)]
pub struct StageConfig {
    /// Number of jobs from this queue that may run concurrently.
    pub concurrency: usize,
    /// Retry/backoff policy for jobs on this queue.
    pub retry: RetryPolicy,
    /// Hard ceiling on one collaborator invocation.
    pub job_timeout: Duration,
}

impl StageConfig {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            retry: RetryPolicy::default(),
            job_timeout: Duration::from_secs(60),
        }
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Per-domain scraping stage (default concurrency 3).
    pub scraping: StageConfig,
    /// Per-analysis orchestration stage (default concurrency 2).
    pub analysis: StageConfig,
    /// Insight-generation stage (default concurrency 1).
    pub ai: StageConfig,
    /// Interval between fan-in checks of the status store.
    pub poll_interval: Duration,
    /// Hard deadline on the fan-in wait for one analysis.
    pub fan_in_timeout: Duration,
    /// How long terminal job outcomes stay visible in queue stats.
    pub retention: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scraping: StageConfig::new(3),
            analysis: StageConfig {
                // The orchestration job spends most of its life sleeping in
                // the fan-in wait, so its timeout must dominate the scrape
                // window, not a single collaborator call.
                job_timeout: Duration::from_secs(600),
                ..StageConfig::new(2)
            },
            ai: StageConfig::new(1),
            poll_interval: Duration::from_secs(5),
            fan_in_timeout: Duration::from_secs(300),
            retention: Duration::from_secs(900),
        }
    }
}

impl PipelineConfig {
    /// Millisecond-scale preset so the full pipeline settles quickly.
    /// Used by the integration tests; not intended for production.
    pub fn compressed(fan_in_timeout: Duration) -> Self {
        let retry = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
        };
        let stage = |concurrency| StageConfig {
            concurrency,
            retry,
            job_timeout: Duration::from_secs(5),
        };
        Self {
            scraping: stage(3),
            analysis: stage(2),
            ai: stage(1),
            poll_interval: Duration::from_millis(10),
            fan_in_timeout,
            retention: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_concurrency_per_stage() {
        let config = PipelineConfig::default();
        assert_eq!(config.scraping.concurrency, 3);
        assert_eq!(config.analysis.concurrency, 2);
        assert_eq!(config.ai.concurrency, 1);
    }

    #[test]
    fn fan_in_window_exceeds_poll_interval() {
        let config = PipelineConfig::default();
        assert!(config.fan_in_timeout > config.poll_interval);
    }
}
