//! The pipeline orchestrator.
//!
//! `CompetitorPipeline` owns three queues and their worker pools:
//!
//! ```text
//! submit()
//!     │  insert record, Pending -> Processing
//!     ▼
//! analysis queue ── OrchestrationStage (one job per analysis)
//!     │   fan-out: one scrape job per target domain
//!     ▼
//! scraping queue ── ScrapeStage ──► StatusStore.append_scraped_result
//!     │                                   ▲
//!     │   fan-in: poll the record until   │ polled
//!     │   every target settled, bounded   │
//!     ▼   by a hard timeout               │
//! ai queue ──────── InsightStage ───► insights + Processing -> Completed
//! ```
//!
//! Stages never talk to each other; every bit of coordination goes through
//! the status store. Failures inside a stage are converted into retries,
//! dead letters, or an `Error` status — nothing escapes to crash a worker.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::events::{EventSink, TracingSink};
use crate::queue::{QueueStats, WorkQueue};
use crate::store::{AnalysisRecord, AnalysisStatus, StatusStore};
use crate::traits::{AnalysisConfig, InsightGenerator, ScrapedSite, SiteScraper};
use crate::worker::{JobHandler, WorkerPool};

pub const SCRAPING_QUEUE: &str = "scraping";
pub const ANALYSIS_QUEUE: &str = "analysis";
pub const AI_QUEUE: &str = "ai";

/// One analysis to drive end to end. Carries only the id; targets and config
/// are re-read from the store so redelivery observes current state.
#[derive(Debug, Clone)]
struct OrchestrationJob {
    analysis_id: Uuid,
}

/// One competitor domain to scrape, tagged with its analysis.
#[derive(Debug, Clone)]
struct ScrapeJob {
    analysis_id: Uuid,
    domain: String,
    config: AnalysisConfig,
}

/// The single AI pass over everything scraping produced.
#[derive(Debug, Clone)]
struct InsightJob {
    analysis_id: Uuid,
}

// ---------------------------------------------------------------------------
// Scrape stage
// ---------------------------------------------------------------------------

struct ScrapeStage {
    store: Arc<dyn StatusStore>,
    scraper: Arc<dyn SiteScraper>,
    timeout: Duration,
}

#[async_trait]
impl JobHandler<ScrapeJob> for ScrapeStage {
    async fn handle(&self, job: &ScrapeJob, _attempt: u32) -> anyhow::Result<()> {
        let site = tokio::time::timeout(
            self.timeout,
            self.scraper.scrape(&job.domain, &job.config),
        )
        .await
        .map_err(|_| {
            anyhow::anyhow!(
                "scrape of {} timed out after {}s",
                job.domain,
                self.timeout.as_secs()
            )
        })?
        .with_context(|| format!("scrape of {} failed", job.domain))?;

        let appended = self
            .store
            .append_scraped_result(job.analysis_id, site)
            .await?;
        if appended {
            self.store
                .set_progress(job.analysis_id, &format!("scraped {}", job.domain))
                .await?;
        }
        Ok(())
    }

    async fn on_exhausted(&self, job: &ScrapeJob, error: &anyhow::Error) {
        // A single dead domain is non-fatal; record it so the fan-in wait can
        // settle instead of riding this domain into the timeout.
        warn!(
            analysis_id = %job.analysis_id,
            domain = %job.domain,
            error = %error,
            "scrape exhausted retries, marking domain failed"
        );
        if let Err(e) = self
            .store
            .append_failed_target(job.analysis_id, &job.domain)
            .await
        {
            error!(analysis_id = %job.analysis_id, error = %e, "failed to record dead domain");
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestration stage (fan-out, fan-in, stage chaining)
// ---------------------------------------------------------------------------

struct OrchestrationStage {
    store: Arc<dyn StatusStore>,
    scraping: WorkQueue<ScrapeJob>,
    ai: WorkQueue<InsightJob>,
    poll_interval: Duration,
    fan_in_timeout: Duration,
}

impl OrchestrationStage {
    /// Poll the record until every target settled, the record went terminal,
    /// or the hard deadline passed. Returns `None` when there is nothing
    /// further to do for this analysis.
    async fn wait_for_fan_in(
        &self,
        id: Uuid,
        expected: usize,
    ) -> anyhow::Result<Option<AnalysisRecord>> {
        let deadline = tokio::time::Instant::now() + self.fan_in_timeout;

        loop {
            tokio::time::sleep(self.poll_interval).await;

            let Some(record) = self.store.get(id).await? else {
                warn!(analysis_id = %id, "record deleted mid-pipeline, abandoning");
                return Ok(None);
            };
            if record.status.is_terminal() {
                return Ok(None);
            }
            if record.settled_targets() >= expected {
                return Ok(Some(record));
            }
            if tokio::time::Instant::now() >= deadline {
                let err = PipelineError::PipelineTimeout {
                    received: record.settled_targets(),
                    expected,
                    waited_secs: self.fan_in_timeout.as_secs(),
                };
                warn!(analysis_id = %id, error = %err, "fan-in wait timed out");
                self.store
                    .set_status(id, AnalysisStatus::Error, &err.to_string())
                    .await?;
                return Ok(None);
            }
        }
    }
}

#[async_trait]
impl JobHandler<OrchestrationJob> for OrchestrationStage {
    async fn handle(&self, job: &OrchestrationJob, _attempt: u32) -> anyhow::Result<()> {
        let id = job.analysis_id;

        let Some(record) = self.store.get(id).await? else {
            warn!(analysis_id = %id, "record missing before fan-out, abandoning");
            return Ok(());
        };
        if record.status.is_terminal() {
            return Ok(());
        }

        let expected = record.targets.len();
        self.store
            .set_progress(id, &format!("scraping {expected} competitor sites"))
            .await?;

        // Fan-out: one scrape job per domain. Redelivery of this job repeats
        // the fan-out, which is harmless — result appends are
        // first-write-wins per domain.
        for domain in &record.targets {
            self.scraping.enqueue(ScrapeJob {
                analysis_id: id,
                domain: domain.clone(),
                config: record.config,
            })?;
        }

        let Some(settled) = self.wait_for_fan_in(id, expected).await? else {
            return Ok(());
        };

        if settled.scraped_results.is_empty() {
            let err = PipelineError::AllTargetsFailed(expected);
            self.store
                .set_status(id, AnalysisStatus::Error, &err.to_string())
                .await?;
            return Ok(());
        }

        // Advance to the AI stage at most once per analysis, however many
        // poll ticks or redeliveries race here.
        if self.store.try_mark_ai_enqueued(id).await? {
            self.store
                .set_progress(
                    id,
                    &format!(
                        "generating insights from {} scraped sites",
                        settled.scraped_results.len()
                    ),
                )
                .await?;
            if let Err(e) = self.ai.enqueue(InsightJob { analysis_id: id }) {
                self.store
                    .set_status(
                        id,
                        AnalysisStatus::Error,
                        &format!("insight stage could not be scheduled: {e}"),
                    )
                    .await?;
            }
        }
        Ok(())
    }

    async fn on_exhausted(&self, job: &OrchestrationJob, error: &anyhow::Error) {
        let detail = format!("analysis stage failed: {error:#}");
        if let Err(e) = self
            .store
            .set_status(job.analysis_id, AnalysisStatus::Error, &detail)
            .await
        {
            error!(analysis_id = %job.analysis_id, error = %e, "failed to record analysis failure");
        }
    }
}

// ---------------------------------------------------------------------------
// Insight (AI) stage
// ---------------------------------------------------------------------------

struct InsightStage {
    store: Arc<dyn StatusStore>,
    generator: Arc<dyn InsightGenerator>,
    timeout: Duration,
}

#[async_trait]
impl JobHandler<InsightJob> for InsightStage {
    async fn handle(&self, job: &InsightJob, _attempt: u32) -> anyhow::Result<()> {
        let id = job.analysis_id;
        let Some(record) = self.store.get(id).await? else {
            warn!(analysis_id = %id, "record missing at insight stage, abandoning");
            return Ok(());
        };
        if record.status.is_terminal() {
            return Ok(());
        }

        let sites: Vec<ScrapedSite> = record.scraped_results.into_values().collect();
        let site_count = sites.len();
        let insights = tokio::time::timeout(self.timeout, self.generator.analyze(&sites))
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "insight generation timed out after {}s",
                    self.timeout.as_secs()
                )
            })?
            .context("insight generation failed")?;

        self.store.set_insights(id, insights).await?;
        self.store
            .set_status(id, AnalysisStatus::Completed, "analysis complete")
            .await?;
        info!(analysis_id = %id, sites = site_count, "analysis completed");
        Ok(())
    }

    async fn on_exhausted(&self, job: &InsightJob, error: &anyhow::Error) {
        let detail = format!("insight stage failed: {error:#}");
        if let Err(e) = self
            .store
            .set_status(job.analysis_id, AnalysisStatus::Error, &detail)
            .await
        {
            error!(analysis_id = %job.analysis_id, error = %e, "failed to record insight failure");
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// The competitor-analysis pipeline: queues, workers, and the public surface
/// handed to the HTTP layer.
///
/// Build exactly one per process and pass it down (`Arc`) to whatever
/// submits analyses — there is no hidden global instance.
pub struct CompetitorPipeline {
    store: Arc<dyn StatusStore>,
    scraping: WorkQueue<ScrapeJob>,
    analysis: WorkQueue<OrchestrationJob>,
    ai: WorkQueue<InsightJob>,
    pools: Mutex<Vec<WorkerPool>>,
}

impl CompetitorPipeline {
    pub fn new(
        store: Arc<dyn StatusStore>,
        scraper: Arc<dyn SiteScraper>,
        generator: Arc<dyn InsightGenerator>,
        config: PipelineConfig,
    ) -> Self {
        Self::with_sink(store, scraper, generator, config, Arc::new(TracingSink))
    }

    pub fn with_sink(
        store: Arc<dyn StatusStore>,
        scraper: Arc<dyn SiteScraper>,
        generator: Arc<dyn InsightGenerator>,
        config: PipelineConfig,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let scraping = WorkQueue::with_sink(
            SCRAPING_QUEUE,
            config.scraping.retry,
            config.retention,
            sink.clone(),
        );
        let analysis = WorkQueue::with_sink(
            ANALYSIS_QUEUE,
            config.analysis.retry,
            config.retention,
            sink.clone(),
        );
        let ai = WorkQueue::with_sink(AI_QUEUE, config.ai.retry, config.retention, sink);

        let pools = vec![
            WorkerPool::spawn(
                scraping.clone(),
                config.scraping.concurrency,
                Arc::new(ScrapeStage {
                    store: store.clone(),
                    scraper,
                    timeout: config.scraping.job_timeout,
                }),
            ),
            WorkerPool::spawn(
                analysis.clone(),
                config.analysis.concurrency,
                Arc::new(OrchestrationStage {
                    store: store.clone(),
                    scraping: scraping.clone(),
                    ai: ai.clone(),
                    poll_interval: config.poll_interval,
                    fan_in_timeout: config.fan_in_timeout,
                }),
            ),
            WorkerPool::spawn(
                ai.clone(),
                config.ai.concurrency,
                Arc::new(InsightStage {
                    store: store.clone(),
                    generator,
                    timeout: config.ai.job_timeout,
                }),
            ),
        ];

        Self {
            store,
            scraping,
            analysis,
            ai,
            pools: Mutex::new(pools),
        }
    }

    /// Accept an analysis request. Fast: inserts the record, flips it to
    /// `Processing`, enqueues the orchestration job and returns. A caller
    /// reading the record immediately afterwards always sees at least
    /// `Processing`.
    pub async fn submit(
        &self,
        requester_id: Uuid,
        targets: Vec<String>,
        config: AnalysisConfig,
    ) -> Result<Uuid, PipelineError> {
        if targets.is_empty() {
            return Err(PipelineError::EmptyTargets);
        }

        let record = AnalysisRecord::new(requester_id, targets, config);
        let id = record.id;
        let target_count = record.targets.len();

        self.store
            .insert(record)
            .await
            .map_err(|e| PipelineError::Store(e.to_string()))?;
        self.store
            .set_status(id, AnalysisStatus::Processing, "competitor analysis started")
            .await
            .map_err(|e| PipelineError::Store(e.to_string()))?;

        if let Err(e) = self.analysis.enqueue(OrchestrationJob { analysis_id: id }) {
            // Leave a terminal record behind so the client is not stuck
            // polling a Processing status that will never advance.
            let _ = self
                .store
                .set_status(id, AnalysisStatus::Error, &e.to_string())
                .await;
            return Err(e);
        }

        info!(analysis_id = %id, requester_id = %requester_id, targets = target_count, "analysis submitted");
        Ok(id)
    }

    /// Fetch the current record. `NotFound` is the only error clients see;
    /// everything else about a failed analysis lives in the record itself.
    pub async fn status(&self, id: Uuid) -> Result<AnalysisRecord, PipelineError> {
        self.store
            .get(id)
            .await
            .map_err(|e| PipelineError::Store(e.to_string()))?
            .ok_or(PipelineError::NotFound(id))
    }

    /// Counters for each of the three queues, keyed by queue name.
    pub fn queue_stats(&self) -> BTreeMap<String, QueueStats> {
        BTreeMap::from([
            (SCRAPING_QUEUE.to_string(), self.scraping.stats()),
            (ANALYSIS_QUEUE.to_string(), self.analysis.stats()),
            (AI_QUEUE.to_string(), self.ai.stats()),
        ])
    }

    /// Close every queue and wait for in-flight handlers to finish.
    pub async fn shutdown(&self) {
        info!("pipeline shutting down");
        self.scraping.close();
        self.analysis.close();
        self.ai.close();

        let pools = {
            let mut guard = self.pools.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        for pool in pools {
            pool.join().await;
        }
    }
}
