//! Rankpulse competitor-analysis pipeline.
//!
//! A multi-stage background pipeline for SEO competitor analysis: scrape a
//! set of competitor sites concurrently, wait for the results to settle, then
//! run a single AI pass that turns them into insights. Each stage pulls from
//! its own in-process [`queue::WorkQueue`] with per-stage concurrency and
//! retry policy, and all cross-stage state lives in a [`store::StatusStore`].
//!
//! Entry point for callers is [`CompetitorPipeline`]: build one with a store,
//! a [`SiteScraper`] and an [`InsightGenerator`], then `submit` / `status`.

pub mod config;
pub mod error;
pub mod events;
pub mod job;
pub mod orchestrator;
pub mod queue;
pub mod store;
pub mod testing;
pub mod traits;
pub mod worker;

pub use config::{PipelineConfig, StageConfig};
pub use error::{classify_error, ErrorKind, PipelineError};
pub use events::{EventSink, JobEvent, TracingSink};
pub use job::{JobPriority, RetryPolicy};
pub use orchestrator::{CompetitorPipeline, AI_QUEUE, ANALYSIS_QUEUE, SCRAPING_QUEUE};
pub use queue::{EnqueueOptions, QueueStats, WorkQueue};
pub use store::{AnalysisRecord, AnalysisStatus, MemoryStatusStore, PostgresStatusStore, StatusStore};
pub use traits::{
    AnalysisConfig, AnalysisDepth, InsightGenerator, Insights, ScrapedSite, SiteScraper,
};
pub use worker::{JobHandler, WorkerPool};
