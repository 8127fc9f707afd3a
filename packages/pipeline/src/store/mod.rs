//! The persisted analysis record and the store contract all stages share.
//!
//! The status store is the only shared mutable state in the pipeline: the
//! orchestrator reads it to decide when to advance, scrape workers append
//! results to it, and the AI stage writes insights through it. Every mutation
//! is a single atomic operation on one record — never read-modify-write of
//! the whole record — so concurrent stage workers cannot lose updates.

mod memory;
mod postgres;

pub use memory::MemoryStatusStore;
pub use postgres::PostgresStatusStore;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::traits::{AnalysisConfig, Insights, ScrapedSite};

/// Status of one competitor analysis.
///
/// `Completed` and `Error` are absorbing; the only legal transitions are
/// `Pending -> Processing` and `Processing -> {Completed, Error}`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default,
)]
#[sqlx(type_name = "analysis_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Error,
}

impl AnalysisStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AnalysisStatus::Completed | AnalysisStatus::Error)
    }

    /// The single status a record must currently hold for a transition into
    /// `self` to be legal.
    pub fn required_predecessor(&self) -> Option<AnalysisStatus> {
        match self {
            AnalysisStatus::Pending => None,
            AnalysisStatus::Processing => Some(AnalysisStatus::Pending),
            AnalysisStatus::Completed | AnalysisStatus::Error => Some(AnalysisStatus::Processing),
        }
    }
}

/// The unit of orchestration: one competitor analysis request and everything
/// the stages have written for it so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: Uuid,
    pub requester_id: Uuid,
    /// Target competitor domains; immutable once the job starts.
    pub targets: Vec<String>,
    pub config: AnalysisConfig,
    pub status: AnalysisStatus,
    /// Last-writer-wins, mutated by whichever stage is active.
    pub progress_message: String,
    /// Append-only, keyed by domain; one entry per successfully scraped
    /// domain, never rewritten.
    pub scraped_results: BTreeMap<String, ScrapedSite>,
    /// Domains whose scrape jobs exhausted their retries. Lets the fan-in
    /// wait settle instead of riding a dead domain into the timeout.
    pub failed_targets: Vec<String>,
    /// Write-once, populated only by the AI stage on success.
    pub insights: Option<Insights>,
    /// Write-once, populated only on the transition to `Error`.
    pub error_detail: Option<String>,
    /// Idempotence guard: set exactly once, by whichever poll tick first
    /// advances the analysis to the AI stage.
    pub ai_enqueued: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AnalysisRecord {
    pub fn new(requester_id: Uuid, targets: Vec<String>, config: AnalysisConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            requester_id,
            targets,
            config,
            status: AnalysisStatus::Pending,
            progress_message: "analysis queued".to_string(),
            scraped_results: BTreeMap::new(),
            failed_targets: Vec::new(),
            insights: None,
            error_detail: None,
            ai_enqueued: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Domains that have reached a terminal outcome (scraped or dead).
    pub fn settled_targets(&self) -> usize {
        self.scraped_results.len() + self.failed_targets.len()
    }
}

/// Store contract for the shared analysis record.
///
/// Mutations on a missing record are a warn-level no-op (`Ok(false)` where a
/// boolean is returned) rather than an error: a record deleted mid-pipeline
/// must not crash jobs still in flight.
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn insert(&self, record: AnalysisRecord) -> anyhow::Result<()>;

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<AnalysisRecord>>;

    /// Guarded status transition. Returns `Ok(false)` when the record is
    /// missing or not in the required predecessor status — a duplicate
    /// advancement is logged, never surfaced. On a transition to `Error` the
    /// message is written to `error_detail`.
    async fn set_status(
        &self,
        id: Uuid,
        status: AnalysisStatus,
        message: &str,
    ) -> anyhow::Result<bool>;

    /// Update `progress_message` (last-writer-wins).
    async fn set_progress(&self, id: Uuid, message: &str) -> anyhow::Result<()>;

    /// Atomically append one domain's scrape output. First write wins:
    /// returns `Ok(false)` if the domain already has a result (duplicate
    /// delivery) or the record is missing.
    async fn append_scraped_result(&self, id: Uuid, site: ScrapedSite) -> anyhow::Result<bool>;

    /// Atomically record a terminal scrape failure for one domain.
    async fn append_failed_target(&self, id: Uuid, domain: &str) -> anyhow::Result<()>;

    /// Write-once insights. Returns `Ok(false)` if insights already exist.
    async fn set_insights(&self, id: Uuid, insights: Insights) -> anyhow::Result<bool>;

    /// Atomic test-and-set of the AI-stage guard. Exactly one caller per
    /// analysis ever gets `Ok(true)`, no matter how many poll ticks race.
    async fn try_mark_ai_enqueued(&self, id: Uuid) -> anyhow::Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!AnalysisStatus::Pending.is_terminal());
        assert!(!AnalysisStatus::Processing.is_terminal());
        assert!(AnalysisStatus::Completed.is_terminal());
        assert!(AnalysisStatus::Error.is_terminal());
    }

    #[test]
    fn transition_predecessors() {
        assert_eq!(
            AnalysisStatus::Processing.required_predecessor(),
            Some(AnalysisStatus::Pending)
        );
        assert_eq!(
            AnalysisStatus::Completed.required_predecessor(),
            Some(AnalysisStatus::Processing)
        );
        assert_eq!(
            AnalysisStatus::Error.required_predecessor(),
            Some(AnalysisStatus::Processing)
        );
    }

    #[test]
    fn new_record_is_pending() {
        let record = AnalysisRecord::new(
            Uuid::new_v4(),
            vec!["a.com".to_string(), "b.com".to_string()],
            AnalysisConfig::default(),
        );
        assert_eq!(record.status, AnalysisStatus::Pending);
        assert!(!record.ai_enqueued);
        assert_eq!(record.settled_targets(), 0);
        assert!(record.insights.is_none());
    }

    #[test]
    fn record_serializes_roundtrip() {
        let mut record =
            AnalysisRecord::new(Uuid::new_v4(), vec!["a.com".into()], AnalysisConfig::default());
        record
            .scraped_results
            .insert("a.com".to_string(), ScrapedSite::bare("a.com"));

        let json = serde_json::to_string(&record).unwrap();
        let back: AnalysisRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, record.id);
        assert_eq!(back.scraped_results.len(), 1);
    }
}
