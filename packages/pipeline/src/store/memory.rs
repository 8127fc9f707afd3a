//! In-memory status store for tests and single-process dev mode.
//!
//! Each record lives in one `DashMap` shard entry; mutations happen under
//! that entry's lock, which gives the same atomic-append guarantees the
//! Postgres implementation gets from single-statement updates.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::warn;
use uuid::Uuid;

use super::{AnalysisRecord, AnalysisStatus, StatusStore};
use crate::traits::{Insights, ScrapedSite};

#[derive(Default)]
pub struct MemoryStatusStore {
    records: DashMap<Uuid, AnalysisRecord>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records (test helper).
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Remove a record, simulating a manual deletion mid-pipeline.
    pub fn remove(&self, id: Uuid) -> Option<AnalysisRecord> {
        self.records.remove(&id).map(|(_, record)| record)
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn insert(&self, record: AnalysisRecord) -> anyhow::Result<()> {
        self.records.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<AnalysisRecord>> {
        Ok(self.records.get(&id).map(|r| r.clone()))
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: AnalysisStatus,
        message: &str,
    ) -> anyhow::Result<bool> {
        let Some(mut record) = self.records.get_mut(&id) else {
            warn!(analysis_id = %id, ?status, "status update for missing record, ignoring");
            return Ok(false);
        };

        if status.required_predecessor() != Some(record.status) {
            warn!(
                analysis_id = %id,
                current = ?record.status,
                requested = ?status,
                "rejected status transition"
            );
            return Ok(false);
        }

        record.status = status;
        record.progress_message = message.to_string();
        if status == AnalysisStatus::Error && record.error_detail.is_none() {
            record.error_detail = Some(message.to_string());
        }
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn set_progress(&self, id: Uuid, message: &str) -> anyhow::Result<()> {
        let Some(mut record) = self.records.get_mut(&id) else {
            warn!(analysis_id = %id, "progress update for missing record, ignoring");
            return Ok(());
        };
        record.progress_message = message.to_string();
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn append_scraped_result(&self, id: Uuid, site: ScrapedSite) -> anyhow::Result<bool> {
        let Some(mut record) = self.records.get_mut(&id) else {
            warn!(analysis_id = %id, domain = %site.domain, "scrape result for missing record, ignoring");
            return Ok(false);
        };
        if record.scraped_results.contains_key(&site.domain) {
            return Ok(false);
        }
        record.scraped_results.insert(site.domain.clone(), site);
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn append_failed_target(&self, id: Uuid, domain: &str) -> anyhow::Result<()> {
        let Some(mut record) = self.records.get_mut(&id) else {
            warn!(analysis_id = %id, domain, "failed target for missing record, ignoring");
            return Ok(());
        };
        if !record.failed_targets.iter().any(|d| d == domain) {
            record.failed_targets.push(domain.to_string());
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_insights(&self, id: Uuid, insights: Insights) -> anyhow::Result<bool> {
        let Some(mut record) = self.records.get_mut(&id) else {
            warn!(analysis_id = %id, "insights for missing record, ignoring");
            return Ok(false);
        };
        if record.insights.is_some() {
            return Ok(false);
        }
        record.insights = Some(insights);
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn try_mark_ai_enqueued(&self, id: Uuid) -> anyhow::Result<bool> {
        let Some(mut record) = self.records.get_mut(&id) else {
            warn!(analysis_id = %id, "ai-stage guard for missing record, ignoring");
            return Ok(false);
        };
        if record.ai_enqueued {
            return Ok(false);
        }
        record.ai_enqueued = true;
        record.updated_at = Utc::now();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::traits::AnalysisConfig;

    fn record_with_targets(targets: &[&str]) -> AnalysisRecord {
        AnalysisRecord::new(
            Uuid::new_v4(),
            targets.iter().map(|s| s.to_string()).collect(),
            AnalysisConfig::default(),
        )
    }

    #[tokio::test]
    async fn insert_and_get() {
        let store = MemoryStatusStore::new();
        let record = record_with_targets(&["a.com"]);
        let id = record.id;

        store.insert(record).await.unwrap();
        let fetched = store.get(id).await.unwrap().unwrap();
        assert_eq!(fetched.id, id);
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn status_transitions_are_guarded() {
        let store = MemoryStatusStore::new();
        let record = record_with_targets(&["a.com"]);
        let id = record.id;
        store.insert(record).await.unwrap();

        // Pending -> Completed is illegal.
        assert!(!store
            .set_status(id, AnalysisStatus::Completed, "nope")
            .await
            .unwrap());

        assert!(store
            .set_status(id, AnalysisStatus::Processing, "working")
            .await
            .unwrap());
        assert!(store
            .set_status(id, AnalysisStatus::Error, "scrape stage failed")
            .await
            .unwrap());

        // Terminal states are absorbing.
        assert!(!store
            .set_status(id, AnalysisStatus::Completed, "too late")
            .await
            .unwrap());

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, AnalysisStatus::Error);
        assert_eq!(record.error_detail.as_deref(), Some("scrape stage failed"));
    }

    #[tokio::test]
    async fn append_is_first_write_wins() {
        let store = MemoryStatusStore::new();
        let record = record_with_targets(&["a.com"]);
        let id = record.id;
        store.insert(record).await.unwrap();

        assert!(store
            .append_scraped_result(id, ScrapedSite::bare("a.com"))
            .await
            .unwrap());
        assert!(!store
            .append_scraped_result(id, ScrapedSite::bare("a.com"))
            .await
            .unwrap());

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.scraped_results.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_appends_lose_nothing() {
        let store = Arc::new(MemoryStatusStore::new());
        let domains: Vec<String> = (0..32).map(|i| format!("site-{i}.com")).collect();
        let record = AnalysisRecord::new(
            Uuid::new_v4(),
            domains.clone(),
            AnalysisConfig::default(),
        );
        let id = record.id;
        store.insert(record).await.unwrap();

        let mut handles = Vec::new();
        for domain in domains {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append_scraped_result(id, ScrapedSite::bare(domain))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.scraped_results.len(), 32);
    }

    #[tokio::test]
    async fn ai_guard_won_exactly_once_under_contention() {
        let store = Arc::new(MemoryStatusStore::new());
        let record = record_with_targets(&["a.com"]);
        let id = record.id;
        store.insert(record).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(
                async move { store.try_mark_ai_enqueued(id).await.unwrap() },
            ));
        }

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn mutations_on_missing_record_are_noops() {
        let store = MemoryStatusStore::new();
        let id = Uuid::new_v4();

        assert!(!store
            .set_status(id, AnalysisStatus::Processing, "x")
            .await
            .unwrap());
        store.set_progress(id, "x").await.unwrap();
        assert!(!store
            .append_scraped_result(id, ScrapedSite::bare("a.com"))
            .await
            .unwrap());
        store.append_failed_target(id, "a.com").await.unwrap();
        assert!(!store.try_mark_ai_enqueued(id).await.unwrap());
    }

    #[tokio::test]
    async fn insights_write_once() {
        let store = MemoryStatusStore::new();
        let record = record_with_targets(&["a.com"]);
        let id = record.id;
        store.insert(record).await.unwrap();

        let insights = Insights {
            summary: "first".to_string(),
            strengths: vec![],
            opportunities: vec![],
            generated_at: Utc::now(),
        };
        assert!(store.set_insights(id, insights.clone()).await.unwrap());
        assert!(!store.set_insights(id, insights).await.unwrap());

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.insights.unwrap().summary, "first");
    }
}
