//! PostgreSQL-backed status store.
//!
//! Every mutation is one conditional `UPDATE`: appends go through
//! `jsonb` concatenation, guards through `WHERE` predicates, and
//! `rows_affected` decides the boolean results. No code path reads a record,
//! modifies it in Rust, and writes it back — that is what loses concurrent
//! scrape results.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::warn;
use uuid::Uuid;

use super::{AnalysisRecord, AnalysisStatus, StatusStore};
use crate::traits::{AnalysisConfig, Insights, ScrapedSite};

pub struct PostgresStatusStore {
    pool: PgPool,
}

impl PostgresStatusStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Row shape of `competitor_analyses`; jsonb columns wrapped for decoding.
#[derive(FromRow)]
struct AnalysisRow {
    id: Uuid,
    requester_id: Uuid,
    targets: Json<Vec<String>>,
    config: Json<AnalysisConfig>,
    status: AnalysisStatus,
    progress_message: String,
    scraped_results: Json<BTreeMap<String, ScrapedSite>>,
    failed_targets: Json<Vec<String>>,
    insights: Option<Json<Insights>>,
    error_detail: Option<String>,
    ai_enqueued: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AnalysisRow> for AnalysisRecord {
    fn from(row: AnalysisRow) -> Self {
        Self {
            id: row.id,
            requester_id: row.requester_id,
            targets: row.targets.0,
            config: row.config.0,
            status: row.status,
            progress_message: row.progress_message,
            scraped_results: row.scraped_results.0,
            failed_targets: row.failed_targets.0,
            insights: row.insights.map(|j| j.0),
            error_detail: row.error_detail,
            ai_enqueued: row.ai_enqueued,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, requester_id, targets, config, status, progress_message,
           scraped_results, failed_targets, insights, error_detail,
           ai_enqueued, created_at, updated_at
    FROM competitor_analyses
"#;

#[async_trait]
impl StatusStore for PostgresStatusStore {
    async fn insert(&self, record: AnalysisRecord) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO competitor_analyses
                (id, requester_id, targets, config, status, progress_message,
                 scraped_results, failed_targets, insights, error_detail,
                 ai_enqueued, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(record.id)
        .bind(record.requester_id)
        .bind(Json(&record.targets))
        .bind(Json(&record.config))
        .bind(record.status)
        .bind(&record.progress_message)
        .bind(Json(&record.scraped_results))
        .bind(Json(&record.failed_targets))
        .bind(record.insights.as_ref().map(Json))
        .bind(&record.error_detail)
        .bind(record.ai_enqueued)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<AnalysisRecord>> {
        let row = sqlx::query_as::<_, AnalysisRow>(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(AnalysisRecord::from))
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: AnalysisStatus,
        message: &str,
    ) -> anyhow::Result<bool> {
        let Some(from) = status.required_predecessor() else {
            return Ok(false);
        };

        let sql = if status == AnalysisStatus::Error {
            r#"
            UPDATE competitor_analyses
            SET status = $2,
                progress_message = $3,
                error_detail = COALESCE(error_detail, $3),
                updated_at = NOW()
            WHERE id = $1 AND status = $4
            "#
        } else {
            r#"
            UPDATE competitor_analyses
            SET status = $2, progress_message = $3, updated_at = NOW()
            WHERE id = $1 AND status = $4
            "#
        };

        let result = sqlx::query(sql)
            .bind(id)
            .bind(status)
            .bind(message)
            .bind(from)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            warn!(
                analysis_id = %id,
                requested = ?status,
                "status transition rejected (missing record or wrong predecessor)"
            );
            return Ok(false);
        }
        Ok(true)
    }

    async fn set_progress(&self, id: Uuid, message: &str) -> anyhow::Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE competitor_analyses
            SET progress_message = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(message)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!(analysis_id = %id, "progress update for missing record, ignoring");
        }
        Ok(())
    }

    async fn append_scraped_result(&self, id: Uuid, site: ScrapedSite) -> anyhow::Result<bool> {
        // Single-statement jsonb append; the `?` predicate keeps it
        // first-write-wins under duplicate delivery.
        let result = sqlx::query(
            r#"
            UPDATE competitor_analyses
            SET scraped_results = scraped_results || jsonb_build_object($2::text, $3::jsonb),
                updated_at = NOW()
            WHERE id = $1 AND NOT (scraped_results ? $2)
            "#,
        )
        .bind(id)
        .bind(&site.domain)
        .bind(Json(&site))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_failed_target(&self, id: Uuid, domain: &str) -> anyhow::Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE competitor_analyses
            SET failed_targets = failed_targets || to_jsonb($2::text),
                updated_at = NOW()
            WHERE id = $1 AND NOT (failed_targets ? $2)
            "#,
        )
        .bind(id)
        .bind(domain)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            warn!(analysis_id = %id, domain, "failed-target append skipped (missing or duplicate)");
        }
        Ok(())
    }

    async fn set_insights(&self, id: Uuid, insights: Insights) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE competitor_analyses
            SET insights = $2, updated_at = NOW()
            WHERE id = $1 AND insights IS NULL
            "#,
        )
        .bind(id)
        .bind(Json(&insights))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn try_mark_ai_enqueued(&self, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE competitor_analyses
            SET ai_enqueued = TRUE, updated_at = NOW()
            WHERE id = $1 AND ai_enqueued = FALSE
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_converts_to_record() {
        let now = Utc::now();
        let row = AnalysisRow {
            id: Uuid::new_v4(),
            requester_id: Uuid::new_v4(),
            targets: Json(vec!["a.com".to_string()]),
            config: Json(AnalysisConfig::default()),
            status: AnalysisStatus::Processing,
            progress_message: "scraping".to_string(),
            scraped_results: Json(BTreeMap::new()),
            failed_targets: Json(Vec::new()),
            insights: None,
            error_detail: None,
            ai_enqueued: false,
            created_at: now,
            updated_at: now,
        };

        let record = AnalysisRecord::from(row);
        assert_eq!(record.status, AnalysisStatus::Processing);
        assert_eq!(record.targets, vec!["a.com".to_string()]);
        assert!(record.insights.is_none());
    }
}
