//! Collaborator seams and the data they exchange.
//!
//! The pipeline treats scraping and insight generation as black boxes that
//! eventually return a result or an error within a bounded time. Trait
//! objects keep both mockable (the production implementations live in the
//! server crate).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How deep a competitor analysis should go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisDepth {
    Basic,
    #[default]
    Standard,
    Deep,
}

/// Options carried by one analysis submission; immutable once the job starts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub depth: AnalysisDepth,
    /// Upper bound on pages fetched per competitor site.
    pub max_pages_per_site: u32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            depth: AnalysisDepth::Standard,
            max_pages_per_site: 5,
        }
    }
}

/// What one successful scrape of a competitor domain produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedSite {
    pub domain: String,
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub headings: Vec<String>,
    pub word_count: u32,
    pub outbound_links: u32,
    pub fetched_at: DateTime<Utc>,
}

impl ScrapedSite {
    /// Minimal result for a domain, used by tests and fallbacks.
    pub fn bare(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            title: None,
            meta_description: None,
            headings: Vec::new(),
            word_count: 0,
            outbound_links: 0,
            fetched_at: Utc::now(),
        }
    }
}

/// Competitive insights written exactly once by the AI stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insights {
    pub summary: String,
    pub strengths: Vec<String>,
    pub opportunities: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

/// Trait for scraping one competitor domain (to allow mocking).
#[async_trait]
pub trait SiteScraper: Send + Sync {
    async fn scrape(&self, domain: &str, config: &AnalysisConfig) -> anyhow::Result<ScrapedSite>;
}

/// Trait for turning aggregated scrape data into insights.
#[async_trait]
pub trait InsightGenerator: Send + Sync {
    async fn analyze(&self, sites: &[ScrapedSite]) -> anyhow::Result<Insights>;
}
