//! Mock collaborators for pipeline tests.
//!
//! Also exported for downstream crates so the HTTP layer can run its tests
//! without a network or an OpenAI key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use crate::events::{EventSink, JobEvent};
use crate::traits::{AnalysisConfig, InsightGenerator, Insights, ScrapedSite, SiteScraper};

#[derive(Clone)]
enum ScrapeBehavior {
    Succeed,
    Fail,
    /// Fail the first `n` calls for the domain, then succeed.
    Flaky(u32),
    Slow(Duration),
}

/// Scraper whose behavior is scripted per domain. Unscripted domains succeed.
pub struct MockScraper {
    behaviors: Mutex<HashMap<String, ScrapeBehavior>>,
    default: Mutex<ScrapeBehavior>,
    calls: DashMap<String, Arc<AtomicU32>>,
}

impl MockScraper {
    pub fn new() -> Self {
        Self {
            behaviors: Mutex::new(HashMap::new()),
            default: Mutex::new(ScrapeBehavior::Succeed),
            calls: DashMap::new(),
        }
    }

    pub fn failing(self, domain: &str) -> Self {
        self.set(domain, ScrapeBehavior::Fail);
        self
    }

    /// Domain fails `failures` times before its first success.
    pub fn flaky(self, domain: &str, failures: u32) -> Self {
        self.set(domain, ScrapeBehavior::Flaky(failures));
        self
    }

    pub fn slow(self, domain: &str, delay: Duration) -> Self {
        self.set(domain, ScrapeBehavior::Slow(delay));
        self
    }

    /// Every domain takes `delay` to scrape.
    pub fn slow_all(self, delay: Duration) -> Self {
        *self.default.lock().unwrap_or_else(|e| e.into_inner()) = ScrapeBehavior::Slow(delay);
        self
    }

    pub fn calls_for(&self, domain: &str) -> u32 {
        self.calls
            .get(domain)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    fn set(&self, domain: &str, behavior: ScrapeBehavior) {
        self.behaviors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(domain.to_string(), behavior);
    }

    fn behavior_for(&self, domain: &str) -> ScrapeBehavior {
        self.behaviors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(domain)
            .cloned()
            .unwrap_or_else(|| self.default.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }
}

impl Default for MockScraper {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SiteScraper for MockScraper {
    async fn scrape(&self, domain: &str, _config: &AnalysisConfig) -> anyhow::Result<ScrapedSite> {
        let counter = self
            .calls
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(AtomicU32::new(0)))
            .clone();
        let call = counter.fetch_add(1, Ordering::SeqCst) + 1;

        match self.behavior_for(domain) {
            ScrapeBehavior::Succeed => {}
            ScrapeBehavior::Fail => anyhow::bail!("connection refused by {domain}"),
            ScrapeBehavior::Flaky(n) if call <= n => {
                anyhow::bail!("transient fetch error from {domain} (call {call})")
            }
            ScrapeBehavior::Flaky(_) => {}
            ScrapeBehavior::Slow(delay) => tokio::time::sleep(delay).await,
        }

        Ok(ScrapedSite {
            domain: domain.to_string(),
            title: Some(format!("{domain} home")),
            meta_description: Some(format!("all about {domain}")),
            headings: vec![format!("Welcome to {domain}")],
            word_count: 1200,
            outbound_links: 14,
            fetched_at: Utc::now(),
        })
    }
}

/// Insight generator returning a canned summary of the sites it was given.
pub struct MockInsightGenerator {
    fail: bool,
    calls: AtomicU32,
}

impl MockInsightGenerator {
    pub fn new() -> Self {
        Self {
            fail: false,
            calls: AtomicU32::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockInsightGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InsightGenerator for MockInsightGenerator {
    async fn analyze(&self, sites: &[ScrapedSite]) -> anyhow::Result<Insights> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("model returned an empty completion");
        }
        let mut domains: Vec<&str> = sites.iter().map(|s| s.domain.as_str()).collect();
        domains.sort_unstable();
        Ok(Insights {
            summary: format!("analyzed {} competitors: {}", sites.len(), domains.join(", ")),
            strengths: vec!["strong content depth".to_string()],
            opportunities: vec!["thin meta descriptions".to_string()],
            generated_at: Utc::now(),
        })
    }
}

/// Event sink that records everything emitted, in order.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<JobEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<JobEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: JobEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}
