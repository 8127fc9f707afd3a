use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

use pipeline::PipelineConfig;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Unset means run against the in-memory status store.
    pub database_url: Option<String>,
    pub port: u16,
    pub openai_api_key: String,
    pub openai_model: String,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let mut pipeline = PipelineConfig::default();
        if let Some(secs) = env_secs("SCRAPE_FAN_IN_TIMEOUT_SECS")? {
            pipeline.fan_in_timeout = secs;
        }
        if let Some(secs) = env_secs("PIPELINE_POLL_INTERVAL_SECS")? {
            pipeline.poll_interval = secs;
        }
        if let Some(n) = env_usize("SCRAPING_CONCURRENCY")? {
            pipeline.scraping.concurrency = n;
        }

        Ok(Self {
            database_url: env::var("DATABASE_URL").ok(),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            openai_api_key: env::var("OPENAI_API_KEY")
                .context("OPENAI_API_KEY must be set")?,
            openai_model: env::var("OPENAI_MODEL")
                .unwrap_or_else(|_| "gpt-4-turbo".to_string()),
            pipeline,
        })
    }
}

fn env_secs(name: &str) -> Result<Option<Duration>> {
    match env::var(name) {
        Ok(raw) => {
            let secs: u64 = raw
                .parse()
                .with_context(|| format!("{name} must be a number of seconds"))?;
            Ok(Some(Duration::from_secs(secs)))
        }
        Err(_) => Ok(None),
    }
}

fn env_usize(name: &str) -> Result<Option<usize>> {
    match env::var(name) {
        Ok(raw) => {
            let n: usize = raw
                .parse()
                .with_context(|| format!("{name} must be a number"))?;
            Ok(Some(n))
        }
        Err(_) => Ok(None),
    }
}
