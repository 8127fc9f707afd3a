//! Rankpulse API server: HTTP surface over the competitor-analysis pipeline.

pub mod app;
pub mod clients;
pub mod config;
pub mod routes;

pub use app::{build_app, AppState};
pub use clients::{HttpSiteScraper, OpenAiInsightGenerator};
pub use config::Config;
