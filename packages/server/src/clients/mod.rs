//! Live collaborator implementations behind the pipeline's traits.

mod insight_writer;
mod site_scraper;

pub use insight_writer::OpenAiInsightGenerator;
pub use site_scraper::HttpSiteScraper;
