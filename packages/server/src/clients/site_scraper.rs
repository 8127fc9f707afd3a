//! Live site scraper - local HTTP + HTML parsing, no external scraping API.
//!
//! Uses reqwest for HTTP requests and the scraper crate for CSS-selector
//! extraction. No JavaScript rendering; competitor marketing sites are
//! almost always static enough for SEO signals.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::debug;
use url::Url;

use pipeline::{AnalysisConfig, AnalysisDepth, ScrapedSite, SiteScraper};

pub struct HttpSiteScraper {
    client: reqwest::Client,
}

impl HttpSiteScraper {
    pub fn new() -> Result<Self> {
        // Use a browser-like User-Agent to avoid bot detection
        let user_agent = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"
                .parse()
                .context("invalid Accept header")?,
        );
        headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            "en-US,en;q=0.5".parse().context("invalid header")?,
        );

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(user_agent)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Fetch raw HTML, trying https then falling back to http.
    async fn fetch_html(&self, domain: &str) -> Result<String> {
        let mut last_err = None;
        for scheme in ["https", "http"] {
            let url = format!("{scheme}://{domain}/");
            match self.fetch_url(&url).await {
                Ok(html) => return Ok(html),
                Err(e) => {
                    debug!(url = %url, error = %e, "fetch attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no fetch attempted for {domain}")))
    }

    async fn fetch_url(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("HTTP request failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("HTTP {} for {}", status, url);
        }

        response
            .text()
            .await
            .context("Failed to read response body")
    }
}

/// Extract document title
fn extract_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Extract meta description content
fn extract_meta_description(document: &Html) -> Option<String> {
    let selector = Selector::parse("meta[name='description']").ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

/// Extract h1/h2 headings in document order, capped by analysis depth
fn extract_headings(document: &Html, limit: usize) -> Vec<String> {
    let Ok(selector) = Selector::parse("h1, h2") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|h| !h.is_empty())
        .take(limit)
        .collect()
}

/// Count visible words in the body text
fn count_words(document: &Html) -> u32 {
    let Ok(selector) = Selector::parse("body") else {
        return 0;
    };
    document
        .select(&selector)
        .next()
        .map(|body| {
            body.text()
                .flat_map(|t| t.split_whitespace())
                .count() as u32
        })
        .unwrap_or(0)
}

/// Count links pointing off the given domain
fn count_outbound_links(document: &Html, domain: &str) -> u32 {
    let Ok(selector) = Selector::parse("a[href]") else {
        return 0;
    };
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("href"))
        .filter_map(|href| Url::parse(href).ok())
        .filter(|url| {
            url.host_str()
                .map(|host| host != domain && !host.ends_with(&format!(".{domain}")))
                .unwrap_or(false)
        })
        .count() as u32
}

fn headings_limit(depth: AnalysisDepth) -> usize {
    match depth {
        AnalysisDepth::Basic => 5,
        AnalysisDepth::Standard => 15,
        AnalysisDepth::Deep => 50,
    }
}

#[async_trait]
impl SiteScraper for HttpSiteScraper {
    async fn scrape(&self, domain: &str, config: &AnalysisConfig) -> Result<ScrapedSite> {
        let html = self.fetch_html(domain).await?;

        // Html is !Send; keep all parsing inside a non-await scope.
        let (title, meta_description, headings, word_count, outbound_links) = {
            let document = Html::parse_document(&html);
            (
                extract_title(&document),
                extract_meta_description(&document),
                extract_headings(&document, headings_limit(config.depth)),
                count_words(&document),
                count_outbound_links(&document, domain),
            )
        };

        debug!(
            domain = %domain,
            word_count,
            headings = headings.len(),
            "scraped competitor site"
        );

        Ok(ScrapedSite {
            domain: domain.to_string(),
            title,
            meta_description,
            headings,
            word_count,
            outbound_links,
            fetched_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        <html>
          <head>
            <title> Acme SEO Tools </title>
            <meta name="description" content="Rank tracking for small teams">
          </head>
          <body>
            <h1>Acme</h1>
            <h2>Pricing</h2>
            <h2></h2>
            <p>Track your rankings every day with Acme.</p>
            <a href="https://other.com/blog">partner</a>
            <a href="https://acme.com/about">about</a>
            <a href="/pricing">pricing</a>
          </body>
        </html>
    "#;

    #[test]
    fn extracts_title_and_description() {
        let document = Html::parse_document(SAMPLE);
        assert_eq!(extract_title(&document).as_deref(), Some("Acme SEO Tools"));
        assert_eq!(
            extract_meta_description(&document).as_deref(),
            Some("Rank tracking for small teams")
        );
    }

    #[test]
    fn skips_empty_headings() {
        let document = Html::parse_document(SAMPLE);
        let headings = extract_headings(&document, 15);
        assert_eq!(headings, vec!["Acme".to_string(), "Pricing".to_string()]);
    }

    #[test]
    fn counts_only_offsite_links() {
        let document = Html::parse_document(SAMPLE);
        // Relative links and same-domain links are not outbound.
        assert_eq!(count_outbound_links(&document, "acme.com"), 1);
    }

    #[test]
    fn heading_limit_scales_with_depth() {
        assert!(headings_limit(AnalysisDepth::Basic) < headings_limit(AnalysisDepth::Deep));
    }
}
