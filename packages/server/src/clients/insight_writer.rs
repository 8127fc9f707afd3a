//! OpenAI client for the insight stage.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use pipeline::{InsightGenerator, Insights, ScrapedSite};

const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiInsightGenerator {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

/// Chat completion request
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    response_format: ResponseFormat,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Chat completion response
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// The JSON shape the model is asked to produce
#[derive(Debug, Deserialize)]
struct InsightPayload {
    summary: String,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    opportunities: Vec<String>,
}

impl OpenAiInsightGenerator {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            model,
            client,
        })
    }

    fn build_prompt(sites: &[ScrapedSite]) -> String {
        let mut prompt = String::from(
            "You are an SEO analyst. Below is scraped data from competitor websites. \
             Compare them and reply with a JSON object with keys \"summary\" (string), \
             \"strengths\" (array of strings) and \"opportunities\" (array of strings). \
             Strengths are what these competitors do well; opportunities are gaps the \
             reader could exploit.\n",
        );
        for site in sites {
            prompt.push_str(&format!(
                "\n## {}\ntitle: {}\nmeta description: {}\nword count: {}\noutbound links: {}\nheadings: {}\n",
                site.domain,
                site.title.as_deref().unwrap_or("(none)"),
                site.meta_description.as_deref().unwrap_or("(none)"),
                site.word_count,
                site.outbound_links,
                site.headings.join(" | "),
            ));
        }
        prompt
    }
}

#[async_trait]
impl InsightGenerator for OpenAiInsightGenerator {
    async fn analyze(&self, sites: &[ScrapedSite]) -> Result<Insights> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content: Self::build_prompt(sites),
            }],
            response_format: ResponseFormat {
                kind: "json_object",
            },
            max_tokens: 2048,
        };

        info!(model = %self.model, sites = sites.len(), "requesting competitor insights");

        let response = self
            .client
            .post(OPENAI_CHAT_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .context("Failed to send OpenAI request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenAI API error {}: {}", status, body);
        }

        let chat: ChatResponse = response
            .json()
            .await
            .context("Failed to parse OpenAI response")?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .context("OpenAI response contained no choices")?;

        let payload: InsightPayload = serde_json::from_str(&content)
            .context("Failed to deserialize model output as insight JSON")?;

        Ok(Insights {
            summary: payload.summary,
            strengths: payload.strengths,
            opportunities: payload.opportunities,
            generated_at: Utc::now(),
        })
    }
}
