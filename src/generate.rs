//! Generation backend abstraction.
//!
//! Defines the [`Generator`] trait the session submits the assembled prompt
//! to, and [`GeminiGenerator`], which calls the Gemini `generateContent`
//! REST endpoint.
//!
//! # Credentials
//!
//! The API key is read once, when the generator is built at startup, from
//! the environment variable named by `generation.api_key_env`
//! (`GEMINI_API_KEY` by default). A missing key does not stop the server;
//! instead [`Generator::ready`] reports a configuration error, and the
//! session checks it before doing any work for a request.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, ... (capped at 2^5)

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::error::{PipelineError, Result};

const SERVICE: &str = "generation";

/// Directive prepended to the generated document when asking for a
/// system overview diagram.
pub const OVERVIEW_PREAMBLE: &str = "\
This is the overview markdown documentation of my application. Produce Mermaid code for a system overview so a reader can quickly understand how the system fits together.
Make sure the Mermaid code contains no invalid characters such as stray semicolons, broken indentation, or other syntax errors.
Keep it simple enough to render as-is.
Do not put file names inside node labels, for example avoid H[mongo.py (Data Access Layer)].
Do not add alternate names in brackets, for example avoid [Main Application (main.go)]; a single name is enough.
Do not use special characters in labels, for example no / in D[/generate] and no () in A[main()].
";

/// What one iteration produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub document: String,
    /// Diagram source derived from the document, when requested and successful.
    pub overview: Option<String>,
}

#[async_trait]
pub trait Generator: Send + Sync {
    /// Whether the generator can accept requests at all.
    fn ready(&self) -> Result<()> {
        Ok(())
    }

    /// Submit `prompt` and return the generated text.
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Build the overview request from a generated document.
pub fn overview_prompt(document: &str) -> String {
    format!("{}\n{}", OVERVIEW_PREAMBLE, document)
}

/// Calls `POST {endpoint}/models/{model}:generateContent`.
pub struct GeminiGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key_env: String,
    api_key: Option<String>,
    max_retries: u32,
    backoff: Duration,
}

impl GeminiGenerator {
    /// Create a generator, reading the API key from the environment.
    pub fn from_config(config: &GenerationConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            tracing::warn!(
                var = %config.api_key_env,
                "generation API key not set; requests will be refused"
            );
        }
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &GenerationConfig, api_key: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key_env: config.api_key_env.clone(),
            api_key,
            max_retries: config.max_retries,
            backoff: Duration::from_secs(1),
        })
    }

    /// Override the base retry delay.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    fn ready(&self) -> Result<()> {
        if self.api_key.is_none() {
            return Err(PipelineError::Configuration(format!(
                "{} environment variable not set",
                self.api_key_env
            )));
        }
        Ok(())
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        self.ready()?;
        let api_key = self.api_key.as_deref().unwrap_or_default();

        let body = serde_json::json!({
            "contents": [
                { "parts": [ { "text": prompt } ] }
            ]
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = self.backoff * (1u32 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(self.url())
                .header("x-goog-api-key", api_key)
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let text = response
                            .text()
                            .await
                            .map_err(|e| PipelineError::backend(SERVICE, e.to_string()))?;
                        return parse_generate_response(&text);
                    }

                    let body_text = response.text().await.unwrap_or_default();

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::warn!(%status, attempt, "generation request failed, retrying");
                        last_err = Some(PipelineError::backend(
                            SERVICE,
                            format!("HTTP {}: {}", status, body_text),
                        ));
                        continue;
                    }

                    return Err(PipelineError::backend(
                        SERVICE,
                        format!("HTTP {}: {}", status, body_text),
                    ));
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "generation request error, retrying");
                    last_err = Some(PipelineError::backend(SERVICE, e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| PipelineError::backend(SERVICE, "generation failed after retries")))
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

/// Extract the text of the first candidate.
fn parse_generate_response(body: &str) -> Result<String> {
    let parsed: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| PipelineError::backend(SERVICE, format!("could not parse response JSON: {}", e)))?;

    let text: String = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(PipelineError::backend(SERVICE, "no content found in response"));
    }

    Ok(text)
}
