use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::ClaudeConfig;
use crate::error::{AppError, Result};

const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// Messages-API client for single-shot stage prompts.
///
/// Rate limits and server-side errors are retried here with exponential
/// backoff; an error that still surfaces from `generate` has exhausted its
/// retry budget.
pub struct ClaudeClient {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    request_timeout: Duration,
    max_retries: u32,
    initial_backoff: Duration,
}

/// One completed generation with its token usage.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub usage: Usage,
}

impl ClaudeClient {
    pub fn new(config: &ClaudeConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            max_retries: config.transient_max_retries,
            initial_backoff: Duration::from_secs(config.transient_backoff_secs),
        }
    }

    /// Run one prompt to completion, retrying transient failures internally.
    pub async fn generate(&self, system: &str, prompt: &str) -> Result<Completion> {
        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: system.to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let mut retries = 0u32;
        loop {
            match self.send_message(&request).await {
                Ok(response) => {
                    let content = extract_text(&response.content);
                    tracing::debug!(
                        input_tokens = response.usage.input_tokens,
                        output_tokens = response.usage.output_tokens,
                        "Claude response"
                    );
                    return Ok(Completion {
                        content,
                        usage: response.usage,
                    });
                }
                Err(e @ (AppError::ClaudeRateLimited(_) | AppError::ClaudeTransient(_))) => {
                    if retries >= self.max_retries {
                        tracing::warn!(retries, error = %e, "Claude retries exhausted");
                        return Err(e);
                    }
                    retries += 1;
                    let backoff = self.initial_backoff * 2u32.saturating_pow(retries - 1);
                    tracing::info!(
                        retry = retries,
                        backoff_secs = backoff.as_secs(),
                        error = %e,
                        "Transient Claude error, waiting before retry"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_message(&self, request: &MessagesRequest) -> Result<MessagesResponse> {
        let response = self
            .client
            .post(CLAUDE_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .timeout(self.request_timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::ClaudeTransient(format!(
                        "request timed out after {}s",
                        self.request_timeout.as_secs()
                    ))
                } else {
                    AppError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                429 => AppError::ClaudeRateLimited(format!("API returned 429: {body}")),
                500..=599 => AppError::ClaudeTransient(format!("API returned {status}: {body}")),
                _ => AppError::ClaudeApi(format!("API returned {status}: {body}")),
            });
        }

        let body = response.json::<MessagesResponse>().await?;
        Ok(body)
    }
}

// --- Request types ---

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: String,
    content: String,
}

// --- Response types ---

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

fn extract_text(content: &[ContentBlock]) -> String {
    content
        .iter()
        .filter_map(|block| {
            if let ContentBlock::Text { text } = block {
                Some(text.as_str())
            } else {
                None
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
