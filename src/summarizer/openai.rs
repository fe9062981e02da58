//! OpenAI-compatible chat-completions summarizer.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::env_vars;

use super::{SummarizeOptions, Summarizer, SummarizerError};

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

const SYSTEM_PROMPT: &str =
    "You compress conversation history into structured JSON summaries. \
     Respond with a single JSON object and nothing else.";

#[derive(Clone)]
pub struct OpenAiSummarizer {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<RequestMessage<'a>>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct RequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl OpenAiSummarizer {
    pub fn new(api_key: &str, endpoint: Option<&str>, model: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.unwrap_or(DEFAULT_ENDPOINT).to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    /// Build from SUMMARIZER_* environment variables. Returns None when no
    /// API key is configured (callers fall back to the mock or skip wiring).
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var(env_vars::SUMMARIZER_API_KEY).ok()?;
        let endpoint = std::env::var(env_vars::SUMMARIZER_ENDPOINT).ok();
        let model = std::env::var(env_vars::SUMMARIZER_MODEL)
            .unwrap_or_else(|_| "gpt-4o-mini".to_string());
        Some(Self::new(&api_key, endpoint.as_deref(), &model))
    }

    async fn send(&self, prompt: &str) -> Result<String, SummarizerError> {
        let body = CompletionRequest {
            model: &self.model,
            messages: vec![
                RequestMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                RequestMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: 2048,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SummarizerError::Transport(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(SummarizerError::Transport(format!(
                "API returned {}: {}",
                status, detail
            )));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| SummarizerError::Transport(format!("invalid response body: {}", e)))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| SummarizerError::Transport("empty completion".to_string()))
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn invoke(
        &self,
        prompt: &str,
        options: &SummarizeOptions,
    ) -> Result<String, SummarizerError> {
        match tokio::time::timeout(options.timeout, self.send(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(SummarizerError::Timeout),
        }
    }
}
