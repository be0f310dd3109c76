//! Chat-completion client for the model-backed collaborators
//!
//! A single trait method is all the planner, integrator and validator need:
//! a system prompt plus one user turn in, the assistant text out. The
//! production client speaks the OpenAI-compatible `/chat/completions` API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::LlmConfig;
use crate::errors::{AppError, AppResult};

/// Minimal chat-completion capability
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete one exchange and return the assistant's text
    async fn complete(&self, system: &str, user: &str) -> AppResult<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible HTTP client
pub struct OpenAiClient {
    client: Client,
    endpoint: String,
    api_key: SecretString,
    model: String,
}

impl OpenAiClient {
    /// Build a client with a per-request timeout
    ///
    /// # Errors
    ///
    /// - `Internal` if the HTTP client cannot be constructed
    pub fn new(config: &LlmConfig, timeout_ms: u64) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, system: &str, user: &str) -> AppResult<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(format!("model request timed out: {e}"))
                } else {
                    AppError::Orchestration(format!("model request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Orchestration(format!(
                "model endpoint returned {status}: {}",
                body.chars().take(500).collect::<String>()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::Orchestration(format!("malformed model response: {e}")))?;
        let content = extract_content(parsed)?;
        debug!(model = %self.model, chars = content.len(), "model completion received");
        Ok(content)
    }
}

fn extract_content(response: ChatResponse) -> AppResult<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|c| c.trim().to_owned())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::orchestration("model returned no content"))
}

#[cfg(test)]
mod tests {
    use super::{ChatResponse, extract_content};

    #[test]
    fn extracts_first_choice_content() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"  hello  "}}]}"#,
        )
        .expect("valid json");
        assert_eq!(extract_content(parsed).expect("content"), "hello");
    }

    #[test]
    fn empty_or_missing_content_is_an_orchestration_error() {
        let no_choices: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).expect("json");
        assert_eq!(
            extract_content(no_choices).expect_err("must fail").kind(),
            "orchestration"
        );

        let null_content: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":null}}]}"#).expect("json");
        assert!(extract_content(null_content).is_err());
    }
}
