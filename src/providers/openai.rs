//! OpenAI-compatible provider implementation
//!
//! Connects to any endpoint speaking the `/chat/completions` protocol
//! (OpenAI, Ollama's compatibility layer, local inference servers,
//! test mocks). The configurable `api_base` keeps the provider
//! pointable at a mock server in tests.

use crate::config::ProviderConfig;
use crate::error::{CoachflowError, Result};
use crate::providers::{ChatMessage, CompletionRequest, Provider};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// OpenAI-compatible chat completions provider
pub struct OpenAiProvider {
    client: Client,
    config: ProviderConfig,
}

/// Request body for the chat completions API
#[derive(Debug, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

/// Response body from the chat completions API
#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiProvider {
    /// Creates a new provider from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.api_base.trim_end_matches('/'))
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(instruction) = &request.system_instruction {
            messages.push(ChatMessage::system(instruction.clone()));
        }
        messages.extend(request.messages);

        let body = ChatCompletionsRequest {
            model: self.config.model.clone(),
            messages,
            temperature: request.temperature.unwrap_or(self.config.temperature),
            max_tokens: request.max_output_tokens,
        };

        let mut http_request = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.config.api_key {
            http_request = http_request.bearer_auth(key);
        }

        tracing::debug!(model = %self.config.model, "Sending completion request");
        let response = http_request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CoachflowError::Provider(format!(
                "completion request failed with status {}: {}",
                status,
                detail.chars().take(200).collect::<String>()
            ))
            .into());
        }

        let parsed: ChatCompletionsResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                CoachflowError::Provider("completion response contained no choices".to_string())
            })?;

        Ok(content)
    }
}
