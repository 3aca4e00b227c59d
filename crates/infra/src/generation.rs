use std::time::Duration;

use mpbridge_domain::ports::BoxFuture;
use mpbridge_domain::ports::generation::{GenerationError, GenerationGateway};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AppConfig;

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Generation backend speaking the OpenAI-compatible chat completions API.
#[derive(Debug, Clone)]
pub struct ChatCompletionGateway {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    system_prompt: String,
    temperature: f32,
    max_tokens: u32,
}

impl ChatCompletionGateway {
    pub fn from_config(config: &AppConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.llm_timeout_ms.max(1)))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            endpoint: format!(
                "{}/chat/completions",
                config.llm_api_url.trim().trim_end_matches('/')
            ),
            api_key: config.llm_api_key.trim().to_string(),
            model: config.llm_model.clone(),
            system_prompt: config.llm_system_prompt.clone(),
            temperature: config.llm_temperature,
            max_tokens: config.llm_max_tokens,
        }
    }

    async fn complete(&self, prompt: String) -> Result<String, GenerationError> {
        let mut messages = Vec::with_capacity(2);
        if !self.system_prompt.trim().is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: &self.system_prompt,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &prompt,
        });
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| GenerationError::Unavailable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            let detail = format!("status {}: {message}", status.as_u16());
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => GenerationError::Unavailable(detail),
                _ if status.is_server_error() => GenerationError::Unavailable(detail),
                _ => GenerationError::Rejected(detail),
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|err| GenerationError::InvalidResponse(err.to_string()))?;
        let content = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GenerationError::InvalidResponse("response has no choices".into()))?
            .message
            .content
            .unwrap_or_default();
        debug!(chars = content.chars().count(), "chat completion received");
        Ok(content)
    }
}

impl GenerationGateway for ChatCompletionGateway {
    fn generate(&self, prompt: &str) -> BoxFuture<'_, Result<String, GenerationError>> {
        Box::pin(self.complete(prompt.to_string()))
    }
}
