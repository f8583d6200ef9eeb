//! C5: the chat client, a thin `reqwest` wrapper around an
//! Ollama-compatible HTTP API (`POST /api/chat`). Grounded on the teacher's
//! `llm/external.rs` HTTP plumbing, narrowed to the single provider shape
//! this service needs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{RagError, Result};
use crate::types::ChatRole;

#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role: role.as_str().to_string(),
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat(&self, messages: &[ChatTurn], temperature: f32, num_predict: u32) -> Result<String>;
    fn model_name(&self) -> &str;
}

pub struct OllamaChatClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

impl OllamaChatClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(timeout_secs))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
        })
    }

    async fn parse_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        endpoint: &str,
    ) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;
        let trimmed = body.trim_start();
        if trimmed.starts_with('<') {
            let preview: String = trimmed.chars().take(200).collect();
            return Err(RagError::Other(format!(
                "endpoint {endpoint} returned HTML instead of JSON (HTTP {status}): {preview}"
            )));
        }
        serde_json::from_str(&body).map_err(|e| {
            let preview: String = body.chars().take(300).collect();
            RagError::Other(format!(
                "failed to parse JSON from {endpoint} (HTTP {status}): {e}. body: {preview}"
            ))
        })
    }
}

#[async_trait]
impl ChatClient for OllamaChatClient {
    async fn chat(&self, messages: &[ChatTurn], temperature: f32, num_predict: u32) -> Result<String> {
        let endpoint = format!("{}/api/chat", self.base_url);
        let response = self
            .client
            .post(&endpoint)
            .json(&ChatRequest {
                model: &self.model,
                messages,
                stream: false,
                options: ChatOptions {
                    temperature,
                    num_predict,
                },
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let lowered = body.to_lowercase();
            if lowered.contains("not found") || lowered.contains("does not exist") {
                return Err(RagError::UnknownModel(self.model.clone()));
            }
            return Err(RagError::Other(format!("chat request failed ({status}): {body}")));
        }

        let parsed: ChatResponse = Self::parse_json(response, &endpoint).await?;
        Ok(parsed.message.content)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_turn_maps_role_to_lowercase_string() {
        let turn = ChatTurn::new(ChatRole::System, "be terse");
        assert_eq!(turn.role, "system");
    }
}
