//! C4: the embedding client, a thin `reqwest` wrapper around an
//! Ollama-compatible HTTP API (`POST /api/embeddings`). Grounded on the
//! teacher's `llm/external.rs` HTTP plumbing (timeouts, HTML-vs-JSON
//! response detection) but talking to a single fixed local-network
//! endpoint shape rather than the teacher's multi-provider dispatch.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{RagError, Result};

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
    fn model_name(&self) -> &str;
}

pub struct OllamaEmbeddingClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

impl OllamaEmbeddingClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(timeout_secs))
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
impl EmbeddingClient for OllamaEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let endpoint = format!("{}/api/embeddings", self.base_url);
        let response = self
            .client
            .post(&endpoint)
            .json(&EmbeddingRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if body.to_lowercase().contains("not found") || body.to_lowercase().contains("does not exist") {
                return Err(RagError::UnknownModel(self.model.clone()));
            }
            return Err(RagError::Other(format!("embedding request failed ({status}): {body}")));
        }

        let parsed: EmbeddingResponse = Self::parse_json(response, &endpoint).await?;
        Ok(parsed.embedding)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
