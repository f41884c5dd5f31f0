//! OpenAI-backed embedding and generation providers.
//!
//! The core issues no retries of its own; transient failures surface as
//! `RagError::Provider` with a code a caller-level retry policy can inspect.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{EmbeddingProvider, GenerationProvider};
use crate::error::{RagError, Result};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
// OpenAI accepts up to 2048 inputs per embeddings request.
const EMBED_BATCH_LIMIT: usize = 2048;

pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    embedding_model: String,
    generation_model: String,
}

impl OpenAiProvider {
    pub fn new(
        api_key: impl Into<String>,
        embedding_model: impl Into<String>,
        generation_model: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(request_timeout)
            .build()
            .map_err(|e| RagError::provider("transport", format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            embedding_model: embedding_model.into(),
            generation_model: generation_model.into(),
        })
    }

    /// Point the provider at an OpenAI-compatible endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let text = response.text().await.map_err(map_transport_error)?;

        if !status.is_success() {
            let code = match status.as_u16() {
                401 | 403 => "auth".to_string(),
                429 => "rate_limit".to_string(),
                s => format!("http_{s}"),
            };
            let preview: String = text.chars().take(300).collect();
            return Err(RagError::provider(code, format!("{url} returned {status}: {preview}")));
        }

        // Gateways sometimes return 200 with an HTML error page.
        let trimmed = text.trim_start();
        if trimmed.starts_with('<') {
            let preview: String = trimmed.chars().take(200).collect();
            return Err(RagError::provider(
                "protocol",
                format!("{url} returned HTML instead of JSON: {preview}"),
            ));
        }

        serde_json::from_str::<T>(&text).map_err(|e| {
            RagError::provider("protocol", format!("unparseable response from {url}: {e}"))
        })
    }
}

fn map_transport_error(e: reqwest::Error) -> RagError {
    if e.is_timeout() {
        RagError::provider(RagError::TIMEOUT, format!("request timed out: {e}"))
    } else {
        RagError::provider("transport", e.to_string())
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response: EmbeddingResponse = self
            .post_json(
                "embeddings",
                json!({ "input": texts, "model": self.embedding_model }),
            )
            .await?;

        if response.data.len() != texts.len() {
            return Err(RagError::provider(
                "protocol",
                format!(
                    "embedding response has {} vectors for {} inputs",
                    response.data.len(),
                    texts.len()
                ),
            ));
        }

        // The API tags each vector with its input index; reassemble in
        // input order rather than trusting response order.
        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    fn model_id(&self) -> &str {
        &self.embedding_model
    }

    fn max_batch_size(&self) -> usize {
        EMBED_BATCH_LIMIT
    }
}

#[async_trait]
impl GenerationProvider for OpenAiProvider {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let response: ChatResponse = self
            .post_json(
                "chat/completions",
                json!({
                    "model": self.generation_model,
                    "messages": [{ "role": "user", "content": prompt }],
                }),
            )
            .await?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| RagError::provider("protocol", "generation response had no choices"))
    }
}
