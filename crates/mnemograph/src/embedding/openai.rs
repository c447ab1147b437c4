//! Hosted embedding provider speaking the OpenAI embeddings API
//!
//! Requests go to `POST https://api.openai.com/v1/embeddings` with bearer
//! auth from config or the `OPENAI_API_KEY` environment variable. The
//! response items carry an `index`; the adapter re-sorts by it and
//! validates that the count matches the input before returning.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::warn;

use crate::config::EmbeddingConfig;
use crate::embedding::{resolve_dimensions, retry_delay, EmbeddingProvider};
use crate::error::{MnemographError, Result};

const EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

/// Embedding provider backed by the hosted OpenAI API
#[derive(Debug)]
pub struct OpenAiEmbedder {
    client: Client,
    api_key: String,
    model: String,
    dimensions: usize,
    max_retries: u32,
}

impl OpenAiEmbedder {
    /// Build the adapter; a missing credential is a configuration error
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config
            .openai_api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| {
                MnemographError::Config(
                    "openai adapter selected but no API key configured and OPENAI_API_KEY not set"
                        .to_string(),
                )
            })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| MnemographError::Config(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            dimensions: resolve_dimensions(&config.model, config.dimensions),
            max_retries: config.http_retry,
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = EmbeddingsRequest {
            model: &self.model,
            input: texts,
        };

        let mut attempt = 0u32;
        loop {
            let mut retry_after_secs: Option<u64> = None;
            let error = match self
                .client
                .post(EMBEDDINGS_URL)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
            {
                Err(e) if e.is_timeout() => {
                    MnemographError::EmbeddingTransient(format!("timeout: {e}"))
                }
                Err(e) => MnemographError::EmbeddingTransient(e.to_string()),
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: EmbeddingsResponse = resp
                            .json()
                            .await
                            .map_err(|e| MnemographError::EmbeddingTransient(e.to_string()))?;
                        return sort_by_index(parsed.data, texts.len());
                    }
                    retry_after_secs = resp
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse().ok());
                    let text = resp.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        MnemographError::EmbeddingTransient(format!("{status}: {text}"))
                    } else {
                        return Err(MnemographError::EmbeddingPermanent(format!(
                            "{status}: {text}"
                        )));
                    }
                }
            };

            if attempt >= self.max_retries {
                return Err(error);
            }
            attempt += 1;
            let delay = match retry_after_secs {
                Some(secs) => retry_delay(attempt).max(Duration::from_secs(secs)),
                None => retry_delay(attempt),
            };
            warn!("openai embed attempt {attempt} failed, retrying in {delay:?}: {error}");
            tokio::time::sleep(delay).await;
        }
    }
}

/// Re-sort response items by their index and validate the count
fn sort_by_index(mut items: Vec<EmbeddingItem>, expected: usize) -> Result<Vec<Vec<f32>>> {
    if items.len() != expected {
        return Err(MnemographError::LengthMismatch {
            expected,
            actual: items.len(),
        });
    }
    items.sort_by_key(|item| item.index);
    Ok(items.into_iter().map(|item| item.embedding).collect())
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.request(&[text.to_string()]).await?;
        Ok(vectors.remove(0))
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
