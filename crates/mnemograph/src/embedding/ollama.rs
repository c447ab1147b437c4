//! Local embedding provider speaking the Ollama HTTP API
//!
//! Batch calls go to `POST {endpoint}/api/embed` with `{model, input}`.
//! Servers that reject batch input with HTTP 400 get a sequential
//! per-item fallback that preserves input order.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::embedding::{resolve_dimensions, retry_delay, EmbeddingProvider};
use crate::error::{MnemographError, Result};

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: EmbedInput<'a>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum EmbedInput<'a> {
    Single(&'a str),
    Batch(&'a [String]),
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

enum Reply {
    Embeddings(Vec<Vec<f32>>),
    /// HTTP 400 on a batch request: the server wants one input at a time
    BatchUnsupported,
}

/// Embedding provider backed by a local Ollama instance
pub struct OllamaEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: usize,
    max_retries: u32,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| MnemographError::Config(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.ollama_endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimensions: resolve_dimensions(&config.model, config.dimensions),
            max_retries: config.http_retry,
        })
    }

    /// One request with bounded retries on safe-transient failures
    async fn request(&self, input: EmbedInput<'_>, is_batch: bool) -> Result<Reply> {
        let url = format!("{}/api/embed", self.endpoint);
        let body = EmbedRequest {
            model: &self.model,
            input,
        };

        let mut attempt = 0u32;
        loop {
            let mut retry_after_secs: Option<u64> = None;
            let error = match self.client.post(&url).json(&body).send().await {
                Err(e) if e.is_timeout() => {
                    MnemographError::EmbeddingTransient(format!("timeout: {e}"))
                }
                Err(e) => MnemographError::EmbeddingTransient(e.to_string()),
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: EmbedResponse = resp
                            .json()
                            .await
                            .map_err(|e| MnemographError::EmbeddingTransient(e.to_string()))?;
                        return Ok(Reply::Embeddings(parsed.embeddings));
                    }
                    if status.as_u16() == 400 && is_batch {
                        debug!("ollama rejected batch input, falling back to sequential");
                        return Ok(Reply::BatchUnsupported);
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
            // A provider-supplied Retry-After hint wins over our backoff
            let delay = match retry_after_secs {
                Some(secs) => retry_delay(attempt).max(Duration::from_secs(secs)),
                None => retry_delay(attempt),
            };
            warn!("ollama embed attempt {attempt} failed, retrying in {delay:?}: {error}");
            tokio::time::sleep(delay).await;
        }
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        match self.request(EmbedInput::Single(text), false).await? {
            Reply::Embeddings(mut vectors) if !vectors.is_empty() => Ok(vectors.remove(0)),
            Reply::Embeddings(_) => Err(MnemographError::EmbeddingPermanent(
                "empty embeddings array in response".to_string(),
            )),
            Reply::BatchUnsupported => unreachable!("single request cannot be batch-rejected"),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_one(text).await
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        match self.request(EmbedInput::Batch(texts), true).await? {
            Reply::Embeddings(vectors) => {
                if vectors.len() != texts.len() {
                    return Err(MnemographError::LengthMismatch {
                        expected: texts.len(),
                        actual: vectors.len(),
                    });
                }
                Ok(vectors)
            }
            Reply::BatchUnsupported => {
                let mut vectors = Vec::with_capacity(texts.len());
                for text in texts {
                    vectors.push(self.embed_one(text).await?);
                }
                Ok(vectors)
            }
        }
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
