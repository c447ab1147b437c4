//! Embedding adapters
//!
//! A single [`EmbeddingProvider`] contract covers both the local Ollama
//! adapter and the hosted OpenAI adapter. Adapters own the retry policy:
//! only safe-transient failures (timeouts, 5xx, 429) are retried, with
//! exponential backoff and jitter; everything else propagates verbatim.

pub mod batcher;
pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;

use crate::error::Result;

pub use batcher::EmbeddingBatcher;
pub use ollama::OllamaEmbedder;
pub use openai::OpenAiEmbedder;

/// Contract for embedding providers.
///
/// `embed_many` preserves input order and returns exactly one vector per
/// input; providers that respond out of order re-sort before returning.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts, order preserved
    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Vector length this provider produces
    fn dimensions(&self) -> usize;

    /// Model name or identifier
    fn model_name(&self) -> &str;
}

/// Fixed dimensionality of well-known embedding models.
///
/// Unknown models fall back to the configured `embedding_dimensions`.
pub fn model_dimensions(model: &str) -> Option<usize> {
    match model {
        "nomic-embed-text" => Some(768),
        "mxbai-embed-large" => Some(1024),
        "all-minilm" => Some(384),
        "snowflake-arctic-embed" => Some(1024),
        "text-embedding-3-small" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        "text-embedding-ada-002" => Some(1536),
        _ => None,
    }
}

/// Resolve the vector length for a model, falling back to the configured
/// default
pub fn resolve_dimensions(model: &str, configured: usize) -> usize {
    model_dimensions(model).unwrap_or(configured)
}

/// Backoff delay before retry `attempt` (1-based): exponential doubling
/// from 500 ms with up to 50% added jitter
pub(crate) fn retry_delay(attempt: u32) -> Duration {
    let base_ms = 500u64.saturating_mul(1 << attempt.min(6));
    let jitter = rand::thread_rng().gen_range(0..=base_ms / 2);
    Duration::from_millis(base_ms + jitter)
}
