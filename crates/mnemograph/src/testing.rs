//! Test utilities - stub embedding provider and fixtures
//!
//! [`StubEmbedder`] serves fixed vectors for configured texts and
//! deterministic hash-derived vectors for everything else, so tests can
//! pin exact similarities without a model or a network.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::embedding::EmbeddingProvider;
use crate::error::{MnemographError, Result};

/// Deterministic embedding provider for tests
#[derive(Clone, Default)]
pub struct StubEmbedder {
    dimensions: usize,
    fixed: HashMap<String, Vec<f32>>,
    failure: Option<String>,
    batch_calls: Arc<AtomicUsize>,
}

impl StubEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            fixed: HashMap::new(),
            failure: None,
            batch_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Pin the exact vector returned for a text
    pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.fixed.insert(text.to_string(), vector);
        self
    }

    /// Make every call fail with a transient error
    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    /// Counter of `embed_many` invocations, shared with clones
    pub fn batch_calls(&self) -> Arc<AtomicUsize> {
        self.batch_calls.clone()
    }

    /// Deterministic pseudo-random vector for unpinned texts, normalized
    /// to unit length
    fn hash_vector(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let seed = hasher.finish();

        let mut vector: Vec<f32> = (0..self.dimensions)
            .map(|i| {
                let x = seed
                    .wrapping_mul(i as u64 + 1)
                    .wrapping_add(0x9e3779b97f4a7c15);
                ((x as f32) / (u64::MAX as f32)) * 2.0 - 1.0
            })
            .collect();

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }

    fn lookup(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(message) = &self.failure {
            return Err(MnemographError::EmbeddingTransient(message.clone()));
        }
        Ok(self
            .fixed
            .get(text)
            .cloned()
            .unwrap_or_else(|| self.hash_vector(text)))
    }
}

#[async_trait]
impl EmbeddingProvider for StubEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.lookup(text)
    }

    async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        texts.iter().map(|t| self.lookup(t)).collect()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "stub-embedder"
    }
}
