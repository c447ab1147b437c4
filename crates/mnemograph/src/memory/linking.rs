//! Similarity-driven auto-linking
//!
//! After a memory gains its embedding, the linker searches for the most
//! similar existing memories under the same access context and emits
//! `relates_to` edges to the best candidates. Individual edge failures
//! are tolerated; the caller gets a count of edges actually created.

use serde_json::{json, Map};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::LinkerConfig;
use crate::error::Result;
use crate::memory::access::AccessContext;
use crate::memory::types::{Edge, EdgeType, Memory};
use crate::storage::{Backend, SearchOptions};

pub struct AutoLinker {
    backend: Arc<dyn Backend>,
    config: LinkerConfig,
}

impl AutoLinker {
    pub fn new(backend: Arc<dyn Backend>, config: LinkerConfig) -> Self {
        Self { backend, config }
    }

    /// Link a freshly indexed memory to its nearest neighbors.
    ///
    /// Returns the number of new edges created (repeat puts of an
    /// existing triple do not count).
    pub async fn link_similar(&self, memory: &Memory, ctx: &AccessContext) -> Result<usize> {
        let Some(embedding) = &memory.embedding else {
            debug!("skipping auto-link for {}: no embedding", memory.id);
            return Ok(0);
        };

        let candidates = self
            .backend
            .search_memories(
                embedding,
                ctx,
                &SearchOptions {
                    limit: self.config.link_max_candidates,
                    threshold: self.config.link_threshold,
                    ..Default::default()
                },
            )
            .await?;

        let mut created = 0usize;
        for hit in candidates
            .into_iter()
            .filter(|hit| hit.memory.id != memory.id)
            .take(self.config.link_max_links)
        {
            let mut metadata = Map::new();
            metadata.insert("linked_by".to_string(), json!("auto"));
            metadata.insert("similarity_score".to_string(), json!(hit.score));

            let edge = match Edge::new(
                memory.id.clone(),
                hit.memory.id.clone(),
                EdgeType::RelatesTo,
                hit.score.clamp(0.0, 1.0),
                memory.confidence.min(hit.memory.confidence),
                memory.scope.more_restrictive(hit.memory.scope),
                metadata,
            ) {
                Ok(edge) => edge,
                Err(e) => {
                    warn!("auto-link edge for {} invalid: {e}", memory.id);
                    continue;
                }
            };

            match self.backend.put_edge(&edge, ctx).await {
                Ok(stored) if stored.id == edge.id => created += 1,
                Ok(_) => {} // triple already existed
                Err(e) => {
                    warn!(
                        "auto-link {} -> {} failed: {e}",
                        memory.id, hit.memory.id
                    );
                }
            }
        }

        debug!("auto-linked {}: {created} edges", memory.id);
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::MemoryDraft;
    use crate::storage::InMemoryBackend;

    async fn seed(backend: &dyn Backend, id: &str, embedding: Vec<f32>) {
        let memory = Memory::from_draft(
            MemoryDraft::new(format!("content {id}"))
                .id(id)
                .agent_id("a1")
                .embedding(embedding),
        )
        .unwrap();
        backend
            .put_memory(&memory, &AccessContext::agent("a1"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_links_only_above_threshold() {
        let backend: Arc<dyn Backend> = Arc::new(InMemoryBackend::new());
        let ctx = AccessContext::agent("a1");
        seed(backend.as_ref(), "near", vec![1.0, 0.0, 0.0]).await;
        seed(backend.as_ref(), "close", vec![0.9, 0.1, 0.0]).await;
        seed(backend.as_ref(), "far", vec![0.0, 1.0, 0.0]).await;
        seed(backend.as_ref(), "new", vec![1.0, 0.0, 0.0]).await;

        let linker = AutoLinker::new(backend.clone(), LinkerConfig::default());
        let new_memory = backend.get_memory("new", &ctx).await.unwrap();
        let created = linker.link_similar(&new_memory, &ctx).await.unwrap();

        assert_eq!(created, 2);
        let neighbors = backend
            .neighbors(
                "new",
                crate::storage::Direction::Outgoing,
                &ctx,
                &Default::default(),
            )
            .await
            .unwrap();
        let mut ids: Vec<&str> = neighbors.iter().map(|n| n.memory.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["close", "near"]);
        for n in &neighbors {
            assert_eq!(n.edge.edge_type, EdgeType::RelatesTo);
            assert_eq!(n.edge.metadata.get("linked_by").unwrap(), "auto");
            assert!(n.edge.metadata.contains_key("similarity_score"));
        }
    }

    #[tokio::test]
    async fn test_respects_max_links() {
        let backend: Arc<dyn Backend> = Arc::new(InMemoryBackend::new());
        let ctx = AccessContext::agent("a1");
        for i in 0..8 {
            seed(backend.as_ref(), &format!("m{i}"), vec![1.0, 0.01 * i as f32]).await;
        }
        seed(backend.as_ref(), "new", vec![1.0, 0.0]).await;

        let linker = AutoLinker::new(
            backend.clone(),
            LinkerConfig {
                link_max_links: 3,
                ..Default::default()
            },
        );
        let new_memory = backend.get_memory("new", &ctx).await.unwrap();
        let created = linker.link_similar(&new_memory, &ctx).await.unwrap();
        assert_eq!(created, 3);
    }

    #[tokio::test]
    async fn test_no_embedding_is_a_noop() {
        let backend: Arc<dyn Backend> = Arc::new(InMemoryBackend::new());
        let ctx = AccessContext::agent("a1");
        let memory = Memory::from_draft(MemoryDraft::new("plain").id("plain").agent_id("a1"))
            .unwrap();
        backend.put_memory(&memory, &ctx).await.unwrap();

        let linker = AutoLinker::new(backend.clone(), LinkerConfig::default());
        assert_eq!(linker.link_similar(&memory, &ctx).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_repeat_linking_creates_nothing_new() {
        let backend: Arc<dyn Backend> = Arc::new(InMemoryBackend::new());
        let ctx = AccessContext::agent("a1");
        seed(backend.as_ref(), "peer", vec![1.0, 0.0]).await;
        seed(backend.as_ref(), "new", vec![1.0, 0.0]).await;

        let linker = AutoLinker::new(backend.clone(), LinkerConfig::default());
        let new_memory = backend.get_memory("new", &ctx).await.unwrap();
        assert_eq!(linker.link_similar(&new_memory, &ctx).await.unwrap(), 1);
        assert_eq!(linker.link_similar(&new_memory, &ctx).await.unwrap(), 0);
    }
}
