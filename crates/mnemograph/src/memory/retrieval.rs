//! Memory retrieval
//!
//! The recall pipeline: embed the query, run a scoped similarity search,
//! optionally widen the result set through the relationship graph, and
//! bump access stats on everything returned.
//!
//! Without a configured embedding adapter recall returns an empty result
//! set rather than an error; callers are free to operate embedding-free.

use std::sync::Arc;
use tracing::debug;

use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::memory::access::AccessContext;
use crate::memory::graph::GraphService;
use crate::memory::types::{Edge, Memory, MemoryType};
use crate::storage::{Backend, ExpandOptions, SearchOptions};

/// Score attached to memories pulled in by graph expansion rather than
/// direct similarity
const EXPANSION_SCORE: f32 = 0.5;

/// Options for a recall
#[derive(Debug, Clone)]
pub struct RecallOptions {
    pub limit: usize,
    pub threshold: f32,
    pub memory_type: Option<MemoryType>,
    pub tags: Option<Vec<String>>,
    pub min_confidence: Option<f32>,
    /// Widen hits through outgoing edges
    pub expand_graph: bool,
    pub graph_depth: usize,
}

impl Default for RecallOptions {
    fn default() -> Self {
        Self {
            limit: 5,
            threshold: 0.3,
            memory_type: None,
            tags: None,
            min_confidence: None,
            expand_graph: false,
            graph_depth: 1,
        }
    }
}

/// A recalled memory with its relevance score
#[derive(Debug, Clone)]
pub struct ScoredMemory {
    pub memory: Memory,
    pub score: f32,
}

pub struct RetrievalPipeline {
    backend: Arc<dyn Backend>,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    graph: Arc<GraphService>,
}

impl RetrievalPipeline {
    pub fn new(
        backend: Arc<dyn Backend>,
        provider: Option<Arc<dyn EmbeddingProvider>>,
        graph: Arc<GraphService>,
    ) -> Self {
        Self {
            backend,
            provider,
            graph,
        }
    }

    /// Recall memories relevant to a query
    pub async fn recall(
        &self,
        query: &str,
        ctx: &AccessContext,
        opts: &RecallOptions,
    ) -> Result<Vec<ScoredMemory>> {
        Ok(self.recall_with_edges(query, ctx, opts).await?.0)
    }

    /// Recall plus the expansion edges, for context reduction
    pub async fn recall_with_edges(
        &self,
        query: &str,
        ctx: &AccessContext,
        opts: &RecallOptions,
    ) -> Result<(Vec<ScoredMemory>, Vec<Edge>)> {
        let Some(provider) = &self.provider else {
            debug!("recall without embedding adapter, returning empty");
            return Ok((Vec::new(), Vec::new()));
        };

        let query_embedding = provider.embed(query).await?;
        let hits = self
            .backend
            .search_memories(
                &query_embedding,
                ctx,
                &SearchOptions {
                    limit: opts.limit,
                    threshold: opts.threshold,
                    memory_type: opts.memory_type,
                    tags: opts.tags.clone(),
                    min_confidence: opts.min_confidence,
                },
            )
            .await?;

        let mut scored: Vec<ScoredMemory> = hits
            .into_iter()
            .map(|hit| ScoredMemory {
                memory: hit.memory,
                score: hit.score,
            })
            .collect();

        let mut edges = Vec::new();
        if opts.expand_graph && !scored.is_empty() {
            let seeds: Vec<String> = scored.iter().map(|s| s.memory.id.clone()).collect();
            let subgraph = self
                .graph
                .expand(
                    &seeds,
                    ctx,
                    &ExpandOptions {
                        depth: opts.graph_depth,
                        ..Default::default()
                    },
                )
                .await?;
            edges = subgraph.edges;

            // Merge: expanded memories join at a flat score, already
            // present ones keep the better of the two; then threshold and
            // limit apply again to the merged set
            for memory in subgraph.memories {
                match scored.iter_mut().find(|s| s.memory.id == memory.id) {
                    Some(existing) => existing.score = existing.score.max(EXPANSION_SCORE),
                    None => scored.push(ScoredMemory {
                        memory,
                        score: EXPANSION_SCORE,
                    }),
                }
            }
            scored.retain(|s| s.score >= opts.threshold);
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(opts.limit);

        // Best-effort access bump; a failure never fails the recall
        let ids: Vec<String> = scored.iter().map(|s| s.memory.id.clone()).collect();
        if !ids.is_empty() {
            if let Err(e) = self.backend.bump_access(&ids).await {
                debug!("access bump failed: {e}");
            }
        }

        Ok((scored, edges))
    }
}
