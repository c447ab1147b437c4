//! Storage backends
//!
//! A single [`Backend`] contract is implemented by the in-memory store and
//! the SQLite store. Services hold an `Arc<dyn Backend>` selected at
//! startup; backend choice never leaks into operation signatures.
//!
//! Every read path filters through [`AccessContext::can_access_memory`];
//! similarity search only considers memories that carry an embedding.

pub mod mem;
pub mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::memory::access::AccessContext;
use crate::memory::types::{Edge, EdgeType, Memory, MemoryType};

pub use mem::InMemoryBackend;
pub use sqlite::SqliteBackend;

/// Which edges to follow from a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

/// Filters for plain listing
#[derive(Debug, Clone)]
pub struct ListOptions {
    pub limit: usize,
    pub memory_type: Option<MemoryType>,
    pub tags: Option<Vec<String>>,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            limit: 50,
            memory_type: None,
            tags: None,
        }
    }
}

/// Filters for similarity search
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    /// Minimum cosine similarity for a hit
    pub threshold: f32,
    pub memory_type: Option<MemoryType>,
    pub tags: Option<Vec<String>>,
    pub min_confidence: Option<f32>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 5,
            threshold: 0.3,
            memory_type: None,
            tags: None,
            min_confidence: None,
        }
    }
}

/// Filters for neighbor queries
#[derive(Debug, Clone)]
pub struct NeighborOptions {
    pub edge_type: Option<EdgeType>,
    pub min_weight: f32,
    pub limit: usize,
}

impl Default for NeighborOptions {
    fn default() -> Self {
        Self {
            edge_type: None,
            min_weight: 0.0,
            limit: 50,
        }
    }
}

/// Filters for depth-bounded traversal
#[derive(Debug, Clone)]
pub struct ExpandOptions {
    pub depth: usize,
    pub min_weight: f32,
    pub min_confidence: f32,
    pub limit: usize,
}

impl Default for ExpandOptions {
    fn default() -> Self {
        Self {
            depth: 2,
            min_weight: 0.3,
            min_confidence: 0.5,
            limit: 50,
        }
    }
}

/// A similarity search hit
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub memory: Memory,
    /// Cosine similarity against the query vector
    pub score: f32,
}

/// A neighbor query hit: the peer memory plus the connecting edge
#[derive(Debug, Clone)]
pub struct NeighborHit {
    pub memory: Memory,
    pub edge: Edge,
}

/// Result of a graph expansion: the collected memories and the edges of
/// the induced subgraph (both endpoints in the memory set)
#[derive(Debug, Clone, Default)]
pub struct Subgraph {
    pub memories: Vec<Memory>,
    pub edges: Vec<Edge>,
}

/// Storage contract shared by all backends.
///
/// `put_memory` is a full replacement, idempotent on id; re-putting with a
/// different `agent_id` is a validation error. `put_edge` is idempotent on
/// `(from_id, to_id, edge_type)`: the first writer wins and repeats return
/// the stored edge. `delete_memory` cascades to all incident edges.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Prepare the backend for use (open files, run migrations)
    async fn start(&self) -> Result<()>;

    /// Graceful shutdown
    async fn stop(&self) -> Result<()>;

    async fn put_memory(&self, memory: &Memory, ctx: &AccessContext) -> Result<Memory>;

    async fn get_memory(&self, id: &str, ctx: &AccessContext) -> Result<Memory>;

    async fn delete_memory(&self, id: &str, ctx: &AccessContext) -> Result<()>;

    async fn list_memories(&self, ctx: &AccessContext, opts: &ListOptions) -> Result<Vec<Memory>>;

    /// Scope-filtered cosine search over memories that carry an embedding,
    /// sorted by similarity descending, hits below `threshold` dropped
    async fn search_memories(
        &self,
        query: &[f32],
        ctx: &AccessContext,
        opts: &SearchOptions,
    ) -> Result<Vec<SearchHit>>;

    async fn put_edge(&self, edge: &Edge, ctx: &AccessContext) -> Result<Edge>;

    async fn delete_edge(&self, from_id: &str, to_id: &str, edge_type: EdgeType) -> Result<()>;

    async fn neighbors(
        &self,
        id: &str,
        direction: Direction,
        ctx: &AccessContext,
        opts: &NeighborOptions,
    ) -> Result<Vec<NeighborHit>>;

    /// Depth-limited BFS over outgoing edges, pruning visited nodes, edges
    /// below `min_weight`, and targets below `min_confidence` or not
    /// accessible under `ctx`
    async fn expand(
        &self,
        seeds: &[String],
        ctx: &AccessContext,
        opts: &ExpandOptions,
    ) -> Result<Subgraph>;

    /// Best-effort access bump on a successful similarity hit: increments
    /// `access_count` and refreshes `last_accessed_at`
    async fn bump_access(&self, ids: &[String]) -> Result<()>;
}

/// Cosine similarity between two vectors.
///
/// Zero-magnitude or mismatched inputs yield 0.0, never NaN. Output is
/// clamped to [-1, 1]; for normalized embeddings the practical range is
/// [0, 1].
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Shared tag filter semantics: a memory matches when it carries at least
/// one of the requested tags
pub(crate) fn tags_match(memory_tags: &[String], wanted: &[String]) -> bool {
    wanted.iter().any(|t| memory_tags.iter().any(|m| m == t))
}
