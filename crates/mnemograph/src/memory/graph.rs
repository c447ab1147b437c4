//! Graph operations over stored memories
//!
//! Thin dispatch over the backend's edge primitives, plus the scope
//! derivation rule: an edge is as restrictive as the more restrictive of
//! its endpoints.

use serde_json::Map;
use serde_json::Value;
use std::sync::Arc;

use crate::error::Result;
use crate::memory::access::AccessContext;
use crate::memory::types::{Edge, EdgeType};
use crate::storage::{Backend, Direction, ExpandOptions, NeighborHit, NeighborOptions, Subgraph};

/// Traversal depth is capped regardless of what the caller asks for
pub const EXPAND_DEPTH_MAX: usize = 3;

/// Attributes for a new edge
#[derive(Debug, Clone)]
pub struct LinkOptions {
    pub weight: f32,
    pub confidence: f32,
    pub metadata: Map<String, Value>,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            weight: 0.5,
            confidence: 0.7,
            metadata: Map::new(),
        }
    }
}

pub struct GraphService {
    backend: Arc<dyn Backend>,
}

impl GraphService {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Create (or find) the edge between two memories.
    ///
    /// Both endpoints are loaded under the caller's context first, so an
    /// invisible endpoint fails the same way a missing one does not leak
    /// anything. Idempotent on `(from, to, type)`.
    pub async fn link(
        &self,
        from_id: &str,
        to_id: &str,
        edge_type: EdgeType,
        opts: LinkOptions,
        ctx: &AccessContext,
    ) -> Result<Edge> {
        let from = self.backend.get_memory(from_id, ctx).await?;
        let to = self.backend.get_memory(to_id, ctx).await?;

        let edge = Edge::new(
            from.id,
            to.id,
            edge_type,
            opts.weight,
            opts.confidence,
            from.scope.more_restrictive(to.scope),
            opts.metadata,
        )?;
        self.backend.put_edge(&edge, ctx).await
    }

    /// Remove an edge; removing a nonexistent edge is a no-op
    pub async fn unlink(&self, from_id: &str, to_id: &str, edge_type: EdgeType) -> Result<()> {
        self.backend.delete_edge(from_id, to_id, edge_type).await
    }

    /// Accessible peers of a memory with their connecting edges
    pub async fn neighbors(
        &self,
        id: &str,
        direction: Direction,
        ctx: &AccessContext,
        opts: &NeighborOptions,
    ) -> Result<Vec<NeighborHit>> {
        // Anchor must exist and be visible before we look around it
        self.backend.get_memory(id, ctx).await?;
        self.backend.neighbors(id, direction, ctx, opts).await
    }

    /// Depth-bounded expansion from seed memories, depth capped at
    /// [`EXPAND_DEPTH_MAX`]
    pub async fn expand(
        &self,
        seeds: &[String],
        ctx: &AccessContext,
        opts: &ExpandOptions,
    ) -> Result<Subgraph> {
        let opts = ExpandOptions {
            depth: opts.depth.min(EXPAND_DEPTH_MAX),
            ..opts.clone()
        };
        self.backend.expand(seeds, ctx, &opts).await
    }
}
