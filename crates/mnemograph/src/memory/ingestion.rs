//! Memory ingestion pipeline
//!
//! The synchronous write path: apply context defaults, demote scopes the
//! caller cannot write, construct a validated memory, persist it, and
//! enqueue asynchronous indexing. Embedding problems never fail a write;
//! the memory is always stored and the vector arrives later.

use std::sync::Arc;
use tracing::warn;

use crate::error::{MnemographError, Result};
use crate::memory::access::AccessContext;
use crate::memory::indexing::{DurableIndexQueue, Indexer};
use crate::memory::linking::AutoLinker;
use crate::memory::types::{Memory, MemoryDraft, Scope};
use crate::storage::Backend;

pub struct IngestionPipeline {
    backend: Arc<dyn Backend>,
    indexer: Option<Arc<Indexer>>,
    durable_queue: Option<Arc<DurableIndexQueue>>,
    linker: Option<Arc<AutoLinker>>,
    /// Configured embedding length, for validating pre-computed vectors
    dimensions: Option<usize>,
}

impl IngestionPipeline {
    pub fn new(
        backend: Arc<dyn Backend>,
        indexer: Option<Arc<Indexer>>,
        durable_queue: Option<Arc<DurableIndexQueue>>,
        linker: Option<Arc<AutoLinker>>,
        dimensions: Option<usize>,
    ) -> Self {
        Self {
            backend,
            indexer,
            durable_queue,
            linker,
            dimensions,
        }
    }

    /// Store a memory and schedule its embedding.
    ///
    /// A proposed scope the caller cannot write is silently demoted to
    /// private rather than rejected; the final scope is then re-checked
    /// for write access. A draft carrying a pre-computed embedding skips
    /// async indexing and goes straight to auto-linking.
    pub async fn store(&self, mut draft: MemoryDraft, ctx: &AccessContext) -> Result<Memory> {
        if draft.agent_id.is_none() {
            draft.agent_id = Some(ctx.agent_id.clone());
        }
        if draft.tenant_id.is_none() {
            draft.tenant_id = ctx.tenant_id.clone();
        }
        if let Some(scope) = draft.scope {
            if !ctx.can_write(scope) {
                draft.scope = Some(Scope::Private);
            }
        }

        if let (Some(embedding), Some(dimensions)) = (&draft.embedding, self.dimensions) {
            if embedding.len() != dimensions {
                return Err(MnemographError::validation(
                    "embedding",
                    format!(
                        "expected {dimensions} dimensions, got {}",
                        embedding.len()
                    ),
                ));
            }
        }

        let pre_embedded = draft.embedding.is_some();
        let memory = Memory::from_draft(draft)?;
        if !ctx.can_write(memory.scope) {
            return Err(MnemographError::AccessDenied(format!(
                "cannot write {} scope",
                memory.scope.as_str()
            )));
        }

        let stored = self.backend.put_memory(&memory, ctx).await?;

        if pre_embedded {
            if let Some(linker) = &self.linker {
                let linker = linker.clone();
                let linked = stored.clone();
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(e) = linker.link_similar(&linked, &ctx).await {
                        warn!("auto-link for pre-embedded {} failed: {e}", linked.id);
                    }
                });
            }
        } else {
            self.enqueue_indexing(&stored, ctx);
        }

        Ok(stored)
    }

    /// Hand the stored memory to the configured indexing mode. Never
    /// blocks and never fails the write.
    fn enqueue_indexing(&self, memory: &Memory, ctx: &AccessContext) {
        match (&self.durable_queue, &self.indexer) {
            (Some(queue), _) => {
                queue.enqueue(&memory.id, ctx);
            }
            (None, Some(indexer)) => {
                indexer.spawn(memory.id.clone(), ctx.clone());
            }
            (None, None) => {
                // No adapter configured: the memory stays embedding-free
            }
        }
    }
}
