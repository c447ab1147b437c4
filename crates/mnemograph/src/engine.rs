//! Engine facade
//!
//! [`MemoryEngine`] wires the configured backend, embedding adapter,
//! batcher, indexer, and services together, and exposes the agent-facing
//! operations. Backend and adapter choices are made once at construction;
//! nothing downstream knows which implementation it talks to.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{BackendKind, Config, EmbeddingAdapterKind, IndexMode};
use crate::embedding::{
    resolve_dimensions, EmbeddingBatcher, EmbeddingProvider, OllamaEmbedder, OpenAiEmbedder,
};
use crate::error::{MnemographError, Result};
use crate::memory::access::AccessContext;
use crate::memory::graph::{GraphService, LinkOptions};
use crate::memory::indexing::{DurableIndexQueue, Indexer};
use crate::memory::ingestion::IngestionPipeline;
use crate::memory::linking::AutoLinker;
use crate::memory::reduction::{reduce, ReduceInput, ReduceOptions};
use crate::memory::reflection::{ReflectOptions, ReflectOutcome, ReflectionAdapter, Reflector};
use crate::memory::retrieval::{RecallOptions, RetrievalPipeline, ScoredMemory};
use crate::memory::types::{Edge, EdgeType, Memory, MemoryDraft};
use crate::storage::{
    Backend, Direction, ExpandOptions, InMemoryBackend, ListOptions, NeighborHit,
    NeighborOptions, SqliteBackend, Subgraph,
};

pub struct MemoryEngine {
    backend: Arc<dyn Backend>,
    ingestion: Arc<IngestionPipeline>,
    retrieval: Arc<RetrievalPipeline>,
    graph: Arc<GraphService>,
    reflector: Reflector,
    indexer: Option<Arc<Indexer>>,
}

impl MemoryEngine {
    /// Build an engine from configuration, selecting backend and adapter
    pub async fn from_config(config: Config) -> Result<Self> {
        let backend: Arc<dyn Backend> = match config.backend.kind {
            BackendKind::Memory => Arc::new(InMemoryBackend::new()),
            BackendKind::Sqlite => {
                Arc::new(SqliteBackend::open(&config.backend.sqlite_path).await?)
            }
        };

        let provider: Option<Arc<dyn EmbeddingProvider>> = match config.embedding.adapter {
            EmbeddingAdapterKind::None => None,
            EmbeddingAdapterKind::Ollama => {
                Some(Arc::new(OllamaEmbedder::new(&config.embedding)?))
            }
            EmbeddingAdapterKind::Openai => {
                Some(Arc::new(OpenAiEmbedder::new(&config.embedding)?))
            }
        };

        Self::assemble(config, backend, provider, None).await
    }

    /// Build an engine from explicit parts. This is the entry point for
    /// tests and embedders that bring their own backend or provider.
    ///
    /// A reflection adapter is only honored when `reflection.use_adapter`
    /// is set; otherwise reflect() falls back to the deterministic
    /// formatter.
    pub async fn assemble(
        config: Config,
        backend: Arc<dyn Backend>,
        provider: Option<Arc<dyn EmbeddingProvider>>,
        reflection_adapter: Option<Arc<dyn ReflectionAdapter>>,
    ) -> Result<Self> {
        backend.start().await?;
        let reflection_adapter = if config.reflection.use_adapter {
            reflection_adapter
        } else {
            None
        };

        let dimensions = provider
            .as_ref()
            .map(|p| p.dimensions())
            .unwrap_or_else(|| {
                resolve_dimensions(&config.embedding.model, config.embedding.dimensions)
            });

        let linker = config
            .linker
            .auto_link
            .then(|| Arc::new(AutoLinker::new(backend.clone(), config.linker.clone())));

        let (indexer, durable_queue) = match &provider {
            Some(provider) => {
                let batcher = Arc::new(EmbeddingBatcher::new(
                    provider.clone(),
                    &config.batcher,
                    Duration::from_secs(config.embedding.http_timeout_secs),
                ));
                let indexer = Arc::new(Indexer::new(
                    backend.clone(),
                    batcher,
                    linker.clone(),
                ));
                let queue = (config.indexer.mode == IndexMode::Durable)
                    .then(|| DurableIndexQueue::start(indexer.clone(), &config.indexer));
                (Some(indexer), queue)
            }
            None => (None, None),
        };

        let ingestion = Arc::new(IngestionPipeline::new(
            backend.clone(),
            indexer.clone(),
            durable_queue,
            linker,
            Some(dimensions),
        ));
        let graph = Arc::new(GraphService::new(backend.clone()));
        let retrieval = Arc::new(RetrievalPipeline::new(
            backend.clone(),
            provider,
            graph.clone(),
        ));
        let reflector = Reflector::new(
            retrieval.clone(),
            ingestion.clone(),
            graph.clone(),
            reflection_adapter,
        );

        Ok(Self {
            backend,
            ingestion,
            retrieval,
            graph,
            reflector,
            indexer,
        })
    }

    /// Convenience context for a plain agent
    pub fn context(&self, agent_id: &str) -> AccessContext {
        AccessContext::agent(agent_id)
    }

    /// Store a memory; embedding and auto-linking happen asynchronously
    pub async fn remember(&self, ctx: &AccessContext, draft: MemoryDraft) -> Result<Memory> {
        self.ingestion.store(draft, ctx).await
    }

    /// Recall memories relevant to a query
    pub async fn recall(
        &self,
        ctx: &AccessContext,
        query: &str,
        opts: &RecallOptions,
    ) -> Result<Vec<ScoredMemory>> {
        self.retrieval.recall(query, ctx, opts).await
    }

    /// Recall and reduce into a formatted context string
    pub async fn recall_context(
        &self,
        ctx: &AccessContext,
        query: &str,
        recall_opts: &RecallOptions,
        reduce_opts: &ReduceOptions,
    ) -> Result<String> {
        let (hits, edges) = self
            .retrieval
            .recall_with_edges(query, ctx, recall_opts)
            .await?;
        let memories: Vec<Memory> = hits.iter().map(|h| h.memory.clone()).collect();
        let similarities: HashMap<String, f32> = hits
            .iter()
            .map(|h| (h.memory.id.clone(), h.score))
            .collect();
        Ok(reduce(
            &ReduceInput {
                memories: &memories,
                edges: &edges,
                similarities: &similarities,
            },
            reduce_opts,
        ))
    }

    pub async fn get_memory(&self, ctx: &AccessContext, id: &str) -> Result<Memory> {
        self.backend.get_memory(id, ctx).await
    }

    /// Delete a memory and every edge touching it. Only the owner or a
    /// system context may delete.
    pub async fn forget(&self, ctx: &AccessContext, id: &str) -> Result<()> {
        self.backend.delete_memory(id, ctx).await
    }

    pub async fn list_memories(
        &self,
        ctx: &AccessContext,
        opts: &ListOptions,
    ) -> Result<Vec<Memory>> {
        self.backend.list_memories(ctx, opts).await
    }

    pub async fn link(
        &self,
        ctx: &AccessContext,
        from_id: &str,
        to_id: &str,
        edge_type: EdgeType,
        opts: LinkOptions,
    ) -> Result<Edge> {
        self.graph.link(from_id, to_id, edge_type, opts, ctx).await
    }

    pub async fn unlink(&self, from_id: &str, to_id: &str, edge_type: EdgeType) -> Result<()> {
        self.graph.unlink(from_id, to_id, edge_type).await
    }

    pub async fn neighbors(
        &self,
        ctx: &AccessContext,
        id: &str,
        direction: Direction,
        opts: &NeighborOptions,
    ) -> Result<Vec<NeighborHit>> {
        self.graph.neighbors(id, direction, ctx, opts).await
    }

    pub async fn expand(
        &self,
        ctx: &AccessContext,
        seeds: &[String],
        opts: &ExpandOptions,
    ) -> Result<Subgraph> {
        self.graph.expand(seeds, ctx, opts).await
    }

    pub async fn reflect(
        &self,
        ctx: &AccessContext,
        opts: &ReflectOptions,
    ) -> Result<ReflectOutcome> {
        self.reflector.reflect(ctx, opts).await
    }

    /// Run the indexing pass for one memory synchronously.
    ///
    /// The normal write path indexes in the background; this is for
    /// callers that need the embedding attached before proceeding.
    pub async fn index_now(&self, ctx: &AccessContext, memory_id: &str) -> Result<()> {
        match &self.indexer {
            Some(indexer) => indexer.index(memory_id, ctx).await,
            None => Err(MnemographError::EmbeddingUnavailable),
        }
    }

    /// Graceful shutdown of the storage backend
    pub async fn shutdown(&self) -> Result<()> {
        self.backend.stop().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubEmbedder;

    async fn engine(stub: StubEmbedder) -> MemoryEngine {
        MemoryEngine::assemble(
            Config::default(),
            Arc::new(InMemoryBackend::new()),
            Some(Arc::new(stub)),
            None,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_remember_then_index_now_then_recall() {
        let stub = StubEmbedder::new(3)
            .with_vector("the sky is blue", vec![1.0, 0.0, 0.0])
            .with_vector("what color is the sky?", vec![1.0, 0.0, 0.0]);
        let engine = engine(stub).await;
        let ctx = engine.context("a1");

        let stored = engine
            .remember(&ctx, MemoryDraft::new("the sky is blue"))
            .await
            .unwrap();
        engine.index_now(&ctx, &stored.id).await.unwrap();

        let hits = engine
            .recall(&ctx, "what color is the sky?", &RecallOptions::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].memory.id, stored.id);
    }

    #[tokio::test]
    async fn test_index_now_without_adapter_fails() {
        let engine = MemoryEngine::assemble(
            Config::default(),
            Arc::new(InMemoryBackend::new()),
            None,
            None,
        )
        .await
        .unwrap();
        let ctx = engine.context("a1");

        let stored = engine
            .remember(&ctx, MemoryDraft::new("no adapter here"))
            .await
            .unwrap();
        assert!(matches!(
            engine.index_now(&ctx, &stored.id).await.unwrap_err(),
            MnemographError::EmbeddingUnavailable
        ));
    }
}
