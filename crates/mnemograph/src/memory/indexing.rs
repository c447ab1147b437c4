//! Asynchronous embedding indexer
//!
//! Computes the embedding for a newly stored memory, writes the memory
//! back with the vector attached, then hands it to the auto-linker. The
//! write caller is never blocked: dispatch happens either as a spawned
//! task per write (ephemeral mode) or through [`DurableIndexQueue`], a
//! key-unique queue with bounded retries (durable mode). The execute path
//! is the same for both.
//!
//! A memory deleted between the write and the indexing pass surfaces as
//! `not_found` on reload; that is terminal success, not a failure.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::IndexerConfig;
use crate::embedding::{retry_delay, EmbeddingBatcher};
use crate::error::{MnemographError, Result};
use crate::memory::access::AccessContext;
use crate::memory::linking::AutoLinker;
use crate::storage::Backend;

pub struct Indexer {
    backend: Arc<dyn Backend>,
    batcher: Arc<EmbeddingBatcher>,
    linker: Option<Arc<AutoLinker>>,
}

impl Indexer {
    pub fn new(
        backend: Arc<dyn Backend>,
        batcher: Arc<EmbeddingBatcher>,
        linker: Option<Arc<AutoLinker>>,
    ) -> Self {
        Self {
            backend,
            batcher,
            linker,
        }
    }

    /// Ephemeral dispatch: supervised task per write, at-most-once,
    /// best-effort. Never blocks the caller.
    pub fn spawn(self: &Arc<Self>, memory_id: String, ctx: AccessContext) {
        let indexer = self.clone();
        tokio::spawn(async move {
            if let Err(e) = indexer.index(&memory_id, &ctx).await {
                warn!("indexing of {memory_id} failed: {e}");
            }
        });
    }

    /// Shared execute path: reload, embed, persist, auto-link.
    pub async fn index(&self, memory_id: &str, ctx: &AccessContext) -> Result<()> {
        // Reload by id so a deletion in the interim is tolerated
        let memory = match self.backend.get_memory(memory_id, ctx).await {
            Ok(memory) => memory,
            Err(e) if e.is_not_found() => {
                debug!("memory {memory_id} gone before indexing, nothing to do");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let vector = self.batcher.request(&memory.content).await?;
        // A stored embedding always matches the configured length
        if vector.len() != self.batcher.dimensions() {
            return Err(MnemographError::LengthMismatch {
                expected: self.batcher.dimensions(),
                actual: vector.len(),
            });
        }

        let updated = self.backend.put_memory(&memory.with_embedding(vector), ctx).await?;

        if let Some(linker) = &self.linker {
            // Link failures are logged, never fatal to the index job
            match linker.link_similar(&updated, ctx).await {
                Ok(created) => debug!("indexed {memory_id}, {created} auto-links"),
                Err(e) => warn!("auto-link after indexing {memory_id} failed: {e}"),
            }
        }
        Ok(())
    }
}

struct Job {
    memory_id: String,
    ctx: AccessContext,
}

/// Key-unique indexing queue with bounded retries.
///
/// Re-enqueues of the same memory id within the uniqueness window are
/// dropped. Each job is attempted up to `max_attempts` times with
/// exponential backoff; a job that keeps failing is logged and dropped
/// (the memory stays stored without an embedding). Jobs live in process
/// only; a crash loses whatever was queued.
pub struct DurableIndexQueue {
    tx: mpsc::UnboundedSender<Job>,
    recent: Mutex<HashMap<String, Instant>>,
    window: Duration,
}

impl DurableIndexQueue {
    /// Spawn the worker loop over the given indexer
    pub fn start(indexer: Arc<Indexer>, config: &IndexerConfig) -> Arc<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let max_attempts = config.max_attempts.max(1);

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let mut attempt = 0u32;
                loop {
                    attempt += 1;
                    match indexer.index(&job.memory_id, &job.ctx).await {
                        Ok(()) => break,
                        Err(e) if attempt < max_attempts => {
                            let delay = retry_delay(attempt);
                            warn!(
                                "index job {} attempt {attempt} failed, retrying in {delay:?}: {e}",
                                job.memory_id
                            );
                            tokio::time::sleep(delay).await;
                        }
                        Err(e) => {
                            warn!(
                                "index job {} gave up after {attempt} attempts: {e}",
                                job.memory_id
                            );
                            break;
                        }
                    }
                }
            }
        });

        Arc::new(Self {
            tx,
            recent: Mutex::new(HashMap::new()),
            window: Duration::from_secs(config.uniqueness_window_secs),
        })
    }

    /// Enqueue a job unless the same memory id was enqueued within the
    /// uniqueness window. Returns whether the job was accepted.
    pub fn enqueue(&self, memory_id: &str, ctx: &AccessContext) -> bool {
        let mut recent = self
            .recent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();
        recent.retain(|_, enqueued_at| now.duration_since(*enqueued_at) < self.window);
        if recent.contains_key(memory_id) {
            debug!("index job {memory_id} deduplicated");
            return false;
        }
        recent.insert(memory_id.to_string(), now);
        drop(recent);

        self.tx
            .send(Job {
                memory_id: memory_id.to_string(),
                ctx: ctx.clone(),
            })
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BatcherConfig;
    use crate::memory::types::{Memory, MemoryDraft};
    use crate::testing::StubEmbedder;
    use crate::storage::InMemoryBackend;

    fn batcher(stub: StubEmbedder) -> Arc<EmbeddingBatcher> {
        Arc::new(EmbeddingBatcher::new(
            Arc::new(stub),
            &BatcherConfig {
                batch_size: 8,
                batch_timeout_ms: 5,
            },
            Duration::from_secs(5),
        ))
    }

    async fn store_plain(backend: &dyn Backend, id: &str, content: &str) {
        let memory = Memory::from_draft(MemoryDraft::new(content).id(id).agent_id("a1")).unwrap();
        backend
            .put_memory(&memory, &AccessContext::agent("a1"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_index_attaches_embedding() {
        let backend: Arc<dyn Backend> = Arc::new(InMemoryBackend::new());
        let ctx = AccessContext::agent("a1");
        store_plain(backend.as_ref(), "m1", "hello world").await;

        let stub = StubEmbedder::new(3).with_vector("hello world", vec![0.0, 1.0, 0.0]);
        let indexer = Indexer::new(backend.clone(), batcher(stub), None);
        indexer.index("m1", &ctx).await.unwrap();

        let indexed = backend.get_memory("m1", &ctx).await.unwrap();
        assert_eq!(indexed.embedding, Some(vec![0.0, 1.0, 0.0]));
    }

    #[tokio::test]
    async fn test_index_of_deleted_memory_is_success() {
        let backend: Arc<dyn Backend> = Arc::new(InMemoryBackend::new());
        let ctx = AccessContext::agent("a1");

        let stub = StubEmbedder::new(3);
        let indexer = Indexer::new(backend.clone(), batcher(stub), None);
        indexer.index("never-existed", &ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_index_surfaces_embedding_failure() {
        let backend: Arc<dyn Backend> = Arc::new(InMemoryBackend::new());
        let ctx = AccessContext::agent("a1");
        store_plain(backend.as_ref(), "m1", "content here").await;

        let stub = StubEmbedder::new(3).failing("no provider");
        let indexer = Indexer::new(backend.clone(), batcher(stub), None);
        let err = indexer.index("m1", &ctx).await.unwrap_err();
        assert!(err.is_transient());

        // The write is kept, just without an embedding
        let memory = backend.get_memory("m1", &ctx).await.unwrap();
        assert!(memory.embedding.is_none());
    }

    #[tokio::test]
    async fn test_durable_queue_deduplicates_within_window() {
        let backend: Arc<dyn Backend> = Arc::new(InMemoryBackend::new());
        let ctx = AccessContext::agent("a1");
        store_plain(backend.as_ref(), "m1", "dedup me").await;

        let stub = StubEmbedder::new(3);
        let indexer = Arc::new(Indexer::new(backend.clone(), batcher(stub), None));
        let queue = DurableIndexQueue::start(
            indexer,
            &IndexerConfig {
                uniqueness_window_secs: 60,
                ..Default::default()
            },
        );

        assert!(queue.enqueue("m1", &ctx));
        assert!(!queue.enqueue("m1", &ctx));
        assert!(queue.enqueue("m2", &ctx));
    }

    #[tokio::test]
    async fn test_durable_queue_processes_jobs() {
        let backend: Arc<dyn Backend> = Arc::new(InMemoryBackend::new());
        let ctx = AccessContext::agent("a1");
        store_plain(backend.as_ref(), "m1", "queued content").await;

        let stub = StubEmbedder::new(3).with_vector("queued content", vec![1.0, 0.0, 0.0]);
        let indexer = Arc::new(Indexer::new(backend.clone(), batcher(stub), None));
        let queue = DurableIndexQueue::start(indexer, &IndexerConfig::default());

        assert!(queue.enqueue("m1", &ctx));
        // Wait for the worker to drain the job
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if backend
                .get_memory("m1", &ctx)
                .await
                .unwrap()
                .embedding
                .is_some()
            {
                return;
            }
        }
        panic!("queued index job never completed");
    }
}
