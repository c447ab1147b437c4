//! Embedding request batcher
//!
//! Coalesces concurrent single-text embedding requests into provider
//! batch calls. The batcher is an actor owning a pending queue and a
//! timer nonce; callers suspend on a oneshot reply until their vector is
//! ready.
//!
//! Flush triggers: the queue reaching `batch_size`, or the timer armed by
//! the first entry into an empty queue firing after `batch_timeout_ms`.
//! Each armed timer carries the nonce current at arming time; a flush
//! bumps the nonce, so timers from previous batches are ignored on
//! receipt. The provider call runs in a spawned task over a drained
//! snapshot, so the actor never holds state across the provider await.
//!
//! Failure semantics are total: every caller in a failed batch receives
//! the same error. One provider (and therefore one model) per batcher
//! instance; partition by instance to mix models.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::config::BatcherConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{MnemographError, Result};

/// Minimum end-to-end wait for a caller before it gives up on a reply
const WAITER_TIMEOUT_FLOOR: Duration = Duration::from_secs(60);

/// Safety margin on top of provider and batch deadlines
const WAITER_TIMEOUT_MARGIN: Duration = Duration::from_secs(30);

/// Cloneable failure passed to every waiter of a failed batch
#[derive(Debug, Clone)]
enum BatchFailure {
    Transient(String),
    Permanent(String),
    LengthMismatch { expected: usize, actual: usize },
}

impl BatchFailure {
    fn from_error(e: &MnemographError) -> Self {
        match e {
            MnemographError::EmbeddingPermanent(m) => Self::Permanent(m.clone()),
            MnemographError::LengthMismatch { expected, actual } => Self::LengthMismatch {
                expected: *expected,
                actual: *actual,
            },
            other => Self::Transient(other.to_string()),
        }
    }

    fn into_error(self) -> MnemographError {
        match self {
            Self::Transient(m) => MnemographError::EmbeddingTransient(m),
            Self::Permanent(m) => MnemographError::EmbeddingPermanent(m),
            Self::LengthMismatch { expected, actual } => {
                MnemographError::LengthMismatch { expected, actual }
            }
        }
    }
}

type BatchReply = std::result::Result<Vec<f32>, BatchFailure>;

enum Msg {
    Request {
        text: String,
        reply: oneshot::Sender<BatchReply>,
    },
    FlushTimer {
        nonce: u64,
    },
}

/// Handle to a running batcher actor
pub struct EmbeddingBatcher {
    tx: mpsc::UnboundedSender<Msg>,
    dimensions: usize,
    waiter_timeout: Duration,
}

impl EmbeddingBatcher {
    /// Spawn the batcher actor over the given provider.
    ///
    /// `provider_timeout` is the adapter's per-call transport deadline; it
    /// bounds how long a waiter is willing to block.
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        config: &BatcherConfig,
        provider_timeout: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let dimensions = provider.dimensions();
        let waiter_timeout = (provider_timeout
            + Duration::from_millis(config.batch_timeout_ms)
            + WAITER_TIMEOUT_MARGIN)
            .max(WAITER_TIMEOUT_FLOOR);

        let actor = Actor {
            provider,
            batch_size: config.batch_size.max(1),
            batch_timeout: Duration::from_millis(config.batch_timeout_ms),
            tx: tx.clone(),
            queue: Vec::new(),
            nonce: 0,
        };
        tokio::spawn(actor.run(rx));

        Self {
            tx,
            dimensions,
            waiter_timeout,
        }
    }

    /// Request an embedding, suspending until the batch containing this
    /// text completes.
    ///
    /// Dropping the returned future abandons the wait only; the in-flight
    /// batch is fate-shared and its eventual reply is discarded.
    pub async fn request(&self, text: &str) -> Result<Vec<f32>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Msg::Request {
                text: text.to_string(),
                reply: reply_tx,
            })
            .map_err(|_| {
                MnemographError::EmbeddingTransient("batcher is shut down".to_string())
            })?;

        match tokio::time::timeout(self.waiter_timeout, reply_rx).await {
            Err(_) => Err(MnemographError::EmbeddingTransient(format!(
                "no batch reply within {:?}",
                self.waiter_timeout
            ))),
            Ok(Err(_)) => Err(MnemographError::EmbeddingTransient(
                "batcher dropped the reply".to_string(),
            )),
            Ok(Ok(reply)) => reply.map_err(BatchFailure::into_error),
        }
    }

    /// Vector length of the underlying provider
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }
}

struct Actor {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    batch_timeout: Duration,
    tx: mpsc::UnboundedSender<Msg>,
    queue: Vec<(String, oneshot::Sender<BatchReply>)>,
    nonce: u64,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Msg>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                Msg::Request { text, reply } => {
                    if self.queue.is_empty() {
                        self.arm_timer();
                    }
                    self.queue.push((text, reply));
                    if self.queue.len() >= self.batch_size {
                        self.flush();
                    }
                }
                Msg::FlushTimer { nonce } => {
                    // Timers from flushed batches carry an old nonce
                    if nonce == self.nonce && !self.queue.is_empty() {
                        self.flush();
                    }
                }
            }
        }
    }

    fn arm_timer(&self) {
        let tx = self.tx.clone();
        let nonce = self.nonce;
        let timeout = self.batch_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(Msg::FlushTimer { nonce });
        });
    }

    /// Drain the queue snapshot and run the provider call in its own task
    fn flush(&mut self) {
        self.nonce = self.nonce.wrapping_add(1);
        let batch: Vec<(String, oneshot::Sender<BatchReply>)> = self.queue.drain(..).collect();
        debug!("flushing embedding batch of {}", batch.len());

        let provider = self.provider.clone();
        tokio::spawn(async move {
            let texts: Vec<String> = batch.iter().map(|(text, _)| text.clone()).collect();
            let result = match provider.embed_many(&texts).await {
                Ok(vectors) if vectors.len() != texts.len() => {
                    Err(MnemographError::LengthMismatch {
                        expected: texts.len(),
                        actual: vectors.len(),
                    })
                }
                other => other,
            };

            match result {
                Ok(vectors) => {
                    for ((_, reply), vector) in batch.into_iter().zip(vectors) {
                        let _ = reply.send(Ok(vector));
                    }
                }
                Err(e) => {
                    warn!("embedding batch of {} failed: {e}", texts.len());
                    let failure = BatchFailure::from_error(&e);
                    for (_, reply) in batch {
                        let _ = reply.send(Err(failure.clone()));
                    }
                }
            }
        });
    }
}
