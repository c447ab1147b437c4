//! Mnemograph - graph-augmented long-term memory for AI agents
//!
//! A storage and retrieval engine over typed memory records with vector
//! embeddings, connected by typed weighted edges. Agents write memories,
//! recall them by semantic similarity, traverse their relationship graph,
//! and synthesize reflections.
//!
//! The write path is synchronous only up to persistence: embeddings are
//! computed afterwards by a batching indexer, which then auto-links the
//! memory to its nearest neighbors. Every operation carries an access
//! context enforced uniformly by both storage backends.

pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod memory;
pub mod storage;
pub mod testing;

pub use engine::MemoryEngine;
pub use error::{MnemographError, Result};
