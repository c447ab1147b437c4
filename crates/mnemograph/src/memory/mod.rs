//! Memory types and pipelines
//!
//! The data model (memories, edges, access contexts) and the services
//! built over the storage backend: ingestion, indexing, linking,
//! retrieval, reduction, graph operations, and reflection.

pub mod access;
pub mod graph;
pub mod indexing;
pub mod ingestion;
pub mod linking;
pub mod reduction;
pub mod reflection;
pub mod retrieval;
pub mod types;

pub use access::{AccessContext, Permission, Role};
pub use graph::{GraphService, LinkOptions, EXPAND_DEPTH_MAX};
pub use indexing::{DurableIndexQueue, Indexer};
pub use ingestion::IngestionPipeline;
pub use linking::AutoLinker;
pub use reduction::{composite_score, reduce, ContextFormat, ReduceInput, ReduceOptions};
pub use reflection::{ReflectOptions, ReflectOutcome, ReflectionAdapter, Reflector};
pub use retrieval::{RecallOptions, RetrievalPipeline, ScoredMemory};
pub use types::{Edge, EdgeType, Memory, MemoryDraft, MemoryType, Scope};
