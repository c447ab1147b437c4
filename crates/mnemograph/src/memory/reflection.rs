//! Reflection synthesis
//!
//! Recalls a cluster of related memories and condenses them into a new
//! `reflection` memory. An optional LLM adapter does the synthesis; when
//! none is configured a deterministic bullet-list formatter stands in.

use async_trait::async_trait;
use serde_json::{json, Map};
use std::sync::Arc;
use tracing::warn;

use crate::error::{MnemographError, Result};
use crate::memory::access::AccessContext;
use crate::memory::graph::{GraphService, LinkOptions};
use crate::memory::ingestion::IngestionPipeline;
use crate::memory::retrieval::{RecallOptions, RetrievalPipeline};
use crate::memory::types::{
    truncate_chars, EdgeType, Memory, MemoryDraft, MemoryType, Scope, DERIVED_SUMMARY_MAX_CHARS,
};

/// Recall query used when the caller gives no topic
const DEFAULT_TOPIC_QUERY: &str = "important observations, facts, and decisions";

/// Weight of the `supports` edges from a reflection to its sources
const SOURCE_EDGE_WEIGHT: f32 = 0.7;

/// Optional LLM synthesizer. Receives the source memories and the topic,
/// returns the reflection text.
#[async_trait]
pub trait ReflectionAdapter: Send + Sync {
    async fn reflect(&self, memories: &[Memory], topic: Option<&str>) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct ReflectOptions {
    pub topic: Option<String>,
    /// Fail with `insufficient_memories` below this many sources
    pub min_memories: usize,
    pub max_memories: usize,
    /// Persist the reflection and link it to its sources
    pub store: bool,
}

impl Default for ReflectOptions {
    fn default() -> Self {
        Self {
            topic: None,
            min_memories: 3,
            max_memories: 15,
            store: true,
        }
    }
}

/// What a reflect call produced
#[derive(Debug, Clone)]
pub enum ReflectOutcome {
    /// The persisted reflection memory
    Stored(Memory),
    /// The synthesized text, when `store` was false
    Text(String),
}

pub struct Reflector {
    retrieval: Arc<RetrievalPipeline>,
    ingestion: Arc<IngestionPipeline>,
    graph: Arc<GraphService>,
    adapter: Option<Arc<dyn ReflectionAdapter>>,
}

impl Reflector {
    pub fn new(
        retrieval: Arc<RetrievalPipeline>,
        ingestion: Arc<IngestionPipeline>,
        graph: Arc<GraphService>,
        adapter: Option<Arc<dyn ReflectionAdapter>>,
    ) -> Self {
        Self {
            retrieval,
            ingestion,
            graph,
            adapter,
        }
    }

    pub async fn reflect(
        &self,
        ctx: &AccessContext,
        opts: &ReflectOptions,
    ) -> Result<ReflectOutcome> {
        let query = opts.topic.as_deref().unwrap_or(DEFAULT_TOPIC_QUERY);
        let hits = self
            .retrieval
            .recall(
                query,
                ctx,
                &RecallOptions {
                    limit: opts.max_memories,
                    ..Default::default()
                },
            )
            .await?;

        if hits.len() < opts.min_memories {
            return Err(MnemographError::InsufficientMemories {
                found: hits.len(),
                required: opts.min_memories,
            });
        }
        let sources: Vec<Memory> = hits.into_iter().map(|h| h.memory).collect();

        let text = match &self.adapter {
            Some(adapter) => adapter.reflect(&sources, opts.topic.as_deref()).await?,
            None => default_reflection(&sources, opts.topic.as_deref()),
        };

        if !opts.store {
            return Ok(ReflectOutcome::Text(text));
        }

        let (summary, content) = split_reflection(&text);
        let avg_confidence =
            sources.iter().map(|m| m.confidence).sum::<f32>() / sources.len() as f32;
        let source_ids: Vec<&str> = sources.iter().map(|m| m.id.as_str()).collect();
        let mut metadata = Map::new();
        metadata.insert("source_memory_ids".to_string(), json!(source_ids));

        let stored = self
            .ingestion
            .store(
                MemoryDraft::new(content)
                    .summary(summary)
                    .memory_type(MemoryType::Reflection)
                    .importance(0.8)
                    .confidence((avg_confidence + 0.1).min(1.0))
                    .scope(Scope::Private)
                    .metadata(metadata),
                ctx,
            )
            .await?;

        for source in &sources {
            let link = self
                .graph
                .link(
                    &stored.id,
                    &source.id,
                    EdgeType::Supports,
                    LinkOptions {
                        weight: SOURCE_EDGE_WEIGHT,
                        ..Default::default()
                    },
                    ctx,
                )
                .await;
            if let Err(e) = link {
                warn!("linking reflection {} to source {} failed: {e}", stored.id, source.id);
            }
        }

        Ok(ReflectOutcome::Stored(stored))
    }
}

/// Deterministic fallback synthesis: a header line and one bullet per
/// source memory
pub fn default_reflection(memories: &[Memory], topic: Option<&str>) -> String {
    let mut text = match topic {
        Some(topic) => format!("Reflection about {topic} from {} memories:", memories.len()),
        None => format!("Reflection from {} memories:", memories.len()),
    };
    for memory in memories {
        text.push_str(&format!(
            "\n- [{}] {}",
            memory.memory_type.as_str(),
            memory.summary
        ));
    }
    text
}

/// Split a reflection text into (summary, content) at the first newline.
///
/// The derived summary is bounded; the content keeps the full remainder.
/// Texts without a newline use the whole text for both.
fn split_reflection(text: &str) -> (String, String) {
    match text.split_once('\n') {
        Some((first, rest)) if !rest.trim().is_empty() => (
            truncate_chars(first.trim(), DERIVED_SUMMARY_MAX_CHARS),
            rest.trim_start_matches('\n').to_string(),
        ),
        _ => (
            truncate_chars(text.trim(), DERIVED_SUMMARY_MAX_CHARS),
            text.to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::MemoryDraft;

    fn memory(summary: &str, memory_type: MemoryType) -> Memory {
        Memory::from_draft(
            MemoryDraft::new(format!("{summary} and some details"))
                .summary(summary)
                .memory_type(memory_type)
                .agent_id("a1"),
        )
        .unwrap()
    }

    #[test]
    fn test_default_reflection_with_topic() {
        let memories = vec![
            memory("Paris is in France", MemoryType::Fact),
            memory("User plans a trip", MemoryType::Observation),
        ];
        let text = default_reflection(&memories, Some("travel"));
        assert!(text.starts_with("Reflection about travel from 2 memories:"));
        assert!(text.contains("\n- [fact] Paris is in France"));
        assert!(text.contains("\n- [observation] User plans a trip"));
    }

    #[test]
    fn test_default_reflection_without_topic() {
        let memories = vec![memory("a fact", MemoryType::Fact)];
        let text = default_reflection(&memories, None);
        assert!(text.starts_with("Reflection from 1 memories:"));
    }

    #[test]
    fn test_split_reflection_at_first_newline() {
        let (summary, content) = split_reflection("Header line\nbody first\nbody second");
        assert_eq!(summary, "Header line");
        assert_eq!(content, "body first\nbody second");
    }

    #[test]
    fn test_split_reflection_single_line() {
        let (summary, content) = split_reflection("just one line");
        assert_eq!(summary, "just one line");
        assert_eq!(content, "just one line");
    }

    #[test]
    fn test_split_reflection_truncates_long_summary() {
        let long_first = "w".repeat(500);
        let text = format!("{long_first}\nrest of it");
        let (summary, content) = split_reflection(&text);
        assert_eq!(summary.chars().count(), DERIVED_SUMMARY_MAX_CHARS);
        assert_eq!(content, "rest of it");
    }
}
