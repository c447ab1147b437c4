//! Memory and edge types for the Mnemograph system
//!
//! Defines the core data structures stored by every backend: typed text
//! records with optional vector embeddings, and the typed weighted edges
//! connecting them. Construction goes through validating constructors so
//! that invariants hold before anything reaches storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{MnemographError, Result};

/// Maximum length of a summary derived from content or a reflection text
pub const DERIVED_SUMMARY_MAX_CHARS: usize = 200;

/// A single memory record.
///
/// The embedding is absent until the indexer completes; `agent_id` never
/// changes after the first write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Opaque stable identifier, unique per backend
    pub id: String,
    /// Classification of what kind of memory this is
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    /// Short free-form description
    pub summary: String,
    /// Full text content
    pub content: String,
    /// Vector embedding; `None` until indexing completes
    pub embedding: Option<Vec<f32>>,
    /// Importance score in [0, 1]
    pub importance: f32,
    /// Confidence score in [0, 1]
    pub confidence: f32,
    /// Visibility tier
    pub scope: Scope,
    /// Owning agent; immutable once stored
    pub agent_id: String,
    /// Optional tenant grouping for shared memories
    pub tenant_id: Option<String>,
    /// Filtering tags (no ontology)
    pub tags: Vec<String>,
    /// Free-form metadata; round-tripped, never queried by path
    pub metadata: Map<String, Value>,
    /// Optional session this memory was captured in
    pub session_id: Option<String>,
    /// How many times this memory was returned by a similarity search
    pub access_count: u32,
    /// When this memory was last returned by a similarity search
    pub last_accessed_at: Option<DateTime<Utc>>,
    /// When this memory was first stored
    pub inserted_at: DateTime<Utc>,
    /// When this memory was last replaced
    pub updated_at: DateTime<Utc>,
}

impl Memory {
    /// Attach an embedding, replacing any previous one.
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self.updated_at = Utc::now();
        self
    }
}

/// Classification of memory kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Fact,
    Conversation,
    Episodic,
    Reflection,
    Observation,
    Decision,
}

impl MemoryType {
    /// Stable string form used in storage and formatting
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Fact => "fact",
            MemoryType::Conversation => "conversation",
            MemoryType::Episodic => "episodic",
            MemoryType::Reflection => "reflection",
            MemoryType::Observation => "observation",
            MemoryType::Decision => "decision",
        }
    }
}

impl FromStr for MemoryType {
    type Err = MnemographError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fact" => Ok(MemoryType::Fact),
            "conversation" => Ok(MemoryType::Conversation),
            "episodic" => Ok(MemoryType::Episodic),
            "reflection" => Ok(MemoryType::Reflection),
            "observation" => Ok(MemoryType::Observation),
            "decision" => Ok(MemoryType::Decision),
            other => Err(MnemographError::validation(
                "type",
                format!("unknown memory type '{other}'"),
            )),
        }
    }
}

/// Visibility tier, totally ordered: `Private < Shared < Global`.
///
/// The derived `Ord` makes "more restrictive of two scopes" a plain `min`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    #[default]
    Private,
    Shared,
    Global,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Private => "private",
            Scope::Shared => "shared",
            Scope::Global => "global",
        }
    }

    /// The more restrictive of two scopes
    pub fn more_restrictive(self, other: Scope) -> Scope {
        self.min(other)
    }
}

impl FromStr for Scope {
    type Err = MnemographError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "private" => Ok(Scope::Private),
            "shared" => Ok(Scope::Shared),
            "global" => Ok(Scope::Global),
            other => Err(MnemographError::validation(
                "scope",
                format!("unknown scope '{other}'"),
            )),
        }
    }
}

/// A typed weighted directed edge between two memories
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub from_id: String,
    pub to_id: String,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    /// Relationship strength in [0, 1]
    pub weight: f32,
    /// Confidence in the relationship in [0, 1]
    pub confidence: f32,
    /// Derived from the endpoints: the more restrictive scope wins
    pub scope: Scope,
    pub metadata: Map<String, Value>,
    pub inserted_at: DateTime<Utc>,
}

impl Edge {
    /// Construct a validated edge. The scope is supplied by the caller,
    /// which derives it from the endpoint memories.
    pub fn new(
        from_id: impl Into<String>,
        to_id: impl Into<String>,
        edge_type: EdgeType,
        weight: f32,
        confidence: f32,
        scope: Scope,
        metadata: Map<String, Value>,
    ) -> Result<Self> {
        let from_id = from_id.into();
        let to_id = to_id.into();
        if from_id.is_empty() {
            return Err(MnemographError::validation("from_id", "must not be empty"));
        }
        if to_id.is_empty() {
            return Err(MnemographError::validation("to_id", "must not be empty"));
        }
        validate_unit_range("weight", weight)?;
        validate_unit_range("confidence", confidence)?;

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            from_id,
            to_id,
            edge_type,
            weight,
            confidence,
            scope,
            metadata,
            inserted_at: Utc::now(),
        })
    }
}

/// Relationship kinds between memories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    RelatesTo,
    Supports,
    Contradicts,
    Causes,
    Follows,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::RelatesTo => "relates_to",
            EdgeType::Supports => "supports",
            EdgeType::Contradicts => "contradicts",
            EdgeType::Causes => "causes",
            EdgeType::Follows => "follows",
        }
    }
}

impl FromStr for EdgeType {
    type Err = MnemographError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "relates_to" => Ok(EdgeType::RelatesTo),
            "supports" => Ok(EdgeType::Supports),
            "contradicts" => Ok(EdgeType::Contradicts),
            "causes" => Ok(EdgeType::Causes),
            "follows" => Ok(EdgeType::Follows),
            other => Err(MnemographError::validation(
                "type",
                format!("unknown edge type '{other}'"),
            )),
        }
    }
}

/// Incoming attributes for storing a memory.
///
/// Everything except `content` is optional; the ingestion pipeline fills
/// context defaults (`agent_id`, `tenant_id`) and `Memory::from_draft`
/// applies the remaining defaults and invariants.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryDraft {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub memory_type: Option<MemoryType>,
    pub summary: Option<String>,
    pub content: String,
    /// Pre-computed embedding; validated against the configured
    /// dimensionality and bypasses async indexing when present
    pub embedding: Option<Vec<f32>>,
    pub importance: Option<f32>,
    pub confidence: Option<f32>,
    pub scope: Option<Scope>,
    pub agent_id: Option<String>,
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub session_id: Option<String>,
}

impl MemoryDraft {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn memory_type(mut self, memory_type: MemoryType) -> Self {
        self.memory_type = Some(memory_type);
        self
    }

    pub fn agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn importance(mut self, importance: f32) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }
}

impl Memory {
    /// Build a validated memory from draft attributes.
    ///
    /// Applies defaults (importance 0.5, confidence 0.7, private scope,
    /// `fact` type), generates an id when absent, deduplicates tags, and
    /// demotes the scope to private when confidence is below 0.7.
    pub fn from_draft(draft: MemoryDraft) -> Result<Self> {
        if draft.content.trim().is_empty() {
            return Err(MnemographError::validation("content", "must not be empty"));
        }
        let agent_id = draft
            .agent_id
            .filter(|a| !a.is_empty())
            .ok_or_else(|| MnemographError::validation("agent_id", "must not be empty"))?;

        let importance = draft.importance.unwrap_or(0.5);
        let confidence = draft.confidence.unwrap_or(0.7);
        validate_unit_range("importance", importance)?;
        validate_unit_range("confidence", confidence)?;

        let mut scope = draft.scope.unwrap_or_default();
        // Uncertain data never leaves the private tier
        if confidence < 0.7 {
            scope = Scope::Private;
        }

        let summary = match draft.summary {
            Some(s) if !s.trim().is_empty() => s,
            _ => derive_summary(&draft.content),
        };

        let mut tags = draft.tags;
        tags.sort();
        tags.dedup();

        let now = Utc::now();
        Ok(Self {
            id: draft
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            memory_type: draft.memory_type.unwrap_or(MemoryType::Fact),
            summary,
            content: draft.content,
            embedding: draft.embedding,
            importance,
            confidence,
            scope,
            agent_id,
            tenant_id: draft.tenant_id,
            tags,
            metadata: draft.metadata,
            session_id: draft.session_id,
            access_count: 0,
            last_accessed_at: None,
            inserted_at: now,
            updated_at: now,
        })
    }
}

/// First line of the content, bounded to a displayable length
pub fn derive_summary(content: &str) -> String {
    let first_line = content.lines().next().unwrap_or("").trim();
    truncate_chars(first_line, DERIVED_SUMMARY_MAX_CHARS)
}

/// Truncate at a char boundary without splitting a code point
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

fn validate_unit_range(field: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) || value.is_nan() {
        return Err(MnemographError::validation(
            field,
            format!("must be within [0, 1], got {value}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_draft_defaults() {
        let memory =
            Memory::from_draft(MemoryDraft::new("Paris is the capital of France").agent_id("a1"))
                .unwrap();

        assert_eq!(memory.memory_type, MemoryType::Fact);
        assert_eq!(memory.scope, Scope::Private);
        assert!((memory.importance - 0.5).abs() < f32::EPSILON);
        assert!((memory.confidence - 0.7).abs() < f32::EPSILON);
        assert_eq!(memory.access_count, 0);
        assert!(memory.embedding.is_none());
        assert!(!memory.id.is_empty());
        assert_eq!(memory.summary, "Paris is the capital of France");
    }

    #[test]
    fn test_low_confidence_demotes_shared_scope() {
        let memory = Memory::from_draft(
            MemoryDraft::new("uncertain claim")
                .agent_id("a1")
                .confidence(0.5)
                .scope(Scope::Shared),
        )
        .unwrap();

        assert_eq!(memory.scope, Scope::Private);
    }

    #[test]
    fn test_confident_shared_scope_kept() {
        let memory = Memory::from_draft(
            MemoryDraft::new("well-known fact")
                .agent_id("a1")
                .confidence(0.9)
                .scope(Scope::Shared),
        )
        .unwrap();

        assert_eq!(memory.scope, Scope::Shared);
    }

    #[test]
    fn test_empty_content_rejected() {
        let err = Memory::from_draft(MemoryDraft::new("   ").agent_id("a1")).unwrap_err();
        match err {
            MnemographError::Validation { field, .. } => assert_eq!(field, "content"),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_agent_rejected() {
        let err = Memory::from_draft(MemoryDraft::new("content")).unwrap_err();
        match err {
            MnemographError::Validation { field, .. } => assert_eq!(field, "agent_id"),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_out_of_range_scores_rejected() {
        assert!(
            Memory::from_draft(MemoryDraft::new("x").agent_id("a1").importance(1.5)).is_err()
        );
        assert!(
            Memory::from_draft(MemoryDraft::new("x").agent_id("a1").confidence(-0.1)).is_err()
        );
    }

    #[test]
    fn test_tags_deduplicated() {
        let memory = Memory::from_draft(
            MemoryDraft::new("tagged")
                .agent_id("a1")
                .tags(vec!["b".into(), "a".into(), "b".into()]),
        )
        .unwrap();

        assert_eq!(memory.tags, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_scope_ordering_and_restriction() {
        assert!(Scope::Private < Scope::Shared);
        assert!(Scope::Shared < Scope::Global);
        assert_eq!(Scope::Global.more_restrictive(Scope::Private), Scope::Private);
        assert_eq!(Scope::Shared.more_restrictive(Scope::Global), Scope::Shared);
        assert_eq!(Scope::Global.more_restrictive(Scope::Global), Scope::Global);
    }

    #[test]
    fn test_enum_round_trips() {
        for t in [
            MemoryType::Fact,
            MemoryType::Conversation,
            MemoryType::Episodic,
            MemoryType::Reflection,
            MemoryType::Observation,
            MemoryType::Decision,
        ] {
            assert_eq!(t.as_str().parse::<MemoryType>().unwrap(), t);
        }
        for e in [
            EdgeType::RelatesTo,
            EdgeType::Supports,
            EdgeType::Contradicts,
            EdgeType::Causes,
            EdgeType::Follows,
        ] {
            assert_eq!(e.as_str().parse::<EdgeType>().unwrap(), e);
        }
        for s in [Scope::Private, Scope::Shared, Scope::Global] {
            assert_eq!(s.as_str().parse::<Scope>().unwrap(), s);
        }
        assert!("sideways".parse::<Scope>().is_err());
        assert!("hunch".parse::<MemoryType>().is_err());
    }

    #[test]
    fn test_edge_validation() {
        let edge = Edge::new(
            "m1",
            "m2",
            EdgeType::Supports,
            0.8,
            0.9,
            Scope::Private,
            Map::new(),
        )
        .unwrap();
        assert_eq!(edge.from_id, "m1");
        assert_eq!(edge.edge_type, EdgeType::Supports);

        assert!(Edge::new("m1", "m2", EdgeType::Causes, 1.2, 0.5, Scope::Private, Map::new())
            .is_err());
        assert!(Edge::new("", "m2", EdgeType::Causes, 0.5, 0.5, Scope::Private, Map::new())
            .is_err());
    }

    #[test]
    fn test_derive_summary_first_line_bounded() {
        assert_eq!(derive_summary("one line"), "one line");
        assert_eq!(derive_summary("first\nsecond"), "first");
        let long = "x".repeat(500);
        assert_eq!(derive_summary(&long).chars().count(), DERIVED_SUMMARY_MAX_CHARS);
    }

    #[test]
    fn test_memory_serialization_round_trip() {
        let memory = Memory::from_draft(
            MemoryDraft::new("serialize me")
                .agent_id("a1")
                .memory_type(MemoryType::Observation),
        )
        .unwrap();

        let json = serde_json::to_string(&memory).unwrap();
        assert!(json.contains("\"type\":\"observation\""));
        let back: Memory = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, memory.id);
        assert_eq!(back.memory_type, memory.memory_type);
        assert_eq!(back.scope, memory.scope);
    }
}
