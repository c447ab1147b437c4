//! Context reduction
//!
//! Turns a set of recalled memories (plus optional relationship edges)
//! into a formatted context string under a token budget. Memories are
//! ranked by a composite of similarity, confidence, importance, recency,
//! and access history, then greedily selected until the character budget
//! (approximately four characters per token) runs out.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use crate::memory::types::{Edge, Memory};

/// Characters per token, the usual fast approximation
const CHARS_PER_TOKEN: usize = 4;

/// Edges shown in the text format
const TEXT_EDGES_MAX: usize = 10;

/// Edges carried in the json format
const JSON_EDGES_MAX: usize = 20;

/// Default similarity for memories that arrived without a score
const SIMILARITY_DEFAULT: f32 = 0.5;

/// Output shape of the reduced context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextFormat {
    /// Markdown sections
    #[default]
    Text,
    /// XML-like elements
    Structured,
    /// A single JSON value
    Json,
}

#[derive(Debug, Clone)]
pub struct ReduceOptions {
    /// Rough token budget for the emitted context
    pub max_tokens: usize,
    pub include_edges: bool,
    pub format: ContextFormat,
}

impl Default for ReduceOptions {
    fn default() -> Self {
        Self {
            max_tokens: 2000,
            include_edges: true,
            format: ContextFormat::Text,
        }
    }
}

/// Everything the reducer works from
pub struct ReduceInput<'a> {
    pub memories: &'a [Memory],
    pub edges: &'a [Edge],
    /// Similarity per memory id, from the recall that produced the set
    pub similarities: &'a HashMap<String, f32>,
}

/// Composite relevance used for ranking during reduction.
///
/// `0.35·similarity + 0.25·confidence + 0.20·importance + 0.10·recency +
/// 0.10·access`, with a missing similarity defaulting to 0.5.
pub fn composite_score(memory: &Memory, similarity: Option<f32>, now: DateTime<Utc>) -> f32 {
    let similarity = similarity.unwrap_or(SIMILARITY_DEFAULT);
    0.35 * similarity
        + 0.25 * memory.confidence
        + 0.20 * memory.importance
        + 0.10 * recency_score(memory.inserted_at, now)
        + 0.10 * access_count_score(memory.access_count)
}

/// Recency bucketed by age: a day, a week, a month, a quarter, older
fn recency_score(inserted_at: DateTime<Utc>, now: DateTime<Utc>) -> f32 {
    let days = (now - inserted_at).num_days();
    match days {
        d if d <= 1 => 1.0,
        d if d <= 7 => 0.8,
        d if d <= 30 => 0.6,
        d if d <= 90 => 0.4,
        _ => 0.2,
    }
}

/// Never-accessed memories rank slightly below the neutral default
fn access_count_score(count: u32) -> f32 {
    if count == 0 {
        0.3
    } else {
        (0.5 + 0.1 * count as f32).min(1.0)
    }
}

struct Ranked {
    memory: Memory,
    similarity: f32,
    score: f32,
}

/// Reduce recalled memories into a formatted context string
pub fn reduce(input: &ReduceInput<'_>, opts: &ReduceOptions) -> String {
    let now = Utc::now();

    // Dedup by id, first occurrence wins
    let mut seen = HashSet::new();
    let mut ranked: Vec<Ranked> = input
        .memories
        .iter()
        .filter(|m| seen.insert(m.id.clone()))
        .map(|m| {
            let similarity = input.similarities.get(&m.id).copied();
            Ranked {
                score: composite_score(m, similarity, now),
                similarity: similarity.unwrap_or(SIMILARITY_DEFAULT),
                memory: m.clone(),
            }
        })
        .collect();
    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    // Greedy selection under the character budget
    let budget = opts.max_tokens * CHARS_PER_TOKEN;
    let mut used = 0usize;
    let mut selected: Vec<Ranked> = Vec::new();
    for entry in ranked {
        let cost = entry.memory.summary.len() + entry.memory.content.len();
        if used + cost > budget {
            break;
        }
        used += cost;
        selected.push(entry);
    }

    let member_ids: HashSet<&str> = selected.iter().map(|r| r.memory.id.as_str()).collect();
    let edges: Vec<&Edge> = if opts.include_edges {
        input
            .edges
            .iter()
            .filter(|e| {
                member_ids.contains(e.from_id.as_str()) && member_ids.contains(e.to_id.as_str())
            })
            .collect()
    } else {
        Vec::new()
    };

    match opts.format {
        ContextFormat::Text => format_text(&selected, &edges),
        ContextFormat::Structured => format_structured(&selected, &edges),
        ContextFormat::Json => format_json(&selected, &edges),
    }
}

fn format_text(selected: &[Ranked], edges: &[&Edge]) -> String {
    let mut out = String::from("## Relevant Memories\n");
    for entry in selected {
        let _ = write!(
            out,
            "\n### [{}] {}\n{}\n",
            entry.memory.memory_type.as_str(),
            entry.memory.summary,
            entry.memory.content
        );
    }

    if !edges.is_empty() {
        out.push_str("\n## Memory Relationships\n\n");
        for edge in edges.iter().take(TEXT_EDGES_MAX) {
            let _ = writeln!(
                out,
                "- {} --[{}]--> {}",
                edge.from_id,
                edge.edge_type.as_str(),
                edge.to_id
            );
        }
    }
    out
}

fn format_structured(selected: &[Ranked], edges: &[&Edge]) -> String {
    let mut out = String::new();
    for entry in selected {
        let _ = writeln!(
            out,
            "<memory id=\"{}\" type=\"{}\" confidence=\"{:.2}\">",
            escape_xml(&entry.memory.id),
            entry.memory.memory_type.as_str(),
            entry.memory.confidence
        );
        let _ = writeln!(out, "  <summary>{}</summary>", escape_xml(&entry.memory.summary));
        let _ = writeln!(out, "  <content>{}</content>", escape_xml(&entry.memory.content));
        out.push_str("</memory>\n");
    }

    if !edges.is_empty() {
        out.push_str("<relationships>\n");
        for edge in edges {
            let _ = writeln!(
                out,
                "  <edge from=\"{}\" to=\"{}\" type=\"{}\" weight=\"{:.2}\"/>",
                escape_xml(&edge.from_id),
                escape_xml(&edge.to_id),
                edge.edge_type.as_str(),
                edge.weight
            );
        }
        out.push_str("</relationships>\n");
    }
    out
}

fn format_json(selected: &[Ranked], edges: &[&Edge]) -> String {
    let memories: Vec<_> = selected
        .iter()
        .map(|entry| {
            json!({
                "id": entry.memory.id,
                "type": entry.memory.memory_type.as_str(),
                "summary": entry.memory.summary,
                "content": entry.memory.content,
                "confidence": entry.memory.confidence,
                "relevance": entry.similarity,
                "score": entry.score,
            })
        })
        .collect();
    let relationships: Vec<_> = edges
        .iter()
        .take(JSON_EDGES_MAX)
        .map(|edge| {
            json!({
                "from": edge.from_id,
                "to": edge.to_id,
                "type": edge.edge_type.as_str(),
                "weight": edge.weight,
            })
        })
        .collect();

    json!({ "memories": memories, "relationships": relationships }).to_string()
}

/// Escape special XML characters in content
fn escape_xml(content: &str) -> String {
    content
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
