//! In-memory backend
//!
//! Keeps both tables behind a single `RwLock` so that cascade deletes are
//! atomic. Critical sections are short and never span an await point.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::RwLock;

use crate::error::{MnemographError, Result};
use crate::memory::access::{AccessContext, Role};
use crate::memory::types::{Edge, EdgeType, Memory};
use crate::storage::{
    cosine_similarity, tags_match, Backend, Direction, ExpandOptions, ListOptions, NeighborHit,
    NeighborOptions, SearchHit, SearchOptions, Subgraph,
};

type EdgeKey = (String, String, EdgeType);

#[derive(Default)]
struct Tables {
    memories: HashMap<String, Memory>,
    edges: HashMap<EdgeKey, Edge>,
}

/// Backend holding everything in process memory. The default for tests
/// and single-process deployments without persistence needs.
#[derive(Default)]
pub struct InMemoryBackend {
    tables: RwLock<Tables>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| MnemographError::Storage("memory backend lock poisoned".to_string()))
    }

    fn lock_write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| MnemographError::Storage("memory backend lock poisoned".to_string()))
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    async fn put_memory(&self, memory: &Memory, ctx: &AccessContext) -> Result<Memory> {
        if !ctx.can_write(memory.scope) {
            return Err(MnemographError::AccessDenied(format!(
                "cannot write {} scope",
                memory.scope.as_str()
            )));
        }

        let mut tables = self.lock_write()?;
        if let Some(existing) = tables.memories.get(&memory.id) {
            // Ownership never changes across replacements
            if existing.agent_id != memory.agent_id {
                return Err(MnemographError::validation(
                    "agent_id",
                    "agent_id of a stored memory cannot change",
                ));
            }
        }

        let mut stored = memory.clone();
        stored.updated_at = Utc::now();
        tables.memories.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn get_memory(&self, id: &str, ctx: &AccessContext) -> Result<Memory> {
        let tables = self.lock_read()?;
        let memory = tables
            .memories
            .get(id)
            .ok_or_else(|| MnemographError::NotFound(format!("memory {id}")))?;
        if !ctx.can_access_memory(memory) {
            return Err(MnemographError::AccessDenied(format!("memory {id}")));
        }
        Ok(memory.clone())
    }

    async fn delete_memory(&self, id: &str, ctx: &AccessContext) -> Result<()> {
        let mut tables = self.lock_write()?;
        let Some(memory) = tables.memories.get(id) else {
            return Ok(());
        };
        if ctx.role != Role::System && memory.agent_id != ctx.agent_id {
            return Err(MnemographError::AccessDenied(format!("memory {id}")));
        }

        tables.memories.remove(id);
        tables
            .edges
            .retain(|_, edge| edge.from_id != id && edge.to_id != id);
        Ok(())
    }

    async fn list_memories(&self, ctx: &AccessContext, opts: &ListOptions) -> Result<Vec<Memory>> {
        let tables = self.lock_read()?;
        let mut memories: Vec<Memory> = tables
            .memories
            .values()
            .filter(|m| ctx.can_access_memory(m))
            .filter(|m| opts.memory_type.map_or(true, |t| m.memory_type == t))
            .filter(|m| {
                opts.tags
                    .as_ref()
                    .map_or(true, |tags| tags_match(&m.tags, tags))
            })
            .cloned()
            .collect();

        memories.sort_by(|a, b| b.inserted_at.cmp(&a.inserted_at));
        memories.truncate(opts.limit);
        Ok(memories)
    }

    async fn search_memories(
        &self,
        query: &[f32],
        ctx: &AccessContext,
        opts: &SearchOptions,
    ) -> Result<Vec<SearchHit>> {
        let tables = self.lock_read()?;
        let mut hits: Vec<SearchHit> = tables
            .memories
            .values()
            .filter(|m| ctx.can_access_memory(m))
            .filter(|m| opts.memory_type.map_or(true, |t| m.memory_type == t))
            .filter(|m| {
                opts.tags
                    .as_ref()
                    .map_or(true, |tags| tags_match(&m.tags, tags))
            })
            .filter(|m| opts.min_confidence.map_or(true, |c| m.confidence >= c))
            .filter_map(|m| {
                let embedding = m.embedding.as_ref()?;
                let score = cosine_similarity(query, embedding);
                if score >= opts.threshold {
                    Some(SearchHit {
                        memory: m.clone(),
                        score,
                    })
                } else {
                    None
                }
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(opts.limit);
        Ok(hits)
    }

    async fn put_edge(&self, edge: &Edge, _ctx: &AccessContext) -> Result<Edge> {
        let mut tables = self.lock_write()?;
        if !tables.memories.contains_key(&edge.from_id) {
            return Err(MnemographError::NotFound(format!("memory {}", edge.from_id)));
        }
        if !tables.memories.contains_key(&edge.to_id) {
            return Err(MnemographError::NotFound(format!("memory {}", edge.to_id)));
        }

        let key = (edge.from_id.clone(), edge.to_id.clone(), edge.edge_type);
        // First writer wins; repeated puts are a no-op
        if let Some(existing) = tables.edges.get(&key) {
            return Ok(existing.clone());
        }
        tables.edges.insert(key, edge.clone());
        Ok(edge.clone())
    }

    async fn delete_edge(&self, from_id: &str, to_id: &str, edge_type: EdgeType) -> Result<()> {
        let mut tables = self.lock_write()?;
        tables
            .edges
            .remove(&(from_id.to_string(), to_id.to_string(), edge_type));
        Ok(())
    }

    async fn neighbors(
        &self,
        id: &str,
        direction: Direction,
        ctx: &AccessContext,
        opts: &NeighborOptions,
    ) -> Result<Vec<NeighborHit>> {
        let tables = self.lock_read()?;
        let mut hits: Vec<NeighborHit> = tables
            .edges
            .values()
            .filter(|e| match direction {
                Direction::Outgoing => e.from_id == id,
                Direction::Incoming => e.to_id == id,
                Direction::Both => e.from_id == id || e.to_id == id,
            })
            .filter(|e| opts.edge_type.map_or(true, |t| e.edge_type == t))
            .filter(|e| e.weight >= opts.min_weight)
            .filter_map(|e| {
                let peer_id = if e.from_id == id { &e.to_id } else { &e.from_id };
                let peer = tables.memories.get(peer_id)?;
                if !ctx.can_access_memory(peer) {
                    return None;
                }
                Some(NeighborHit {
                    memory: peer.clone(),
                    edge: e.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.edge
                .weight
                .partial_cmp(&a.edge.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(opts.limit);
        Ok(hits)
    }

    async fn expand(
        &self,
        seeds: &[String],
        ctx: &AccessContext,
        opts: &ExpandOptions,
    ) -> Result<Subgraph> {
        let tables = self.lock_read()?;

        let mut visited: HashSet<String> = HashSet::new();
        let mut collected: Vec<Memory> = Vec::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();

        for seed in seeds {
            if visited.contains(seed) {
                continue;
            }
            let Some(memory) = tables.memories.get(seed) else {
                continue;
            };
            if !ctx.can_access_memory(memory) {
                continue;
            }
            visited.insert(seed.clone());
            collected.push(memory.clone());
            queue.push_back((seed.clone(), 0));
        }

        'bfs: while let Some((current, depth)) = queue.pop_front() {
            if depth >= opts.depth {
                continue;
            }
            for edge in tables.edges.values().filter(|e| e.from_id == current) {
                if edge.weight < opts.min_weight || visited.contains(&edge.to_id) {
                    continue;
                }
                let Some(target) = tables.memories.get(&edge.to_id) else {
                    continue;
                };
                if target.confidence < opts.min_confidence || !ctx.can_access_memory(target) {
                    continue;
                }
                visited.insert(edge.to_id.clone());
                collected.push(target.clone());
                queue.push_back((edge.to_id.clone(), depth + 1));
                if collected.len() >= opts.limit {
                    break 'bfs;
                }
            }
        }

        let member_ids: HashSet<&str> = collected.iter().map(|m| m.id.as_str()).collect();
        let edges: Vec<Edge> = tables
            .edges
            .values()
            .filter(|e| {
                e.weight >= opts.min_weight
                    && member_ids.contains(e.from_id.as_str())
                    && member_ids.contains(e.to_id.as_str())
            })
            .cloned()
            .collect();

        Ok(Subgraph {
            memories: collected,
            edges,
        })
    }

    async fn bump_access(&self, ids: &[String]) -> Result<()> {
        let mut tables = self.lock_write()?;
        let now = Utc::now();
        for id in ids {
            if let Some(memory) = tables.memories.get_mut(id) {
                memory.access_count = memory.access_count.saturating_add(1);
                memory.last_accessed_at = Some(now);
            }
        }
        Ok(())
    }
}
