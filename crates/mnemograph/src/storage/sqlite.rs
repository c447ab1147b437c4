//! SQLite-backed relational store
//!
//! Memories and edges live in two tables with a UNIQUE constraint on the
//! edge triple and ON DELETE CASCADE foreign keys. Graph expansion runs as
//! a single `WITH RECURSIVE` traversal. Scope predicates are assembled as
//! parameterized fragments from the access context; no identifier or user
//! value is ever interpolated into SQL text.
//!
//! Similarity search fetches scope-filtered candidate rows and computes
//! cosine similarity over their embedding BLOBs in process, which is what
//! the backing store offers without an external vector index.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, OptionalExtension};
use std::path::Path;
use tokio_rusqlite::Connection;

use crate::error::{MnemographError, Result};
use crate::memory::access::{AccessContext, Role};
use crate::memory::types::{Edge, EdgeType, Memory, MemoryType, Scope};
use crate::storage::{
    cosine_similarity, tags_match, Backend, Direction, ExpandOptions, ListOptions, NeighborHit,
    NeighborOptions, SearchHit, SearchOptions, Subgraph,
};

const MEMORY_COLUMNS: &str = "id, memory_type, summary, content, embedding, importance, \
     confidence, scope, agent_id, tenant_id, tags, metadata, session_id, access_count, \
     last_accessed_at, inserted_at, updated_at";

const EDGE_COLUMNS: &str =
    "id, from_id, to_id, edge_type, weight, confidence, scope, metadata, inserted_at";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY NOT NULL,
    memory_type TEXT NOT NULL,
    summary TEXT NOT NULL,
    content TEXT NOT NULL,
    embedding BLOB,
    importance REAL NOT NULL DEFAULT 0.5,
    confidence REAL NOT NULL DEFAULT 0.7,
    scope TEXT NOT NULL DEFAULT 'private',
    agent_id TEXT NOT NULL,
    tenant_id TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    metadata TEXT NOT NULL DEFAULT '{}',
    session_id TEXT,
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed_at TEXT,
    inserted_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_memories_type ON memories(memory_type);
CREATE INDEX IF NOT EXISTS idx_memories_agent ON memories(agent_id);
CREATE INDEX IF NOT EXISTS idx_memories_scope ON memories(scope);
CREATE INDEX IF NOT EXISTS idx_memories_tenant ON memories(tenant_id);
CREATE INDEX IF NOT EXISTS idx_memories_session ON memories(session_id);
CREATE INDEX IF NOT EXISTS idx_memories_confidence ON memories(confidence);
CREATE INDEX IF NOT EXISTS idx_memories_agent_scope_inserted
    ON memories(agent_id, scope, inserted_at);

CREATE TABLE IF NOT EXISTS edges (
    id TEXT PRIMARY KEY NOT NULL,
    from_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    to_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    edge_type TEXT NOT NULL DEFAULT 'relates_to',
    weight REAL NOT NULL DEFAULT 0.5,
    confidence REAL NOT NULL DEFAULT 0.7,
    scope TEXT NOT NULL DEFAULT 'private',
    metadata TEXT NOT NULL DEFAULT '{}',
    inserted_at TEXT NOT NULL,
    UNIQUE (from_id, to_id, edge_type)
);

CREATE INDEX IF NOT EXISTS idx_edges_from ON edges(from_id);
CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(to_id);
CREATE INDEX IF NOT EXISTS idx_edges_from_type_weight ON edges(from_id, edge_type, weight);
";

/// Helper to convert tokio_rusqlite errors into storage errors
fn storage_err(e: tokio_rusqlite::Error) -> MnemographError {
    MnemographError::Storage(e.to_string())
}

/// Persistent backend over a single SQLite connection.
///
/// `tokio_rusqlite` runs all statements on a dedicated thread with
/// request/reply messaging, so internal state is single-threaded even
/// though callers are concurrent.
pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    /// Open (or create) a database file
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).await.map_err(storage_err)?;
        Ok(Self { conn })
    }

    /// Open a throwaway in-memory database
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await.map_err(storage_err)?;
        Ok(Self { conn })
    }
}

/// Parameterized visibility predicate for the given context.
///
/// Returns a SQL fragment over the given column prefix plus the values to
/// bind, in placeholder order. Scope literals come from the enum, never
/// from caller input.
fn scope_predicate(ctx: &AccessContext, prefix: &str) -> (String, Vec<SqlValue>) {
    if ctx.role == Role::System {
        return ("1 = 1".to_string(), Vec::new());
    }

    let mut clauses = Vec::new();
    let mut params = Vec::new();
    for scope in ctx.readable_scopes() {
        match scope {
            Scope::Private => {
                clauses.push(format!("({prefix}scope = 'private' AND {prefix}agent_id = ?)"));
                params.push(SqlValue::Text(ctx.agent_id.clone()));
            }
            Scope::Shared => match &ctx.tenant_id {
                None => clauses.push(format!("({prefix}scope = 'shared')")),
                Some(tenant) => {
                    clauses
                        .push(format!("({prefix}scope = 'shared' AND {prefix}tenant_id = ?)"));
                    params.push(SqlValue::Text(tenant.clone()));
                }
            },
            Scope::Global => clauses.push(format!("({prefix}scope = 'global')")),
        }
    }

    (format!("({})", clauses.join(" OR ")), params)
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn vec_to_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn conv_err(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conv_err(idx, e))
}

/// Convert a row with [`MEMORY_COLUMNS`] into a Memory
fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<Memory> {
    let memory_type: String = row.get(1)?;
    let embedding: Option<Vec<u8>> = row.get(4)?;
    let scope: String = row.get(7)?;
    let tags_json: String = row.get(10)?;
    let metadata_json: String = row.get(11)?;
    let last_accessed: Option<String> = row.get(14)?;
    let inserted: String = row.get(15)?;
    let updated: String = row.get(16)?;

    Ok(Memory {
        id: row.get(0)?,
        memory_type: memory_type.parse::<MemoryType>().map_err(|e| conv_err(1, e))?,
        summary: row.get(2)?,
        content: row.get(3)?,
        embedding: embedding.map(|b| blob_to_vec(&b)),
        importance: row.get(5)?,
        confidence: row.get(6)?,
        scope: scope.parse::<Scope>().map_err(|e| conv_err(7, e))?,
        agent_id: row.get(8)?,
        tenant_id: row.get(9)?,
        tags: serde_json::from_str(&tags_json).map_err(|e| conv_err(10, e))?,
        metadata: serde_json::from_str(&metadata_json).map_err(|e| conv_err(11, e))?,
        session_id: row.get(12)?,
        access_count: row.get(13)?,
        last_accessed_at: last_accessed.as_deref().map(|t| parse_ts(14, t)).transpose()?,
        inserted_at: parse_ts(15, &inserted)?,
        updated_at: parse_ts(16, &updated)?,
    })
}

/// Convert a row with [`EDGE_COLUMNS`] (at the given column offset) into
/// an Edge
fn row_to_edge(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<Edge> {
    let edge_type: String = row.get(offset + 3)?;
    let scope: String = row.get(offset + 6)?;
    let metadata_json: String = row.get(offset + 7)?;
    let inserted: String = row.get(offset + 8)?;

    Ok(Edge {
        id: row.get(offset)?,
        from_id: row.get(offset + 1)?,
        to_id: row.get(offset + 2)?,
        edge_type: edge_type
            .parse::<EdgeType>()
            .map_err(|e| conv_err(offset + 3, e))?,
        weight: row.get(offset + 4)?,
        confidence: row.get(offset + 5)?,
        scope: scope.parse::<Scope>().map_err(|e| conv_err(offset + 6, e))?,
        metadata: serde_json::from_str(&metadata_json).map_err(|e| conv_err(offset + 7, e))?,
        inserted_at: parse_ts(offset + 8, &inserted)?,
    })
}

fn memory_params(memory: &Memory) -> rusqlite::Result<Vec<SqlValue>> {
    let tags = serde_json::to_string(&memory.tags)
        .map_err(|e| conv_err(10, e))?;
    let metadata = serde_json::to_string(&memory.metadata)
        .map_err(|e| conv_err(11, e))?;

    Ok(vec![
        SqlValue::Text(memory.id.clone()),
        SqlValue::Text(memory.memory_type.as_str().to_string()),
        SqlValue::Text(memory.summary.clone()),
        SqlValue::Text(memory.content.clone()),
        match &memory.embedding {
            Some(e) => SqlValue::Blob(vec_to_blob(e)),
            None => SqlValue::Null,
        },
        SqlValue::Real(memory.importance as f64),
        SqlValue::Real(memory.confidence as f64),
        SqlValue::Text(memory.scope.as_str().to_string()),
        SqlValue::Text(memory.agent_id.clone()),
        match &memory.tenant_id {
            Some(t) => SqlValue::Text(t.clone()),
            None => SqlValue::Null,
        },
        SqlValue::Text(tags),
        SqlValue::Text(metadata),
        match &memory.session_id {
            Some(s) => SqlValue::Text(s.clone()),
            None => SqlValue::Null,
        },
        SqlValue::Integer(memory.access_count as i64),
        match &memory.last_accessed_at {
            Some(t) => SqlValue::Text(t.to_rfc3339()),
            None => SqlValue::Null,
        },
        SqlValue::Text(memory.inserted_at.to_rfc3339()),
        SqlValue::Text(memory.updated_at.to_rfc3339()),
    ])
}

#[async_trait]
impl Backend for SqliteBackend {
    async fn start(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch("PRAGMA foreign_keys = ON;")?;
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await
            .map_err(storage_err)
    }

    async fn stop(&self) -> Result<()> {
        // The connection thread winds down when the handle drops
        Ok(())
    }

    async fn put_memory(&self, memory: &Memory, ctx: &AccessContext) -> Result<Memory> {
        if !ctx.can_write(memory.scope) {
            return Err(MnemographError::AccessDenied(format!(
                "cannot write {} scope",
                memory.scope.as_str()
            )));
        }

        let mut stored = memory.clone();
        stored.updated_at = Utc::now();
        let params = memory_params(&stored).map_err(|e| MnemographError::Storage(e.to_string()))?;
        let id = stored.id.clone();
        let agent_id = stored.agent_id.clone();

        let agent_ok = self
            .conn
            .call(move |conn| {
                let existing: Option<String> = conn
                    .query_row(
                        "SELECT agent_id FROM memories WHERE id = ?",
                        [&id],
                        |row| row.get(0),
                    )
                    .optional()?;
                if matches!(existing, Some(ref a) if *a != agent_id) {
                    return Ok(false);
                }

                // Upsert, not INSERT OR REPLACE: a delete-and-reinsert
                // would cascade away the memory's edges.
                conn.execute(
                    "INSERT INTO memories (id, memory_type, summary, content, embedding, \
                     importance, confidence, scope, agent_id, tenant_id, tags, metadata, \
                     session_id, access_count, last_accessed_at, inserted_at, updated_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
                     ON CONFLICT(id) DO UPDATE SET \
                     memory_type = excluded.memory_type, summary = excluded.summary, \
                     content = excluded.content, embedding = excluded.embedding, \
                     importance = excluded.importance, confidence = excluded.confidence, \
                     scope = excluded.scope, tenant_id = excluded.tenant_id, \
                     tags = excluded.tags, metadata = excluded.metadata, \
                     session_id = excluded.session_id, access_count = excluded.access_count, \
                     last_accessed_at = excluded.last_accessed_at, \
                     updated_at = excluded.updated_at",
                    params_from_iter(params),
                )?;
                Ok(true)
            })
            .await
            .map_err(storage_err)?;

        if !agent_ok {
            return Err(MnemographError::validation(
                "agent_id",
                "agent_id of a stored memory cannot change",
            ));
        }
        Ok(stored)
    }

    async fn get_memory(&self, id: &str, ctx: &AccessContext) -> Result<Memory> {
        let id_owned = id.to_string();
        let memory = self
            .conn
            .call(move |conn| {
                let sql = format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?");
                let memory = conn
                    .query_row(&sql, [&id_owned], row_to_memory)
                    .optional()?;
                Ok(memory)
            })
            .await
            .map_err(storage_err)?
            .ok_or_else(|| MnemographError::NotFound(format!("memory {id}")))?;

        if !ctx.can_access_memory(&memory) {
            return Err(MnemographError::AccessDenied(format!("memory {id}")));
        }
        Ok(memory)
    }

    async fn delete_memory(&self, id: &str, ctx: &AccessContext) -> Result<()> {
        let id_owned = id.to_string();
        let owner: Option<String> = self
            .conn
            .call(move |conn| {
                let owner = conn
                    .query_row(
                        "SELECT agent_id FROM memories WHERE id = ?",
                        [&id_owned],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(owner)
            })
            .await
            .map_err(storage_err)?;

        let Some(owner) = owner else {
            return Ok(());
        };
        if ctx.role != Role::System && owner != ctx.agent_id {
            return Err(MnemographError::AccessDenied(format!("memory {id}")));
        }

        let id_owned = id.to_string();
        self.conn
            .call(move |conn| {
                // Single transaction: incident edges and the memory go
                // together (FK cascade covers the edges as well)
                let tx = conn.transaction()?;
                tx.execute(
                    "DELETE FROM edges WHERE from_id = ? OR to_id = ?",
                    [&id_owned, &id_owned],
                )?;
                tx.execute("DELETE FROM memories WHERE id = ?", [&id_owned])?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(storage_err)
    }

    async fn list_memories(&self, ctx: &AccessContext, opts: &ListOptions) -> Result<Vec<Memory>> {
        let (scope_sql, mut params) = scope_predicate(ctx, "");
        let mut sql = format!("SELECT {MEMORY_COLUMNS} FROM memories WHERE {scope_sql}");
        if let Some(t) = opts.memory_type {
            sql.push_str(" AND memory_type = ?");
            params.push(SqlValue::Text(t.as_str().to_string()));
        }
        sql.push_str(" ORDER BY inserted_at DESC");
        // Tags are matched in process, so the SQL limit only applies when
        // no tag filter can shrink the result afterwards
        if opts.tags.is_none() {
            sql.push_str(" LIMIT ?");
            params.push(SqlValue::Integer(opts.limit as i64));
        }

        let memories: Vec<Memory> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(params), row_to_memory)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(storage_err)?;

        let mut memories: Vec<Memory> = memories
            .into_iter()
            .filter(|m| ctx.can_access_memory(m))
            .filter(|m| {
                opts.tags
                    .as_ref()
                    .map_or(true, |tags| tags_match(&m.tags, tags))
            })
            .collect();
        memories.truncate(opts.limit);
        Ok(memories)
    }

    async fn search_memories(
        &self,
        query: &[f32],
        ctx: &AccessContext,
        opts: &SearchOptions,
    ) -> Result<Vec<SearchHit>> {
        let (scope_sql, mut params) = scope_predicate(ctx, "");
        let mut sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memories \
             WHERE embedding IS NOT NULL AND {scope_sql}"
        );
        if let Some(t) = opts.memory_type {
            sql.push_str(" AND memory_type = ?");
            params.push(SqlValue::Text(t.as_str().to_string()));
        }
        if let Some(c) = opts.min_confidence {
            sql.push_str(" AND confidence >= ?");
            params.push(SqlValue::Real(c as f64));
        }

        let query = query.to_vec();
        let threshold = opts.threshold;
        let candidates: Vec<(Memory, f32)> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(params), row_to_memory)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                let hits = rows
                    .into_iter()
                    .filter_map(|m| {
                        let score = cosine_similarity(&query, m.embedding.as_deref()?);
                        (score >= threshold).then_some((m, score))
                    })
                    .collect();
                Ok(hits)
            })
            .await
            .map_err(storage_err)?;

        let mut hits: Vec<SearchHit> = candidates
            .into_iter()
            .filter(|(m, _)| ctx.can_access_memory(m))
            .filter(|(m, _)| {
                opts.tags
                    .as_ref()
                    .map_or(true, |tags| tags_match(&m.tags, tags))
            })
            .map(|(memory, score)| SearchHit { memory, score })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(opts.limit);
        Ok(hits)
    }

    async fn put_edge(&self, edge: &Edge, _ctx: &AccessContext) -> Result<Edge> {
        let metadata = serde_json::to_string(&edge.metadata)
            .map_err(|e| MnemographError::Storage(e.to_string()))?;
        let edge_owned = edge.clone();

        let result: std::result::Result<Edge, String> = self
            .conn
            .call(move |conn| {
                for endpoint in [&edge_owned.from_id, &edge_owned.to_id] {
                    let exists: bool = conn.query_row(
                        "SELECT EXISTS(SELECT 1 FROM memories WHERE id = ?)",
                        [endpoint],
                        |row| row.get(0),
                    )?;
                    if !exists {
                        return Ok(Err(endpoint.clone()));
                    }
                }

                // The UNIQUE constraint makes repeated puts a no-op
                conn.execute(
                    "INSERT INTO edges (id, from_id, to_id, edge_type, weight, confidence, \
                     scope, metadata, inserted_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
                     ON CONFLICT(from_id, to_id, edge_type) DO NOTHING",
                    params_from_iter(vec![
                        SqlValue::Text(edge_owned.id.clone()),
                        SqlValue::Text(edge_owned.from_id.clone()),
                        SqlValue::Text(edge_owned.to_id.clone()),
                        SqlValue::Text(edge_owned.edge_type.as_str().to_string()),
                        SqlValue::Real(edge_owned.weight as f64),
                        SqlValue::Real(edge_owned.confidence as f64),
                        SqlValue::Text(edge_owned.scope.as_str().to_string()),
                        SqlValue::Text(metadata),
                        SqlValue::Text(edge_owned.inserted_at.to_rfc3339()),
                    ]),
                )?;

                let sql = format!(
                    "SELECT {EDGE_COLUMNS} FROM edges \
                     WHERE from_id = ? AND to_id = ? AND edge_type = ?"
                );
                let stored = conn.query_row(
                    &sql,
                    [
                        &edge_owned.from_id,
                        &edge_owned.to_id,
                        &edge_owned.edge_type.as_str().to_string(),
                    ],
                    |row| row_to_edge(row, 0),
                )?;
                Ok(Ok(stored))
            })
            .await
            .map_err(storage_err)?;

        result.map_err(|missing| MnemographError::NotFound(format!("memory {missing}")))
    }

    async fn delete_edge(&self, from_id: &str, to_id: &str, edge_type: EdgeType) -> Result<()> {
        let from = from_id.to_string();
        let to = to_id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM edges WHERE from_id = ? AND to_id = ? AND edge_type = ?",
                    [&from, &to, &edge_type.as_str().to_string()],
                )?;
                Ok(())
            })
            .await
            .map_err(storage_err)
    }

    async fn neighbors(
        &self,
        id: &str,
        direction: Direction,
        ctx: &AccessContext,
        opts: &NeighborOptions,
    ) -> Result<Vec<NeighborHit>> {
        let mut hits = Vec::new();
        if matches!(direction, Direction::Outgoing | Direction::Both) {
            hits.extend(self.neighbors_one_way(id, true, ctx, opts).await?);
        }
        if matches!(direction, Direction::Incoming | Direction::Both) {
            hits.extend(self.neighbors_one_way(id, false, ctx, opts).await?);
        }

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
        if seeds.is_empty() {
            return Ok(Subgraph::default());
        }

        let (scope_sql, scope_params) = scope_predicate(ctx, "m.");
        let seed_marks = placeholders(seeds.len());
        let sql = format!(
            "WITH RECURSIVE traverse(id, depth) AS ( \
                 SELECT m.id, 0 FROM memories m \
                 WHERE m.id IN ({seed_marks}) AND {scope_sql} \
               UNION \
                 SELECT e.to_id, t.depth + 1 \
                 FROM edges e \
                 JOIN traverse t ON e.from_id = t.id \
                 JOIN memories m ON m.id = e.to_id \
                 WHERE t.depth < ? AND e.weight >= ? AND m.confidence >= ? AND {scope_sql} \
             ) \
             SELECT {cols}, tt.min_depth \
             FROM memories mm \
             JOIN (SELECT id, MIN(depth) AS min_depth FROM traverse GROUP BY id) tt \
                 ON tt.id = mm.id \
             ORDER BY tt.min_depth ASC, mm.inserted_at ASC \
             LIMIT ?",
            cols = MEMORY_COLUMNS
                .split(", ")
                .map(|c| format!("mm.{c}"))
                .collect::<Vec<_>>()
                .join(", "),
        );

        let mut params: Vec<SqlValue> = seeds
            .iter()
            .map(|s| SqlValue::Text(s.clone()))
            .collect();
        params.extend(scope_params.clone());
        params.push(SqlValue::Integer(opts.depth as i64));
        params.push(SqlValue::Real(opts.min_weight as f64));
        params.push(SqlValue::Real(opts.min_confidence as f64));
        params.extend(scope_params);
        params.push(SqlValue::Integer(opts.limit as i64));

        let min_weight = opts.min_weight;
        let subgraph = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let memories: Vec<Memory> = stmt
                    .query_map(params_from_iter(params), row_to_memory)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                if memories.is_empty() {
                    return Ok(Subgraph::default());
                }

                let ids: Vec<String> = memories.iter().map(|m| m.id.clone()).collect();
                let marks = placeholders(ids.len());
                let edge_sql = format!(
                    "SELECT {EDGE_COLUMNS} FROM edges \
                     WHERE weight >= ? AND from_id IN ({marks}) AND to_id IN ({marks})"
                );
                let mut edge_params = vec![SqlValue::Real(min_weight as f64)];
                edge_params.extend(ids.iter().map(|id| SqlValue::Text(id.clone())));
                edge_params.extend(ids.iter().map(|id| SqlValue::Text(id.clone())));

                let mut stmt = conn.prepare(&edge_sql)?;
                let edges: Vec<Edge> = stmt
                    .query_map(params_from_iter(edge_params), |row| row_to_edge(row, 0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                Ok(Subgraph { memories, edges })
            })
            .await
            .map_err(storage_err)?;

        // Uniform enforcement: the predicate already filtered, this is the
        // same rule applied to the hydrated rows
        let memories: Vec<Memory> = subgraph
            .memories
            .into_iter()
            .filter(|m| ctx.can_access_memory(m))
            .collect();
        Ok(Subgraph {
            memories,
            edges: subgraph.edges,
        })
    }

    async fn bump_access(&self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let marks = placeholders(ids.len());
        let sql = format!(
            "UPDATE memories SET access_count = access_count + 1, last_accessed_at = ? \
             WHERE id IN ({marks})"
        );
        let mut params = vec![SqlValue::Text(Utc::now().to_rfc3339())];
        params.extend(ids.iter().map(|id| SqlValue::Text(id.clone())));

        self.conn
            .call(move |conn| {
                conn.execute(&sql, params_from_iter(params))?;
                Ok(())
            })
            .await
            .map_err(storage_err)
    }
}

impl SqliteBackend {
    async fn neighbors_one_way(
        &self,
        id: &str,
        outgoing: bool,
        ctx: &AccessContext,
        opts: &NeighborOptions,
    ) -> Result<Vec<NeighborHit>> {
        let (scope_sql, scope_params) = scope_predicate(ctx, "m.");
        let (anchor_col, peer_col) = if outgoing {
            ("e.from_id", "e.to_id")
        } else {
            ("e.to_id", "e.from_id")
        };

        let mem_cols = MEMORY_COLUMNS
            .split(", ")
            .map(|c| format!("m.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let edge_cols = EDGE_COLUMNS
            .split(", ")
            .map(|c| format!("e.{c}"))
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = format!(
            "SELECT {mem_cols}, {edge_cols} FROM edges e \
             JOIN memories m ON m.id = {peer_col} \
             WHERE {anchor_col} = ? AND e.weight >= ? AND {scope_sql}"
        );
        let mut params = vec![
            SqlValue::Text(id.to_string()),
            SqlValue::Real(opts.min_weight as f64),
        ];
        params.extend(scope_params);
        if let Some(t) = opts.edge_type {
            sql.push_str(" AND e.edge_type = ?");
            params.push(SqlValue::Text(t.as_str().to_string()));
        }
        sql.push_str(" ORDER BY e.weight DESC LIMIT ?");
        params.push(SqlValue::Integer(opts.limit as i64));

        let hits: Vec<NeighborHit> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(params), |row| {
                        Ok(NeighborHit {
                            memory: row_to_memory(row)?,
                            edge: row_to_edge(row, 17)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(storage_err)?;

        Ok(hits
            .into_iter()
            .filter(|h| ctx.can_access_memory(&h.memory))
            .collect())
    }
}
