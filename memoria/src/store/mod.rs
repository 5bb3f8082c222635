//! Single-writer facade over the libsql-backed `memories`/`memory_history`
//! tables (spec §4.1).

mod schema;
pub mod search;
mod vector;

use std::path::{Path, PathBuf};

use libsql::Connection;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use memoria_core::{
    HistoryAction, Memory, MemoryError, MemoryHistoryItem, Metadata, Owner, Result, ScoredMemory,
};

pub use search::Filters;

const DEFAULT_LIST_LIMIT: usize = 100;
const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Computes the content-addressing hash for a memory's text (spec §3.1,
/// §8.1 "Hash law": `hash(T) == hash(lowercase(trim(T)))`).
#[must_use]
pub fn content_hash(text: &str) -> String {
    let normalized = text.trim().to_lowercase();
    let digest = Sha256::digest(normalized.as_bytes());
    format!("{digest:x}")
}

struct Opened {
    // Kept alive for as long as `conn` is in use; libsql connections borrow
    // their backing database's runtime state.
    _db: libsql::Database,
    conn: Connection,
}

/// Owns the memory store's database connection and exposes the public
/// storage operations. Initializes lazily on first use (spec §4.1 "State").
pub struct MemoryStore {
    path: PathBuf,
    dimensions: usize,
    state: Mutex<Option<Opened>>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("path", &self.path)
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Creates a store bound to `path`, not yet connected.
    #[must_use]
    pub fn new(path: PathBuf, dimensions: usize) -> Self {
        Self {
            path,
            dimensions,
            state: Mutex::new(None),
        }
    }

    /// Resolves the default database path: `dirs::data_dir()/memoria/memoria.db`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("memoria")
            .join("memoria.db")
    }

    async fn ensure_open<'a>(&self, state: &'a mut Option<Opened>) -> Result<&'a Connection> {
        if state.is_none() {
            if let Some(parent) = self.path.parent() {
                if parent != Path::new("") {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|err| MemoryError::Backend(anyhow::anyhow!(err)))?;
                }
            }
            let db = libsql::Builder::new_local(&self.path)
                .build()
                .await
                .map_err(backend)?;
            let conn = db.connect().map_err(backend)?;
            schema::init(&conn, self.dimensions).await?;
            *state = Some(Opened { _db: db, conn });
        }
        Ok(&state.as_ref().unwrap().conn)
    }

    /// Inserts `text` under `owner`, or returns the existing row unchanged
    /// if its content hash already exists among non-deleted memories
    /// (spec §4.1 `add`, §8.1 "Dedup").
    pub async fn add(
        &self,
        text: &str,
        owner: &Owner,
        metadata: Metadata,
        embedding: Option<Vec<f32>>,
    ) -> Result<Memory> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(MemoryError::InvalidInput("memory text is empty".into()));
        }
        let hash = content_hash(trimmed);

        let mut guard = self.state.lock().await;
        let conn = self.ensure_open(&mut guard).await?;

        if let Some(existing) = find_by_hash(conn, &hash).await? {
            return Ok(existing);
        }

        let id = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();
        let metadata_json = serde_json::to_string(&metadata)
            .map_err(|err| MemoryError::Backend(anyhow::anyhow!(err)))?;
        let embedding_param = embedding.as_deref().map(vector::encode);

        conn.execute(
            "INSERT INTO memories \
             (id, memory, hash, embedding, metadata, user_id, agent_id, run_id, \
              created_at, updated_at, is_deleted) \
             VALUES (?1, ?2, ?3, vector32(?4), ?5, ?6, ?7, ?8, ?9, ?10, 0)",
            libsql::params![
                id.to_string(),
                trimmed.to_string(),
                hash.clone(),
                embedding_param,
                metadata_json,
                owner.user_id.clone(),
                owner.agent_id.clone(),
                owner.run_id.clone(),
                rfc3339(now)?,
                rfc3339(now)?,
            ],
        )
        .await
        .map_err(backend)?;

        append_history(conn, id, None, Some(trimmed), HistoryAction::Add, now).await?;

        Ok(Memory {
            id,
            memory: trimmed.to_string(),
            hash,
            embedding,
            metadata,
            user_id: owner.user_id.clone(),
            agent_id: owner.agent_id.clone(),
            run_id: owner.run_id.clone(),
            created_at: now,
            updated_at: now,
            is_deleted: false,
        })
    }

    /// Overwrites `id`'s text, merges `metadata`, and optionally replaces
    /// the embedding (spec §4.1 `update`). `embedding = None` leaves the
    /// existing vector untouched, matching the "regeneration failed" path.
    pub async fn update(
        &self,
        id: Uuid,
        text: &str,
        metadata: Option<Metadata>,
        embedding: Option<Vec<f32>>,
    ) -> Result<()> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(MemoryError::InvalidInput("memory text is empty".into()));
        }

        let mut guard = self.state.lock().await;
        let conn = self.ensure_open(&mut guard).await?;

        let existing = find_by_id(conn, id)
            .await?
            .ok_or_else(|| MemoryError::NotFound(id.to_string()))?;

        let hash = content_hash(trimmed);
        let merged_metadata = match metadata {
            Some(updates) => {
                let mut merged = existing.metadata.clone();
                merged.extend(updates);
                merged
            }
            None => existing.metadata.clone(),
        };
        let metadata_json = serde_json::to_string(&merged_metadata)
            .map_err(|err| MemoryError::Backend(anyhow::anyhow!(err)))?;
        let now = OffsetDateTime::now_utc();

        if let Some(vector) = &embedding {
            conn.execute(
                "UPDATE memories SET memory = ?1, hash = ?2, metadata = ?3, \
                 embedding = vector32(?4), updated_at = ?5 WHERE id = ?6",
                libsql::params![
                    trimmed.to_string(),
                    hash,
                    metadata_json,
                    vector::encode(vector),
                    rfc3339(now)?,
                    id.to_string(),
                ],
            )
            .await
            .map_err(backend)?;
        } else {
            conn.execute(
                "UPDATE memories SET memory = ?1, hash = ?2, metadata = ?3, \
                 updated_at = ?4 WHERE id = ?5",
                libsql::params![
                    trimmed.to_string(),
                    hash,
                    metadata_json,
                    rfc3339(now)?,
                    id.to_string(),
                ],
            )
            .await
            .map_err(backend)?;
        }

        append_history(
            conn,
            id,
            Some(&existing.memory),
            Some(trimmed),
            HistoryAction::Update,
            now,
        )
        .await
    }

    /// Soft-deletes `id` (spec §4.1 `delete`).
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let mut guard = self.state.lock().await;
        let conn = self.ensure_open(&mut guard).await?;

        let existing = find_by_id(conn, id)
            .await?
            .ok_or_else(|| MemoryError::NotFound(id.to_string()))?;

        let now = OffsetDateTime::now_utc();
        conn.execute(
            "UPDATE memories SET is_deleted = 1, updated_at = ?1 WHERE id = ?2",
            libsql::params![rfc3339(now)?, id.to_string()],
        )
        .await
        .map_err(backend)?;

        append_history(
            conn,
            id,
            Some(&existing.memory),
            None,
            HistoryAction::Delete,
            now,
        )
        .await
    }

    /// Lists non-deleted memories for `filters`, newest first (spec §4.1 `list`).
    pub async fn list(&self, filters: &Filters, limit: Option<usize>) -> Result<Vec<Memory>> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT);
        let mut guard = self.state.lock().await;
        let conn = self.ensure_open(&mut guard).await?;

        let sql = "SELECT id, memory, hash, vector_extract(embedding), metadata, \
                   user_id, agent_id, run_id, created_at, updated_at, is_deleted \
                   FROM memories \
                   WHERE is_deleted = 0 \
                     AND (?1 IS NULL OR user_id = ?1) \
                     AND (?2 IS NULL OR agent_id = ?2) \
                   ORDER BY created_at DESC \
                   LIMIT ?3";

        let mut rows = conn
            .query(
                sql,
                libsql::params![
                    filters.user_id.clone(),
                    filters.agent_id.clone(),
                    limit as i64,
                ],
            )
            .await
            .map_err(backend)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(backend)? {
            out.push(memory_from_row(&row)?);
        }
        Ok(out)
    }

    /// Hybrid search over non-deleted memories (spec §4.1 `search`, §4.2).
    ///
    /// `query_vector` is `None` when no embedder is configured or when an
    /// embedding failure forced a degradation; either way this degrades to
    /// pure text-similarity ranking without a separate code path.
    pub async fn search(
        &self,
        query_text: &str,
        query_vector: Option<&[f32]>,
        filters: &Filters,
        limit: Option<usize>,
        threshold: f32,
    ) -> Result<Vec<ScoredMemory>> {
        let limit = limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
        let mut guard = self.state.lock().await;
        let conn = self.ensure_open(&mut guard).await?;
        search::hybrid(conn, query_text, query_vector, filters, limit, threshold).await
    }

    /// Finds near-duplicates of `embedding` (spec §4.2 `find_similar`).
    pub async fn find_similar(
        &self,
        embedding: &[f32],
        threshold: f32,
        exclude_id: Option<Uuid>,
    ) -> Result<Vec<ScoredMemory>> {
        let mut guard = self.state.lock().await;
        let conn = self.ensure_open(&mut guard).await?;
        search::find_similar(conn, embedding, threshold, exclude_id.as_ref()).await
    }

    /// Returns non-deleted history rows for `id`, most recent first
    /// (spec §4.1 `history`).
    pub async fn history(&self, id: Uuid) -> Result<Vec<MemoryHistoryItem>> {
        let mut guard = self.state.lock().await;
        let conn = self.ensure_open(&mut guard).await?;

        let mut rows = conn
            .query(
                "SELECT id, memory_id, previous_value, new_value, action, \
                 created_at, updated_at, is_deleted \
                 FROM memory_history \
                 WHERE memory_id = ?1 AND is_deleted = 0 \
                 ORDER BY id DESC",
                libsql::params![id.to_string()],
            )
            .await
            .map_err(backend)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(backend)? {
            out.push(history_item_from_row(&row)?);
        }
        Ok(out)
    }

    /// Truncates both tables (spec §4.1 `reset`).
    pub async fn reset(&self) -> Result<()> {
        let mut guard = self.state.lock().await;
        let conn = self.ensure_open(&mut guard).await?;
        schema::truncate(conn).await
    }
}

async fn find_by_hash(conn: &Connection, hash: &str) -> Result<Option<Memory>> {
    let mut rows = conn
        .query(
            "SELECT id, memory, hash, vector_extract(embedding), metadata, \
             user_id, agent_id, run_id, created_at, updated_at, is_deleted \
             FROM memories WHERE hash = ?1 AND is_deleted = 0",
            libsql::params![hash.to_string()],
        )
        .await
        .map_err(backend)?;

    match rows.next().await.map_err(backend)? {
        Some(row) => Ok(Some(memory_from_row(&row)?)),
        None => Ok(None),
    }
}

async fn find_by_id(conn: &Connection, id: Uuid) -> Result<Option<Memory>> {
    let mut rows = conn
        .query(
            "SELECT id, memory, hash, vector_extract(embedding), metadata, \
             user_id, agent_id, run_id, created_at, updated_at, is_deleted \
             FROM memories WHERE id = ?1 AND is_deleted = 0",
            libsql::params![id.to_string()],
        )
        .await
        .map_err(backend)?;

    match rows.next().await.map_err(backend)? {
        Some(row) => Ok(Some(memory_from_row(&row)?)),
        None => Ok(None),
    }
}

async fn append_history(
    conn: &Connection,
    memory_id: Uuid,
    previous_value: Option<&str>,
    new_value: Option<&str>,
    action: HistoryAction,
    at: OffsetDateTime,
) -> Result<()> {
    conn.execute(
        "INSERT INTO memory_history \
         (memory_id, previous_value, new_value, action, created_at, updated_at, is_deleted) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0)",
        libsql::params![
            memory_id.to_string(),
            previous_value.map(str::to_string),
            new_value.map(str::to_string),
            action.as_str().to_string(),
            rfc3339(at)?,
            rfc3339(at)?,
        ],
    )
    .await
    .map_err(backend)?;
    Ok(())
}

fn memory_from_row(row: &libsql::Row) -> Result<Memory> {
    let id: String = row.get(0).map_err(backend)?;
    let memory: String = row.get(1).map_err(backend)?;
    let hash: String = row.get(2).map_err(backend)?;
    let embedding_text: Option<String> = row.get(3).map_err(backend)?;
    let metadata_json: Option<String> = row.get(4).map_err(backend)?;
    let user_id: Option<String> = row.get(5).map_err(backend)?;
    let agent_id: Option<String> = row.get(6).map_err(backend)?;
    let run_id: Option<String> = row.get(7).map_err(backend)?;
    let created_at: String = row.get(8).map_err(backend)?;
    let updated_at: String = row.get(9).map_err(backend)?;
    let is_deleted: i64 = row.get(10).map_err(backend)?;

    Ok(Memory {
        id: Uuid::parse_str(&id).map_err(|err| MemoryError::Backend(anyhow::anyhow!(err)))?,
        memory,
        hash,
        embedding: embedding_text.map(|text| vector::decode(&text)).transpose()?,
        metadata: metadata_json
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(|err| MemoryError::Backend(anyhow::anyhow!(err)))?
            .unwrap_or_default(),
        user_id,
        agent_id,
        run_id,
        created_at: parse_rfc3339(&created_at)?,
        updated_at: parse_rfc3339(&updated_at)?,
        is_deleted: is_deleted != 0,
    })
}

fn history_item_from_row(row: &libsql::Row) -> Result<MemoryHistoryItem> {
    let id: i64 = row.get(0).map_err(backend)?;
    let memory_id: String = row.get(1).map_err(backend)?;
    let previous_value: Option<String> = row.get(2).map_err(backend)?;
    let new_value: Option<String> = row.get(3).map_err(backend)?;
    let action: String = row.get(4).map_err(backend)?;
    let created_at: String = row.get(5).map_err(backend)?;
    let updated_at: String = row.get(6).map_err(backend)?;
    let is_deleted: i64 = row.get(7).map_err(backend)?;

    Ok(MemoryHistoryItem {
        id,
        memory_id: Uuid::parse_str(&memory_id)
            .map_err(|err| MemoryError::Backend(anyhow::anyhow!(err)))?,
        previous_value,
        new_value,
        action: parse_action(&action)?,
        created_at: parse_rfc3339(&created_at)?,
        updated_at: parse_rfc3339(&updated_at)?,
        is_deleted: is_deleted != 0,
    })
}

fn parse_action(raw: &str) -> Result<HistoryAction> {
    match raw {
        "ADD" => Ok(HistoryAction::Add),
        "UPDATE" => Ok(HistoryAction::Update),
        "DELETE" => Ok(HistoryAction::Delete),
        other => Err(MemoryError::Backend(anyhow::anyhow!(
            "unrecognized history action: {other}"
        ))),
    }
}

fn rfc3339(at: OffsetDateTime) -> Result<String> {
    at.format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| MemoryError::Backend(anyhow::anyhow!(err)))
}

fn parse_rfc3339(text: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(text, &time::format_description::well_known::Rfc3339)
        .map_err(|err| MemoryError::Backend(anyhow::anyhow!(err)))
}

fn backend(err: libsql::Error) -> MemoryError {
    MemoryError::from(err)
}
