//! Hybrid, pure-vector, and duplicate-detection search (spec §4.2).
//!
//! All three share one SQL skeleton — a per-row `vec_sim`/`text_sim`
//! computation wrapped by an outer filter on the blended `score` — differing
//! only in which terms contribute to that score. The query vector is always
//! bound through `vector32(?)`; it is never interpolated into the SQL text
//! (spec §9).

use libsql::Connection;
use time::OffsetDateTime;
use uuid::Uuid;

use memoria_core::{Memory, MemoryError, Owner, Result, ScoredMemory};

use super::vector;

/// Owner-scoping filters shared by every store query shape.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    /// Restrict to this `user_id`, when set.
    pub user_id: Option<String>,
    /// Restrict to this `agent_id`, when set.
    pub agent_id: Option<String>,
}

impl From<&Owner> for Filters {
    fn from(owner: &Owner) -> Self {
        Self {
            user_id: owner.user_id.clone(),
            agent_id: owner.agent_id.clone(),
        }
    }
}

/// Hybrid search: `score = 0.7 * vec_sim + 0.3 * text_sim` (spec §4.2).
///
/// When `query_vector` is `None`, `vec_sim` contributes nothing and the
/// result degrades to pure text ranking, scaled so an exact substring match
/// scores `0.3` — the store layer uses this same function for both the
/// embedder-configured and text-only code paths.
pub async fn hybrid(
    conn: &Connection,
    query_text: &str,
    query_vector: Option<&[f32]>,
    filters: &Filters,
    limit: usize,
    threshold: f32,
) -> Result<Vec<ScoredMemory>> {
    let exact = format!("%{}%", escape_like(query_text));
    let fuzzy = fuzzy_pattern(query_text);
    let has_vector = i64::from(query_vector.is_some());
    let qvec = query_vector.map_or_else(|| "[]".to_string(), vector::encode);

    let sql = "SELECT id, memory, hash, vector_extract(embedding) AS embedding_text, metadata, \
               user_id, agent_id, run_id, created_at, updated_at, is_deleted, score \
               FROM ( \
                 SELECT *, (0.7 * vec_sim + 0.3 * text_sim) AS score FROM ( \
                   SELECT *, \
                     CASE WHEN embedding IS NOT NULL AND ?1 = 1 \
                       THEN (1.0 - vector_distance_cos(embedding, vector32(?2))) \
                       ELSE 0.0 END AS vec_sim, \
                     CASE WHEN memory LIKE ?3 ESCAPE '\\' THEN 1.0 \
                          WHEN memory LIKE ?4 ESCAPE '\\' THEN 0.8 \
                          ELSE 0.0 END AS text_sim \
                   FROM memories \
                   WHERE is_deleted = 0 \
                     AND (?5 IS NULL OR user_id = ?5) \
                     AND (?6 IS NULL OR agent_id = ?6) \
                 ) \
               ) \
               WHERE score > ?7 \
               ORDER BY score DESC, created_at DESC \
               LIMIT ?8";

    let mut rows = conn
        .query(
            sql,
            libsql::params![
                has_vector,
                qvec,
                exact,
                fuzzy,
                filters.user_id.clone(),
                filters.agent_id.clone(),
                f64::from(threshold),
                limit as i64,
            ],
        )
        .await
        .map_err(backend)?;

    collect_scored(&mut rows).await
}

/// Pure vector search: `score = vec_sim`, no text component.
pub async fn vector_only(
    conn: &Connection,
    query_vector: &[f32],
    filters: &Filters,
    limit: usize,
    threshold: f32,
) -> Result<Vec<ScoredMemory>> {
    let qvec = vector::encode(query_vector);
    let sql = "SELECT id, memory, hash, vector_extract(embedding) AS embedding_text, metadata, \
               user_id, agent_id, run_id, created_at, updated_at, is_deleted, score \
               FROM ( \
                 SELECT *, \
                   CASE WHEN embedding IS NOT NULL \
                     THEN (1.0 - vector_distance_cos(embedding, vector32(?1))) \
                     ELSE 0.0 END AS score \
                 FROM memories \
                 WHERE is_deleted = 0 \
                   AND (?2 IS NULL OR user_id = ?2) \
                   AND (?3 IS NULL OR agent_id = ?3) \
               ) \
               WHERE score > ?4 \
               ORDER BY score DESC, created_at DESC \
               LIMIT ?5";

    let mut rows = conn
        .query(
            sql,
            libsql::params![
                qvec,
                filters.user_id.clone(),
                filters.agent_id.clone(),
                f64::from(threshold),
                limit as i64,
            ],
        )
        .await
        .map_err(backend)?;

    collect_scored(&mut rows).await
}

/// Finds near-duplicates of `embedding`, used by the reconciler to avoid
/// re-adding text that is already represented (spec §4.2 `find_similar`).
pub async fn find_similar(
    conn: &Connection,
    embedding: &[f32],
    threshold: f32,
    exclude_id: Option<&Uuid>,
) -> Result<Vec<ScoredMemory>> {
    let qvec = vector::encode(embedding);
    let exclude = exclude_id.map(Uuid::to_string);
    let sql = "SELECT id, memory, hash, vector_extract(embedding) AS embedding_text, metadata, \
               user_id, agent_id, run_id, created_at, updated_at, is_deleted, score \
               FROM ( \
                 SELECT *, \
                   CASE WHEN embedding IS NOT NULL \
                     THEN (1.0 - vector_distance_cos(embedding, vector32(?1))) \
                     ELSE 0.0 END AS score \
                 FROM memories \
                 WHERE is_deleted = 0 AND (?2 IS NULL OR id != ?2) \
               ) \
               WHERE score > ?3 \
               ORDER BY score DESC, created_at DESC \
               LIMIT 50";

    let mut rows = conn
        .query(sql, libsql::params![qvec, exclude, f64::from(threshold)])
        .await
        .map_err(backend)?;

    collect_scored(&mut rows).await
}

async fn collect_scored(rows: &mut libsql::Rows) -> Result<Vec<ScoredMemory>> {
    let mut out = Vec::new();
    while let Some(row) = rows.next().await.map_err(backend)? {
        out.push(row_to_scored(&row)?);
    }
    Ok(out)
}

fn row_to_scored(row: &libsql::Row) -> Result<ScoredMemory> {
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
    let score: f64 = row.get(11).map_err(backend)?;

    let embedding = embedding_text.map(|text| vector::decode(&text)).transpose()?;
    let metadata = metadata_json
        .map(|json| serde_json::from_str(&json))
        .transpose()
        .map_err(|err| MemoryError::Backend(anyhow::anyhow!(err)))?
        .unwrap_or_default();

    Ok(ScoredMemory {
        memory: Memory {
            id: Uuid::parse_str(&id).map_err(|err| MemoryError::Backend(anyhow::anyhow!(err)))?,
            memory,
            hash,
            embedding,
            metadata,
            user_id,
            agent_id,
            run_id,
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
            is_deleted: is_deleted != 0,
        },
        score: score as f32,
    })
}

fn parse_timestamp(text: &str) -> Result<OffsetDateTime> {
    time::OffsetDateTime::parse(text, &time::format_description::well_known::Rfc3339)
        .map_err(|err| MemoryError::Backend(anyhow::anyhow!(err)))
}

/// Builds the `%w1%w2%...%` fuzzy pattern from whitespace-split tokens
/// (spec §4.2 `text_sim = 0.8`).
fn fuzzy_pattern(query_text: &str) -> String {
    let tokens: Vec<&str> = query_text.split_whitespace().collect();
    if tokens.is_empty() {
        return "%".to_string();
    }
    let mut pattern = String::from("%");
    for token in tokens {
        pattern.push_str(&escape_like(token));
        pattern.push('%');
    }
    pattern
}

fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn backend(err: libsql::Error) -> MemoryError {
    MemoryError::from(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuzzy_pattern_joins_tokens_with_wildcard() {
        assert_eq!(fuzzy_pattern("my favorite color"), "%my%favorite%color%");
    }

    #[test]
    fn fuzzy_pattern_handles_single_token() {
        assert_eq!(fuzzy_pattern("espresso"), "%espresso%");
    }

    #[test]
    fn escape_like_neutralizes_wildcards() {
        assert_eq!(escape_like("50%_off"), "50\\%\\_off");
    }
}
