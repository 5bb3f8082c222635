//! DDL for the `memories` and `memory_history` tables (spec §6.1).

use libsql::Connection;
use memoria_core::{MemoryError, Result};

/// Creates both tables, their secondary indexes, and the vector index, if
/// they don't already exist. Idempotent; safe to call on every startup.
///
/// The vector index is created best-effort: engines or build configurations
/// without vector-index support fail that one statement, which is swallowed
/// (spec §4.1 "ignore-on-unsupported").
pub async fn init(conn: &Connection, dimensions: usize) -> Result<()> {
    conn.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS memories (
                id TEXT PRIMARY KEY,
                memory TEXT NOT NULL,
                hash TEXT NOT NULL,
                embedding F32_BLOB({dimensions}),
                metadata TEXT,
                user_id TEXT,
                agent_id TEXT,
                run_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                is_deleted INTEGER NOT NULL DEFAULT 0
            )"
        ),
        (),
    )
    .await
    .map_err(backend)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS memory_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            memory_id TEXT NOT NULL REFERENCES memories(id),
            previous_value TEXT,
            new_value TEXT,
            action TEXT NOT NULL CHECK (action IN ('ADD','UPDATE','DELETE')),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0
        )",
        (),
    )
    .await
    .map_err(backend)?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_memories_user_id ON memories(user_id)",
        (),
    )
    .await
    .map_err(backend)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_memories_agent_id ON memories(agent_id)",
        (),
    )
    .await
    .map_err(backend)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_memories_created_at ON memories(created_at)",
        (),
    )
    .await
    .map_err(backend)?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_memories_hash_active \
         ON memories(hash) WHERE is_deleted = 0",
        (),
    )
    .await
    .map_err(backend)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_memory_history_memory_id ON memory_history(memory_id)",
        (),
    )
    .await
    .map_err(backend)?;

    if let Err(err) = conn
        .execute(
            "CREATE INDEX IF NOT EXISTS idx_memories_embedding \
             ON memories(libsql_vector_idx(embedding))",
            (),
        )
        .await
    {
        tracing::warn!(error = %err, "vector index unsupported by this libsql build, skipping");
    }

    Ok(())
}

/// Deletes all rows from both tables.
pub async fn truncate(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM memory_history", ())
        .await
        .map_err(backend)?;
    conn.execute("DELETE FROM memories", ())
        .await
        .map_err(backend)?;
    Ok(())
}

fn backend(err: libsql::Error) -> MemoryError {
    MemoryError::from(err)
}
