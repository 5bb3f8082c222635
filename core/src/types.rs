//! Shared value types that cross the engine's public API boundary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

/// Arbitrary caller-supplied metadata attached to a [`Memory`].
pub type Metadata = BTreeMap<String, Value>;

/// Owner scope for a memory: the combination of `user_id`/`agent_id`/`run_id`
/// that partitions the store (spec §3.1, GLOSSARY "Owner").
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    /// Scoping user identifier.
    pub user_id: Option<String>,
    /// Scoping agent identifier.
    pub agent_id: Option<String>,
    /// Scoping run identifier.
    pub run_id: Option<String>,
}

impl Owner {
    /// Creates an owner scoped to a single user.
    #[must_use]
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    /// Returns `true` when none of the three scoping fields are set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.user_id.is_none() && self.agent_id.is_none() && self.run_id.is_none()
    }
}

/// A single textual fact stored under an owner (spec §3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Opaque unique identifier.
    pub id: Uuid,
    /// The textual fact, trimmed of surrounding whitespace.
    pub memory: String,
    /// Lowercase SHA-256 of the trimmed, case-folded `memory` text.
    pub hash: String,
    /// Dense embedding vector, present only when an embedder is configured
    /// and embedding generation succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Caller-supplied metadata.
    #[serde(default)]
    pub metadata: Metadata,
    /// Scoping user identifier.
    pub user_id: Option<String>,
    /// Scoping agent identifier.
    pub agent_id: Option<String>,
    /// Scoping run identifier.
    pub run_id: Option<String>,
    /// Creation timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Last update timestamp.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// Soft-delete flag.
    pub is_deleted: bool,
}

impl Memory {
    /// Returns the owner scope this memory was written under.
    #[must_use]
    pub fn owner(&self) -> Owner {
        Owner {
            user_id: self.user_id.clone(),
            agent_id: self.agent_id.clone(),
            run_id: self.run_id.clone(),
        }
    }
}

/// A memory returned from a scored search, carrying its blended score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredMemory {
    /// The underlying memory.
    #[serde(flatten)]
    pub memory: Memory,
    /// Hybrid score in `[0, 1]` (spec §4.2).
    pub score: f32,
}

/// The mutation an append-only [`MemoryHistoryItem`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HistoryAction {
    /// A memory was created.
    Add,
    /// A memory's text or metadata changed.
    Update,
    /// A memory was soft-deleted.
    Delete,
}

impl HistoryAction {
    /// Returns the action's wire/storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl core::fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An append-only record of a single mutation applied to a [`Memory`]
/// (spec §3.1, "MemoryHistory").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryHistoryItem {
    /// Monotonically increasing row id.
    pub id: i64,
    /// The memory this entry records a mutation for.
    pub memory_id: Uuid,
    /// Prior text; `None` for `ADD`.
    pub previous_value: Option<String>,
    /// New text; `None` for `DELETE`.
    pub new_value: Option<String>,
    /// The action applied.
    pub action: HistoryAction,
    /// When the history row was written.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Same as `created_at`; history rows are never edited in place.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// Soft-delete flag, cleared only by `reset`.
    pub is_deleted: bool,
}
