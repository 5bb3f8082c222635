//! Public entry point tying the store, cache, extractor, and reconciler
//! together into one engine (spec §4.7, §6.3).

use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use memoria_core::llm::Message;
use memoria_core::{Memory, MemoryError, MemoryHistoryItem, Metadata, Owner, Result, ScoredMemory};

use crate::cache::EmbeddingCache;
use crate::config::MemoryConfig;
use crate::extractor::FactExtractor;
use crate::reconciler::{AppliedOperation, MemoryReconciler, ReconcileOps};
use crate::store::{Filters, MemoryStore};

/// Cosine-similarity threshold above which the reconciler's `ADD` path
/// treats a fact as a near-duplicate of an existing memory and skips it
/// (spec §4.2 `find_similar`).
const NEAR_DUPLICATE_THRESHOLD: f32 = 0.95;

/// Result of [`MemoryEngine::process_turn`]: the facts the extractor pulled
/// out of the transcript and what the reconciler decided to do with them.
#[derive(Debug, Default)]
pub struct ProcessTurnOutcome {
    /// Atomic facts extracted from the transcript.
    pub facts: Vec<String>,
    /// Operations the reconciler attempted, in order, with their outcomes.
    pub operations: Vec<AppliedOperation>,
}

/// The memory engine: owns the store, the embedding cache, and the current
/// configuration, and exposes the operations callers actually use.
///
/// `config` and `store` are each behind their own [`parking_lot::RwLock`] so
/// that [`configure`](MemoryEngine::configure) can atomically swap either
/// without blocking in-flight reads, and so no lock is ever held across an
/// `.await` point — every accessor clones what it needs and drops the guard
/// before doing async work.
pub struct MemoryEngine {
    config: RwLock<MemoryConfig>,
    store: RwLock<Arc<MemoryStore>>,
    cache: EmbeddingCache,
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("config", &self.snapshot_config())
            .finish_non_exhaustive()
    }
}

impl MemoryEngine {
    /// Builds an engine from `config`, pointed at its configured database
    /// path (or the default per-user path).
    pub async fn init(config: MemoryConfig) -> Result<Self> {
        let db_path = config
            .db_path
            .clone()
            .unwrap_or_else(MemoryStore::default_path);
        let dimensions = config.embedder_dimensions();
        Ok(Self {
            store: RwLock::new(Arc::new(MemoryStore::new(db_path, dimensions))),
            config: RwLock::new(config),
            cache: EmbeddingCache::new(),
        })
    }

    /// Atomically replaces the configuration. The embedding cache is always
    /// cleared — vectors cached under the old embedder would be meaningless
    /// under a new one. The store is rebuilt only when the database path or
    /// expected vector width actually changed (spec §4.7 "configuration
    /// lifecycle").
    pub fn configure(&self, config: MemoryConfig) {
        let db_path = config
            .db_path
            .clone()
            .unwrap_or_else(MemoryStore::default_path);
        let dimensions = config.embedder_dimensions();

        let needs_new_store = {
            let current = self.config.read();
            current
                .db_path
                .clone()
                .unwrap_or_else(MemoryStore::default_path)
                != db_path
                || current.embedder_dimensions() != dimensions
        };
        if needs_new_store {
            *self.store.write() = Arc::new(MemoryStore::new(db_path, dimensions));
        }

        self.cache.clear();
        *self.config.write() = config;
    }

    fn snapshot_config(&self) -> MemoryConfig {
        self.config.read().clone()
    }

    fn store(&self) -> Arc<MemoryStore> {
        self.store.read().clone()
    }

    async fn embed_cached(&self, config: &MemoryConfig, text: &str) -> Option<Vec<f32>> {
        let embedder = config.embedder.clone()?;
        let model_id = config.embedder_model_id.clone();

        if let Some(vector) = self.cache.get(text, &model_id) {
            return Some(vector);
        }

        match embedder.embed_one(text, &model_id).await {
            Ok(vector) => {
                self.cache.put(text, &model_id, vector.clone());
                Some(vector)
            }
            Err(err) => {
                tracing::warn!(error = %err, "embedding generation failed, degrading to text-only");
                None
            }
        }
    }

    /// Adds `text` under `owner` (or the configured default owner), with
    /// `metadata` merged in. Embeds it first when an embedder is configured.
    pub async fn add(
        &self,
        text: &str,
        owner: Option<Owner>,
        metadata: Option<Metadata>,
    ) -> Result<Memory> {
        let config = self.snapshot_config();
        let owner = owner.unwrap_or_else(|| config.current_owner.clone());
        let embedding = self.embed_cached(&config, text).await;
        self.store()
            .add(text, &owner, metadata.unwrap_or_default(), embedding)
            .await
    }

    /// Overwrites `id`'s text and merges `metadata`, regenerating its
    /// embedding when an embedder is configured.
    pub async fn update(&self, id: Uuid, text: &str, metadata: Option<Metadata>) -> Result<()> {
        let config = self.snapshot_config();
        let embedding = self.embed_cached(&config, text).await;
        self.store().update(id, text, metadata, embedding).await
    }

    /// Soft-deletes `id`.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        self.store().delete(id).await
    }

    /// Lists non-deleted memories matching `filters`.
    pub async fn list(&self, filters: &Filters, limit: Option<usize>) -> Result<Vec<Memory>> {
        self.store().list(filters, limit).await
    }

    /// Hybrid search for `query`. Embeds the query when an embedder is
    /// configured; if the resulting vector search fails at runtime, retries
    /// as a text-only search rather than surfacing the error (spec §4.1
    /// "If vector search fails at runtime, degrade to text search").
    pub async fn search(
        &self,
        query: &str,
        filters: &Filters,
        limit: Option<usize>,
        threshold: f32,
    ) -> Result<Vec<ScoredMemory>> {
        let config = self.snapshot_config();
        let store = self.store();
        let query_vector = if config.is_configured() {
            self.embed_cached(&config, query).await
        } else {
            None
        };

        match store
            .search(query, query_vector.as_deref(), filters, limit, threshold)
            .await
        {
            Ok(results) => Ok(results),
            Err(err) if query_vector.is_some() => {
                tracing::warn!(error = %err, "vector search failed, degrading to text search");
                store.search(query, None, filters, limit, threshold).await
            }
            Err(err) => Err(err),
        }
    }

    /// Like [`search`](Self::search) but returns bare memories at the
    /// default threshold of `0.0`, dropping the score (spec §6.3
    /// `retrieve_relevant`).
    pub async fn retrieve_relevant(
        &self,
        query: &str,
        owner: Option<Owner>,
        limit: Option<usize>,
    ) -> Result<Vec<Memory>> {
        let owner = owner.unwrap_or_else(|| self.snapshot_config().current_owner);
        let filters = Filters::from(&owner);
        let scored = self.search(query, &filters, limit, 0.0).await?;
        Ok(scored.into_iter().map(|scored| scored.memory).collect())
    }

    /// Returns the non-deleted history of `id`.
    pub async fn history(&self, id: Uuid) -> Result<Vec<MemoryHistoryItem>> {
        self.store().history(id).await
    }

    /// Truncates the store and clears the embedding cache.
    pub async fn reset(&self) -> Result<()> {
        self.store().reset().await?;
        self.cache.clear();
        Ok(())
    }

    /// Flushes in-memory state. The engine has no background tasks or
    /// network connections to tear down; this only prunes the embedding
    /// cache so a long-lived process doesn't keep stale entries around.
    pub async fn shutdown(&self) -> Result<()> {
        self.cache.prune_expired();
        Ok(())
    }

    /// Runs the two-stage pipeline (spec §4.7 `process_turn`): extract facts
    /// from `messages`, then reconcile them against the current memory set
    /// for `owner`. Requires a configured LLM.
    pub async fn process_turn(
        &self,
        messages: Vec<Message>,
        owner: Option<Owner>,
    ) -> Result<ProcessTurnOutcome> {
        let config = self.snapshot_config();
        let llm = config.llm.clone().ok_or(MemoryError::NotConfigured)?;
        let owner = owner.unwrap_or(config.current_owner.clone());

        let extractor = FactExtractor::new(llm.clone(), config.fact_extraction_prompt.clone());
        let facts = extractor.extract(&messages).await;
        if facts.is_empty() {
            return Ok(ProcessTurnOutcome {
                facts,
                operations: Vec::new(),
            });
        }

        let reconciler = MemoryReconciler::new(llm, config.update_memory_prompt.clone());
        let operations = reconciler.reconcile(&facts, &owner, self).await?;
        Ok(ProcessTurnOutcome { facts, operations })
    }
}

impl ReconcileOps for MemoryEngine {
    fn current_memories(&self, owner: &Owner) -> impl Future<Output = Result<Vec<Memory>>> + Send {
        let owner = owner.clone();
        async move { self.list(&Filters::from(&owner), Some(100)).await }
    }

    fn apply_add(
        &self,
        text: &str,
        owner: &Owner,
        metadata: Metadata,
    ) -> impl Future<Output = Result<Memory>> + Send {
        let text = text.to_string();
        let owner = owner.clone();
        async move { self.add(&text, Some(owner), Some(metadata)).await }
    }

    fn apply_update(
        &self,
        id: Uuid,
        text: &str,
        metadata: Metadata,
    ) -> impl Future<Output = Result<()>> + Send {
        let text = text.to_string();
        async move { self.update(id, &text, Some(metadata)).await }
    }

    fn apply_delete(&self, id: Uuid) -> impl Future<Output = Result<()>> + Send {
        async move { self.delete(id).await }
    }

    fn find_near_duplicate(&self, text: &str) -> impl Future<Output = Result<Option<Uuid>>> + Send {
        let text = text.to_string();
        async move {
            let config = self.snapshot_config();
            let Some(embedding) = self.embed_cached(&config, &text).await else {
                return Ok(None);
            };
            let matches = self
                .store()
                .find_similar(&embedding, NEAR_DUPLICATE_THRESHOLD, None)
                .await?;
            Ok(matches.into_iter().next().map(|scored| scored.memory.id))
        }
    }
}
