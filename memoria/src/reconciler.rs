//! Second LLM call: translates extracted facts into ADD/UPDATE/DELETE/NONE
//! operations against the existing memory set (spec §4.6).

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use memoria_core::llm::oneshot;
use memoria_core::{ChatModel, Memory, Metadata, Owner};

/// The mutation the reconciler decided to apply to one fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationEvent {
    /// Store the fact as a new memory.
    Add,
    /// Replace an existing memory's text.
    Update,
    /// Soft-delete an existing memory.
    Delete,
    /// The fact is redundant with an existing memory; no change.
    None,
}

/// One element of the `{"memory": [...]}` response (spec §4.6 step 5).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Operation {
    /// Target memory id, required for `UPDATE`/`DELETE`.
    #[serde(default)]
    pub id: Option<String>,
    /// The fact's (possibly merged) text.
    pub text: String,
    /// The decided mutation.
    pub event: OperationEvent,
    /// Prior text, present only for `UPDATE`.
    #[serde(default)]
    pub old_memory: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
struct Reconciliation {
    memory: Vec<Operation>,
}

/// Shortened memory projection shown to the reconciliation prompt
/// (spec §4.6: "each shortened to `{id, text}`").
#[derive(Debug, Clone, Serialize)]
struct CandidateMemory {
    id: Uuid,
    text: String,
}

/// Outcome of attempting one [`Operation`] (spec §4.6 step 7).
#[derive(Debug, Clone)]
pub struct AppliedOperation {
    /// The operation as decided by the model.
    pub operation: Operation,
    /// What happened when the engine tried to apply it.
    pub outcome: ApplyOutcome,
}

/// What happened when an [`Operation`] was applied.
#[derive(Debug, Clone)]
pub enum ApplyOutcome {
    /// The memory was created; carries its new id.
    Added(Uuid),
    /// The memory was updated.
    Updated(Uuid),
    /// The memory was soft-deleted.
    Deleted(Uuid),
    /// No-op by the model's own decision.
    Skipped,
    /// An `ADD` was skipped because an existing memory already covers it
    /// (spec §4.2 `find_similar`); carries that memory's id.
    NearDuplicate(Uuid),
    /// An `UPDATE`/`DELETE` referenced an id that wasn't in the current
    /// snapshot; swallowed rather than surfaced (spec §4.6 step 6).
    NotFound,
    /// The store rejected the mutation; swallowed, reconciliation continues
    /// (spec §4.6 "best-effort").
    Failed(String),
}

/// Storage operations the reconciler needs, implemented by
/// [`crate::coordinator::MemoryEngine`]. Kept as a trait so reconciliation
/// logic can be exercised against a plain in-memory double in tests.
pub trait ReconcileOps: Send + Sync {
    /// Returns up to 100 current memories for `owner` (spec §4.6 step 2).
    fn current_memories(&self, owner: &Owner) -> impl Future<Output = memoria_core::Result<Vec<Memory>>> + Send;

    /// Applies an `ADD`.
    fn apply_add(
        &self,
        text: &str,
        owner: &Owner,
        metadata: Metadata,
    ) -> impl Future<Output = memoria_core::Result<Memory>> + Send;

    /// Applies an `UPDATE`.
    fn apply_update(
        &self,
        id: Uuid,
        text: &str,
        metadata: Metadata,
    ) -> impl Future<Output = memoria_core::Result<()>> + Send;

    /// Applies a `DELETE`.
    fn apply_delete(&self, id: Uuid) -> impl Future<Output = memoria_core::Result<()>> + Send;

    /// Returns the id of an existing memory that `text` is a near-duplicate
    /// of (spec §4.2 `find_similar`, threshold `0.95`), or `None` if there
    /// isn't one — including when no embedder is configured, since
    /// near-duplicate detection is vector-only.
    fn find_near_duplicate(
        &self,
        text: &str,
    ) -> impl Future<Output = memoria_core::Result<Option<Uuid>>> + Send;
}

/// Drives the update-memory LLM call and applies its decisions in order.
pub struct MemoryReconciler {
    llm: Arc<dyn ChatModel>,
    system_prompt: String,
}

impl std::fmt::Debug for MemoryReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryReconciler").finish_non_exhaustive()
    }
}

impl MemoryReconciler {
    /// Creates a reconciler using `system_prompt` (spec §3.1
    /// `update_memory_prompt`).
    pub fn new(llm: Arc<dyn ChatModel>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
        }
    }

    /// Reconciles `facts` against `ops`'s current memories for `owner`,
    /// applying each decided operation in order (spec §4.6).
    pub async fn reconcile<O: ReconcileOps>(
        &self,
        facts: &[String],
        owner: &Owner,
        ops: &O,
    ) -> memoria_core::Result<Vec<AppliedOperation>> {
        if facts.is_empty() {
            return Ok(Vec::new());
        }

        let current = ops.current_memories(owner).await?;
        let decisions = match self.decide(facts, &current).await {
            Ok(decisions) => decisions,
            Err(err) => {
                tracing::warn!(error = %err, "reconciliation LLM call failed, skipping turn");
                return Ok(Vec::new());
            }
        };

        let mut applied = Vec::with_capacity(decisions.len());
        for operation in decisions {
            let outcome = self.apply_one(&operation, owner, &current, ops).await;
            applied.push(AppliedOperation { operation, outcome });
        }
        Ok(applied)
    }

    async fn decide(
        &self,
        facts: &[String],
        current: &[Memory],
    ) -> memoria_core::Result<Vec<Operation>> {
        let candidates: Vec<CandidateMemory> = current
            .iter()
            .map(|memory| CandidateMemory {
                id: memory.id,
                text: memory.memory.clone(),
            })
            .collect();

        let candidates_json = serde_json::to_string_pretty(&candidates)
            .map_err(|err| memoria_core::MemoryError::Llm(anyhow::anyhow!(err)))?;
        let facts_json = serde_json::to_string_pretty(facts)
            .map_err(|err| memoria_core::MemoryError::Llm(anyhow::anyhow!(err)))?;

        let user_prompt = format!(
            "Existing memories:\n{candidates_json}\n\nNewly extracted facts:\n{facts_json}"
        );
        let request = oneshot(self.system_prompt.clone(), user_prompt);
        let response: Reconciliation = self.llm.generate(request).await?;
        Ok(response.memory)
    }

    async fn apply_one<O: ReconcileOps>(
        &self,
        operation: &Operation,
        owner: &Owner,
        current: &[Memory],
        ops: &O,
    ) -> ApplyOutcome {
        match operation.event {
            OperationEvent::Add => {
                match ops.find_near_duplicate(&operation.text).await {
                    Ok(Some(existing_id)) => return ApplyOutcome::NearDuplicate(existing_id),
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(error = %err, "near-duplicate check failed, proceeding with ADD");
                    }
                }

                let mut metadata: Metadata = BTreeMap::new();
                metadata.insert("owner".to_string(), owner_value(owner));
                match ops.apply_add(&operation.text, owner, metadata).await {
                    Ok(memory) => ApplyOutcome::Added(memory.id),
                    Err(err) => {
                        tracing::warn!(error = %err, "reconciler ADD failed, continuing");
                        ApplyOutcome::Failed(err.to_string())
                    }
                }
            }
            OperationEvent::Update => {
                let Some(id) = operation.id.as_deref().and_then(|raw| Uuid::parse_str(raw).ok())
                else {
                    return ApplyOutcome::NotFound;
                };
                if !current.iter().any(|memory| memory.id == id) {
                    return ApplyOutcome::NotFound;
                }
                let mut metadata: Metadata = BTreeMap::new();
                metadata.insert("owner".to_string(), owner_value(owner));
                if let Some(old_memory) = &operation.old_memory {
                    metadata.insert("old_memory".to_string(), Value::String(old_memory.clone()));
                }
                match ops.apply_update(id, &operation.text, metadata).await {
                    Ok(()) => ApplyOutcome::Updated(id),
                    Err(err) => {
                        tracing::warn!(error = %err, "reconciler UPDATE failed, continuing");
                        ApplyOutcome::Failed(err.to_string())
                    }
                }
            }
            OperationEvent::Delete => {
                let Some(id) = operation.id.as_deref().and_then(|raw| Uuid::parse_str(raw).ok())
                else {
                    return ApplyOutcome::NotFound;
                };
                match ops.apply_delete(id).await {
                    Ok(()) => ApplyOutcome::Deleted(id),
                    Err(memoria_core::MemoryError::NotFound(_)) => ApplyOutcome::NotFound,
                    Err(err) => {
                        tracing::warn!(error = %err, "reconciler DELETE failed, continuing");
                        ApplyOutcome::Failed(err.to_string())
                    }
                }
            }
            OperationEvent::None => ApplyOutcome::Skipped,
        }
    }
}

fn owner_value(owner: &Owner) -> Value {
    serde_json::to_value(owner).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct FakeOps {
        memories: Mutex<Vec<Memory>>,
    }

    fn sample_memory(id: Uuid, text: &str) -> Memory {
        Memory {
            id,
            memory: text.to_string(),
            hash: crate::store::content_hash(text),
            embedding: None,
            metadata: Metadata::new(),
            user_id: Some("u1".into()),
            agent_id: None,
            run_id: None,
            created_at: time::OffsetDateTime::now_utc(),
            updated_at: time::OffsetDateTime::now_utc(),
            is_deleted: false,
        }
    }

    impl ReconcileOps for FakeOps {
        fn current_memories(
            &self,
            _owner: &Owner,
        ) -> impl Future<Output = memoria_core::Result<Vec<Memory>>> + Send {
            let memories = self.memories.lock().clone();
            async move { Ok(memories) }
        }

        fn apply_add(
            &self,
            text: &str,
            _owner: &Owner,
            _metadata: Metadata,
        ) -> impl Future<Output = memoria_core::Result<Memory>> + Send {
            let id = Uuid::new_v4();
            let memory = sample_memory(id, text);
            self.memories.lock().push(memory.clone());
            async move { Ok(memory) }
        }

        fn apply_update(
            &self,
            id: Uuid,
            text: &str,
            _metadata: Metadata,
        ) -> impl Future<Output = memoria_core::Result<()>> + Send {
            let mut memories = self.memories.lock();
            let found = memories.iter_mut().find(|memory| memory.id == id);
            let result = if let Some(memory) = found {
                memory.memory = text.to_string();
                Ok(())
            } else {
                Err(memoria_core::MemoryError::NotFound(id.to_string()))
            };
            async move { result }
        }

        fn apply_delete(&self, id: Uuid) -> impl Future<Output = memoria_core::Result<()>> + Send {
            let mut memories = self.memories.lock();
            let before = memories.len();
            memories.retain(|memory| memory.id != id);
            let result = if memories.len() == before {
                Err(memoria_core::MemoryError::NotFound(id.to_string()))
            } else {
                Ok(())
            };
            async move { result }
        }

        fn find_near_duplicate(
            &self,
            _text: &str,
        ) -> impl Future<Output = memoria_core::Result<Option<Uuid>>> + Send {
            async move { Ok(None) }
        }
    }

    struct ScriptedLlm(String);

    impl ChatModel for ScriptedLlm {
        fn generate_text(
            &self,
            _messages: Vec<memoria_core::llm::Message>,
        ) -> impl Future<Output = memoria_core::Result<String>> + Send {
            let body = self.0.clone();
            async move { Ok(body) }
        }
    }

    #[tokio::test]
    async fn empty_facts_skip_the_llm_call() {
        let reconciler = MemoryReconciler::new(Arc::new(ScriptedLlm(String::new())), "update");
        let ops = FakeOps {
            memories: Mutex::new(Vec::new()),
        };
        let applied = reconciler.reconcile(&[], &Owner::user("u1"), &ops).await.unwrap();
        assert!(applied.is_empty());
    }

    #[tokio::test]
    async fn delete_of_missing_id_is_swallowed() {
        let llm = ScriptedLlm(
            r#"{"memory":[{"id":"does-not-exist","text":"x","event":"DELETE"}]}"#.into(),
        );
        let reconciler = MemoryReconciler::new(Arc::new(llm), "update");
        let ops = FakeOps {
            memories: Mutex::new(Vec::new()),
        };
        let applied = reconciler
            .reconcile(&["irrelevant".to_string()], &Owner::user("u1"), &ops)
            .await
            .unwrap();
        assert_eq!(applied.len(), 1);
        assert!(matches!(applied[0].outcome, ApplyOutcome::NotFound));
    }

    #[tokio::test]
    async fn near_duplicate_add_is_skipped() {
        struct DuplicateOps {
            inner: FakeOps,
            duplicate_of: Uuid,
        }

        impl ReconcileOps for DuplicateOps {
            fn current_memories(
                &self,
                owner: &Owner,
            ) -> impl Future<Output = memoria_core::Result<Vec<Memory>>> + Send {
                self.inner.current_memories(owner)
            }
            fn apply_add(
                &self,
                text: &str,
                owner: &Owner,
                metadata: Metadata,
            ) -> impl Future<Output = memoria_core::Result<Memory>> + Send {
                self.inner.apply_add(text, owner, metadata)
            }
            fn apply_update(
                &self,
                id: Uuid,
                text: &str,
                metadata: Metadata,
            ) -> impl Future<Output = memoria_core::Result<()>> + Send {
                self.inner.apply_update(id, text, metadata)
            }
            fn apply_delete(&self, id: Uuid) -> impl Future<Output = memoria_core::Result<()>> + Send {
                self.inner.apply_delete(id)
            }
            fn find_near_duplicate(
                &self,
                _text: &str,
            ) -> impl Future<Output = memoria_core::Result<Option<Uuid>>> + Send {
                let id = self.duplicate_of;
                async move { Ok(Some(id)) }
            }
        }

        let existing_id = Uuid::new_v4();
        let ops = DuplicateOps {
            inner: FakeOps {
                memories: Mutex::new(vec![sample_memory(existing_id, "User likes espresso")]),
            },
            duplicate_of: existing_id,
        };

        let llm = ScriptedLlm(
            r#"{"memory":[{"text":"User likes espresso coffee","event":"ADD"}]}"#.into(),
        );
        let reconciler = MemoryReconciler::new(Arc::new(llm), "update");
        let applied = reconciler
            .reconcile(&["likes espresso".to_string()], &Owner::user("u1"), &ops)
            .await
            .unwrap();

        assert_eq!(applied.len(), 1);
        assert!(matches!(
            applied[0].outcome,
            ApplyOutcome::NearDuplicate(id) if id == existing_id
        ));
        assert_eq!(ops.inner.memories.lock().len(), 1, "no new row should have been added");
    }

    #[tokio::test]
    async fn update_rewrites_existing_memory() {
        let id = Uuid::new_v4();
        let ops = FakeOps {
            memories: Mutex::new(vec![sample_memory(id, "My name is John")]),
        };
        let llm = ScriptedLlm(format!(
            r#"{{"memory":[{{"id":"{id}","text":"User's name is Tony","event":"UPDATE","old_memory":"My name is John"}}]}}"#
        ));
        let reconciler = MemoryReconciler::new(Arc::new(llm), "update");
        let applied = reconciler
            .reconcile(&["name change".to_string()], &Owner::user("u1"), &ops)
            .await
            .unwrap();
        assert_eq!(applied.len(), 1);
        assert!(matches!(applied[0].outcome, ApplyOutcome::Updated(found) if found == id));
        assert_eq!(ops.memories.lock()[0].memory, "User's name is Tony");
    }
}
