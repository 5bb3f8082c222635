//! Integration tests exercising [`MemoryEngine`] end to end against a real
//! (file-backed) libsql database, covering the engine's core behavioral
//! guarantees: content-addressed dedup, text-only degradation, hybrid
//! ranking, and best-effort reconciliation.

use std::collections::VecDeque;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use memoria::reconciler::ApplyOutcome;
use memoria::{EmbeddingModel, MemoryConfig, MemoryEngine, Message, Owner, Result};

static TEST_SEQ: AtomicUsize = AtomicUsize::new(0);

fn temp_db_path(name: &str) -> PathBuf {
    let seq = TEST_SEQ.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!(
        "memoria-engine-test-{name}-{}-{seq}.db",
        std::process::id()
    ))
}

/// Embeds text into a 3-dimensional one-hot-ish vector by keyword: any text
/// containing "coffee" points along the first axis, "color" along the
/// second, everything else along the third. This makes cosine similarity
/// between unrelated topics exactly `0.0`, matching scenario S3.
struct KeywordEmbedder;

impl EmbeddingModel for KeywordEmbedder {
    fn embed_one(
        &self,
        text: &str,
        _model_id: &str,
    ) -> impl Future<Output = Result<Vec<f32>>> + Send {
        let lower = text.to_lowercase();
        let vector = if lower.contains("coffee") {
            vec![1.0, 0.0, 0.0]
        } else if lower.contains("color") {
            vec![0.0, 1.0, 0.0]
        } else {
            vec![0.0, 0.0, 1.0]
        };
        async move { Ok(vector) }
    }
}

struct FailingEmbedder;

impl EmbeddingModel for FailingEmbedder {
    fn embed_one(
        &self,
        _text: &str,
        _model_id: &str,
    ) -> impl Future<Output = Result<Vec<f32>>> + Send {
        async { Err(memoria::MemoryError::Embedding(anyhow::anyhow!("offline"))) }
    }
}

/// Returns canned responses to successive `generate_text` calls, in order:
/// the fact extractor calls first, the reconciler second.
struct ScriptedChat {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedChat {
    fn new(responses: &[&str]) -> Self {
        Self {
            responses: Mutex::new(responses.iter().map(|r| r.to_string()).collect()),
        }
    }
}

impl memoria::ChatModel for ScriptedChat {
    fn generate_text(
        &self,
        _messages: Vec<Message>,
    ) -> impl Future<Output = Result<String>> + Send {
        let response = self.responses.lock().pop_front().unwrap_or_default();
        async move { Ok(response) }
    }
}

#[tokio::test]
async fn s1_repeated_identical_text_is_deduped() {
    let path = temp_db_path("s1");
    let config = MemoryConfig::builder()
        .db_path(path.clone())
        .current_owner(Owner::user("alice"))
        .build();
    let engine = MemoryEngine::init(config).await.unwrap();

    let first = engine.add("I drink coffee every morning", None, None).await.unwrap();
    let second = engine
        .add("  i drink COFFEE every morning  ", None, None)
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    let history = engine.history(first.id).await.unwrap();
    assert_eq!(history.len(), 1, "dedup must not append a second history row");

    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn s2_search_without_embedder_degrades_to_text_only() {
    let path = temp_db_path("s2");
    let config = MemoryConfig::builder()
        .db_path(path.clone())
        .current_owner(Owner::user("alice"))
        .build();
    let engine = MemoryEngine::init(config).await.unwrap();

    engine.add("My favorite drink is coffee", None, None).await.unwrap();
    engine.add("My favorite color is green", None, None).await.unwrap();

    let filters = memoria::Filters::from(&Owner::user("alice"));
    let results = engine.search("coffee", &filters, None, 0.0).await.unwrap();

    assert_eq!(results.len(), 1);
    assert!(results[0].memory.memory.contains("coffee"));
    assert!((0.0..=1.0).contains(&results[0].score));

    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn s3_hybrid_search_filters_unrelated_memory_at_zero_score() {
    let path = temp_db_path("s3");
    let config = MemoryConfig::builder()
        .db_path(path.clone())
        .embedder(Arc::new(KeywordEmbedder), "keyword-embedder")
        .embedder_dimensions(3)
        .current_owner(Owner::user("alice"))
        .build();
    let engine = MemoryEngine::init(config).await.unwrap();

    engine.add("I really enjoy coffee", None, None).await.unwrap();
    engine.add("My favorite color is purple", None, None).await.unwrap();

    let filters = memoria::Filters::from(&Owner::user("alice"));
    let results = engine
        .search("coffee", &filters, None, 0.0)
        .await
        .unwrap();

    assert_eq!(
        results.len(),
        1,
        "the color memory shares no text or vector similarity with 'coffee' and must be filtered \
         out at the default threshold"
    );
    assert!(results[0].memory.memory.contains("coffee"));
    assert!(results[0].score > 0.0);

    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn s4_reconciler_updates_existing_memory() {
    let path = temp_db_path("s4");
    let llm = Arc::new(ScriptedChat::new(&[r#"{"facts": ["User's name is Tony"]}"#, ""]));
    let config = MemoryConfig::builder()
        .db_path(path.clone())
        .llm(llm.clone())
        .current_owner(Owner::user("alice"))
        .build();
    let engine = MemoryEngine::init(config).await.unwrap();

    let existing = engine.add("My name is John", None, None).await.unwrap();

    // Swap in the reconciliation response now that we know the target id.
    llm.responses.lock().push_back(format!(
        r#"{{"memory": [{{"id": "{}", "text": "User's name is Tony", "event": "UPDATE", "old_memory": "My name is John"}}]}}"#,
        existing.id
    ));

    let outcome = engine
        .process_turn(vec![Message::user("Actually, call me Tony")], None)
        .await
        .unwrap();

    assert_eq!(outcome.facts, vec!["User's name is Tony"]);
    assert_eq!(outcome.operations.len(), 1);
    assert!(matches!(
        outcome.operations[0].outcome,
        ApplyOutcome::Updated(id) if id == existing.id
    ));

    let updated = engine.list(&memoria::Filters::from(&Owner::user("alice")), None)
        .await
        .unwrap();
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0].memory, "User's name is Tony");

    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn s5_reconciler_delete_of_missing_id_is_swallowed() {
    let path = temp_db_path("s5");
    let llm = Arc::new(ScriptedChat::new(&[
        r#"{"facts": ["User no longer lives in Paris"]}"#,
        r#"{"memory": [{"id": "00000000-0000-0000-0000-000000000000", "text": "lives in Paris", "event": "DELETE"}]}"#,
    ]));
    let config = MemoryConfig::builder()
        .db_path(path.clone())
        .llm(llm)
        .current_owner(Owner::user("alice"))
        .build();
    let engine = MemoryEngine::init(config).await.unwrap();

    let outcome = engine
        .process_turn(vec![Message::user("I moved away from Paris")], None)
        .await
        .unwrap();

    assert_eq!(outcome.operations.len(), 1);
    assert!(matches!(outcome.operations[0].outcome, ApplyOutcome::NotFound));

    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn s6_embedding_failure_degrades_search_to_text_only() {
    let path = temp_db_path("s6");
    let config = MemoryConfig::builder()
        .db_path(path.clone())
        .embedder(Arc::new(FailingEmbedder), "offline-embedder")
        .embedder_dimensions(3)
        .current_owner(Owner::user("alice"))
        .build();
    let engine = MemoryEngine::init(config).await.unwrap();

    engine.add("My favorite drink is coffee", None, None).await.unwrap();

    let filters = memoria::Filters::from(&Owner::user("alice"));
    let results = engine
        .search("coffee", &filters, None, 0.0)
        .await
        .expect("search must degrade rather than fail when embedding the query errors");
    assert_eq!(results.len(), 1);

    let _ = std::fs::remove_file(&path);
}
