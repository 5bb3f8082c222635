//! Single-LLM-call fact extraction (spec §4.5).

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use memoria_core::llm::{oneshot, Message};
use memoria_core::ChatModel;

/// `{"facts": [...]}` — the schema the extraction call is constrained to.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExtractedFacts {
    /// Atomic declarative facts pulled from the transcript.
    pub facts: Vec<String>,
}

/// Turns a chat transcript into a list of atomic declarative facts.
///
/// A parse or model-call failure is treated as "no facts" (spec §7 tier 3:
/// "LLM parse failure in Extractor: treated as no facts"), not a propagated
/// error — [`extract`](FactExtractor::extract) never fails.
pub struct FactExtractor {
    llm: Arc<dyn ChatModel>,
    system_prompt: String,
}

impl std::fmt::Debug for FactExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactExtractor").finish_non_exhaustive()
    }
}

impl FactExtractor {
    /// Creates an extractor using `system_prompt` (spec §3.1
    /// `fact_extraction_prompt`).
    pub fn new(llm: Arc<dyn ChatModel>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
        }
    }

    /// Extracts facts from `turns`, rendered as `"{role}: {content}"` lines
    /// joined by newlines (spec §4.5 step 1).
    pub async fn extract(&self, turns: &[Message]) -> Vec<String> {
        if turns.is_empty() {
            return Vec::new();
        }

        let transcript = render_transcript(turns);
        let request = oneshot(self.system_prompt.clone(), transcript);

        match self.llm.generate::<ExtractedFacts>(request).await {
            Ok(parsed) => parsed
                .facts
                .into_iter()
                .map(|fact| fact.trim().to_string())
                .filter(|fact| !fact.is_empty())
                .collect(),
            Err(err) => {
                tracing::warn!(error = %err, "fact extraction failed, yielding no facts");
                Vec::new()
            }
        }
    }
}

fn render_transcript(turns: &[Message]) -> String {
    turns
        .iter()
        .map(|turn| format!("{}: {}", turn.role(), turn.content()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoria_core::MemoryError;
    use std::future::Future;

    struct ScriptedLlm(String);

    impl ChatModel for ScriptedLlm {
        fn generate_text(
            &self,
            _messages: Vec<Message>,
        ) -> impl Future<Output = memoria_core::Result<String>> + Send {
            let body = self.0.clone();
            async move { Ok(body) }
        }
    }

    struct FailingLlm;

    impl ChatModel for FailingLlm {
        fn generate_text(
            &self,
            _messages: Vec<Message>,
        ) -> impl Future<Output = memoria_core::Result<String>> + Send {
            async { Err(MemoryError::Llm(anyhow::anyhow!("boom"))) }
        }
    }

    #[tokio::test]
    async fn empty_transcript_skips_the_call() {
        let extractor = FactExtractor::new(Arc::new(FailingLlm), "extract");
        assert_eq!(extractor.extract(&[]).await, Vec::<String>::new());
    }

    #[tokio::test]
    async fn parses_facts_and_trims_empties() {
        let llm = ScriptedLlm(r#"{"facts": ["User likes tea", "  ", "Lives in Kyoto"]}"#.into());
        let extractor = FactExtractor::new(Arc::new(llm), "extract");
        let facts = extractor
            .extract(&[Message::user("I like tea and I live in Kyoto")])
            .await;
        assert_eq!(facts, vec!["User likes tea", "Lives in Kyoto"]);
    }

    #[tokio::test]
    async fn llm_failure_yields_empty_list() {
        let extractor = FactExtractor::new(Arc::new(FailingLlm), "extract");
        let facts = extractor.extract(&[Message::user("hi")]).await;
        assert!(facts.is_empty());
    }
}
