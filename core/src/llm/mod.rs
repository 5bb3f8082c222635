//! Chat-completion contract used by the fact extractor and reconciler
//! (spec §4.5, §4.6, §6.2).
//!
//! A [`ChatModel`] only has to turn a two-message `system` + `user` request
//! into accumulated text. [`ChatModel::generate`] builds on top of that to
//! produce schema-validated structured output, the same layering
//! `aither-core::llm::LanguageModel::generate` uses over `respond`.

pub mod message;

use std::future::Future;

use anyhow::anyhow;
use schemars::{JsonSchema, schema_for};
use serde::de::DeserializeOwned;

pub use message::{Message, Role};

use crate::error::{MemoryError, Result};

/// Produces chat completions from a short, stateless message list.
pub trait ChatModel: Send + Sync {
    /// Sends `messages` to the model and returns the accumulated response text.
    fn generate_text(&self, messages: Vec<Message>) -> impl Future<Output = Result<String>> + Send;

    /// Sends `messages` and parses the response as `T`, using `T`'s JSON
    /// schema to instruct the model and a forgiving parser to recover from
    /// minor formatting deviations (code fences, surrounding prose).
    fn generate<T: JsonSchema + DeserializeOwned + 'static>(
        &self,
        messages: Vec<Message>,
    ) -> impl Future<Output = Result<T>> + Send {
        async move {
            let schema = schema_for!(T);
            let schema_json = serde_json::to_string_pretty(&schema)
                .map_err(|err| MemoryError::Llm(anyhow!(err)))?;
            let mut messages = messages;
            messages.push(Message::system(format!(
                "Respond with a single JSON value conforming to this schema. \
                 Output only JSON, no prose, no code fences.\n\n{schema_json}"
            )));
            let text = self.generate_text(messages).await?;
            parse_json_with_recovery(&text).map_err(MemoryError::Llm)
        }
    }
}

/// Builds a `[system, user]` message pair, the shape every extraction and
/// reconciliation call uses.
pub fn oneshot(system: impl Into<String>, user: impl Into<String>) -> Vec<Message> {
    vec![Message::system(system.into()), Message::user(user.into())]
}

fn parse_json_with_recovery<T: DeserializeOwned + 'static>(
    raw: &str,
) -> std::result::Result<T, anyhow::Error> {
    let trimmed = raw.trim();
    let mut last_error: Option<serde_json::Error> = None;
    let mut last_candidate: Option<String> = None;

    for candidate in build_json_candidates(trimmed) {
        match serde_json::from_str::<T>(&candidate) {
            Ok(value) => return Ok(value),
            Err(err) => {
                last_error = Some(err);
                last_candidate = Some(candidate);
            }
        }
    }

    let primary = last_error.map_or_else(
        || anyhow!("model output was empty or contained no JSON value"),
        anyhow::Error::new,
    );
    let snippet = last_candidate
        .as_deref()
        .unwrap_or(trimmed)
        .chars()
        .take(500)
        .collect::<String>();
    Err(primary.context(format!("failed to parse structured output; sample: {snippet}")))
}

fn strip_code_fences(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let fence_start = trimmed.find("```")?;
    let after_fence = &trimmed[fence_start + 3..];
    let mut lines = after_fence.lines();
    let _maybe_lang = lines.next();
    let body = lines.collect::<Vec<_>>().join("\n");
    let content = body.rfind("```").map_or(body.as_str(), |end| &body[..end]);
    let cleaned = content.trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

fn extract_json_block(raw: &str) -> Option<String> {
    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if end >= start {
            let candidate = &raw[start..=end];
            if !candidate.trim().is_empty() {
                return Some(candidate.trim().to_string());
            }
        }
    }
    if let (Some(start), Some(end)) = (raw.find('['), raw.rfind(']')) {
        if end >= start {
            let candidate = &raw[start..=end];
            if !candidate.trim().is_empty() {
                return Some(candidate.trim().to_string());
            }
        }
    }
    None
}

fn build_json_candidates(raw: &str) -> Vec<String> {
    let mut candidates = Vec::new();

    if !raw.is_empty() {
        candidates.push(raw.to_string());
    }
    if let Some(fenced) = strip_code_fences(raw) {
        candidates.push(fenced);
    }
    if let Some(block) = extract_json_block(raw) {
        candidates.push(block);
    }

    let mut deduped = Vec::new();
    for candidate in candidates {
        if deduped.iter().all(|seen| seen != &candidate) {
            deduped.push(candidate);
        }
    }
    deduped
}
