//! Embedding adapter contract (spec §4.4, §6.2).
//!
//! Generalizes `aither-core::embedding::EmbeddingModel` (a single `embed`
//! call plus `dim()`) into the three-method contract the memory engine
//! needs: single-text embedding, order-preserving batch embedding, and a
//! default-dimension lookup so a configuration that omits `embedder_dimensions`
//! still gets a sane value.

use async_trait::async_trait;

use crate::error::Result;

/// Recognized embedding models and their default vector dimensionality.
///
/// Unknown model identifiers default to 1536, matching the most common
/// OpenAI-compatible embedding width.
#[must_use]
pub fn default_dimensions(model_id: &str) -> usize {
    match model_id {
        "text-embedding-3-small" | "text-embedding-ada-002" => 1536,
        "text-embedding-3-large" => 3072,
        "nomic-embed-text" => 768,
        "mxbai-embed-large" => 1024,
        _ => 1536,
    }
}

/// Converts text to dense vector representations.
///
/// # Implementation Requirements
///
/// - [`embed_many`](EmbeddingModel::embed_many) must return vectors in the
///   same order as the input slice, regardless of any internal caching or
///   batching the implementation performs.
/// - [`embed_one`](EmbeddingModel::embed_one) and [`embed_many`](EmbeddingModel::embed_many)
///   must agree: `embed_many(&[t])[0] == embed_one(t)` for any text `t`.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Embeds a single piece of text under the given model id.
    async fn embed_one(&self, text: &str, model_id: &str) -> Result<Vec<f32>>;

    /// Embeds a batch of texts, preserving input order in the output.
    ///
    /// The default implementation calls [`embed_one`](EmbeddingModel::embed_one)
    /// sequentially; providers with a native batch endpoint should override
    /// this to issue fewer network round-trips.
    async fn embed_many(&self, texts: &[String], model_id: &str) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed_one(text, model_id).await?);
        }
        Ok(out)
    }

    /// Returns the expected vector length for a model id, used as the
    /// configuration default when `embedder_dimensions` is unset.
    fn expected_dimensions(&self, model_id: &str) -> usize {
        default_dimensions(model_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_defaults() {
        assert_eq!(default_dimensions("text-embedding-3-small"), 1536);
        assert_eq!(default_dimensions("text-embedding-3-large"), 3072);
        assert_eq!(default_dimensions("text-embedding-ada-002"), 1536);
        assert_eq!(default_dimensions("nomic-embed-text"), 768);
        assert_eq!(default_dimensions("mxbai-embed-large"), 1024);
    }

    #[test]
    fn unknown_model_defaults_to_1536() {
        assert_eq!(default_dimensions("some-future-model"), 1536);
    }
}
