//! Engine configuration (spec §3.1 `MemoryConfig`, §4.7 configuration lifecycle).

use std::path::PathBuf;
use std::sync::Arc;

use memoria_core::{ChatModel, EmbeddingModel, Owner};

use crate::prompts::{DEFAULT_FACT_EXTRACTION_PROMPT, DEFAULT_UPDATE_MEMORY_PROMPT};

/// Current configuration for a [`crate::coordinator::MemoryEngine`].
///
/// Entering `CONFIGURED` state (an `embedder` present) enables vector search
/// and embedding-based dedup; without one the engine runs `UNCONFIGURED`,
/// text-search only (spec §4.7).
#[derive(Clone)]
pub struct MemoryConfig {
    pub(crate) embedder: Option<Arc<dyn EmbeddingModel>>,
    pub(crate) embedder_model_id: String,
    pub(crate) embedder_dimensions: Option<usize>,
    pub(crate) llm: Option<Arc<dyn ChatModel>>,
    pub(crate) fact_extraction_prompt: String,
    pub(crate) update_memory_prompt: String,
    pub(crate) current_owner: Owner,
    pub(crate) db_path: Option<PathBuf>,
}

impl std::fmt::Debug for MemoryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConfig")
            .field("embedder_configured", &self.embedder.is_some())
            .field("embedder_model_id", &self.embedder_model_id)
            .field("embedder_dimensions", &self.embedder_dimensions)
            .field("llm_configured", &self.llm.is_some())
            .field("current_owner", &self.current_owner)
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            embedder: None,
            embedder_model_id: "text-embedding-3-small".to_string(),
            embedder_dimensions: None,
            llm: None,
            fact_extraction_prompt: DEFAULT_FACT_EXTRACTION_PROMPT.to_string(),
            update_memory_prompt: DEFAULT_UPDATE_MEMORY_PROMPT.to_string(),
            current_owner: Owner::default(),
            db_path: None,
        }
    }
}

impl MemoryConfig {
    /// Creates a configuration with default values and no embedder or LLM.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder for custom configuration.
    #[must_use]
    pub fn builder() -> MemoryConfigBuilder {
        MemoryConfigBuilder::new()
    }

    /// Returns `true` when an embedder is configured (vector features enabled).
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.embedder.is_some()
    }

    /// Returns the vector width new embeddings are expected to have.
    #[must_use]
    pub fn embedder_dimensions(&self) -> usize {
        self.embedder_dimensions.unwrap_or_else(|| {
            self.embedder
                .as_ref()
                .map_or_else(
                    || memoria_core::embedding::default_dimensions(&self.embedder_model_id),
                    |embedder| embedder.expected_dimensions(&self.embedder_model_id),
                )
        })
    }
}

/// Builder for [`MemoryConfig`].
#[derive(Default)]
pub struct MemoryConfigBuilder {
    config: MemoryConfig,
}

impl MemoryConfigBuilder {
    /// Creates a new builder seeded with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: MemoryConfig::default(),
        }
    }

    /// Sets the embedding model and the identifier it's addressed by.
    #[must_use]
    pub fn embedder(mut self, embedder: Arc<dyn EmbeddingModel>, model_id: impl Into<String>) -> Self {
        self.config.embedder = Some(embedder);
        self.config.embedder_model_id = model_id.into();
        self
    }

    /// Overrides the expected embedding dimensionality instead of deriving
    /// it from the model id (spec §4.4 default table).
    #[must_use]
    pub const fn embedder_dimensions(mut self, dimensions: usize) -> Self {
        self.config.embedder_dimensions = Some(dimensions);
        self
    }

    /// Sets the chat-completion model used by the extractor and reconciler.
    #[must_use]
    pub fn llm(mut self, llm: Arc<dyn ChatModel>) -> Self {
        self.config.llm = Some(llm);
        self
    }

    /// Overrides the fact-extraction system prompt template.
    #[must_use]
    pub fn fact_extraction_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.fact_extraction_prompt = prompt.into();
        self
    }

    /// Overrides the memory-reconciliation system prompt template.
    #[must_use]
    pub fn update_memory_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.update_memory_prompt = prompt.into();
        self
    }

    /// Sets the owner scope used by operations that don't specify one.
    #[must_use]
    pub fn current_owner(mut self, owner: Owner) -> Self {
        self.config.current_owner = owner;
        self
    }

    /// Overrides the database file path (defaults to a per-user data directory).
    #[must_use]
    pub fn db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.db_path = Some(path.into());
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> MemoryConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_unconfigured() {
        let config = MemoryConfig::default();
        assert!(!config.is_configured());
        assert_eq!(config.embedder_dimensions(), 1536);
    }

    #[test]
    fn builder_sets_owner_and_path() {
        let config = MemoryConfig::builder()
            .current_owner(Owner::user("u1"))
            .db_path("/tmp/memoria.db")
            .build();
        assert_eq!(config.current_owner.user_id.as_deref(), Some("u1"));
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/memoria.db")));
    }

    #[test]
    fn explicit_dimensions_override_model_default() {
        let config = MemoryConfig::builder().embedder_dimensions(42).build();
        assert_eq!(config.embedder_dimensions(), 42);
    }
}
