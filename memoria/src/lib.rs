//! # memoria
//!
//! Content-addressed memory store with hybrid (vector + text) search and an
//! optional two-stage LLM pipeline that extracts facts from a conversation
//! and reconciles them against what's already stored.
//!
//! [`MemoryEngine`] is the entry point: configure it with [`MemoryConfig`],
//! then call [`MemoryEngine::add`]/[`MemoryEngine::search`] directly, or feed
//! it whole conversation turns via [`MemoryEngine::process_turn`] and let the
//! extractor and reconciler decide what to store.
//!
//! ## Modules
//!
//! - [`config`] — [`MemoryConfig`]/[`MemoryConfigBuilder`], the engine's
//!   builder-style configuration.
//! - [`coordinator`] — [`MemoryEngine`], the public API surface.
//! - [`store`] — the libsql-backed persistence layer and its hybrid search.
//! - [`cache`] — the bounded, TTL-expiring embedding cache.
//! - [`extractor`] — the fact-extraction LLM call.
//! - [`reconciler`] — the ADD/UPDATE/DELETE reconciliation LLM call.
//! - [`prompts`] — default prompt templates for the two LLM calls above.
//!
//! Capability contracts ([`EmbeddingModel`], [`ChatModel`]) and shared value
//! types ([`Memory`], [`Owner`], [`MemoryError`], ...) live in
//! `memoria-core` and are re-exported here for convenience.

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod extractor;
pub mod prompts;
pub mod reconciler;
pub mod store;

#[doc(inline)]
pub use cache::EmbeddingCache;
#[doc(inline)]
pub use config::{MemoryConfig, MemoryConfigBuilder};
#[doc(inline)]
pub use coordinator::{MemoryEngine, ProcessTurnOutcome};
#[doc(inline)]
pub use extractor::FactExtractor;
#[doc(inline)]
pub use reconciler::{AppliedOperation, ApplyOutcome, MemoryReconciler, Operation, OperationEvent};
#[doc(inline)]
pub use store::{Filters, MemoryStore};

#[doc(inline)]
pub use memoria_core::llm::{oneshot, ChatModel, Message, Role};
#[doc(inline)]
pub use memoria_core::{
    EmbeddingModel, HistoryAction, Memory, MemoryError, MemoryHistoryItem, Metadata, Owner, Result,
    ScoredMemory,
};
