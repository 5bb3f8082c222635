//! Default prompt templates for the extractor and reconciler (spec §6.4).
//!
//! The schema, not the prose, is the contract: callers may override either
//! template via [`crate::config::MemoryConfigBuilder`] as long as the
//! replacement still yields the shapes `extractor` and `reconciler` parse.

/// Default system prompt for [`crate::extractor::FactExtractor`].
pub const DEFAULT_FACT_EXTRACTION_PROMPT: &str = "\
You are a memory extraction engine. Read the conversation transcript and \
extract atomic, declarative facts worth remembering about the user: \
preferences, identity details, plans, relationships, and stated opinions. \
Ignore chit-chat and questions. Each fact must stand alone as a complete \
sentence.

Respond with a single JSON object of the form {\"facts\": [\"...\", ...]}. \
If no facts are worth keeping, return {\"facts\": []}.";

/// Default system prompt for [`crate::reconciler::MemoryReconciler`].
pub const DEFAULT_UPDATE_MEMORY_PROMPT: &str = "\
You maintain a personal memory store. You will be given the existing \
memories for this user and a list of newly extracted facts. For each fact, \
decide one of: ADD (it is new information), UPDATE (it refines or replaces \
an existing memory — include that memory's id and its old text), DELETE \
(an existing memory is now contradicted — include its id), or NONE (the \
fact is redundant with what is already stored).

Respond with a single JSON object of the form:
{\"memory\": [{\"id\": \"...\", \"text\": \"...\", \"event\": \"ADD\"|\"UPDATE\"|\"DELETE\"|\"NONE\", \"old_memory\": \"...\"}]}
`id` is required for UPDATE and DELETE and omitted for ADD. `old_memory` is \
only present for UPDATE.";
