//! Incremental extraction of character and task state from finalized text.
//!
//! Each analysis finds the entities relevant to the new text (semantic search
//! over entity documents plus exact name/title matching), asks the model for
//! an update list, merges it, and re-renders the touched entities' documents
//! into the memory store. Any failure leaves the registry untouched.

mod merge;
mod types;

pub use merge::{merge_entities, Merged};
pub use types::*;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AgentRole;
use crate::llm::{ChatRequest, CompletionService};
use crate::memory::{MemoryStore, SearchOptions, SegmentMetadata};

/// Semantic candidates fetched per analysis.
const CANDIDATE_LIMIT: usize = 8;
/// Characters of the new text used as the search query.
const QUERY_MAX_CHARS: usize = 2000;

/// Keeps the character and task registries in sync with the story.
pub struct EntityRecorder {
    llm: Arc<dyn CompletionService>,
    memory: Arc<MemoryStore>,
    model: String,
}

impl EntityRecorder {
    /// Create a new recorder
    pub fn new(
        llm: Arc<dyn CompletionService>,
        memory: Arc<MemoryStore>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            memory,
            model: model.into(),
        }
    }

    /// Update character profiles from `text`. Returns `existing` on failure.
    pub async fn analyze_characters(
        &self,
        text: &str,
        existing: &[CharacterProfile],
        round: u32,
        cancel: &CancellationToken,
    ) -> Vec<CharacterProfile> {
        self.analyze(text, existing, round, AgentRole::CharacterRecorder, cancel)
            .await
    }

    /// Update story tasks from `text`. Returns `existing` on failure.
    pub async fn analyze_tasks(
        &self,
        text: &str,
        existing: &[StoryTask],
        round: u32,
        cancel: &CancellationToken,
    ) -> Vec<StoryTask> {
        self.analyze(text, existing, round, AgentRole::TaskRecorder, cancel)
            .await
    }

    async fn analyze<E: TrackedEntity>(
        &self,
        text: &str,
        existing: &[E],
        round: u32,
        role: AgentRole,
        cancel: &CancellationToken,
    ) -> Vec<E> {
        let start = Instant::now();
        let relevant = self.relevant_documents(text, existing).await;

        let request = ChatRequest::new(
            &self.model,
            E::PROMPT,
            build_user_prompt(text, existing, &relevant, E::NOUN),
            role.temperature(),
        )
        .with_json_output();

        let completion = match self.llm.complete(&request, cancel).await {
            Ok(completion) => completion,
            Err(e) if e.is_cancelled() => {
                debug!(kind = E::NOUN, "Entity analysis cancelled");
                return existing.to_vec();
            }
            Err(e) => {
                warn!(kind = E::NOUN, error = %e, "Entity analysis failed, keeping registry");
                return existing.to_vec();
            }
        };

        let updates = match E::parse_updates(&completion) {
            Ok(updates) => updates,
            Err(e) => {
                warn!(kind = E::NOUN, error = %e, "Unparseable entity updates, keeping registry");
                return existing.to_vec();
            }
        };

        let merged = merge_entities(existing, updates, round);
        self.mirror(&merged).await;

        info!(
            kind = E::NOUN,
            round,
            relevant = relevant.len(),
            touched = merged.touched.len(),
            total = merged.entities.len(),
            latency_ms = start.elapsed().as_millis(),
            "Entity registry updated"
        );
        merged.entities
    }

    /// Canonical documents of entities relevant to `text`.
    ///
    /// The store's document wins over one rendered from the registry.
    async fn relevant_documents<E: TrackedEntity>(&self, text: &str, existing: &[E]) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        let query: String = text.chars().take(QUERY_MAX_CHARS).collect();
        let options = SearchOptions::new(CANDIDATE_LIMIT).with_kind(E::KIND);
        match self.memory.search_with(&query, options).await {
            Ok(hits) => {
                for id in hits.into_iter().filter_map(|h| h.metadata.entity_id) {
                    if seen.insert(id.clone()) {
                        ids.push(id);
                    }
                }
            }
            Err(e) => warn!(kind = E::NOUN, error = %e, "Entity search failed, using name matches only"),
        }

        for entity in existing {
            let label = entity.label().trim();
            if !label.is_empty() && text.contains(label) && seen.insert(entity.id().to_string()) {
                ids.push(entity.id().to_string());
            }
        }

        let mut documents = Vec::with_capacity(ids.len());
        for id in &ids {
            match self.memory.entity_document(id).await {
                Some(document) => documents.push(document),
                None => {
                    if let Some(entity) = existing.iter().find(|e| e.id() == id) {
                        documents.push(entity.render());
                    }
                }
            }
        }
        documents
    }

    async fn mirror<E: TrackedEntity>(&self, merged: &Merged<E>) {
        for id in &merged.touched {
            let Some(entity) = merged.entities.iter().find(|e| e.id() == id) else {
                continue;
            };
            let metadata = SegmentMetadata::new(E::KIND, entity.last_updated_round());
            if let Err(e) = self.memory.replace_entity(id, &entity.render(), metadata).await {
                warn!(kind = E::NOUN, entity_id = %id, error = %e, "Failed to mirror entity document");
            }
        }
    }
}

fn build_user_prompt<E: TrackedEntity>(
    text: &str,
    existing: &[E],
    relevant: &[String],
    noun: &str,
) -> String {
    let relevant = if relevant.is_empty() {
        "None".to_string()
    } else {
        relevant.join("\n\n")
    };
    let roster = if existing.is_empty() {
        "None recorded yet".to_string()
    } else {
        existing
            .iter()
            .map(|e| e.roster_line())
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "[Relevant {noun}]:\n{relevant}\n\n[Known {noun}]:\n{roster}\n\n[Newest chapter]:\n{text}"
    )
}
