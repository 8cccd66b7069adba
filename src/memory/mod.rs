//! Semantic memory of everything written so far.
//!
//! Text is chunked, embedded and kept in process memory. Searches rank by
//! cosine similarity and optionally re-score candidates with a cross-encoder.
//! Character and task documents are stored whole and keyed by entity id, so
//! each entity has exactly one authoritative segment.

mod chunking;
mod similarity;

pub use chunking::{chunk_text, split_sentences};
pub use similarity::cosine_similarity;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::embedding::{Embedder, Reranker};
use crate::error::{EmbeddingError, MemoryError, MemoryResult};

/// What a segment holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    /// Finalized story text.
    Narrative,
    /// Compaction summary of older story text.
    Summary,
    /// Canonical document of one character.
    CharacterProfile,
    /// The session's worldview.
    Worldview,
    /// Outline guidance for a span of rounds.
    Outline,
    /// Canonical document of one task.
    StoryTask,
}

impl SegmentKind {
    /// Get the kind name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentKind::Narrative => "narrative",
            SegmentKind::Summary => "summary",
            SegmentKind::CharacterProfile => "character_profile",
            SegmentKind::Worldview => "worldview",
            SegmentKind::Outline => "outline",
            SegmentKind::StoryTask => "story_task",
        }
    }

    /// Entity documents are never chunked.
    pub fn is_entity(&self) -> bool {
        matches!(self, SegmentKind::CharacterProfile | SegmentKind::StoryTask)
    }
}

impl std::fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Metadata attached to a segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentMetadata {
    /// Round the text belongs to.
    pub round: u32,
    /// Segment kind.
    #[serde(rename = "type")]
    pub kind: SegmentKind,
    /// When the segment was stored.
    pub timestamp: DateTime<Utc>,
    /// Owning entity, for character and task documents.
    #[serde(rename = "entityId", skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
}

impl SegmentMetadata {
    /// Create metadata stamped with the current time
    pub fn new(kind: SegmentKind, round: u32) -> Self {
        Self {
            round,
            kind,
            timestamp: Utc::now(),
            entity_id: None,
        }
    }

    /// Link the segment to an entity
    pub fn with_entity(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }
}

/// A stored, embedded unit of text.
#[derive(Debug, Clone)]
pub struct MemorySegment {
    /// Unique segment identifier.
    pub id: String,
    /// Chunk text.
    pub text: String,
    /// Embedding of `text`.
    pub vector: Vec<f32>,
    /// Round, kind, time and entity link.
    pub metadata: SegmentMetadata,
}

/// A ranked search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Segment identifier.
    pub id: String,
    /// Segment text.
    pub text: String,
    /// Segment metadata.
    pub metadata: SegmentMetadata,
    /// Cosine similarity, or the rerank relevance score when reranked.
    pub score: f32,
}

/// Search parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    /// Maximum hits returned.
    pub limit: usize,
    /// Re-score candidates with the reranker when one is configured.
    pub rerank: bool,
    /// Restrict to one kind of segment.
    pub kind: Option<SegmentKind>,
}

impl SearchOptions {
    /// Create options returning at most `limit` hits of any kind
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            rerank: false,
            kind: None,
        }
    }

    /// Enable or disable reranking
    pub fn with_rerank(mut self, rerank: bool) -> Self {
        self.rerank = rerank;
        self
    }

    /// Restrict hits to one kind
    pub fn with_kind(mut self, kind: SegmentKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// Number of cosine candidates fetched before optional reranking.
pub fn candidate_limit(limit: usize, rerank: bool) -> usize {
    if rerank {
        (limit * 5).max(10)
    } else {
        limit
    }
}

/// Session-scoped semantic memory.
pub struct MemoryStore {
    segments: RwLock<Vec<MemorySegment>>,
    embedder: Arc<dyn Embedder>,
    reranker: Option<Arc<dyn Reranker>>,
    chunk_max_chars: usize,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new(embedder: Arc<dyn Embedder>, chunk_max_chars: usize) -> Self {
        Self {
            segments: RwLock::new(Vec::new()),
            embedder,
            reranker: None,
            chunk_max_chars: chunk_max_chars.max(1),
        }
    }

    /// Attach a cross-encoder used when searches ask for reranking
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Chunk, embed and store `text`. Returns the number of segments added.
    ///
    /// Metadata carrying an entity id goes through
    /// [`replace_entity`](Self::replace_entity) and stores one whole document.
    pub async fn add(&self, text: &str, metadata: SegmentMetadata) -> MemoryResult<usize> {
        let text = text.trim();
        if text.is_empty() {
            return Err(MemoryError::EmptyText);
        }
        if let Some(entity_id) = metadata.entity_id.clone() {
            self.replace_entity(&entity_id, text, metadata).await?;
            return Ok(1);
        }

        let chunks = if metadata.kind.is_entity() {
            vec![text.to_string()]
        } else {
            chunk_text(text, self.chunk_max_chars)
        };

        let vectors = self.embedder.embed(&chunks).await?;
        let added = chunks.len();

        let mut segments = self.segments.write().await;
        segments.extend(chunks.into_iter().zip(vectors).map(|(text, vector)| MemorySegment {
            id: Uuid::new_v4().to_string(),
            text,
            vector,
            metadata: metadata.clone(),
        }));

        debug!(kind = %metadata.kind, round = metadata.round, added, "Stored memory segments");
        Ok(added)
    }

    /// Replace the single document of `entity_id` with `text`.
    ///
    /// The new text is embedded before the lock is taken; removal of old
    /// segments and insertion of the new one happen under one write lock.
    pub async fn replace_entity(
        &self,
        entity_id: &str,
        text: &str,
        metadata: SegmentMetadata,
    ) -> MemoryResult<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(MemoryError::EmptyText);
        }

        let document = vec![text.to_string()];
        let vector = self
            .embedder
            .embed(&document)
            .await?
            .into_iter()
            .next()
            .ok_or(EmbeddingError::CountMismatch {
                expected: 1,
                actual: 0,
            })?;

        let segment = MemorySegment {
            id: Uuid::new_v4().to_string(),
            text: text.to_string(),
            vector,
            metadata: metadata.with_entity(entity_id),
        };

        let mut segments = self.segments.write().await;
        let before = segments.len();
        segments.retain(|s| s.metadata.entity_id.as_deref() != Some(entity_id));
        let removed = before - segments.len();
        segments.push(segment);

        debug!(entity_id = %entity_id, removed, "Replaced entity document");
        Ok(())
    }

    /// Ranked semantic search over all segments.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        use_rerank: bool,
    ) -> MemoryResult<Vec<SearchHit>> {
        self.search_with(query, SearchOptions::new(limit).with_rerank(use_rerank))
            .await
    }

    /// Ranked semantic search with a kind filter.
    pub async fn search_with(
        &self,
        query: &str,
        options: SearchOptions,
    ) -> MemoryResult<Vec<SearchHit>> {
        if options.limit == 0 || query.trim().is_empty() || self.is_empty().await {
            return Ok(Vec::new());
        }

        let query_vector = self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();

        let reranker = self.reranker.as_ref().filter(|_| options.rerank);
        let candidates = {
            let segments = self.segments.read().await;
            let mut scored: Vec<(f32, &MemorySegment)> = segments
                .iter()
                .filter(|s| options.kind.map_or(true, |k| s.metadata.kind == k))
                .map(|s| (cosine_similarity(&query_vector, &s.vector), s))
                .collect();
            scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
            scored
                .into_iter()
                .take(candidate_limit(options.limit, reranker.is_some()))
                .map(|(score, s)| SearchHit {
                    id: s.id.clone(),
                    text: s.text.clone(),
                    metadata: s.metadata.clone(),
                    score,
                })
                .collect::<Vec<_>>()
        };

        let Some(reranker) = reranker else {
            return Ok(candidates);
        };
        if candidates.is_empty() {
            return Ok(candidates);
        }

        let documents: Vec<String> = candidates.iter().map(|c| c.text.clone()).collect();
        match reranker.rerank(query, &documents, options.limit).await {
            Ok(results) => Ok(results
                .into_iter()
                .filter_map(|hit| {
                    candidates.get(hit.index).map(|c| SearchHit {
                        score: hit.relevance_score,
                        ..c.clone()
                    })
                })
                .take(options.limit)
                .collect()),
            Err(e) => {
                warn!(error = %e, "Rerank failed, using cosine ranking");
                Ok(candidates.into_iter().take(options.limit).collect())
            }
        }
    }

    /// Authoritative document of an entity, if stored
    pub async fn entity_document(&self, entity_id: &str) -> Option<String> {
        self.segments
            .read()
            .await
            .iter()
            .find(|s| s.metadata.entity_id.as_deref() == Some(entity_id))
            .map(|s| s.text.clone())
    }

    /// Number of segments linked to an entity
    pub async fn entity_segment_count(&self, entity_id: &str) -> usize {
        self.segments
            .read()
            .await
            .iter()
            .filter(|s| s.metadata.entity_id.as_deref() == Some(entity_id))
            .count()
    }

    /// Number of stored segments
    pub async fn len(&self) -> usize {
        self.segments.read().await.len()
    }

    /// Whether the store is empty
    pub async fn is_empty(&self) -> bool {
        self.segments.read().await.is_empty()
    }

    /// Drop every segment
    pub async fn clear(&self) {
        self.segments.write().await.clear();
    }
}
