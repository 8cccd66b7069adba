//! Embedding and rerank services used by the memory store.

mod client;
mod types;

pub use client::{EmbeddingClient, RerankClient};
pub use types::*;

use async_trait::async_trait;

use crate::error::EmbeddingResult;

/// Turns texts into vectors, one per input, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts
    async fn embed(&self, inputs: &[String]) -> EmbeddingResult<Vec<Vec<f32>>>;
}

/// Cross-encoder relevance scoring.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Score `documents` against `query`, best first, at most `top_n` hits
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> EmbeddingResult<Vec<RerankHit>>;
}
