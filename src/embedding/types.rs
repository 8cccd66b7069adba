use serde::{Deserialize, Serialize};

/// Embedding request body
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingRequest {
    pub model: String,
    pub input: Vec<String>,
    pub encoding_format: String,
    pub dimensions: u32,
}

/// Embedding response body; `data` may arrive in any order
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingResponse {
    pub data: Vec<EmbeddingData>,
}

/// One vector, tagged with the position of its input
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingData {
    pub index: usize,
    pub embedding: Vec<f32>,
}

/// Rerank request body
#[derive(Debug, Clone, Serialize)]
pub struct RerankRequest {
    pub model: String,
    pub query: String,
    pub documents: Vec<String>,
    pub top_n: usize,
    pub return_documents: bool,
}

/// Rerank response body
#[derive(Debug, Clone, Deserialize)]
pub struct RerankResponse {
    pub results: Vec<RerankHit>,
}

/// Relevance of one document; `index` points into the request's `documents`
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RerankHit {
    pub index: usize,
    pub relevance_score: f32,
}
