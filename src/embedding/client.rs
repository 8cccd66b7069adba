use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use super::types::{EmbeddingRequest, EmbeddingResponse, RerankHit, RerankRequest, RerankResponse};
use super::{Embedder, Reranker};
use crate::config::{EmbeddingConfig, RequestConfig, RerankConfig};
use crate::error::{EmbeddingError, EmbeddingResult};

#[derive(Clone)]
struct JsonEndpoint {
    client: Client,
    url: String,
    api_key: String,
}

impl JsonEndpoint {
    fn new(base_url: &str, path: &str, api_key: &str, request: &RequestConfig) -> EmbeddingResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request.timeout_ms))
            .build()
            .map_err(EmbeddingError::Http)?;

        Ok(Self {
            client,
            url: format!("{}{}", base_url.trim_end_matches('/'), path),
            api_key: api_key.to_string(),
        })
    }

    async fn post<Req: Serialize + Sync, Resp: DeserializeOwned>(
        &self,
        body: &Req,
    ) -> EmbeddingResult<Resp> {
        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse {
                message: format!("Failed to parse response: {}", e),
            })
    }
}

/// Client for an OpenAI-compatible `/embeddings` endpoint
#[derive(Clone)]
pub struct EmbeddingClient {
    endpoint: JsonEndpoint,
    model: String,
    dimensions: u32,
}

impl EmbeddingClient {
    /// Create a new embedding client
    pub fn new(config: &EmbeddingConfig, request: &RequestConfig) -> EmbeddingResult<Self> {
        Ok(Self {
            endpoint: JsonEndpoint::new(&config.base_url, "/embeddings", &config.api_key, request)?,
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, inputs: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: self.model.clone(),
            input: inputs.to_vec(),
            encoding_format: "float".to_string(),
            dimensions: self.dimensions,
        };

        debug!(inputs = inputs.len(), model = %self.model, "Requesting embeddings");
        let start = Instant::now();
        let mut response: EmbeddingResponse = self.endpoint.post(&request).await?;

        if response.data.len() != inputs.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: inputs.len(),
                actual: response.data.len(),
            });
        }

        response.data.sort_by_key(|d| d.index);
        if response.data.iter().enumerate().any(|(i, d)| d.index != i) {
            return Err(EmbeddingError::InvalidResponse {
                message: "embedding indices do not cover the input".to_string(),
            });
        }

        info!(
            inputs = inputs.len(),
            latency_ms = start.elapsed().as_millis(),
            "Embedding call succeeded"
        );
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Client for a cross-encoder `/rerank` endpoint
#[derive(Clone)]
pub struct RerankClient {
    endpoint: JsonEndpoint,
    model: String,
}

impl RerankClient {
    /// Create a new rerank client
    pub fn new(config: &RerankConfig, request: &RequestConfig) -> EmbeddingResult<Self> {
        Ok(Self {
            endpoint: JsonEndpoint::new(&config.base_url, "/rerank", &config.api_key, request)?,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Reranker for RerankClient {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> EmbeddingResult<Vec<RerankHit>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let request = RerankRequest {
            model: self.model.clone(),
            query: query.to_string(),
            documents: documents.to_vec(),
            top_n,
            return_documents: false,
        };

        let start = Instant::now();
        let response: RerankResponse = self.endpoint.post(&request).await?;

        let mut hits: Vec<RerankHit> = response
            .results
            .into_iter()
            .filter(|hit| hit.index < documents.len())
            .collect();
        hits.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_n);

        info!(
            documents = documents.len(),
            hits = hits.len(),
            latency_ms = start.elapsed().as_millis(),
            "Rerank call succeeded"
        );
        Ok(hits)
    }
}
