use std::collections::VecDeque;
use std::pin::Pin;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::sse::SseDecoder;
use super::types::{ChatEvent, ChatRequest, CompletionResponse};
use super::{ChatStream, CompletionService};
use crate::config::{LlmConfig, RequestConfig};
use crate::error::{LlmError, LlmResult};

/// Client for an OpenAI-compatible chat completions endpoint
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    base_url: String,
    api_key: String,
    request_config: RequestConfig,
}

impl LlmClient {
    /// Create a new generation client
    pub fn new(config: &LlmConfig, request_config: RequestConfig) -> LlmResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(LlmError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            request_config,
        })
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn map_send_error(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout {
                timeout_ms: self.request_config.timeout_ms,
            }
        } else {
            LlmError::Http(e)
        }
    }

    async fn send(&self, request: &ChatRequest) -> LlmResult<reqwest::Response> {
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            stream = request.stream,
            tools = request.tools.is_some(),
            "Calling generation service"
        );

        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        Ok(response)
    }

    /// Execute a single non-streamed request (internal)
    async fn execute_request(&self, request: &ChatRequest) -> LlmResult<String> {
        let response = self.send(request).await?;

        let completion: CompletionResponse =
            response
                .json()
                .await
                .map_err(|e| LlmError::InvalidResponse {
                    message: format!("Failed to parse response: {}", e),
                })?;

        completion
            .content()
            .map(str::to_string)
            .ok_or_else(|| LlmError::InvalidResponse {
                message: "Response has no message content".to_string(),
            })
    }

    async fn complete_with_retries(&self, request: &ChatRequest) -> LlmResult<String> {
        let mut last_error = None;
        let mut retries = 0;

        while retries <= self.request_config.max_retries {
            if retries > 0 {
                let delay = Duration::from_millis(
                    self.request_config.retry_delay_ms * (2_u64.pow(retries - 1)),
                );
                warn!(
                    model = %request.model,
                    retry = retries,
                    delay_ms = delay.as_millis(),
                    "Retrying generation request"
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();

            match self.execute_request(request).await {
                Ok(content) => {
                    info!(
                        model = %request.model,
                        latency_ms = start.elapsed().as_millis(),
                        "Generation call succeeded"
                    );
                    return Ok(content);
                }
                // Client errors will not improve on retry
                Err(e @ LlmError::Api { status: 400..=499, .. }) => return Err(e),
                Err(e) => {
                    error!(
                        model = %request.model,
                        error = %e,
                        latency_ms = start.elapsed().as_millis(),
                        retry = retries,
                        "Generation call failed"
                    );
                    last_error = Some(e);
                    retries += 1;
                }
            }
        }

        match last_error {
            Some(e) if self.request_config.max_retries == 0 => Err(e),
            last => Err(LlmError::Unavailable {
                message: last
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "Unknown error".to_string()),
                retries: retries.saturating_sub(1),
            }),
        }
    }
}

#[async_trait]
impl CompletionService for LlmClient {
    async fn complete(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> LlmResult<String> {
        let request = request.clone().with_stream(false);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LlmError::Cancelled),
            result = self.complete_with_retries(&request) => result,
        }
    }

    async fn stream(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> LlmResult<ChatStream> {
        let request = request.clone().with_stream(true);
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LlmError::Cancelled),
            result = self.send(&request) => result?,
        };

        info!(model = %request.model, "Generation stream opened");
        Ok(decode_stream(response.bytes_stream(), cancel.clone()))
    }
}

struct StreamState<S> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<ChatEvent>,
    cancel: CancellationToken,
    finished: bool,
}

/// Turn a raw SSE byte stream into a typed, cancellable event stream.
///
/// Cancellation yields a single [`LlmError::Cancelled`] and ends the stream.
pub fn decode_stream<S, B>(body: S, cancel: CancellationToken) -> ChatStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = StreamState {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        cancel,
        finished: false,
    };

    let stream = futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if state.finished {
                return None;
            }

            let next = tokio::select! {
                biased;
                _ = state.cancel.cancelled() => None,
                chunk = state.body.next() => Some(chunk),
            };

            match next {
                None => {
                    state.finished = true;
                    return Some((Err(LlmError::Cancelled), state));
                }
                Some(Some(Ok(bytes))) => {
                    let events = state.decoder.push(bytes.as_ref());
                    state.pending.extend(events);
                    if state.decoder.is_done() {
                        state.finished = true;
                    }
                }
                Some(Some(Err(e))) => {
                    state.finished = true;
                    state.pending.clear();
                    return Some((
                        Err(LlmError::Stream {
                            message: e.to_string(),
                        }),
                        state,
                    ));
                }
                Some(None) => {
                    state.finished = true;
                    let events = state.decoder.finish();
                    state.pending.extend(events);
                }
            }
        }
    });

    Box::pin(stream)
}
