//! Generation service client and wire types.
//!
//! - [`LlmClient`]: HTTP client for `/chat/completions`, streamed or not
//! - [`SseDecoder`]: frame decoder producing typed [`ChatEvent`]s
//! - [`parse_structured`]: strict JSON validation with one fence-strip pass
//!
//! Everything above this layer talks to [`CompletionService`], so the
//! orchestrator can run against scripted fakes in tests.

mod client;
mod parse;
mod sse;
mod types;


pub use client::{decode_stream, LlmClient};
pub use parse::{parse_structured, strip_code_fences};
pub use sse::SseDecoder;
pub use types::*;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use tokio_util::sync::CancellationToken;

use crate::error::LlmResult;

/// Async sequence of typed generation events.
pub type ChatStream = Pin<Box<dyn Stream<Item = LlmResult<ChatEvent>> + Send>>;

/// One logical generation operation, streamed or resolved in one shot.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Run a non-streamed request and return the message content.
    async fn complete(&self, request: &ChatRequest, cancel: &CancellationToken)
        -> LlmResult<String>;

    /// Open a streamed request. The stream ends at `[DONE]`, at the end of
    /// the body, or with [`LlmError::Cancelled`](crate::error::LlmError::Cancelled).
    async fn stream(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> LlmResult<ChatStream>;
}
