//! # Novel Workshop
//!
//! A multi-agent engine that writes an interactive novel round by round:
//! a writer drafts, a panel of experts critiques in parallel, a moderator
//! condenses the critiques, and the draft is rewritten before the reader
//! picks what the protagonist does next.
//!
//! ## Components
//!
//! - **Workflow Orchestrator**: phase state machine over a session aggregate
//!   updated only through a pure reducer
//! - **Memory Store**: chunked, embedded story memory with reranked search and
//!   entity-scoped document replacement
//! - **Context Compactor**: rolling summaries that keep the drafting context bounded
//! - **Entity Recorder**: character and task registries merged from each finalized round
//!
//! ## Architecture
//!
//! ```text
//! Orchestrator → Agents → Generation service (HTTP, SSE)
//!      ↓            ↓
//!   Recorder → Memory Store → Embedding / Rerank services (HTTP)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use novel_workshop::{agents::AgentSettings, llm::LlmClient, Config};
//! use novel_workshop::embedding::EmbeddingClient;
//! use novel_workshop::memory::MemoryStore;
//! use novel_workshop::workflow::{Expert, Orchestrator, Session};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let llm = Arc::new(LlmClient::new(&config.llm, config.request.clone())?);
//!     let embedder = Arc::new(EmbeddingClient::new(&config.embedding, &config.request)?);
//!     let memory = Arc::new(MemoryStore::new(embedder, config.workflow.chunk_max_chars));
//!     let experts = vec![Expert::new("Lin", "plot structure")];
//!     let session = Session::new("A heist on a generation ship", "", experts, &config.workflow);
//!     let orchestrator = Orchestrator::new(
//!         session,
//!         llm,
//!         memory,
//!         AgentSettings::from_config(&config),
//!         config.workflow.clone(),
//!     );
//!     orchestrator.start(&CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Agent roles and the bounded memory-search tool loop.
pub mod agents;
/// Configuration management.
pub mod config;
/// Drafting context compaction.
pub mod context;
/// Embedding and rerank clients.
pub mod embedding;
/// Error types and result aliases for the application.
pub mod error;
/// Generation service client, wire types and stream decoding.
pub mod llm;
/// Semantic memory store.
pub mod memory;
/// System prompts for every agent role.
pub mod prompts;
/// Character and task extraction.
pub mod recorder;
/// Session state and the workflow orchestrator.
pub mod workflow;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use workflow::{Orchestrator, Session};
