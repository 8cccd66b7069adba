//! One typed operation per agent role.
//!
//! - [`writer`](Agents::write_draft) and rewriter
//! - critics, the moderator and the outline vote
//! - outline contributors, the outline summarizer, worldview and expert suggestion
//! - reader options and story summaries
//!
//! Streaming roles run through the bounded memory-search tool loop and report
//! every [`ChatEvent`] to an observer so callers can publish partial output.

mod critic;
mod planner;
mod reader;
mod tools;
mod writer;

pub use critic::{outline_vote_passes, requests_outline_update, CritiqueInput};
pub use planner::{OutlineBrief, WORLDVIEW_FALLBACK};
pub use reader::{FALLBACK_OPTIONS, SUMMARY_FALLBACK_CHARS};
pub use tools::{format_search_results, run_tool_loop};
pub use writer::WritingBrief;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::{AgentRole, Config};
use crate::error::LlmResult;
use crate::llm::{ChatEvent, ChatRequest, Completion, CompletionService};
use crate::memory::MemoryStore;
use crate::prompts::MEMORY_TOOL_GUIDANCE;

/// Callback receiving every streamed event of one generation.
pub type Observer<'a> = &'a mut (dyn FnMut(&ChatEvent) + Send);

/// Observer that ignores everything
pub fn ignore_events(_: &ChatEvent) {}

/// Model-level settings shared by every role.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Model used for all roles.
    pub model: String,
    /// Request reasoning traces on streamed calls.
    pub enable_thinking: bool,
    /// Follow-up requests allowed after tool calls.
    pub max_tool_rounds: u32,
    /// Hits per memory search issued by a tool call.
    pub search_limit: usize,
    /// Rerank tool-call searches.
    pub rerank: bool,
}

impl AgentSettings {
    /// Settings taken from the application config
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.llm.model.clone(),
            enable_thinking: config.workflow.enable_thinking,
            max_tool_rounds: config.workflow.max_tool_rounds,
            search_limit: config.workflow.search_limit,
            rerank: config.rerank.enabled,
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model: "deepseek-chat".to_string(),
            enable_thinking: false,
            max_tool_rounds: 3,
            search_limit: 3,
            rerank: true,
        }
    }
}

/// The agent roster of a session.
#[derive(Clone)]
pub struct Agents {
    llm: Arc<dyn CompletionService>,
    memory: Arc<MemoryStore>,
    settings: AgentSettings,
}

impl Agents {
    /// Create the roster over a generation service and the session memory
    pub fn new(
        llm: Arc<dyn CompletionService>,
        memory: Arc<MemoryStore>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            llm,
            memory,
            settings,
        }
    }

    /// Shared settings
    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    fn request(&self, role: AgentRole, system: impl Into<String>, user: impl Into<String>) -> ChatRequest {
        ChatRequest::new(&self.settings.model, system, user, role.temperature())
    }

    /// Streamed generation with the memory-search tool offered.
    async fn generate_with_memory(
        &self,
        role: AgentRole,
        system: String,
        user: String,
        cancel: &CancellationToken,
        observer: Observer<'_>,
    ) -> LlmResult<Completion> {
        let system = format!("{}\n\n{}", system, MEMORY_TOOL_GUIDANCE);
        let request = self
            .request(role, system, user)
            .with_search_tool()
            .with_thinking(self.settings.enable_thinking);
        run_tool_loop(
            self.llm.as_ref(),
            &self.memory,
            request,
            &self.settings,
            cancel,
            observer,
        )
        .await
    }

    /// Streamed generation without tools.
    async fn generate(
        &self,
        role: AgentRole,
        system: String,
        user: String,
        cancel: &CancellationToken,
        observer: Observer<'_>,
    ) -> LlmResult<Completion> {
        let request = self
            .request(role, system, user)
            .with_thinking(self.settings.enable_thinking);
        run_tool_loop(
            self.llm.as_ref(),
            &self.memory,
            request,
            &self.settings,
            cancel,
            observer,
        )
        .await
    }

    /// Non-streamed plain generation.
    async fn complete_text(
        &self,
        role: AgentRole,
        system: String,
        user: String,
        cancel: &CancellationToken,
    ) -> LlmResult<String> {
        let request = self.request(role, system, user);
        self.llm.complete(&request, cancel).await
    }
}
