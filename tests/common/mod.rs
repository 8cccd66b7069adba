//! Shared fakes for integration tests: a scripted generation service that
//! answers by agent role, and a deterministic bag-of-characters embedder.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use novel_workshop::config::WorkflowConfig;
use novel_workshop::embedding::Embedder;
use novel_workshop::error::{EmbeddingResult, LlmError, LlmResult};
use novel_workshop::llm::{
    ChatEvent, ChatMessage, ChatRequest, ChatStream, CompletionService, ToolCall,
    SEARCH_TOOL_NAME,
};
use novel_workshop::memory::MemoryStore;

/// Agent role recognized from a request's system prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Writer,
    Critic,
    Moderator,
    Rewriter,
    OutlineContributor,
    OutlineSummarizer,
    Options,
    StorySummarizer,
    Worldview,
    Experts,
    Characters,
    Tasks,
    Unknown,
}

pub fn system_prompt(request: &ChatRequest) -> &str {
    match request.messages.first() {
        Some(ChatMessage::System { content }) => content,
        _ => "",
    }
}

pub fn user_prompt(request: &ChatRequest) -> &str {
    request
        .messages
        .iter()
        .find_map(|m| match m {
            ChatMessage::User { content } => Some(content.as_str()),
            _ => None,
        })
        .unwrap_or("")
}

pub fn role_of(request: &ChatRequest) -> Role {
    let system = system_prompt(request);
    let markers = [
        ("narrator of an interactive", Role::Writer),
        ("find logical flaws", Role::Critic),
        ("fiction editor", Role::Moderator),
        ("professional novelist", Role::Rewriter),
        ("Current task: set or update", Role::OutlineContributor),
        ("editor-in-chief", Role::OutlineSummarizer),
        ("design choices", Role::Options),
        ("story summarizer", Role::StorySummarizer),
        ("architect of an epic", Role::Worldview),
        ("fiction consultant", Role::Experts),
        ("character files", Role::Characters),
        ("quest log", Role::Tasks),
    ];
    markers
        .iter()
        .find(|(marker, _)| system.contains(marker))
        .map(|(_, role)| *role)
        .unwrap_or(Role::Unknown)
}

/// What the scripted service answers.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Content, streamed as two deltas.
    Text(String),
    /// Content with a reasoning trace.
    Thinking { thinking: String, content: String },
    /// A `search_novel_memory` call with these queries.
    Tool(Vec<String>),
    /// A server error.
    Fail(String),
    /// Never answers until cancelled.
    Pending,
}

pub fn text(s: impl Into<String>) -> Reply {
    Reply::Text(s.into())
}

/// Reasonable output for every role.
pub fn default_reply(role: Role) -> Reply {
    match role {
        Role::Writer => text("The lantern guttered as Mira stepped into the flooded archive."),
        Role::Critic => text("The scene is vivid. Keep the water level consistent."),
        Role::Moderator => text("Keep the water level consistent and tighten the opening."),
        Role::Rewriter => text("Mira waded into the flooded archive, lantern raised above the waterline."),
        Role::OutlineContributor => text("Aim for the sealed vault beneath the archive."),
        Role::OutlineSummarizer => text("# Stage outline\n## Short-term goal\nReach the sealed vault."),
        Role::Options => text(r#"["Open the vault","Hide in the stacks","Call out to the keeper"]"#),
        Role::StorySummarizer => text("Mira entered the archive and found the vault."),
        Role::Worldview => text("A drowned continent where archives float on pontoons."),
        Role::Experts => text(
            json!([
                {"name": "Lin", "field": "plot structure", "personality": "blunt"},
                {"name": "Osei", "field": "character psychology", "initialStance": "motives first", "color": "#22c55e"},
                {"name": "Vera", "field": "worldbuilding"}
            ])
            .to_string(),
        ),
        Role::Characters => text(
            json!({"updatedCharacters": [
                {"name": "Mira", "description": "A young archivist", "status": "wet", "isProtagonist": true}
            ]})
            .to_string(),
        ),
        Role::Tasks => text(
            json!({"updatedTasks": [
                {"title": "Reach the sealed vault", "type": "main", "status": "active"}
            ]})
            .to_string(),
        ),
        Role::Unknown => text(""),
    }
}

type Handler = Box<dyn Fn(Role, &ChatRequest) -> Reply + Send + Sync>;

/// In-process generation service answering from a handler.
pub struct ScriptedLlm {
    handler: Handler,
    requests: Mutex<Vec<(Role, ChatRequest)>>,
    tool_ids: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new(handler: impl Fn(Role, &ChatRequest) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
            tool_ids: AtomicUsize::new(0),
        })
    }

    /// Every role answers with [`default_reply`].
    pub fn with_defaults() -> Arc<Self> {
        Self::new(|role, _| default_reply(role))
    }

    pub fn requests(&self) -> Vec<(Role, ChatRequest)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self, role: Role) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| *r == role)
            .count()
    }

    fn reply(&self, request: &ChatRequest) -> (Role, Reply) {
        let role = role_of(request);
        self.requests.lock().unwrap().push((role, request.clone()));
        (role, (self.handler)(role, request))
    }
}

fn server_error(message: String) -> LlmError {
    LlmError::Api {
        status: 500,
        message,
    }
}

fn split_in_two(s: &str) -> Vec<String> {
    let mid = s.chars().count() / 2;
    let first: String = s.chars().take(mid).collect();
    let second: String = s.chars().skip(mid).collect();
    [first, second].into_iter().filter(|p| !p.is_empty()).collect()
}

#[async_trait]
impl CompletionService for ScriptedLlm {
    async fn complete(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> LlmResult<String> {
        match self.reply(request).1 {
            Reply::Text(content) | Reply::Thinking { content, .. } => Ok(content),
            Reply::Tool(_) => Ok(String::new()),
            Reply::Fail(message) => Err(server_error(message)),
            Reply::Pending => {
                cancel.cancelled().await;
                Err(LlmError::Cancelled)
            }
        }
    }

    async fn stream(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> LlmResult<ChatStream> {
        let events: Vec<LlmResult<ChatEvent>> = match self.reply(request).1 {
            Reply::Text(content) => split_in_two(&content)
                .into_iter()
                .map(|p| Ok(ChatEvent::ContentDelta(p)))
                .collect(),
            Reply::Thinking { thinking, content } => vec![
                Ok(ChatEvent::ThinkingDelta(thinking)),
                Ok(ChatEvent::ContentDelta(content)),
            ],
            Reply::Tool(queries) => {
                let n = self.tool_ids.fetch_add(1, Ordering::SeqCst);
                let arguments = json!({ "queries": queries }).to_string();
                vec![Ok(ChatEvent::ToolCallRequested(ToolCall::function(
                    format!("call_{}", n),
                    SEARCH_TOOL_NAME,
                    arguments,
                )))]
            }
            Reply::Fail(message) => return Err(server_error(message)),
            Reply::Pending => {
                cancel.cancelled().await;
                return Err(LlmError::Cancelled);
            }
        };
        Ok(Box::pin(futures::stream::iter(events)))
    }
}

/// Deterministic embedder: character counts folded into 32 dimensions.
pub struct CharEmbedder;

#[async_trait]
impl Embedder for CharEmbedder {
    async fn embed(&self, inputs: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        Ok(inputs
            .iter()
            .map(|text| {
                let mut v = vec![0.0_f32; 32];
                for c in text.to_lowercase().chars().filter(|c| c.is_alphanumeric()) {
                    v[(c as usize) % 32] += 1.0;
                }
                v
            })
            .collect())
    }
}

pub fn memory() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new(Arc::new(CharEmbedder), 500))
}

/// Workflow config without delays.
pub fn fast_config() -> WorkflowConfig {
    WorkflowConfig {
        speaker_delay_ms: 0,
        choice_timeout_ms: 50,
        ..WorkflowConfig::default()
    }
}
