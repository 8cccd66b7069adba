use serde::{Deserialize, Serialize};
use serde_json::json;

/// Name of the memory-search tool offered to generation calls.
pub const SEARCH_TOOL_NAME: &str = "search_novel_memory";

/// One turn of a chat transcript, tagged by role on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ChatMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        /// Null when the turn only carries tool calls
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ToolCall>>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

impl ChatMessage {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage::System {
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage::User {
            content: content.into(),
        }
    }

    /// Create an assistant message with text content
    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage::Assistant {
            content: Some(content.into()),
            tool_calls: None,
        }
    }

    /// Create the assistant turn that requested a tool call
    pub fn tool_request(call: ToolCall) -> Self {
        ChatMessage::Assistant {
            content: None,
            tool_calls: Some(vec![call]),
        }
    }

    /// Create a tool result turn answering `tool_call_id`
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        ChatMessage::Tool {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
        }
    }
}

/// A function call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

/// Function name plus its JSON-encoded arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    /// Create a function tool call
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// Arguments of the memory-search tool
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SearchArgs {
    pub queries: Vec<String>,
}

/// Tool offered to the model
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDefinition,
}

/// Function schema of a tool
#[derive(Debug, Clone, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// The memory-search tool: `search_novel_memory(queries: string[])`
    pub fn search_novel_memory() -> Self {
        Self {
            kind: "function".to_string(),
            function: FunctionDefinition {
                name: SEARCH_TOOL_NAME.to_string(),
                description: "Search the story written so far for plot details, character \
                              history, foreshadowing or setting facts. Use it whenever the \
                              recent context is not enough."
                    .to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "queries": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "Search queries, e.g. [\"the hero's sword\", \"the mayor's secret\"]"
                        }
                    },
                    "required": ["queries"]
                }),
            },
        }
    }
}

/// Structured output hint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: String,
}

/// Reasoning-trace switch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThinkingConfig {
    #[serde(rename = "type")]
    pub kind: String,
}

/// Chat completion request body
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingConfig>,
}

impl ChatRequest {
    /// Create a request with a system prompt and one user turn
    pub fn new(
        model: impl Into<String>,
        system: impl Into<String>,
        user: impl Into<String>,
        temperature: f32,
    ) -> Self {
        Self {
            model: model.into(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            temperature,
            stream: false,
            tools: None,
            response_format: None,
            thinking: None,
        }
    }

    /// Offer the memory-search tool
    pub fn with_search_tool(mut self) -> Self {
        self.tools = Some(vec![ToolDefinition::search_novel_memory()]);
        self
    }

    /// Ask for a JSON object response
    pub fn with_json_output(mut self) -> Self {
        self.response_format = Some(ResponseFormat {
            kind: "json_object".to_string(),
        });
        self
    }

    /// Request reasoning traces when `enabled`
    pub fn with_thinking(mut self, enabled: bool) -> Self {
        self.thinking = enabled.then(|| ThinkingConfig {
            kind: "enabled".to_string(),
        });
        self
    }

    /// Set the streaming flag
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }
}

/// One `data:` frame of a streamed completion
#[derive(Debug, Clone, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
}

/// Choice entry of a streamed frame
#[derive(Debug, Clone, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub delta: StreamDelta,
    pub finish_reason: Option<String>,
}

/// Incremental content of a streamed frame
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamDelta {
    pub content: Option<String>,
    pub reasoning_content: Option<String>,
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// Fragment of a tool call; the first fragment carries id and name
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallDelta {
    pub id: Option<String>,
    pub function: Option<FunctionDelta>,
}

/// Function fragment of a tool call delta
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionDelta {
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// Non-streamed completion body
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
}

/// Choice entry of a non-streamed completion
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionChoice {
    pub message: ResponseMessage,
}

/// Message of a non-streamed completion
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    pub content: Option<String>,
}

impl CompletionResponse {
    /// Content of the first choice, if any
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
    }
}

/// Typed event decoded from a generation stream
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// Narrative or answer text
    ContentDelta(String),
    /// Reasoning trace text
    ThinkingDelta(String),
    /// Model asked to run a tool; the stream ends after this
    ToolCallRequested(ToolCall),
}

/// Resolved result of one generation, tool rounds included
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub content: String,
    pub thinking: String,
}
