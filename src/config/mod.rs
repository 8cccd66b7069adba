use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub rerank: RerankConfig,
    pub archive: ArchiveConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub workflow: WorkflowConfig,
}

/// Generation service configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

/// Embedding service configuration
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub dimensions: u32,
}

/// Rerank service configuration
#[derive(Debug, Clone)]
pub struct RerankConfig {
    pub enabled: bool,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

/// Where finished rounds are appended
#[derive(Debug, Clone, Default)]
pub struct ArchiveConfig {
    /// HTTP endpoint accepting `{sessionId, content, round}`
    pub url: Option<String>,
    /// Local directory used when no URL is configured
    pub dir: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    /// Retries for non-streamed calls only
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Knobs of the generation workflow
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Revision passes per cycle
    pub max_revisions: u32,
    /// Last round of the non-reader variant
    pub max_rounds: u32,
    /// Rounds covered by one outline
    pub outline_span: u32,
    pub choice_timeout_ms: u64,
    /// Follow-up requests allowed after tool calls in one generation
    pub max_tool_rounds: u32,
    /// Pause between outline-discussion rounds
    pub speaker_delay_ms: u64,
    pub enable_thinking: bool,
    pub reader_choice: bool,
    pub chunk_max_chars: usize,
    /// Results per memory search issued by a tool call
    pub search_limit: usize,
}

/// Agent roles, each with its own sampling temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentRole {
    /// Writes the first draft of a round.
    Writer,
    /// Critiques a draft from one expert's perspective.
    Critic,
    /// Condenses critiques into a revision brief.
    Moderator,
    /// Rewrites the draft per the brief.
    Rewriter,
    /// Contributes to the outline discussion.
    OutlineContributor,
    /// Condenses the outline discussion into an outline.
    OutlineSummarizer,
    /// Proposes reader options.
    OptionGenerator,
    /// Summarizes old story text for compaction.
    StorySummarizer,
    /// Builds the worldview from requirements.
    WorldviewArchitect,
    /// Extracts character updates.
    CharacterRecorder,
    /// Extracts task updates.
    TaskRecorder,
    /// Proposes the expert panel.
    ExpertSuggester,
}

impl AgentRole {
    /// Default sampling temperature for the role
    pub fn temperature(&self) -> f32 {
        match self {
            AgentRole::Writer | AgentRole::Rewriter | AgentRole::OutlineContributor => 0.8,
            AgentRole::Critic
            | AgentRole::Moderator
            | AgentRole::OutlineSummarizer
            | AgentRole::OptionGenerator
            | AgentRole::ExpertSuggester => 0.7,
            AgentRole::StorySummarizer => 0.5,
            AgentRole::WorldviewArchitect => 0.9,
            AgentRole::CharacterRecorder | AgentRole::TaskRecorder => 0.6,
        }
    }

    /// Role name used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Writer => "writer",
            AgentRole::Critic => "critic",
            AgentRole::Moderator => "moderator",
            AgentRole::Rewriter => "rewriter",
            AgentRole::OutlineContributor => "outline_contributor",
            AgentRole::OutlineSummarizer => "outline_summarizer",
            AgentRole::OptionGenerator => "option_generator",
            AgentRole::StorySummarizer => "story_summarizer",
            AgentRole::WorldviewArchitect => "worldview_architect",
            AgentRole::CharacterRecorder => "character_recorder",
            AgentRole::TaskRecorder => "task_recorder",
            AgentRole::ExpertSuggester => "expert_suggester",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let llm = LlmConfig {
            api_key: env::var("LLM_API_KEY").map_err(|_| AppError::Config {
                message: "LLM_API_KEY is required".to_string(),
            })?,
            base_url: env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.deepseek.com".to_string()),
            model: env::var("LLM_MODEL").unwrap_or_else(|_| "deepseek-chat".to_string()),
        };

        let embedding = EmbeddingConfig {
            api_key: env::var("EMBEDDING_API_KEY").unwrap_or_else(|_| llm.api_key.clone()),
            base_url: env::var("EMBEDDING_BASE_URL")
                .unwrap_or_else(|_| "https://api.siliconflow.cn/v1".to_string()),
            model: env::var("EMBEDDING_MODEL").unwrap_or_else(|_| "BAAI/bge-m3".to_string()),
            dimensions: env_or("EMBEDDING_DIMENSIONS", 1024),
        };

        let rerank = RerankConfig {
            enabled: env_flag("RERANK_ENABLED", true),
            api_key: env::var("RERANK_API_KEY").unwrap_or_else(|_| embedding.api_key.clone()),
            base_url: env::var("RERANK_BASE_URL").unwrap_or_else(|_| embedding.base_url.clone()),
            model: env::var("RERANK_MODEL")
                .unwrap_or_else(|_| "BAAI/bge-reranker-v2-m3".to_string()),
        };

        let archive = ArchiveConfig {
            url: env::var("ARCHIVE_URL").ok().filter(|s| !s.trim().is_empty()),
            dir: env::var("ARCHIVE_DIR")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let defaults = RequestConfig::default();
        let request = RequestConfig {
            timeout_ms: env_or("REQUEST_TIMEOUT_MS", defaults.timeout_ms),
            max_retries: env_or("MAX_RETRIES", defaults.max_retries),
            retry_delay_ms: env_or("RETRY_DELAY_MS", defaults.retry_delay_ms),
        };

        let defaults = WorkflowConfig::default();
        let workflow = WorkflowConfig {
            max_revisions: env_or("MAX_REVISIONS", defaults.max_revisions).max(1),
            max_rounds: env_or("MAX_ROUNDS", defaults.max_rounds),
            outline_span: env_or("OUTLINE_SPAN", defaults.outline_span).max(1),
            choice_timeout_ms: env_or("CHOICE_TIMEOUT_MS", defaults.choice_timeout_ms),
            max_tool_rounds: env_or("MAX_TOOL_ROUNDS", defaults.max_tool_rounds),
            speaker_delay_ms: env_or("SPEAKER_DELAY_MS", defaults.speaker_delay_ms),
            enable_thinking: env_flag("ENABLE_THINKING", defaults.enable_thinking),
            reader_choice: env_flag("READER_CHOICE", defaults.reader_choice),
            chunk_max_chars: env_or("CHUNK_MAX_CHARS", defaults.chunk_max_chars).max(1),
            search_limit: env_or("SEARCH_LIMIT", defaults.search_limit).max(1),
        };

        Ok(Config {
            llm,
            embedding,
            rerank,
            archive,
            logging,
            request,
            workflow,
        })
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 120_000,
            max_retries: 0,
            retry_delay_ms: 1000,
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_revisions: 1,
            max_rounds: 10,
            outline_span: 5,
            choice_timeout_ms: 60_000,
            max_tool_rounds: 3,
            speaker_delay_ms: 1000,
            enable_thinking: false,
            reader_choice: true,
            chunk_max_chars: 500,
            search_limit: 3,
        }
    }
}
