use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Generation service errors
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Stream error: {message}")]
    Stream { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Tool call loop exceeded {limit} rounds")]
    ToolLoopExceeded { limit: u32 },

    #[error("Request cancelled")]
    Cancelled,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl LlmError {
    /// True when the call was aborted through the run's cancellation token.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, LlmError::Cancelled)
    }
}

/// Structured output that failed strict validation
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Empty completion, expected {expected}")]
    Empty { expected: &'static str },

    #[error("Malformed {expected}: {message}")]
    Malformed {
        expected: &'static str,
        message: String,
    },
}

/// Embedding and rerank service errors
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Expected {expected} vectors, got {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Memory store errors
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Nothing to store: text is empty")]
    EmptyText,
}

/// Archive sink errors
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Invalid session id: {session_id}")]
    InvalidSessionId { session_id: String },

    #[error("Archive endpoint returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Orchestrator errors
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Operation not valid in phase {phase}: {operation}")]
    InvalidPhase { phase: String, operation: String },

    #[error("A phase is already running")]
    Busy,

    #[error("No draft for round {round}")]
    MissingDraft { round: u32 },

    #[error("No revision brief for round {round}")]
    MissingSummary { round: u32 },

    #[error("Session has no experts")]
    NoExperts,

    #[error("Invalid choice: {message}")]
    InvalidChoice { message: String },

    #[error("Workflow cancelled")]
    Cancelled,

    #[error(transparent)]
    Llm(LlmError),
}

impl WorkflowError {
    /// True when the failure is a cancellation rather than a real error.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, WorkflowError::Cancelled)
    }
}

impl From<LlmError> for WorkflowError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Cancelled => WorkflowError::Cancelled,
            other => WorkflowError::Llm(other),
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for generation calls
pub type LlmResult<T> = Result<T, LlmError>;

/// Result type alias for embedding and rerank calls
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// Result type alias for memory store operations
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Result type alias for archive operations
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Result type alias for orchestrator operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;
