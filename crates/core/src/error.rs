//! Error types for the Overture turn engine.
//!
//! Uses `thiserror` for ergonomic error definitions. Each bounded context
//! has its own enum; `TurnError` is the only type a turn ever fails with,
//! and it knows how to render itself for clients without leaking upstream
//! detail.

use thiserror::Error;

/// Failures talking to an LLM provider.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
}

/// Failures executing a registered tool.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

/// Failures from the conversation repository collaborator.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Violations of the conversation aggregate's content rules.
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("message content is empty")]
    Empty,

    #[error("message content exceeds {max} characters (got {actual})")]
    Oversized { max: usize, actual: usize },

    #[error("message content contains control characters")]
    ControlCharacters,
}

/// The only error a turn terminates with.
///
/// `client_code` / `client_message` produce what clients are allowed to see;
/// `Display` keeps the internal detail for logs.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("provider stream timed out: {0}")]
    Timeout(String),

    #[error("provider failure: {0}")]
    Llm(String),

    #[error("tool round-trip limit of {0} exceeded")]
    IterationLimit(u32),

    #[error(transparent)]
    Repository(#[from] RepoError),
}

impl TurnError {
    /// Stable machine-readable code for the client-facing error event.
    pub fn client_code(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::ConversationNotFound(_) => "validation_error",
            Self::Timeout(_) => "timeout",
            Self::Llm(_) | Self::Repository(_) => "llm_error",
            Self::IterationLimit(_) => "iteration_limit",
        }
    }

    /// Human-readable message safe to show clients. Upstream provider text
    /// and storage internals never pass through here.
    pub fn client_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::ConversationNotFound(_) => "conversation not found".into(),
            Self::Timeout(_) => "the model took too long to respond; please try again".into(),
            Self::Llm(_) => "the language model request failed".into(),
            Self::Repository(_) => "an internal error occurred".into(),
            Self::IterationLimit(_) => {
                "the request required too many tool steps; try splitting it into smaller requests"
                    .into()
            }
        }
    }

    /// Classify a provider failure: timeouts stay distinct so clients can
    /// offer a retry; everything else collapses to a generic LLM failure.
    pub fn from_provider(err: ProviderError) -> Self {
        match err {
            ProviderError::Timeout(detail) => Self::Timeout(detail),
            other => Self::Llm(other.to_string()),
        }
    }
}

impl From<ContentError> for TurnError {
    fn from(err: ContentError) -> Self {
        Self::Validation(err.to_string())
    }
}
