//! Client-facing streaming events.
//!
//! `TurnEvent` is what the orchestrator writes to its output sink; the
//! gateway serializes each one as an SSE frame whose event name comes from
//! `event_type()`. Field names are part of the client contract — `done` and
//! `tool_call_result` use camelCase keys.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Events emitted over the lifetime of one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Partial text token from the LLM.
    Token { content: String },

    /// A tool call is about to be dispatched.
    ToolCallStart {
        id: String,
        name: String,
        arguments: String,
    },

    /// A tool call finished (or was rejected); the preview is truncated.
    #[serde(rename_all = "camelCase")]
    ToolCallResult {
        id: String,
        name: String,
        result_preview: String,
    },

    /// Short human-readable status while a tool round-trip runs.
    Thinking { content: String },

    /// The turn completed; the assistant message is persisted.
    #[serde(rename_all = "camelCase")]
    Done { message_id: String, tokens_used: u32 },

    /// The turn failed. `code` is one of `iteration_limit`, `timeout`,
    /// `validation_error`, `llm_error`.
    Error { code: String, message: String },

    /// Keep-alive frame, empty payload.
    Ping,
}

impl TurnEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Token { .. } => "token",
            Self::ToolCallStart { .. } => "tool_call_start",
            Self::ToolCallResult { .. } => "tool_call_result",
            Self::Thinking { .. } => "thinking",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
            Self::Ping => "ping",
        }
    }
}

/// The output sink a turn writes to.
///
/// A write error means the client is gone; the orchestrator stops relaying
/// rather than retrying, and nothing already sent is retracted.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: TurnEvent) -> std::io::Result<()>;
}
