//! Provider trait — the abstraction over streaming LLM backends.
//!
//! A `ChatProvider` opens one streaming request per round-trip and normalizes
//! whatever the vendor's wire protocol looks like into a single `ChatEvent`
//! stream. Consumers never learn which vendor produced an event.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::{ChatMessage, ChatToolCall};

/// A tool definition sent to the LLM so it knows what it may call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Per-round-trip request options.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    /// The model to use
    pub model: String,

    /// Maximum tokens the reply may spend
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,

    /// Tools the model may call; empty means the `tools` field is omitted
    /// from the upstream request entirely.
    pub tools: Vec<ToolDefinition>,
}

/// Resolved connection info for one turn, handed in by the caller.
#[derive(Debug, Clone)]
pub struct LlmConnection {
    /// Provider key ("openai", "anthropic", ...)
    pub provider: String,

    /// Base endpoint URL
    pub endpoint: String,

    /// API key for the vendor
    pub api_key: String,

    /// Model identifier
    pub model: String,

    /// Reply token allowance
    pub max_tokens: u32,

    /// Model context window in tokens
    pub context_window: u32,
}

impl LlmConnection {
    /// Endpoint sanity check: http(s) scheme, no embedded whitespace or
    /// control characters. Anything else is rejected before a request is
    /// ever built from it.
    pub fn endpoint_is_safe(&self) -> bool {
        let e = &self.endpoint;
        (e.starts_with("https://") || e.starts_with("http://"))
            && !e.chars().any(|c| c.is_whitespace() || c.is_control())
    }
}

/// The normalized output of any provider stream adapter.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// Partial text delta
    Token { content: String },

    /// Complete tool calls requested by the model, flushed together
    ToolCall { calls: Vec<ChatToolCall> },

    /// Stream finished normally
    Done { tokens_used: u32 },

    /// Stream failed after the request was accepted
    Error { cause: ProviderError },
}

/// The core provider trait.
///
/// `stream_chat` either fails immediately (bad request, auth, non-2xx) or
/// hands back a bounded channel fed by a background reader task. The reader
/// is the only owner of the sending side, so the channel closes exactly once
/// on every exit path; dropping the receiver cancels the upstream request.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider key, e.g. "openai" or "anthropic".
    fn name(&self) -> &str;

    /// Open one streaming round-trip.
    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        options: ChatOptions,
    ) -> Result<mpsc::Receiver<ChatEvent>, ProviderError>;
}

/// Builds a provider client from per-turn connection info.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, connection: &LlmConnection) -> Result<Arc<dyn ChatProvider>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(endpoint: &str) -> LlmConnection {
        LlmConnection {
            provider: "openai".into(),
            endpoint: endpoint.into(),
            api_key: "sk-test".into(),
            model: "gpt-4o".into(),
            max_tokens: 4096,
            context_window: 128_000,
        }
    }

    #[test]
    fn https_endpoint_is_safe() {
        assert!(connection("https://api.openai.com/v1").endpoint_is_safe());
    }

    #[test]
    fn plain_http_is_allowed_for_local_endpoints() {
        assert!(connection("http://localhost:11434/v1").endpoint_is_safe());
    }

    #[test]
    fn non_http_scheme_is_rejected() {
        assert!(!connection("ftp://example.com").endpoint_is_safe());
        assert!(!connection("file:///etc/passwd").endpoint_is_safe());
    }

    #[test]
    fn whitespace_in_endpoint_is_rejected() {
        assert!(!connection("https://api.example.com/v1 extra").endpoint_is_safe());
        assert!(!connection("https://api.example.com/\nv1").endpoint_is_safe());
    }

    #[test]
    fn tool_definition_serialization() {
        let tool = ToolDefinition {
            name: "list_applications".into(),
            description: "List the tenant's applications".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "status": { "type": "string" } }
            }),
        };
        let json = serde_json::to_string(&tool).unwrap();
        assert!(json.contains("list_applications"));
        assert!(json.contains("properties"));
    }
}
