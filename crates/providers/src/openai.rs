//! OpenAI-style chat completions adapter.
//!
//! Works with OpenAI and the many endpoints that speak its
//! `/chat/completions` dialect. Streaming responses arrive as SSE `data:`
//! lines carrying JSON chunks; tool-call arguments arrive as incremental
//! fragments keyed by call index and only become valid JSON once the stream
//! finishes.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use overture_core::error::ProviderError;
use overture_core::message::{ChatMessage, ChatToolCall, Role};
use overture_core::provider::{ChatEvent, ChatOptions, ChatProvider, ToolDefinition};

const DEFAULT_READ_DEADLINE: Duration = Duration::from_secs(300);

/// An OpenAI-compatible streaming chat provider.
pub struct OpenAiProvider {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    /// Create a new adapter for the given endpoint.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_read_deadline(base_url, api_key, DEFAULT_READ_DEADLINE)
    }

    /// Create an adapter with a custom stream read deadline.
    pub fn with_read_deadline(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        deadline: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(deadline)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Render the internal message list into this vendor's wire shape.
    /// System messages stay inline with role "system".
    fn to_api_messages(messages: &[ChatMessage]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                    Role::Tool => "tool".into(),
                },
                content: Some(m.content.clone()),
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: sanitize_arguments(&tc.arguments),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }
}

/// A non-JSON argument string would fail the whole upstream request, so it
/// is replaced with an empty object instead.
fn sanitize_arguments(raw: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(_) => raw.to_string(),
        Err(_) => "{}".to_string(),
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        options: ChatOptions,
    ) -> Result<mpsc::Receiver<ChatEvent>, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = serde_json::json!({
            "model": options.model,
            "messages": Self::to_api_messages(&messages),
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if !options.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&options.tools));
        }

        debug!(model = %options.model, "Opening OpenAI-style stream");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status().as_u16();

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "OpenAI-style endpoint returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let (tx, rx) = mpsc::channel(64);

        // The reader task is the sole owner of `tx`; every exit path drops
        // it exactly once, which is what closes the channel.
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();

            // Tool-call fragments keyed by call index; BTreeMap keeps the
            // flush order deterministic.
            let mut call_builders: BTreeMap<u32, CallBuilder> = BTreeMap::new();
            let mut tokens_used: u32 = 0;

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(ChatEvent::Error {
                                cause: classify_transport_error(e),
                            })
                            .await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim_end_matches('\r').to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    let data = data.trim();

                    if data == "[DONE]" {
                        flush_and_finish(&tx, &mut call_builders, tokens_used).await;
                        return;
                    }

                    let chunk: ChunkPayload = match serde_json::from_str(data) {
                        Ok(c) => c,
                        Err(e) => {
                            trace!(error = %e, data = %data, "Ignoring unparseable SSE chunk");
                            continue;
                        }
                    };

                    if let Some(usage) = chunk.usage {
                        tokens_used = usage.total_tokens;
                    }

                    if let Some(choice) = chunk.choices.first() {
                        if let Some(ref deltas) = choice.delta.tool_calls {
                            for delta in deltas {
                                let builder = call_builders.entry(delta.index).or_default();
                                if let Some(ref id) = delta.id {
                                    builder.id = id.clone();
                                }
                                if let Some(ref func) = delta.function {
                                    if let Some(ref name) = func.name {
                                        builder.name = name.clone();
                                    }
                                    if let Some(ref args) = func.arguments {
                                        builder.arguments.push_str(args);
                                    }
                                }
                            }
                        }

                        if let Some(ref content) = choice.delta.content {
                            if !content.is_empty()
                                && tx
                                    .send(ChatEvent::Token {
                                        content: content.clone(),
                                    })
                                    .await
                                    .is_err()
                            {
                                // Receiver gone — the turn was canceled.
                                return;
                            }
                        }
                    }
                }
            }

            // Stream ended without the [DONE] sentinel; finish gracefully.
            flush_and_finish(&tx, &mut call_builders, tokens_used).await;
        });

        Ok(rx)
    }
}

async fn flush_and_finish(
    tx: &mpsc::Sender<ChatEvent>,
    call_builders: &mut BTreeMap<u32, CallBuilder>,
    tokens_used: u32,
) {
    let calls: Vec<ChatToolCall> = std::mem::take(call_builders)
        .into_values()
        .map(CallBuilder::build)
        .collect();

    if !calls.is_empty() && tx.send(ChatEvent::ToolCall { calls }).await.is_err() {
        return;
    }
    let _ = tx.send(ChatEvent::Done { tokens_used }).await;
}

fn classify_transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else if e.is_connect() {
        ProviderError::Network(e.to_string())
    } else {
        ProviderError::StreamInterrupted(e.to_string())
    }
}

// --- Wire types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<ChunkUsage>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
    #[serde(default)]
    #[allow(dead_code)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

/// A tool call delta — arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkUsage {
    #[allow(dead_code)]
    #[serde(default)]
    prompt_tokens: u32,
    #[allow(dead_code)]
    #[serde(default)]
    completion_tokens: u32,
    total_tokens: u32,
}

/// Accumulates incremental tool-call deltas into a complete call.
#[derive(Debug, Default)]
struct CallBuilder {
    id: String,
    name: String,
    arguments: String,
}

impl CallBuilder {
    fn build(self) -> ChatToolCall {
        ChatToolCall {
            id: self.id,
            name: self.name,
            arguments: self.arguments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let provider = OpenAiProvider::new("https://api.openai.com/v1/", "sk-test");
        assert_eq!(provider.base_url, "https://api.openai.com/v1");
    }

    #[test]
    fn system_messages_stay_inline() {
        let messages = vec![
            ChatMessage::system("You are helpful"),
            ChatMessage::user("Hello"),
        ];
        let api = OpenAiProvider::to_api_messages(&messages);
        assert_eq!(api.len(), 2);
        assert_eq!(api[0].role, "system");
        assert_eq!(api[1].role, "user");
    }

    #[test]
    fn assistant_tool_calls_render_as_function_calls() {
        let msg = ChatMessage::assistant_with_calls(
            "",
            vec![ChatToolCall {
                id: "call_1".into(),
                name: "list_applications".into(),
                arguments: r#"{"status":"active"}"#.into(),
            }],
        );
        let api = OpenAiProvider::to_api_messages(&[msg]);
        let calls = api[0].tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].r#type, "function");
        assert_eq!(calls[0].function.name, "list_applications");
        assert_eq!(calls[0].function.arguments, r#"{"status":"active"}"#);
    }

    #[test]
    fn malformed_arguments_become_empty_object() {
        let msg = ChatMessage::assistant_with_calls(
            "",
            vec![ChatToolCall {
                id: "call_1".into(),
                name: "update_record".into(),
                arguments: "not json at all".into(),
            }],
        );
        let api = OpenAiProvider::to_api_messages(&[msg]);
        assert_eq!(api[0].tool_calls.as_ref().unwrap()[0].function.arguments, "{}");
    }

    #[test]
    fn tool_role_messages_carry_call_id() {
        let msg = ChatMessage::tool_result("call_9", "web_search", "results here");
        let api = OpenAiProvider::to_api_messages(&[msg]);
        assert_eq!(api[0].role, "tool");
        assert_eq!(api[0].tool_call_id.as_deref(), Some("call_9"));
    }

    #[test]
    fn parse_content_delta_chunk() {
        let data = r#"{"choices":[{"delta":{"content":"Hello"},"finish_reason":null}]}"#;
        let parsed: ChunkPayload = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.choices[0].delta.content.as_deref(), Some("Hello"));
    }

    #[test]
    fn parse_tool_call_delta_chunk() {
        let data = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_abc","function":{"name":"lookup","arguments":""}}]},"finish_reason":null}]}"#;
        let parsed: ChunkPayload = serde_json::from_str(data).unwrap();
        let delta = &parsed.choices[0].delta.tool_calls.as_ref().unwrap()[0];
        assert_eq!(delta.index, 0);
        assert_eq!(delta.id.as_deref(), Some("call_abc"));
    }

    #[test]
    fn parse_usage_chunk() {
        let data = r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15}}"#;
        let parsed: ChunkPayload = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn call_builder_assembles_fragmented_arguments() {
        let mut builder = CallBuilder::default();
        builder.id = "call_5".into();
        builder.name = "search".into();
        builder.arguments.push_str("{\"query\"");
        builder.arguments.push_str(": \"rust\"}");

        let call = builder.build();
        assert_eq!(call.id, "call_5");
        assert_eq!(call.arguments, "{\"query\": \"rust\"}");
    }

    #[tokio::test]
    async fn flush_emits_calls_in_index_order() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut builders = BTreeMap::new();
        builders.insert(
            1,
            CallBuilder {
                id: "b".into(),
                name: "second".into(),
                arguments: "{}".into(),
            },
        );
        builders.insert(
            0,
            CallBuilder {
                id: "a".into(),
                name: "first".into(),
                arguments: "{}".into(),
            },
        );

        flush_and_finish(&tx, &mut builders, 42).await;
        drop(tx);

        match rx.recv().await.unwrap() {
            ChatEvent::ToolCall { calls } => {
                assert_eq!(calls[0].name, "first");
                assert_eq!(calls[1].name, "second");
            }
            other => panic!("expected ToolCall, got {other:?}"),
        }
        match rx.recv().await.unwrap() {
            ChatEvent::Done { tokens_used } => assert_eq!(tokens_used, 42),
            other => panic!("expected Done, got {other:?}"),
        }
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn flush_without_calls_emits_done_only() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut builders = BTreeMap::new();
        flush_and_finish(&tx, &mut builders, 7).await;
        drop(tx);

        assert!(matches!(
            rx.recv().await.unwrap(),
            ChatEvent::Done { tokens_used: 7 }
        ));
        assert!(rx.recv().await.is_none());
    }
}
