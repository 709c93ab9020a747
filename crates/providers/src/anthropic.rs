//! Anthropic Messages API adapter.
//!
//! Differences from the OpenAI-style dialect that this adapter absorbs:
//! - `x-api-key` + `anthropic-version` headers instead of a Bearer token
//! - system prompt as a top-level field; a `system` role inside the message
//!   array is rejected by the API
//! - typed stream events (`content_block_start` / `content_block_delta` /
//!   `content_block_stop` / `message_delta` / `message_stop`)
//! - tool-use input JSON arriving as `partial_json` fragments per block
//!   index that only parse once fully concatenated

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use overture_core::error::ProviderError;
use overture_core::message::{ChatMessage, ChatToolCall, Role};
use overture_core::provider::{ChatEvent, ChatOptions, ChatProvider, ToolDefinition};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_READ_DEADLINE: Duration = Duration::from_secs(300);

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
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

    /// Split system messages out of the list; this vendor carries them as a
    /// top-level field and forbids them in the message array.
    fn extract_system(messages: &[ChatMessage]) -> (Option<String>, Vec<&ChatMessage>) {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut non_system: Vec<&ChatMessage> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => system_parts.push(&msg.content),
                _ => non_system.push(msg),
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        (system, non_system)
    }

    /// Render the non-system messages as content blocks.
    fn to_api_messages(messages: &[&ChatMessage]) -> Vec<WireMessage> {
        let mut result = Vec::new();

        for msg in messages {
            match msg.role {
                Role::User => {
                    result.push(WireMessage {
                        role: "user".into(),
                        content: WireContent::Text(msg.content.clone()),
                    });
                }
                Role::Assistant => {
                    if msg.tool_calls.is_empty() {
                        result.push(WireMessage {
                            role: "assistant".into(),
                            content: WireContent::Text(msg.content.clone()),
                        });
                    } else {
                        let mut blocks: Vec<ContentBlock> = Vec::new();
                        if !msg.content.is_empty() {
                            blocks.push(ContentBlock::Text {
                                text: msg.content.clone(),
                            });
                        }
                        for tc in &msg.tool_calls {
                            // Malformed argument strings must not fail the
                            // whole request; an empty object stands in.
                            let input: serde_json::Value = serde_json::from_str(&tc.arguments)
                                .unwrap_or_else(|_| serde_json::json!({}));
                            blocks.push(ContentBlock::ToolUse {
                                id: tc.id.clone(),
                                name: tc.name.clone(),
                                input,
                            });
                        }
                        result.push(WireMessage {
                            role: "assistant".into(),
                            content: WireContent::Blocks(blocks),
                        });
                    }
                }
                Role::Tool => {
                    let tool_use_id = msg.tool_call_id.clone().unwrap_or_default();
                    result.push(WireMessage {
                        role: "user".into(),
                        content: WireContent::Blocks(vec![ContentBlock::ToolResult {
                            tool_use_id,
                            content: msg.content.clone(),
                        }]),
                    });
                }
                Role::System => {} // hoisted above
            }
        }

        result
    }

    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<WireTool> {
        tools
            .iter()
            .map(|t| WireTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn stream_chat(
        &self,
        messages: Vec<ChatMessage>,
        options: ChatOptions,
    ) -> Result<mpsc::Receiver<ChatEvent>, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let (system, non_system) = Self::extract_system(&messages);
        let api_messages = Self::to_api_messages(&non_system);

        let mut body = serde_json::json!({
            "model": options.model,
            "messages": api_messages,
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
            "stream": true,
        });

        if let Some(ref sys) = system {
            body["system"] = serde_json::json!(sys);
        }

        if !options.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&options.tools));
        }

        debug!(model = %options.model, "Opening Anthropic stream");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status().as_u16();

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid Anthropic API key".into(),
            ));
        }
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Anthropic API error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let (tx, rx) = mpsc::channel(64);

        // Sole owner of `tx`; the channel closes exactly once when this task
        // returns, on every path.
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();

            let mut blocks = BlockAccumulator::new();
            let mut input_tokens: u32 = 0;
            let mut output_tokens: u32 = 0;

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

                    if line.is_empty() || line.starts_with(':') || line.starts_with("event: ") {
                        continue;
                    }

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    let data = data.trim();
                    if data.is_empty() {
                        continue;
                    }

                    let event: serde_json::Value = match serde_json::from_str(data) {
                        Ok(v) => v,
                        Err(e) => {
                            trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                            continue;
                        }
                    };

                    match event["type"].as_str().unwrap_or("") {
                        "message_start" => {
                            if let Some(tokens) =
                                event["message"]["usage"]["input_tokens"].as_u64()
                            {
                                input_tokens = tokens as u32;
                            }
                        }
                        "content_block_start" => {
                            let index = event["index"].as_u64().unwrap_or(0);
                            let block = &event["content_block"];
                            if block["type"].as_str() == Some("tool_use") {
                                blocks.open(
                                    index,
                                    block["id"].as_str().unwrap_or(""),
                                    block["name"].as_str().unwrap_or(""),
                                );
                            }
                        }
                        "content_block_delta" => {
                            let index = event["index"].as_u64().unwrap_or(0);
                            let delta = &event["delta"];
                            match delta["type"].as_str().unwrap_or("") {
                                "text_delta" => {
                                    if let Some(text) = delta["text"].as_str() {
                                        if tx
                                            .send(ChatEvent::Token {
                                                content: text.to_string(),
                                            })
                                            .await
                                            .is_err()
                                        {
                                            return;
                                        }
                                    }
                                }
                                "input_json_delta" => {
                                    if let Some(partial) = delta["partial_json"].as_str() {
                                        blocks.append_input(index, partial);
                                    }
                                }
                                _ => {}
                            }
                        }
                        "message_delta" => {
                            if let Some(tokens) = event["usage"]["output_tokens"].as_u64() {
                                output_tokens = tokens as u32;
                            }
                        }
                        "message_stop" => {
                            let calls = blocks.flush();
                            if !calls.is_empty()
                                && tx.send(ChatEvent::ToolCall { calls }).await.is_err()
                            {
                                return;
                            }
                            let _ = tx
                                .send(ChatEvent::Done {
                                    tokens_used: input_tokens + output_tokens,
                                })
                                .await;
                            return;
                        }
                        _ => {}
                    }
                }
            }

            // Stream ended without message_stop; finish with what we have.
            let calls = blocks.flush();
            if !calls.is_empty() && tx.send(ChatEvent::ToolCall { calls }).await.is_err() {
                return;
            }
            let _ = tx
                .send(ChatEvent::Done {
                    tokens_used: input_tokens + output_tokens,
                })
                .await;
        });

        Ok(rx)
    }
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

/// Accumulates `tool_use` blocks keyed by stream index, preserving
/// first-seen order for the flush — argument JSON only becomes valid once
/// every `partial_json` fragment for a block has been concatenated.
struct BlockAccumulator {
    blocks: Vec<ToolUseBlock>,
}

struct ToolUseBlock {
    index: u64,
    id: String,
    name: String,
    input_json: String,
}

impl BlockAccumulator {
    fn new() -> Self {
        Self { blocks: Vec::new() }
    }

    fn open(&mut self, index: u64, id: &str, name: &str) {
        self.blocks.push(ToolUseBlock {
            index,
            id: id.to_string(),
            name: name.to_string(),
            input_json: String::new(),
        });
    }

    fn append_input(&mut self, index: u64, partial: &str) {
        if let Some(block) = self.blocks.iter_mut().find(|b| b.index == index) {
            block.input_json.push_str(partial);
        }
    }

    fn flush(&mut self) -> Vec<ChatToolCall> {
        std::mem::take(&mut self.blocks)
            .into_iter()
            .map(|b| ChatToolCall {
                id: b.id,
                name: b.name,
                arguments: if b.input_json.is_empty() {
                    "{}".to_string()
                } else {
                    b.input_json
                },
            })
            .collect()
    }
}

// --- Wire types ---

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: WireContent,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct WireTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}
