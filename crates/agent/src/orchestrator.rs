//! The conversation turn orchestrator.
//!
//! One call to `send_message` owns the entire lifetime of one user message:
//! validation, context assembly, zero or more provider round-trips with tool
//! governance in between, and finalization. The turn either completes (the
//! assistant message is persisted and `done` is emitted) or fails with a
//! typed `TurnError` the handler turns into a client-visible error event.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use overture_config::{AppConfig, ToolCapsConfig, TurnConfig};
use overture_core::error::TurnError;
use overture_core::message::{ChatMessage, ChatToolCall, Role};
use overture_core::prompt::SystemPromptBuilder;
use overture_core::provider::{ChatEvent, ChatOptions, LlmConnection, ProviderFactory};
use overture_core::repo::{ConversationRepository, StoredMessage};
use overture_core::tool::{PermissionChecker, ToolRegistry};

use crate::budget::{effective_budget, fit_history};
use crate::governance::{Admission, ToolGovernor};
use crate::recovery;
use crate::stream_event::{EventSink, TurnEvent};

/// Result previews in tool events are clipped to roughly this many
/// characters.
const PREVIEW_CHARS: usize = 200;

/// Everything a turn needs, resolved by the caller.
pub struct TurnParams {
    pub conversation_id: String,
    pub user_id: String,
    pub tenant_id: String,
    pub user_role: String,
    pub message: String,
    pub system_prompt_override: Option<String>,
    pub connection: LlmConnection,

    /// Tool registry; tools are disabled for the turn when absent.
    pub tools: Option<Arc<ToolRegistry>>,

    /// Permission checker; tools are disabled for the turn when absent.
    pub permissions: Option<Arc<dyn PermissionChecker>>,
}

/// What a completed turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub message_id: String,
    pub tokens_used: u32,
    pub round_trips: u32,
}

/// The turn orchestrator. One instance serves many turns; all per-turn state
/// lives on the stack of `send_message`.
pub struct TurnOrchestrator {
    repo: Arc<dyn ConversationRepository>,
    prompts: Arc<dyn SystemPromptBuilder>,
    providers: Arc<dyn ProviderFactory>,
    turn: TurnConfig,
    caps: ToolCapsConfig,
}

impl TurnOrchestrator {
    pub fn new(
        repo: Arc<dyn ConversationRepository>,
        prompts: Arc<dyn SystemPromptBuilder>,
        providers: Arc<dyn ProviderFactory>,
        config: &AppConfig,
    ) -> Self {
        Self {
            repo,
            prompts,
            providers,
            turn: config.turn.clone(),
            caps: config.tool_caps.clone(),
        }
    }

    /// Run one turn, streaming events into `sink`.
    pub async fn send_message<S>(
        &self,
        params: TurnParams,
        sink: &S,
    ) -> Result<TurnOutcome, TurnError>
    where
        S: EventSink + ?Sized,
    {
        // ── Validate ──
        if !params.connection.endpoint_is_safe() {
            return Err(TurnError::Validation("unsafe provider endpoint".into()));
        }

        let conversation = self
            .repo
            .find(&params.conversation_id, &params.user_id)
            .await?
            .ok_or_else(|| TurnError::ConversationNotFound(params.conversation_id.clone()))?;

        let user_message =
            conversation.compose_user_message(&params.message, self.turn.max_message_chars)?;
        // The user message is durable before any network call is made.
        self.repo.append_message(&user_message).await?;

        info!(
            conversation_id = %conversation.id,
            user_id = %params.user_id,
            tenant_id = %params.tenant_id,
            "Turn started"
        );

        // ── BuildContext ──
        let system_prompt = self.prompts.build(
            &params.tenant_id,
            &params.user_role,
            params.system_prompt_override.as_deref(),
        );

        let history = self.repo.history(&conversation.id).await?;
        let history_messages: Vec<ChatMessage> = history
            .iter()
            .filter_map(stored_to_chat_message)
            .collect();

        let budget = effective_budget(
            params.connection.context_window,
            &system_prompt,
            params.connection.max_tokens,
        );
        let fitted = fit_history(history_messages, budget);

        let mut messages = Vec::with_capacity(fitted.len() + 1);
        messages.push(ChatMessage::system(&system_prompt));
        messages.extend(fitted);

        // Tools are enabled only when both collaborators are present.
        let toolbox: Option<(Arc<ToolRegistry>, Arc<dyn PermissionChecker>)> =
            match (&params.tools, &params.permissions) {
                (Some(registry), Some(permissions)) => {
                    Some((registry.clone(), permissions.clone()))
                }
                _ => None,
            };
        let tool_definitions = toolbox
            .as_ref()
            .map(|(registry, _)| registry.definitions())
            .unwrap_or_default();
        let known_names = toolbox
            .as_ref()
            .map(|(registry, _)| registry.names())
            .unwrap_or_default();

        let provider = self
            .providers
            .create(&params.connection)
            .map_err(TurnError::from_provider)?;

        let mut governor = ToolGovernor::new(self.caps.clone());
        let mut round_trips: u32 = 0;

        // ── The agent loop ──
        loop {
            round_trips += 1;
            if round_trips > self.turn.max_iterations {
                warn!(
                    conversation_id = %conversation.id,
                    round_trips,
                    "Round-trip limit exceeded, aborting turn"
                );
                return Err(TurnError::IterationLimit(self.turn.max_iterations));
            }

            debug!(conversation_id = %conversation.id, round_trips, "Opening provider round-trip");

            let options = ChatOptions {
                model: params.connection.model.clone(),
                max_tokens: params.connection.max_tokens,
                temperature: self.turn.temperature,
                tools: tool_definitions.clone(),
            };

            let mut rx = provider
                .stream_chat(messages.clone(), options)
                .await
                .map_err(TurnError::from_provider)?;

            let mut text = String::new();
            let mut calls: Vec<ChatToolCall> = Vec::new();
            let mut tokens_used: u32 = 0;
            let mut stream_failure: Option<TurnError> = None;

            while let Some(event) = rx.recv().await {
                match event {
                    ChatEvent::Token { content } => {
                        text.push_str(&content);
                        if sink.emit(TurnEvent::Token { content }).await.is_err() {
                            // Client gone; dropping rx cancels the upstream
                            // read, and there is no one left to report to.
                            debug!(conversation_id = %conversation.id, "Client disconnected mid-stream");
                            return Err(TurnError::Llm("client disconnected mid-stream".into()));
                        }
                    }
                    ChatEvent::ToolCall { calls: native } => calls.extend(native),
                    ChatEvent::Done { tokens_used: total } => tokens_used = total,
                    ChatEvent::Error { cause } => {
                        stream_failure = Some(TurnError::from_provider(cause));
                        break;
                    }
                }
            }
            drop(rx);

            if let Some(err) = stream_failure {
                // Tokens already shown to the client are never retracted;
                // persist whatever partial answer was streamed before
                // surfacing the error.
                if !text.is_empty() {
                    let partial = conversation.compose_assistant_message(&text, tokens_used);
                    self.repo.append_message(&partial).await?;
                }
                return Err(err);
            }

            // ── Recovery: tool syntax hallucinated into plain text ──
            if calls.is_empty() && !known_names.is_empty() {
                let (recovered, cleaned) = recovery::parse(&text, &known_names);
                if !recovered.is_empty() {
                    info!(
                        conversation_id = %conversation.id,
                        recovered = recovered.len(),
                        "Recovered tool calls from assistant text"
                    );
                    text = cleaned;
                    calls = recovered;
                }
            }

            // ── Finalize ──
            if calls.is_empty() {
                let assistant = conversation.compose_assistant_message(&text, tokens_used);
                self.repo.append_message(&assistant).await?;
                self.repo.touch(&conversation.id, Utc::now()).await?;

                let _ = sink
                    .emit(TurnEvent::Done {
                        message_id: assistant.id.clone(),
                        tokens_used,
                    })
                    .await;

                info!(
                    conversation_id = %conversation.id,
                    message_id = %assistant.id,
                    tokens_used,
                    round_trips,
                    "Turn completed"
                );

                return Ok(TurnOutcome {
                    message_id: assistant.id,
                    tokens_used,
                    round_trips,
                });
            }

            // ── GovernAndExecuteTools ──
            let _ = sink
                .emit(TurnEvent::Thinking {
                    content: format!("Running {} tool call(s)", calls.len()),
                })
                .await;

            let mut results: Vec<(ChatToolCall, String)> = Vec::with_capacity(calls.len());
            for call in &calls {
                let _ = sink
                    .emit(TurnEvent::ToolCallStart {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    })
                    .await;

                let output = self.dispatch_tool(&toolbox, &mut governor, call).await;

                let _ = sink
                    .emit(TurnEvent::ToolCallResult {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        result_preview: preview(&output),
                    })
                    .await;

                results.push((call.clone(), output));
            }

            // ── AppendToolResults, then loop ──
            messages.push(ChatMessage::assistant_with_calls(text, calls.clone()));
            for (call, output) in results {
                messages.push(ChatMessage::tool_result(call.id, call.name, output));
            }
        }
    }

    /// Resolve, authorize, govern, and execute one tool call. Failures come
    /// back as `Error: ...` text fed to the model, never as turn errors.
    async fn dispatch_tool(
        &self,
        toolbox: &Option<(Arc<ToolRegistry>, Arc<dyn PermissionChecker>)>,
        governor: &mut ToolGovernor,
        call: &ChatToolCall,
    ) -> String {
        let Some((registry, permissions)) = toolbox else {
            return "Error: tool execution is not available".into();
        };

        let Some(tool) = registry.get(&call.name) else {
            warn!(tool = %call.name, "Model requested unknown tool");
            return format!("Error: unknown tool '{}'", call.name);
        };

        if !permissions.has_permission(tool.permission()) {
            warn!(tool = %call.name, permission = %tool.permission(), "Tool call denied by permissions");
            return format!("Error: permission denied for tool '{}'", call.name);
        }

        match governor.admit(&call.name, tool.access_class()) {
            Admission::OverCap { cap } => {
                warn!(tool = %call.name, cap, "Per-turn tool call cap exhausted");
                return format!(
                    "Error: call limit exceeded for tool '{}' ({cap} calls per turn)",
                    call.name
                );
            }
            Admission::Allowed => {}
        }

        let arguments: serde_json::Value =
            serde_json::from_str(&call.arguments).unwrap_or_else(|_| serde_json::json!({}));

        match tool.execute(arguments).await {
            Ok(result) if result.success => result.content,
            Ok(result) => format!("Error: {}", result.content),
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool execution failed");
                format!("Error: {e}")
            }
        }
    }
}

/// Convert a stored message for the provider context. Tool traffic is not
/// persisted by this engine, so only the conversational roles survive.
fn stored_to_chat_message(stored: &StoredMessage) -> Option<ChatMessage> {
    match stored.role {
        Role::User => Some(ChatMessage::user(&stored.content)),
        Role::Assistant => Some(ChatMessage::assistant(&stored.content)),
        Role::System => Some(ChatMessage::system(&stored.content)),
        Role::Tool => None,
    }
}

/// Clip a tool result for the client-facing event.
fn preview(content: &str) -> String {
    let mut clipped: String = content.chars().take(PREVIEW_CHARS).collect();
    if clipped.len() < content.len() {
        clipped.push('…');
    }
    clipped
}
