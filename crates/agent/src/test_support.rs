//! Shared test doubles for turn-engine tests.
//!
//! Every collaborator seam gets a scriptable stand-in here: a scripted
//! provider, an in-memory repository, a recording sink, a static prompt
//! builder, stub tools, and a static permission checker.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

use overture_core::error::{ProviderError, RepoError, ToolError};
use overture_core::message::{ChatMessage, ChatToolCall};
use overture_core::prompt::SystemPromptBuilder;
use overture_core::provider::{
    ChatEvent, ChatOptions, ChatProvider, LlmConnection, ProviderFactory,
};
use overture_core::repo::{Conversation, ConversationRepository, StoredMessage};
use overture_core::tool::{AccessClass, PermissionChecker, Tool, ToolResult};

use crate::stream_event::{EventSink, TurnEvent};

/// A provider that replays scripted event rounds, one per round-trip.
///
/// Panics when called more times than it has rounds — unless constructed
/// with `looping`, in which case every call replays the same round (useful
/// for iteration-limit tests).
pub struct ScriptedProvider {
    rounds: Mutex<VecDeque<Vec<ChatEvent>>>,
    looping: Option<Vec<ChatEvent>>,
    calls: AtomicU32,
}

impl ScriptedProvider {
    pub fn new(rounds: Vec<Vec<ChatEvent>>) -> Self {
        Self {
            rounds: Mutex::new(rounds.into()),
            looping: None,
            calls: AtomicU32::new(0),
        }
    }

    /// Replay the same round on every call, forever.
    pub fn looping(round: Vec<ChatEvent>) -> Self {
        Self {
            rounds: Mutex::new(VecDeque::new()),
            looping: Some(round),
            calls: AtomicU32::new(0),
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// A round that streams text chunks and finishes cleanly.
    pub fn text_round(chunks: &[&str], tokens_used: u32) -> Vec<ChatEvent> {
        let mut round: Vec<ChatEvent> = chunks
            .iter()
            .map(|c| ChatEvent::Token {
                content: (*c).to_string(),
            })
            .collect();
        round.push(ChatEvent::Done { tokens_used });
        round
    }

    /// A round that requests tool calls and finishes cleanly.
    pub fn tool_round(calls: Vec<ChatToolCall>, tokens_used: u32) -> Vec<ChatEvent> {
        vec![
            ChatEvent::ToolCall { calls },
            ChatEvent::Done { tokens_used },
        ]
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream_chat(
        &self,
        _messages: Vec<ChatMessage>,
        _options: ChatOptions,
    ) -> Result<mpsc::Receiver<ChatEvent>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let round = if let Some(ref repeated) = self.looping {
            repeated.clone()
        } else {
            self.rounds
                .lock()
                .unwrap()
                .pop_front()
                .expect("ScriptedProvider: no more rounds scripted")
        };

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for event in round {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }
}

/// A factory that hands out one pre-built provider regardless of connection.
pub struct StaticFactory {
    provider: Arc<dyn ChatProvider>,
}

impl StaticFactory {
    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        Self { provider }
    }
}

impl ProviderFactory for StaticFactory {
    fn create(&self, _connection: &LlmConnection) -> Result<Arc<dyn ChatProvider>, ProviderError> {
        Ok(self.provider.clone())
    }
}

/// An in-memory conversation store.
pub struct InMemoryRepository {
    conversations: Mutex<HashMap<String, Conversation>>,
    messages: Mutex<Vec<StoredMessage>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            conversations: Mutex::new(HashMap::new()),
            messages: Mutex::new(Vec::new()),
        }
    }

    /// Insert a fresh conversation and return it.
    pub fn seed_conversation(&self, user_id: &str, tenant_id: &str) -> Conversation {
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            tenant_id: tenant_id.to_string(),
            created_at: now,
            last_activity_at: now,
        };
        self.conversations
            .lock()
            .unwrap()
            .insert(conversation.id.clone(), conversation.clone());
        conversation
    }

    pub fn messages_for(&self, conversation_id: &str) -> Vec<StoredMessage> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    pub fn last_activity(&self, conversation_id: &str) -> Option<DateTime<Utc>> {
        self.conversations
            .lock()
            .unwrap()
            .get(conversation_id)
            .map(|c| c.last_activity_at)
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationRepository for InMemoryRepository {
    async fn find(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Option<Conversation>, RepoError> {
        Ok(self
            .conversations
            .lock()
            .unwrap()
            .get(conversation_id)
            .filter(|c| c.user_id == user_id)
            .cloned())
    }

    async fn history(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, RepoError> {
        Ok(self.messages_for(conversation_id))
    }

    async fn append_message(&self, message: &StoredMessage) -> Result<(), RepoError> {
        self.messages.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn touch(&self, conversation_id: &str, at: DateTime<Utc>) -> Result<(), RepoError> {
        if let Some(c) = self.conversations.lock().unwrap().get_mut(conversation_id) {
            c.last_activity_at = at;
        }
        Ok(())
    }
}

/// A sink that records every event it sees.
pub struct RecordingSink {
    events: Mutex<Vec<TurnEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<TurnEvent> {
        self.events.lock().unwrap().clone()
    }

    /// The sequence of event type names, for order assertions.
    pub fn event_types(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.event_type())
            .collect()
    }
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn emit(&self, event: TurnEvent) -> std::io::Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// A prompt builder that returns a fixed prompt unless overridden.
pub struct StaticPromptBuilder {
    prompt: String,
}

impl StaticPromptBuilder {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }
}

impl SystemPromptBuilder for StaticPromptBuilder {
    fn build(&self, _tenant_id: &str, _user_role: &str, override_prompt: Option<&str>) -> String {
        override_prompt.unwrap_or(&self.prompt).to_string()
    }
}

/// A permission checker with a fixed grant set. `allow_all` grants
/// everything.
pub struct StaticPermissions {
    granted: Option<Vec<String>>,
}

impl StaticPermissions {
    pub fn allow_all() -> Self {
        Self { granted: None }
    }

    pub fn granting(permissions: &[&str]) -> Self {
        Self {
            granted: Some(permissions.iter().map(|p| p.to_string()).collect()),
        }
    }
}

impl PermissionChecker for StaticPermissions {
    fn has_permission(&self, permission: &str) -> bool {
        match &self.granted {
            None => true,
            Some(granted) => granted.iter().any(|g| g == permission),
        }
    }
}

/// A tool with a canned response and an observable invocation counter.
pub struct StubTool {
    name: String,
    class: AccessClass,
    permission: String,
    response: String,
    fails: bool,
    invocations: Arc<AtomicU32>,
}

impl StubTool {
    pub fn new(name: &str, class: AccessClass) -> Self {
        Self {
            name: name.to_string(),
            class,
            permission: format!("tools.{name}"),
            response: "ok".to_string(),
            fails: false,
            invocations: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = response.into();
        self
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permission = permission.into();
        self
    }

    /// Make every execution report failure.
    pub fn failing(mut self) -> Self {
        self.fails = true;
        self
    }

    /// Handle for asserting how many times this tool actually executed.
    pub fn invocation_counter(&self) -> Arc<AtomicU32> {
        self.invocations.clone()
    }
}

#[async_trait]
impl Tool for StubTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "A stub tool for tests"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    fn access_class(&self) -> AccessClass {
        self.class
    }

    fn permission(&self) -> &str {
        &self.permission
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if self.fails {
            Ok(ToolResult::failure(self.response.clone()))
        } else {
            Ok(ToolResult::ok(self.response.clone()))
        }
    }
}
