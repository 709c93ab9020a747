//! Conversation persistence seam.
//!
//! Conversations and their messages are owned by an external storage layer;
//! the turn engine borrows them, appends in memory, and hands them back to
//! the repository for the actual write. Content rules live on the aggregate
//! so every write path validates the same way.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ContentError, RepoError};
use crate::message::Role;

/// A conversation header, as loaded from storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub tenant_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Conversation {
    /// Compose a user message for this conversation, applying the content
    /// rules: non-empty, bounded size, no control characters (newlines and
    /// tabs excepted).
    pub fn compose_user_message(
        &self,
        content: &str,
        max_chars: usize,
    ) -> Result<StoredMessage, ContentError> {
        validate_content(content, max_chars)?;
        Ok(StoredMessage::new(&self.id, Role::User, content, None))
    }

    /// Compose the assistant reply, carrying its token usage.
    pub fn compose_assistant_message(&self, content: &str, tokens_used: u32) -> StoredMessage {
        StoredMessage::new(&self.id, Role::Assistant, content, Some(tokens_used))
    }
}

fn validate_content(content: &str, max_chars: usize) -> Result<(), ContentError> {
    if content.trim().is_empty() {
        return Err(ContentError::Empty);
    }
    let len = content.chars().count();
    if len > max_chars {
        return Err(ContentError::Oversized {
            max: max_chars,
            actual: len,
        });
    }
    if content
        .chars()
        .any(|c| c.is_control() && c != '\n' && c != '\r' && c != '\t')
    {
        return Err(ContentError::ControlCharacters);
    }
    Ok(())
}

/// A persisted message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,

    /// Total tokens spent producing this message (assistant messages only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,

    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    fn new(
        conversation_id: &str,
        role: Role,
        content: &str,
        tokens_used: Option<u32>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            tokens_used,
            created_at: Utc::now(),
        }
    }
}

/// Storage collaborator. Implementations live outside this core.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Load a conversation by id, scoped to its owner.
    async fn find(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<Option<Conversation>, RepoError>;

    /// Load the ordered message history of a conversation.
    async fn history(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, RepoError>;

    /// Append one message.
    async fn append_message(&self, message: &StoredMessage) -> Result<(), RepoError>;

    /// Mark the conversation's last activity.
    async fn touch(&self, conversation_id: &str, at: DateTime<Utc>) -> Result<(), RepoError>;
}
