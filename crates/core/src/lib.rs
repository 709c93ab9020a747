//! # Overture Core
//!
//! Domain types, traits, and error definitions for the Overture turn engine.
//! This crate has **zero framework dependencies** — it defines the contracts
//! that every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every collaborator of the turn engine is a trait here: the LLM provider,
//! the conversation repository, the tool registry, the permission checker,
//! and the system-prompt builder. Implementations live in their respective
//! crates (or in the host application), which keeps the dependency graph
//! pointing inward and makes every seam mockable in tests.

pub mod error;
pub mod message;
pub mod prompt;
pub mod provider;
pub mod repo;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{ContentError, ProviderError, RepoError, ToolError, TurnError};
pub use message::{ChatMessage, ChatToolCall, Role};
pub use prompt::SystemPromptBuilder;
pub use provider::{ChatEvent, ChatOptions, ChatProvider, LlmConnection, ProviderFactory, ToolDefinition};
pub use repo::{Conversation, ConversationRepository, StoredMessage};
pub use tool::{AccessClass, PermissionChecker, Tool, ToolRegistry, ToolResult};
