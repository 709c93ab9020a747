//! System-prompt building seam.
//!
//! The actual template content lives in the host application; the turn
//! engine only supplies the inputs and prepends whatever comes back.

/// Builds the system prompt for one turn.
pub trait SystemPromptBuilder: Send + Sync {
    /// Build the final prompt string from the tenant, the caller's role,
    /// and an optional per-tenant override.
    fn build(&self, tenant_id: &str, user_role: &str, override_prompt: Option<&str>) -> String;
}
