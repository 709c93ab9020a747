//! Token budget policy for context assembly.
//!
//! Uses a character-based heuristic: ~4 characters per token, accurate
//! within ~10% for BPE tokenizers on English text. A real tokenizer would
//! cost more than the precision is worth here.

use overture_core::message::ChatMessage;
use tracing::debug;

/// Estimate the token count for a string. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    (text.len() + 3) / 4
}

/// The history budget for one round-trip.
///
/// Context window minus the system prompt estimate minus the reply's token
/// allowance — floored at the reply allowance itself, so the model always
/// has room to answer even under a huge system prompt.
pub fn effective_budget(context_window: u32, system_prompt: &str, max_tokens: u32) -> usize {
    let window = context_window as usize;
    let reply = max_tokens as usize;
    let budget = window
        .saturating_sub(estimate_tokens(system_prompt))
        .saturating_sub(reply);
    budget.max(reply)
}

/// Trim history to the budget by dropping the oldest messages first.
///
/// The most recent message is never dropped, even if it alone exceeds the
/// budget.
pub fn fit_history(mut messages: Vec<ChatMessage>, budget: usize) -> Vec<ChatMessage> {
    let mut total: usize = messages.iter().map(|m| estimate_tokens(&m.content)).sum();
    let mut dropped = 0usize;

    while total > budget && messages.len() > 1 {
        let removed = messages.remove(0);
        total -= estimate_tokens(&removed.content);
        dropped += 1;
    }

    if dropped > 0 {
        debug!(dropped, remaining = messages.len(), budget, "Trimmed history to token budget");
    }

    messages
}
