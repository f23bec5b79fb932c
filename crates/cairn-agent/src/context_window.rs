//! Context window budgeting.
//!
//! History is trimmed by dropping whole units from the front:
//!
//! - a user message, the assistant reply right after it, and that reply's
//!   tool results;
//! - an assistant message that does not directly follow a user message,
//!   with its tool results.
//!
//! System messages are never dropped, and a tool call is never separated
//! from its result.

use cairn_ai::{Content, Message, ModelConfig, Tool};

/// Rough per-message framing cost in tokens
const MESSAGE_OVERHEAD: u32 = 4;

/// Images are billed as a flat ~1200 tokens
const IMAGE_CHARS: usize = 4800;

/// Token budget for a model's input
#[derive(Debug, Clone, Copy)]
pub struct ContextWindow {
    context_size: u32,
    reserved: u32,
}

impl ContextWindow {
    /// Budget for a model: its context size minus the output and thinking
    /// reservations.
    pub fn for_model(config: &ModelConfig) -> Self {
        let context_size = cairn_ai::models::context_window(&config.model.id);
        let reserved = config.max_tokens + config.thinking.thinking_budget();
        Self {
            context_size,
            reserved,
        }
    }

    pub fn with_limits(context_size: u32, reserved: u32) -> Self {
        Self {
            context_size,
            reserved,
        }
    }

    /// Tokens available for system prompt, tool definitions and history
    pub fn budget(&self) -> u32 {
        self.context_size.saturating_sub(self.reserved)
    }

    /// Fit `history` into the budget. Returns the history to send and whether
    /// anything was dropped.
    pub fn prepare(
        &self,
        history: &[Message],
        system_prompt: &str,
        tools: &[Tool],
    ) -> (Vec<Message>, bool) {
        let budget = self.budget();
        let has_system = history.iter().any(Message::is_system);

        let mut fixed = estimate_tools(tools);
        if !has_system {
            fixed += estimate_text(system_prompt);
        }

        let costs: Vec<u32> = history.iter().map(estimate_tokens).collect();
        let mut total = fixed + costs.iter().sum::<u32>();
        if total <= budget {
            return (history.to_vec(), false);
        }

        let units = split_units(history);
        let mut dropped = vec![false; history.len()];
        let mut remaining = units.len();

        for unit in &units {
            if total <= budget || remaining <= 1 {
                break;
            }
            for &index in unit {
                dropped[index] = true;
                total -= costs[index];
            }
            remaining -= 1;
        }

        let kept: Vec<Message> = history
            .iter()
            .zip(&dropped)
            .filter(|(_, dropped)| !**dropped)
            .map(|(message, _)| message.clone())
            .collect();
        let truncated = kept.len() != history.len();

        if truncated {
            tracing::debug!(
                budget,
                estimated = total,
                dropped = history.len() - kept.len(),
                "dropped oldest turns to fit the context window"
            );
        }

        (kept, truncated)
    }
}

/// Group non-system message indices into droppable units, oldest first
fn split_units(history: &[Message]) -> Vec<Vec<usize>> {
    let indices: Vec<usize> = history
        .iter()
        .enumerate()
        .filter(|(_, m)| !m.is_system())
        .map(|(i, _)| i)
        .collect();

    let mut units = Vec::new();
    let mut pos = 0;
    while pos < indices.len() {
        let mut unit = vec![indices[pos]];
        let starts_with_user = matches!(history[indices[pos]], Message::User { .. });
        pos += 1;

        if starts_with_user
            && pos < indices.len()
            && matches!(history[indices[pos]], Message::Assistant { .. })
        {
            unit.push(indices[pos]);
            pos += 1;
        }

        let has_reply = matches!(history[unit[unit.len() - 1]], Message::Assistant { .. });
        if has_reply {
            while pos < indices.len() && matches!(history[indices[pos]], Message::ToolResult { .. }) {
                unit.push(indices[pos]);
                pos += 1;
            }
        }

        units.push(unit);
    }
    units
}

/// Estimate the token count of one message
pub fn estimate_tokens(message: &Message) -> u32 {
    let chars = content_char_count(message.content())
        + match message {
            Message::ToolResult { tool_name, .. } => tool_name.len(),
            _ => 0,
        };
    (chars / 4) as u32 + MESSAGE_OVERHEAD
}

/// Estimate total tokens for a slice of messages
pub fn estimate_total_tokens(messages: &[Message]) -> u32 {
    messages.iter().map(estimate_tokens).sum()
}

fn estimate_text(text: &str) -> u32 {
    if text.is_empty() {
        0
    } else {
        (text.len() / 4) as u32 + MESSAGE_OVERHEAD
    }
}

fn estimate_tools(tools: &[Tool]) -> u32 {
    tools
        .iter()
        .map(|t| {
            let chars = t.name.len()
                + t.description.len()
                + serde_json::to_string(&t.parameters).unwrap_or_default().len();
            (chars / 4) as u32
        })
        .sum()
}

fn content_char_count(content: &[Content]) -> usize {
    content
        .iter()
        .map(|c| match c {
            Content::Text { text } => text.len(),
            Content::Thinking { thinking } => thinking.len(),
            Content::ToolCall {
                name, arguments, ..
            } => name.len() + serde_json::to_string(arguments).unwrap_or_default().len(),
            Content::Image { .. } => IMAGE_CHARS,
        })
        .sum()
}
