//! Streaming event types and reply accumulation

use crate::error::Result;
use crate::types::{AssistantMetadata, Content, Message, StopReason, ToolCall, Usage};
use std::pin::Pin;
use tokio_stream::Stream;

/// Backend-neutral events produced while a response streams in
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    /// Visible answer text
    TextDelta(String),
    /// Thinking/reasoning text
    ReasoningDelta(String),
    /// A tool call begins; arguments follow as deltas
    ToolCallStart { id: String, name: String },
    /// Partial JSON for the arguments of the open tool call
    ToolCallArgsDelta(String),
    /// The open tool call is complete
    ToolCallStop,
    /// Token counters for this response
    Usage(Usage),
}

/// A lazy sequence of provider events; an `Err` item ends the response.
pub type ProviderEventStream = Pin<Box<dyn Stream<Item = Result<ProviderEvent>> + Send>>;

/// Builds the assistant message (and its tool calls) from streamed events
#[derive(Debug, Default)]
pub struct ReplyBuilder {
    blocks: Vec<Block>,
    open_call: Option<usize>,
    usage: Usage,
    model: Option<String>,
}

#[derive(Debug)]
enum Block {
    Text(String),
    Thinking(String),
    ToolCall {
        id: String,
        name: String,
        arguments_json: String,
    },
}

impl ReplyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the model id on the finished message
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Fold one event into the reply
    pub fn process(&mut self, event: &ProviderEvent) {
        match event {
            ProviderEvent::TextDelta(delta) => match self.blocks.last_mut() {
                Some(Block::Text(text)) if self.open_call.is_none() => text.push_str(delta),
                _ => self.blocks.push(Block::Text(delta.clone())),
            },
            ProviderEvent::ReasoningDelta(delta) => match self.blocks.last_mut() {
                Some(Block::Thinking(thinking)) if self.open_call.is_none() => {
                    thinking.push_str(delta)
                }
                _ => self.blocks.push(Block::Thinking(delta.clone())),
            },
            ProviderEvent::ToolCallStart { id, name } => {
                self.blocks.push(Block::ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments_json: String::new(),
                });
                self.open_call = Some(self.blocks.len() - 1);
            }
            ProviderEvent::ToolCallArgsDelta(delta) => {
                if let Some(Block::ToolCall { arguments_json, .. }) =
                    self.open_call.and_then(|i| self.blocks.get_mut(i))
                {
                    arguments_json.push_str(delta);
                }
            }
            ProviderEvent::ToolCallStop => {
                self.open_call = None;
            }
            ProviderEvent::Usage(usage) => {
                self.usage = usage.clone();
            }
        }
    }

    /// Usage reported so far
    pub fn usage(&self) -> &Usage {
        &self.usage
    }

    /// Finish the reply, returning the assistant message and its tool calls
    pub fn finish(self) -> (Message, Vec<ToolCall>) {
        let content: Vec<Content> = self
            .blocks
            .into_iter()
            .filter_map(|block| match block {
                Block::Text(text) if text.is_empty() => None,
                Block::Text(text) => Some(Content::Text { text }),
                Block::Thinking(thinking) => Some(Content::Thinking { thinking }),
                Block::ToolCall {
                    id,
                    name,
                    arguments_json,
                } => Some(Content::ToolCall {
                    id,
                    name,
                    arguments: parse_arguments(&arguments_json),
                }),
            })
            .collect();

        let wants_tools = content.iter().any(|c| matches!(c, Content::ToolCall { .. }));
        let message = Message::Assistant {
            content,
            metadata: AssistantMetadata {
                model: self.model,
                usage: self.usage,
                stop_reason: Some(if wants_tools {
                    StopReason::ToolUse
                } else {
                    StopReason::Stop
                }),
                timestamp: chrono::Utc::now().timestamp_millis(),
            },
        };
        let calls = message.tool_calls();

        (message, calls)
    }
}

/// Parse streamed argument JSON. Empty input means "no arguments"; malformed
/// input becomes `null` so schema validation reports it back to the model.
fn parse_arguments(raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    serde_json::from_str(raw).unwrap_or(serde_json::Value::Null)
}
