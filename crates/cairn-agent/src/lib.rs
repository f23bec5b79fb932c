//! cairn-agent: Agent runtime for a single request
//!
//! A session runs the recursion controller on a worker task. The worker
//! streams provider output and dispatches tool calls, while the caller's task
//! renders everything through a [`PresentationSink`] in the order the worker
//! produced it.

pub mod context_window;
mod controller;
pub mod coordinator;
pub mod error;
pub mod retry;
pub mod session;
pub mod sink;
pub mod status;
pub mod store;
pub mod tool;
pub mod usage;

#[cfg(test)]
mod testing;

pub use context_window::ContextWindow;
pub use coordinator::{Ack, StatusHandle, StreamData};
pub use error::{AgentError, Handoff, Outcome, Result};
pub use retry::RetryConfig;
pub use session::{AgentSession, DEFAULT_RECURSION_BUDGET, SessionConfig};
pub use sink::{PresentationSink, RenderMode};
pub use status::StatusTag;
pub use store::{ConversationStore, MemoryStore, StoreError};
pub use tool::{
    BoxedTool, Tool, ToolContext, ToolDispatcher, ToolError, ToolOrigin, ToolRegistry, ToolResult,
};
pub use usage::TokenUsage;
