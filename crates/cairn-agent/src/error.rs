//! Error and outcome types for cairn-agent

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::status::StatusError;
use crate::store::StoreError;

/// Result type alias using cairn-agent's error
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors that end a session
#[derive(Error, Debug)]
pub enum AgentError {
    /// An error from the provider layer
    #[error(transparent)]
    Provider(#[from] cairn_ai::Error),

    /// Loading or persisting the conversation failed
    #[error("Conversation store error: {0}")]
    Store(#[from] StoreError),

    /// The status stack rejected a transition
    #[error(transparent)]
    Status(#[from] StatusError),

    /// The control loop went away while the worker still needed it
    #[error("Control loop closed before the worker finished")]
    ControlLoopClosed,

    /// An error reported to the control loop as text only
    #[error("{0}")]
    Reported(String),

    /// The worker panicked
    #[error("Worker fault: {0}")]
    Fault(String),

    /// Rendering or output file I/O failed
    #[error("Output error: {0}")]
    Output(#[from] std::io::Error),
}

impl AgentError {
    /// Check if this error indicates a context overflow
    pub fn is_context_overflow(&self) -> bool {
        match self {
            AgentError::Provider(e) => e.is_context_overflow(),
            _ => false,
        }
    }
}

/// A request to continue under another agent profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handoff {
    /// Name of the agent profile to switch to
    pub target: String,
    /// Instruction for the target agent
    pub instruction: String,
}

/// How a successful session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    SwitchAgent(Handoff),
}
