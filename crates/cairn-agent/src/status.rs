//! Status tags and the stack that tracks nested rendering modes

use std::fmt;
use thiserror::Error;

/// A status transition sent from the worker to the control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusTag {
    /// A turn is about to call the provider
    Processing,
    /// The provider produced its first event
    Started,
    /// Non-fatal notice; never blocks the worker
    Warn,
    /// The session failed
    Error,
    /// The session completed
    Finished,
    Reasoning,
    ReasoningOver,
    FunctionCalling,
    FunctionCallingOver,
    DiffConfirm,
    DiffConfirmOver,
    /// The session hands off to another agent
    SwitchAgent,
}

impl StatusTag {
    /// Whether the worker waits for the control loop to acknowledge this tag
    pub fn requires_ack(self) -> bool {
        matches!(
            self,
            StatusTag::Processing
                | StatusTag::Started
                | StatusTag::Reasoning
                | StatusTag::ReasoningOver
                | StatusTag::FunctionCalling
                | StatusTag::FunctionCallingOver
                | StatusTag::DiffConfirm
                | StatusTag::DiffConfirmOver
        )
    }

    /// Tags after which the session produces nothing more
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StatusTag::Error | StatusTag::Finished | StatusTag::SwitchAgent
        )
    }

    /// Tags pushed onto the stack
    pub fn is_begin(self) -> bool {
        matches!(
            self,
            StatusTag::Reasoning | StatusTag::FunctionCalling | StatusTag::DiffConfirm
        )
    }

    /// For an end tag, the begin tag it closes
    pub fn closes(self) -> Option<StatusTag> {
        match self {
            StatusTag::ReasoningOver => Some(StatusTag::Reasoning),
            StatusTag::FunctionCallingOver => Some(StatusTag::FunctionCalling),
            StatusTag::DiffConfirmOver => Some(StatusTag::DiffConfirm),
            _ => None,
        }
    }
}

impl fmt::Display for StatusTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A transition the stack refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatusError {
    #[error("Status {found} does not close the open status {open:?}")]
    Mismatched {
        open: Option<StatusTag>,
        found: StatusTag,
    },
}

/// LIFO of open begin tags for one session.
///
/// Empty exactly when nothing is open; a terminal tag unwinds whatever is
/// still open. `Processing`, `Started` and `Warn` never touch the stack.
#[derive(Debug, Default)]
pub struct StatusStack {
    frames: Vec<StatusTag>,
}

impl StatusStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a transition, rejecting end tags that do not match the top
    pub fn apply(&mut self, tag: StatusTag) -> Result<(), StatusError> {
        if tag.is_terminal() {
            self.frames.clear();
        } else if tag.is_begin() {
            self.frames.push(tag);
        } else if let Some(begin) = tag.closes() {
            match self.frames.last() {
                Some(top) if *top == begin => {
                    self.frames.pop();
                }
                top => {
                    return Err(StatusError::Mismatched {
                        open: top.copied(),
                        found: tag,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn peek(&self) -> Option<StatusTag> {
        self.frames.last().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}
