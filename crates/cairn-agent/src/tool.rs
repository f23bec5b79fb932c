//! Tool trait, registry and dispatch

use async_trait::async_trait;
use cairn_ai::{Content, Message, ToolCall};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::coordinator::{Ack, StatusHandle};
use crate::error::{AgentError, Handoff};
use crate::status::StatusTag;

/// Result of a tool execution
#[derive(Debug, Clone)]
pub struct ToolResult {
    /// Content to return to the LLM
    pub content: Vec<Content>,
    /// Whether the execution resulted in an error
    pub is_error: bool,
}

impl ToolResult {
    /// Create a successful text result
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error: false,
        }
    }

    /// Create an error result
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(message)],
            is_error: true,
        }
    }

    /// Create a result with multiple content blocks
    pub fn with_content(content: Vec<Content>) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    /// Get the text content as a single string
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| c.as_text())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Ways a tool can fail. All of them end up as a tool-result message.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Failed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("The user rejected the change")]
    Rejected,

    /// Not a failure: the tool asks the session to hand off
    #[error("Handing off to agent '{}'", .0.target)]
    SwitchAgent(Handoff),

    #[error(transparent)]
    Coordination(#[from] AgentError),
}

/// Where a tool comes from
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ToolOrigin {
    /// Built into the binary
    #[default]
    Embedded,
    Search,
    Memory,
    Skill,
    SubAgent,
    /// Provided by an external server, named here
    External(String),
}

impl fmt::Display for ToolOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolOrigin::Embedded => write!(f, "embedded"),
            ToolOrigin::Search => write!(f, "search"),
            ToolOrigin::Memory => write!(f, "memory"),
            ToolOrigin::Skill => write!(f, "skill"),
            ToolOrigin::SubAgent => write!(f, "sub-agent"),
            ToolOrigin::External(server) => write!(f, "external:{}", server),
        }
    }
}

/// Trait for executable tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (used in API calls)
    fn name(&self) -> &str;

    /// Tool description for the LLM
    fn description(&self) -> &str;

    /// JSON Schema for parameters
    fn parameters_schema(&self) -> serde_json::Value;

    fn origin(&self) -> ToolOrigin {
        ToolOrigin::Embedded
    }

    /// Execute the tool with already-validated arguments
    async fn execute(
        &self,
        call_id: &str,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError>;
}

/// Type alias for a shared tool
pub type BoxedTool = Arc<dyn Tool>;

/// Convert a Tool to a cairn_ai::Tool for API calls
pub fn to_api_tool(tool: &dyn Tool) -> cairn_ai::Tool {
    cairn_ai::Tool {
        name: tool.name().to_string(),
        description: tool.description().to_string(),
        parameters: tool.parameters_schema(),
    }
}

/// What tools can reach while they run
#[derive(Clone)]
pub struct ToolContext {
    status: StatusHandle,
    auto_approve: bool,
    references: Arc<Mutex<Vec<String>>>,
}

impl ToolContext {
    pub fn new(status: StatusHandle, auto_approve: bool) -> Self {
        Self {
            status,
            auto_approve,
            references: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Show a diff and ask the user whether to apply it. Always true when
    /// tools are auto-approved.
    pub async fn confirm_diff(&self, diff: &str) -> Result<bool, AgentError> {
        if self.auto_approve {
            tracing::debug!("change auto-approved");
            return Ok(true);
        }

        let ack = self
            .status
            .change_status(StatusTag::DiffConfirm, Some(diff.to_string()), None)
            .await?;
        self.status
            .change_status(StatusTag::DiffConfirmOver, None, None)
            .await?;
        Ok(ack == Ack::Approved)
    }

    /// Record a source worth listing after the answer
    pub fn add_reference(&self, reference: impl Into<String>) {
        let reference = reference.into();
        let mut references = self.references.lock();
        if !references.contains(&reference) {
            references.push(reference);
        }
    }

    pub fn take_references(&self) -> Vec<String> {
        std::mem::take(&mut *self.references.lock())
    }
}

/// Why a dispatch did not produce a plain result
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("Unknown function: {0}")]
    UnknownTool(String),
    #[error("Invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },
    #[error("{tool} failed: {message}")]
    Failed { tool: String, message: String },
    #[error("Handing off to agent '{}'", .0.target)]
    SwitchAgent(Handoff),
}

/// Outcome of one dispatch. `message` is always a usable tool result; any
/// error text is already embedded in it.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub message: Message,
    pub error: Option<DispatchError>,
}

/// Runs tool calls on behalf of the recursion controller
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Definitions sent to the provider
    fn definitions(&self) -> Vec<cairn_ai::Tool>;

    fn knows(&self, name: &str) -> bool;

    async fn dispatch(&self, call: &ToolCall, ctx: &ToolContext) -> Dispatch;
}

/// Synthesized result for a call to a tool that does not exist
pub fn unknown_tool_result(call: &ToolCall, available: &[String]) -> Message {
    let listing = if available.is_empty() {
        "none".to_string()
    } else {
        available.join(", ")
    };
    Message::tool_result(
        &call.id,
        &call.name,
        vec![Content::text(format!(
            "Error: unknown function '{}'. Available functions: {}",
            call.name, listing
        ))],
        true,
    )
}

struct Entry {
    tool: BoxedTool,
    validator: Option<Arc<jsonschema::Validator>>,
}

/// Tools by name, with argument validators compiled once at construction
pub struct ToolRegistry {
    entries: HashMap<String, Entry>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<BoxedTool>) -> Self {
        let mut entries = HashMap::new();
        let mut order = Vec::new();

        for tool in tools {
            let name = tool.name().to_string();
            let schema = tool.parameters_schema();
            let validator = match jsonschema::validator_for(&schema) {
                Ok(validator) => Some(Arc::new(validator)),
                Err(e) => {
                    tracing::warn!(
                        "Invalid tool parameter schema for '{}', skipping validation: {}",
                        name,
                        e
                    );
                    None
                }
            };

            if entries.insert(name.clone(), Entry { tool, validator }).is_some() {
                tracing::warn!(tool = %name, "duplicate tool registration, keeping the last one");
            } else {
                order.push(name);
            }
        }

        Self { entries, order }
    }

    /// Tool names in registration order
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn origin_of(&self, name: &str) -> Option<ToolOrigin> {
        self.entries.get(name).map(|e| e.tool.origin())
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[async_trait]
impl ToolDispatcher for ToolRegistry {
    fn definitions(&self) -> Vec<cairn_ai::Tool> {
        self.order
            .iter()
            .filter_map(|name| self.entries.get(name))
            .map(|entry| to_api_tool(entry.tool.as_ref()))
            .collect()
    }

    fn knows(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    async fn dispatch(&self, call: &ToolCall, ctx: &ToolContext) -> Dispatch {
        let Some(entry) = self.entries.get(&call.name) else {
            return Dispatch {
                message: unknown_tool_result(call, &self.order),
                error: Some(DispatchError::UnknownTool(call.name.clone())),
            };
        };

        let failure = |message: String, error: DispatchError| Dispatch {
            message: Message::tool_result(&call.id, &call.name, vec![Content::text(message)], true),
            error: Some(error),
        };

        if let Some(message) = entry
            .validator
            .as_deref()
            .and_then(|validator| validate_with_validator(&call.arguments, validator))
        {
            tracing::warn!(tool = %call.name, "rejected tool arguments");
            return failure(
                message.clone(),
                DispatchError::InvalidArguments {
                    tool: call.name.clone(),
                    message,
                },
            );
        }

        tracing::debug!(tool = %call.name, origin = %entry.tool.origin(), "executing tool");
        match entry.tool.execute(&call.id, call.arguments.clone(), ctx).await {
            Ok(result) => Dispatch {
                message: Message::tool_result(&call.id, &call.name, result.content, result.is_error),
                error: None,
            },
            Err(ToolError::SwitchAgent(handoff)) => Dispatch {
                message: Message::tool_result(
                    &call.id,
                    &call.name,
                    vec![Content::text(format!(
                        "Handing off to agent '{}'.",
                        handoff.target
                    ))],
                    false,
                ),
                error: Some(DispatchError::SwitchAgent(handoff)),
            },
            Err(e) => {
                tracing::debug!(tool = %call.name, error = %e, "tool failed");
                let message = format!("Error: {}", e);
                failure(
                    message,
                    DispatchError::Failed {
                        tool: call.name.clone(),
                        message: e.to_string(),
                    },
                )
            }
        }
    }
}

/// Validate tool arguments using a pre-compiled validator.
/// Returns `Some(error_message)` if validation fails, `None` if valid.
fn validate_with_validator(
    args: &serde_json::Value,
    validator: &jsonschema::Validator,
) -> Option<String> {
    let errors: Vec<String> = validator
        .iter_errors(args)
        .map(|e| {
            let path = e.instance_path.to_string();
            if path.is_empty() {
                e.to_string()
            } else {
                format!("{}: {}", path, e)
            }
        })
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(format!(
            "Tool argument validation failed:\n{}",
            errors.join("\n")
        ))
    }
}
