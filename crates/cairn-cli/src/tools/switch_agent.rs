//! Hand the conversation to another agent profile

use async_trait::async_trait;
use cairn_agent::{Handoff, Tool, ToolContext, ToolError, ToolResult};
use serde_json::json;

use super::str_arg;

/// Ends the current session and restarts it under another agent profile
pub struct SwitchAgentTool {
    agents: Vec<String>,
}

impl SwitchAgentTool {
    pub fn new(agents: Vec<String>) -> Self {
        Self { agents }
    }
}

#[async_trait]
impl Tool for SwitchAgentTool {
    fn name(&self) -> &str {
        "switch_agent"
    }

    fn description(&self) -> &str {
        "Hand the conversation over to another agent. The current agent stops and the target agent continues with the given instruction."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "target": {
                    "type": "string",
                    "enum": self.agents,
                    "description": "Name of the agent to switch to"
                },
                "instruction": {
                    "type": "string",
                    "description": "What the target agent should do next"
                }
            },
            "required": ["target", "instruction"]
        })
    }

    async fn execute(
        &self,
        _call_id: &str,
        arguments: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let target = str_arg(&arguments, "target")?;
        let instruction = str_arg(&arguments, "instruction")?;

        if !self.agents.iter().any(|a| a == target) {
            return Err(ToolError::InvalidArguments(format!(
                "unknown agent '{}', expected one of: {}",
                target,
                self.agents.join(", ")
            )));
        }

        Err(ToolError::SwitchAgent(Handoff {
            target: target.to_string(),
            instruction: instruction.to_string(),
        }))
    }
}
