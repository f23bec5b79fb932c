//! File writing tool

use async_trait::async_trait;
use cairn_agent::{Tool, ToolContext, ToolError, ToolResult};
use serde_json::json;
use similar::TextDiff;
use std::path::Path;
use tokio::fs;

use super::{path_arg, str_arg};

/// Tool for writing file contents. Every change is shown as a diff and needs
/// the user's approval unless tools are auto-approved.
#[derive(Default)]
pub struct WriteFileTool;

impl WriteFileTool {
    pub fn new() -> Self {
        Self
    }
}

/// Unified diff between the current and proposed contents
pub fn unified_diff(path: &Path, old: &str, new: &str) -> String {
    let name = path.display().to_string();
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{}", name), &format!("b/{}", name))
        .to_string()
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file. Creates the file if it doesn't exist, overwrites if it does. Automatically creates parent directories."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to write (relative or absolute)"
                },
                "content": {
                    "type": "string",
                    "description": "Complete new content of the file"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(
        &self,
        _call_id: &str,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let path = path_arg(&arguments, "path")?;
        let content = str_arg(&arguments, "content")?;

        if path.is_dir() {
            return Err(ToolError::InvalidArguments(format!(
                "{} is a directory",
                path.display()
            )));
        }

        let existing = match fs::read_to_string(&path).await {
            Ok(text) => Some(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        if existing.as_deref() == Some(content) {
            return Ok(ToolResult::text(format!(
                "{} already has this content",
                path.display()
            )));
        }

        let diff = unified_diff(&path, existing.as_deref().unwrap_or_default(), content);
        if !ctx.confirm_diff(&diff).await? {
            return Err(ToolError::Rejected);
        }

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, content).await?;

        let verb = if existing.is_some() { "Updated" } else { "Created" };
        Ok(ToolResult::text(format!(
            "{} {} ({} bytes)",
            verb,
            path.display(),
            content.len()
        )))
    }
}
