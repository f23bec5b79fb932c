//! List directory tool

use async_trait::async_trait;
use cairn_agent::{Tool, ToolContext, ToolError, ToolResult};
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio::fs;

const DEFAULT_LIMIT: usize = 200;

/// Directories never descended into
const SKIPPED_DIRS: &[&str] = &["node_modules", "target", ".git"];

/// Tool for listing directory contents
#[derive(Default)]
pub struct ListDirTool;

impl ListDirTool {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the contents of a directory with file sizes. Directories end with '/'."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory path to list (defaults to current directory)"
                },
                "recursive": {
                    "type": "boolean",
                    "description": "Whether to list recursively (default: false)"
                },
                "show_hidden": {
                    "type": "boolean",
                    "description": "Whether to show hidden files (default: false)"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Maximum number of entries to return (default: 200)"
                }
            }
        })
    }

    async fn execute(
        &self,
        _call_id: &str,
        arguments: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let root = match arguments.get("path").and_then(|v| v.as_str()) {
            Some(path) => crate::config::expand_home(path),
            None => PathBuf::from("."),
        };
        let recursive = arguments
            .get("recursive")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let show_hidden = arguments
            .get("show_hidden")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let limit = arguments
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|l| l as usize)
            .unwrap_or(DEFAULT_LIMIT);

        if !root.is_dir() {
            return Err(ToolError::InvalidArguments(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let mut entries = Vec::new();
        let mut pending = vec![root.clone()];
        let mut truncated = false;

        'walk: while let Some(dir) = pending.pop() {
            let mut children = Vec::new();
            let mut read_dir = fs::read_dir(&dir).await?;
            while let Some(entry) = read_dir.next_entry().await? {
                children.push(entry);
            }
            children.sort_by_key(|e| e.file_name());

            let mut subdirs = Vec::new();
            for entry in children {
                let name = entry.file_name().to_string_lossy().to_string();
                if !show_hidden && name.starts_with('.') {
                    continue;
                }
                if entries.len() >= limit {
                    truncated = true;
                    break 'walk;
                }

                let path = entry.path();
                let metadata = entry.metadata().await.ok();
                let is_dir = metadata.as_ref().is_some_and(|m| m.is_dir());
                let relative = path.strip_prefix(&root).unwrap_or(&path);
                entries.push(format_entry(relative, is_dir, metadata.as_ref()));

                if recursive && is_dir && !SKIPPED_DIRS.contains(&name.as_str()) {
                    subdirs.push(path);
                }
            }
            // depth-first, in name order
            pending.extend(subdirs.into_iter().rev());
        }

        if entries.is_empty() {
            return Ok(ToolResult::text("(empty directory)"));
        }

        let mut output = entries.join("\n");
        if truncated {
            output.push_str(&format!("\n\n(showing first {} entries)", limit));
        }
        Ok(ToolResult::text(output))
    }
}

fn format_entry(relative: &Path, is_dir: bool, metadata: Option<&std::fs::Metadata>) -> String {
    let name = relative.display();
    if is_dir {
        return format!("{}/", name);
    }
    match metadata {
        Some(m) => format!("{}\t{}", name, format_size(m.len())),
        None => name.to_string(),
    }
}

fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1}G", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1}M", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1}K", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}
