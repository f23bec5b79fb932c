//! Built-in tools

mod list;
mod read;
mod shell;
mod switch_agent;
mod write;

pub use list::ListDirTool;
pub use read::ReadFileTool;
pub use shell::ShellTool;
pub use switch_agent::SwitchAgentTool;
pub use write::WriteFileTool;

use cairn_agent::{BoxedTool, ToolError};
use std::path::PathBuf;
use std::sync::Arc;

/// Every built-in tool. `switch_agent` is only offered when there are
/// profiles to switch to.
pub fn builtin_tools(agent_names: Vec<String>) -> Vec<BoxedTool> {
    let mut tools: Vec<BoxedTool> = vec![
        Arc::new(ShellTool::new()),
        Arc::new(ReadFileTool::new()),
        Arc::new(WriteFileTool::new()),
        Arc::new(ListDirTool::new()),
    ];
    if !agent_names.is_empty() {
        tools.push(Arc::new(SwitchAgentTool::new(agent_names)));
    }
    tools
}

/// Required string argument
pub(crate) fn str_arg<'a>(arguments: &'a serde_json::Value, name: &str) -> Result<&'a str, ToolError> {
    arguments
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing '{}'", name)))
}

/// Path argument with `~` expanded
pub(crate) fn path_arg(arguments: &serde_json::Value, name: &str) -> Result<PathBuf, ToolError> {
    let raw = str_arg(arguments, name)?;
    if raw == "~" {
        return dirs::home_dir().ok_or_else(|| ToolError::Failed("no home directory".into()));
    }
    Ok(crate::config::expand_home(raw))
}

#[cfg(test)]
pub(crate) fn test_context(auto_approve: bool) -> (cairn_agent::ToolContext, cairn_agent::coordinator::ControlLoop) {
    let (status, control) = cairn_agent::coordinator::channel(true);
    (cairn_agent::ToolContext::new(status, auto_approve), control)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_agent_only_with_profiles() {
        let names = |tools: Vec<BoxedTool>| -> Vec<String> {
            tools.iter().map(|t| t.name().to_string()).collect()
        };
        assert_eq!(
            names(builtin_tools(vec![])),
            vec!["shell", "read_file", "write_file", "list_dir"]
        );
        assert!(names(builtin_tools(vec!["reviewer".into()])).contains(&"switch_agent".to_string()));
    }

    #[test]
    fn test_missing_argument() {
        let err = str_arg(&serde_json::json!({}), "path").unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(m) if m == "missing 'path'"));
    }
}
