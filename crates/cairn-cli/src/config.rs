//! Configuration file support

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration for cairn
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default model to use
    pub model: Option<String>,
    /// Default provider
    pub provider: Option<String>,
    /// Default thinking level (off, low, medium, high)
    pub thinking_level: Option<String>,
    /// Maximum provider turns per request
    pub recursion_budget: Option<u32>,
    pub auto_approve_tools: Option<bool>,
    pub quiet: Option<bool>,
    /// Tools the model may use; all built-in tools when unset
    pub enabled_tools: Option<Vec<String>>,
    pub system_prompt: Option<String>,
    /// Read the system prompt from this file instead
    pub system_prompt_file: Option<String>,
    /// "dark" or "light"
    pub theme: Option<String>,
    /// Render answers as markdown
    pub markdown: Option<bool>,
    pub store: StoreSettings,
    /// API keys (alternative to environment variables)
    pub api_keys: ApiKeys,
    /// Named agent profiles, usable as hand-off targets
    pub agents: BTreeMap<String, AgentProfile>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Clear tool-result bodies before writing them to disk
    pub redact_tool_results: Option<bool>,
}

/// API key configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub anthropic: Option<String>,
    pub openai: Option<String>,
    pub groq: Option<String>,
    pub openrouter: Option<String>,
}

/// Overrides applied when running as a named agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentProfile {
    pub system_prompt: Option<String>,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub enabled_tools: Option<Vec<String>>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cairn")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("CAIRN_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from the default location
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`; a missing or unreadable file gives the defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Write the example config to `path` unless a file is already there
    pub fn init_at(path: &Path) -> std::io::Result<()> {
        if path.exists() {
            return Ok(());
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, example_config())
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        Self::init_at(&path)?;
        Ok(path)
    }

    /// API key from the config file; providers fall back to the environment
    pub fn api_key(&self, provider: cairn_ai::Provider) -> Option<String> {
        use cairn_ai::Provider;
        match provider {
            Provider::Anthropic => self.api_keys.anthropic.clone(),
            Provider::OpenAI => self.api_keys.openai.clone(),
            Provider::Groq => self.api_keys.groq.clone(),
            Provider::OpenRouter => self.api_keys.openrouter.clone(),
            Provider::Ollama | Provider::Custom => None,
        }
    }

    /// System prompt text, preferring an inline prompt over the file
    pub fn resolve_system_prompt(&self) -> std::io::Result<Option<String>> {
        if let Some(prompt) = &self.system_prompt {
            return Ok(Some(prompt.clone()));
        }
        match &self.system_prompt_file {
            Some(file) => fs::read_to_string(expand_home(file)).map(Some),
            None => Ok(None),
        }
    }

    pub fn redact_tool_results(&self) -> bool {
        self.store.redact_tool_results.unwrap_or(true)
    }
}

/// Expand a leading `~/` to the home directory
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# cairn configuration file
# Place at ~/.config/cairn/config.toml (Linux) or set CAIRN_CONFIG_PATH

# Default model and provider (anthropic, openai, groq, openrouter, ollama)
model = "claude-sonnet-4-5-20250929"
provider = "anthropic"

# Thinking level (off, low, medium, high)
thinking_level = "off"

# Maximum model turns per request
recursion_budget = 10

# Apply file changes without asking
auto_approve_tools = false

# Hide the spinner, reasoning and tool summaries
quiet = false

# Restrict the tools the model may call
# enabled_tools = ["read_file", "list_dir"]

# system_prompt = "You are a careful assistant."
# system_prompt_file = "~/.config/cairn/system_prompt.md"

# "dark" or "light"
theme = "dark"

# Render answers as markdown
markdown = true

[store]
# Clear tool output before saving conversations to disk
redact_tool_results = true

# API keys (optional - environment variables work too)
[api_keys]
# anthropic = "sk-ant-..."
# openai = "sk-..."

# Agent profiles the model can hand off to with switch_agent
# [agents.reviewer]
# system_prompt = "You review changes for bugs."
# enabled_tools = ["read_file", "list_dir"]
"#
}
