//! Conversation persistence as JSON lines

use async_trait::async_trait;
use cairn_agent::{ConversationStore, StoreError};
use cairn_ai::{Content, Message};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Stored in place of tool output when results are redacted
pub const REDACTED: &str = "[tool output not saved]";

/// One line of a conversation file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEntry {
    /// Conversation metadata, always the first line
    Metadata {
        name: String,
        created_at: i64,
        model: String,
        working_dir: String,
    },
    /// A message in the conversation
    Message { message: Message, timestamp: i64 },
}

/// File-backed store for one named conversation. The running session sees
/// complete tool output; only the file is redacted.
pub struct JsonlStore {
    name: String,
    path: PathBuf,
    model: String,
    redact: bool,
    state: Mutex<State>,
}

struct State {
    created_at: i64,
    messages: Vec<Message>,
}

impl JsonlStore {
    /// Get the conversations directory
    pub fn conversations_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cairn")
            .join("conversations")
    }

    /// Open (or start) the conversation `name` in the default directory
    pub fn open(name: &str, model: &str, redact: bool) -> Result<Self, StoreError> {
        Self::open_in(&Self::conversations_dir(), name, model, redact)
    }

    /// Open (or start) the conversation `name` in `dir`
    pub fn open_in(dir: &Path, name: &str, model: &str, redact: bool) -> Result<Self, StoreError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.jsonl", file_stem(name)));

        let (created_at, messages) = if path.exists() {
            read_file(&path)?
        } else {
            (chrono::Utc::now().timestamp_millis(), Vec::new())
        };
        tracing::debug!(conversation = name, messages = messages.len(), "opened conversation");

        Ok(Self {
            name: name.to_string(),
            path,
            model: model.to_string(),
            redact,
            state: Mutex::new(State {
                created_at,
                messages,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn metadata_line(&self, created_at: i64) -> Result<String, StoreError> {
        let metadata = StoreEntry::Metadata {
            name: self.name.clone(),
            created_at,
            model: self.model.clone(),
            working_dir: std::env::current_dir()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|_| ".".to_string()),
        };
        Ok(serde_json::to_string(&metadata)?)
    }

    fn message_line(&self, message: &Message) -> Result<String, StoreError> {
        let message = if self.redact {
            redact(message)
        } else {
            message.clone()
        };
        let entry = StoreEntry::Message {
            message,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        Ok(serde_json::to_string(&entry)?)
    }

    /// List saved conversations, newest first
    pub fn list(dir: &Path) -> std::io::Result<Vec<ConversationInfo>> {
        if !dir.exists() {
            return Ok(vec![]);
        }

        let mut conversations = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) == Some("jsonl")
                && let Some(info) = read_info(&path)
            {
                conversations.push(info);
            }
        }

        conversations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(conversations)
    }
}

#[async_trait]
impl ConversationStore for JsonlStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self) -> Result<Vec<Message>, StoreError> {
        Ok(self.state.lock().await.messages.clone())
    }

    async fn save(&self, history: &[Message]) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;

        let mut content = self.metadata_line(state.created_at)?;
        content.push('\n');
        for message in history {
            content.push_str(&self.message_line(message)?);
            content.push('\n');
        }

        // write then rename so a crash never leaves a half-written file
        let tmp = self.path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        state.messages = history.to_vec();
        Ok(())
    }

    async fn push(&self, messages: &[Message]) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;

        let mut content = String::new();
        if !self.path.exists() {
            content.push_str(&self.metadata_line(state.created_at)?);
            content.push('\n');
        }
        for message in messages {
            content.push_str(&self.message_line(message)?);
            content.push('\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;

        state.messages.extend_from_slice(messages);
        Ok(())
    }
}

/// Information about a saved conversation
#[derive(Debug, Clone)]
pub struct ConversationInfo {
    pub name: String,
    pub created_at: i64,
    pub model: String,
    pub working_dir: String,
    pub message_count: usize,
}

impl ConversationInfo {
    /// Format the created_at timestamp for display
    pub fn created_at_display(&self) -> String {
        use chrono::{TimeZone, Utc};
        Utc.timestamp_millis_opt(self.created_at)
            .single()
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Clear the text of a tool result, keeping the call record
fn redact(message: &Message) -> Message {
    match message {
        Message::ToolResult {
            tool_call_id,
            tool_name,
            is_error,
            timestamp,
            ..
        } => Message::ToolResult {
            tool_call_id: tool_call_id.clone(),
            tool_name: tool_name.clone(),
            content: vec![Content::text(REDACTED)],
            is_error: *is_error,
            timestamp: *timestamp,
        },
        other => other.clone(),
    }
}

/// Keep conversation names usable as file names
fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn read_file(path: &Path) -> Result<(i64, Vec<Message>), StoreError> {
    let reader = BufReader::new(File::open(path)?);
    let mut created_at = chrono::Utc::now().timestamp_millis();
    let mut messages = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: StoreEntry = serde_json::from_str(&line).map_err(|e| StoreError::Corrupt {
            line: index + 1,
            message: e.to_string(),
        })?;
        match entry {
            StoreEntry::Metadata {
                created_at: at, ..
            } => created_at = at,
            StoreEntry::Message { message, .. } => messages.push(message),
        }
    }

    Ok((created_at, messages))
}

fn read_info(path: &Path) -> Option<ConversationInfo> {
    let reader = BufReader::new(File::open(path).ok()?);
    let mut lines = reader.lines().map_while(Result::ok);

    let first_line = lines.next()?;
    let StoreEntry::Metadata {
        name,
        created_at,
        model,
        working_dir,
    } = serde_json::from_str(&first_line).ok()?
    else {
        return None;
    };

    let message_count = lines
        .filter(|l| l.contains("\"type\":\"message\""))
        .count();

    Some(ConversationInfo {
        name,
        created_at,
        model,
        working_dir,
        message_count,
    })
}
