//! Conversation persistence interface

use async_trait::async_trait;
use cairn_ai::Message;
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupt conversation file at line {line}: {message}")]
    Corrupt { line: usize, message: String },
}

/// Message history for one named conversation. The worker is the only writer.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Conversation name the store is keyed by
    fn name(&self) -> &str;

    /// Current history, oldest first
    async fn load(&self) -> Result<Vec<Message>, StoreError>;

    /// Replace the whole history
    async fn save(&self, history: &[Message]) -> Result<(), StoreError>;

    /// Append messages
    async fn push(&self, messages: &[Message]) -> Result<(), StoreError>;
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryStore {
    name: String,
    messages: Mutex<Vec<Message>>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn with_history(name: impl Into<String>, history: Vec<Message>) -> Self {
        Self {
            name: name.into(),
            messages: Mutex::new(history),
        }
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self) -> Result<Vec<Message>, StoreError> {
        Ok(self.snapshot())
    }

    async fn save(&self, history: &[Message]) -> Result<(), StoreError> {
        *self.messages.lock() = history.to_vec();
        Ok(())
    }

    async fn push(&self, messages: &[Message]) -> Result<(), StoreError> {
        self.messages.lock().extend_from_slice(messages);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_save_push_load() {
        let store = MemoryStore::new("demo");
        store
            .save(&[Message::system("sys"), Message::user("hi")])
            .await
            .unwrap();
        store
            .push(&[Message::assistant(vec![cairn_ai::Content::text("hello")])])
            .await
            .unwrap();

        let history = store.load().await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].text(), "hello");
        assert_eq!(store.name(), "demo");

        store.save(&history[..1]).await.unwrap();
        assert_eq!(store.load().await.unwrap().len(), 1);
    }
}
