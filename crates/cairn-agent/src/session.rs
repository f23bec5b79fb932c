//! Per-request session: configuration plus the runtime handles

use cairn_ai::providers::StreamProvider;
use cairn_ai::{Content, Model, ModelConfig, ReasoningLevel};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use crate::controller::RecursionController;
use crate::coordinator::{self, StatusHandle};
use crate::error::{AgentError, Outcome, Result};
use crate::retry::RetryConfig;
use crate::sink::PresentationSink;
use crate::status::StatusTag;
use crate::store::ConversationStore;
use crate::tool::ToolDispatcher;

/// Turn budget used when none is configured
pub const DEFAULT_RECURSION_BUDGET: u32 = 10;

/// Everything fixed for the lifetime of one request
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub model: Model,
    /// Credential for the backend; providers fall back to the environment
    pub api_key: Option<String>,
    pub prompt: String,
    /// Extra content sent along with the prompt
    pub attachments: Vec<Content>,
    pub system_prompt: String,
    /// Tool names the model may use; `None` allows every registered tool
    pub enabled_tools: Option<Vec<String>>,
    /// Maximum number of provider turns
    pub recursion_budget: u32,
    pub thinking_level: ReasoningLevel,
    pub auto_approve_tools: bool,
    /// Where to write the final answer, if anywhere
    pub output_file: Option<PathBuf>,
    pub quiet: bool,
    pub conversation_name: String,
}

impl SessionConfig {
    pub fn new(model: Model, prompt: impl Into<String>) -> Self {
        Self {
            model,
            api_key: None,
            prompt: prompt.into(),
            attachments: Vec::new(),
            system_prompt: String::new(),
            enabled_tools: None,
            recursion_budget: DEFAULT_RECURSION_BUDGET,
            thinking_level: ReasoningLevel::Off,
            auto_approve_tools: false,
            output_file: None,
            quiet: false,
            conversation_name: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn model_config(&self) -> ModelConfig {
        ModelConfig::new(self.model.clone(), self.api_key.clone(), self.thinking_level)
    }

    pub fn tool_enabled(&self, name: &str) -> bool {
        self.enabled_tools
            .as_ref()
            .is_none_or(|enabled| enabled.iter().any(|n| n == name))
    }
}

/// One user request: runs the recursion controller on a worker task while
/// the caller renders through the control loop.
pub struct AgentSession {
    config: SessionConfig,
    provider: Arc<dyn StreamProvider>,
    tools: Arc<dyn ToolDispatcher>,
    store: Arc<dyn ConversationStore>,
    retry: RetryConfig,
}

impl AgentSession {
    pub fn new(
        config: SessionConfig,
        provider: Arc<dyn StreamProvider>,
        tools: Arc<dyn ToolDispatcher>,
        store: Arc<dyn ConversationStore>,
    ) -> Self {
        Self {
            config,
            provider,
            tools,
            store,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run the session to completion, rendering into `sink`.
    pub async fn run<S: PresentationSink + ?Sized>(self, sink: &mut S) -> Result<Outcome> {
        let (status, control) = coordinator::channel(self.config.quiet);
        tracing::debug!(
            conversation = %self.config.conversation_name,
            model = %self.config.model.id,
            budget = self.config.recursion_budget,
            "starting session"
        );

        let controller = RecursionController::new(
            self.config,
            self.provider,
            self.tools,
            self.store,
            self.retry,
            status.clone(),
        );
        let worker = tokio::spawn(run_worker(controller, status));

        let rendered = control.drive(sink).await;
        let finished = worker.await;

        match (rendered, finished) {
            (Ok(outcome), _) => Ok(outcome),
            // the worker's own error is more precise than what it reported
            (Err(_), Ok(Err(worker_err))) if !matches!(worker_err, AgentError::ControlLoopClosed) => {
                Err(worker_err)
            }
            (Err(_), Err(join_err)) if join_err.is_panic() => {
                Err(AgentError::Fault(panic_message(join_err.into_panic().as_ref())))
            }
            (Err(render_err), _) => Err(render_err),
        }
    }
}

/// Fault barrier around the controller: every failure, panics included,
/// becomes exactly one `Error` notification.
async fn run_worker(controller: RecursionController, status: StatusHandle) -> Result<Outcome> {
    match AssertUnwindSafe(controller.run()).catch_unwind().await {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(err)) => {
            if err.is_context_overflow() {
                tracing::warn!("provider rejected the request as too large even after truncation; try a model with a larger context window or start a new conversation");
            }
            tracing::debug!(error = %err, "session failed");
            let _ = status
                .change_status(StatusTag::Error, Some(err.to_string()), None)
                .await;
            Err(err)
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            tracing::error!(panic = %message, "worker panicked");
            let _ = status
                .change_status(StatusTag::Error, Some(format!("Internal error: {}", message)), None)
                .await;
            Err(AgentError::Fault(message))
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}
