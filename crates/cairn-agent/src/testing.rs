//! Scripted collaborators shared by the crate's tests

use async_trait::async_trait;
use cairn_ai::providers::StreamProvider;
use cairn_ai::{Message, ModelConfig, ProviderEvent, ProviderEventStream, Tool as ApiTool, ToolCall};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::Handoff;
use crate::sink::{PresentationSink, RenderMode};
use crate::tool::{Dispatch, Tool, ToolContext, ToolDispatcher, ToolError, ToolResult};

/// Everything a [`RecordingSink`] saw, in order
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Text(String),
    Line(String),
    IndicatorOn(String),
    IndicatorOff,
    Mode(RenderMode),
    Flush,
    Confirm(String),
}

/// A sink that records calls; clones share the same log
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<SinkEvent>>>,
    approve: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn approving(mut self, approve: bool) -> Self {
        self.approve = approve;
        self
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().clone()
    }

    /// Concatenated streamed text
    pub fn text(&self) -> String {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    /// How many times the sink entered `mode`
    pub fn mode_count(&self, mode: RenderMode) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| **e == SinkEvent::Mode(mode))
            .count()
    }

    fn record(&self, event: SinkEvent) {
        self.events.lock().push(event);
    }
}

#[async_trait]
impl PresentationSink for RecordingSink {
    fn write(&mut self, text: &str) -> io::Result<()> {
        self.record(SinkEvent::Text(text.to_string()));
        Ok(())
    }

    fn writeln(&mut self, text: &str) -> io::Result<()> {
        self.record(SinkEvent::Line(text.to_string()));
        Ok(())
    }

    fn start_indicator(&mut self, label: &str) {
        self.record(SinkEvent::IndicatorOn(label.to_string()));
    }

    fn stop_indicator(&mut self) {
        self.record(SinkEvent::IndicatorOff);
    }

    fn set_mode(&mut self, mode: RenderMode) -> io::Result<()> {
        self.record(SinkEvent::Mode(mode));
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.record(SinkEvent::Flush);
        Ok(())
    }

    async fn confirm(&mut self, question: &str) -> io::Result<bool> {
        self.record(SinkEvent::Confirm(question.to_string()));
        Ok(self.approve)
    }
}

/// One scripted step of a provider response
#[derive(Debug)]
pub enum Step {
    Event(ProviderEvent),
    Fail(cairn_ai::Error),
    Panic(&'static str),
}

impl From<ProviderEvent> for Step {
    fn from(event: ProviderEvent) -> Self {
        Step::Event(event)
    }
}

/// A provider replaying scripted turns; the last turn repeats once the
/// script runs out.
#[derive(Default)]
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<Vec<Step>>>,
    last: Mutex<Vec<ProviderEvent>>,
    open_failures: Mutex<VecDeque<cairn_ai::Error>>,
    histories: Mutex<Vec<Vec<Message>>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<Vec<Step>>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            ..Default::default()
        }
    }

    /// Fail the next opens with these errors before serving turns
    pub fn failing_open(self, errors: Vec<cairn_ai::Error>) -> Self {
        *self.open_failures.lock() = errors.into();
        self
    }

    /// Number of `stream` calls, including failed opens
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Histories passed to successful opens
    pub fn histories(&self) -> Vec<Vec<Message>> {
        self.histories.lock().clone()
    }
}

#[async_trait]
impl StreamProvider for ScriptedProvider {
    async fn stream(
        &self,
        history: &[Message],
        _tools: &[ApiTool],
        _config: &ModelConfig,
    ) -> cairn_ai::Result<ProviderEventStream> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.open_failures.lock().pop_front() {
            return Err(err);
        }
        self.histories.lock().push(history.to_vec());

        let steps = match self.turns.lock().pop_front() {
            Some(steps) => {
                *self.last.lock() = steps
                    .iter()
                    .filter_map(|s| match s {
                        Step::Event(e) => Some(e.clone()),
                        _ => None,
                    })
                    .collect();
                steps
            }
            None => self.last.lock().iter().cloned().map(Step::Event).collect(),
        };

        Ok(Box::pin(futures::stream::iter(steps).map(|step| match step {
            Step::Event(event) => Ok(event),
            Step::Fail(err) => Err(err),
            Step::Panic(message) => panic!("{}", message),
        })))
    }
}

/// A text-only turn
pub fn text_turn(text: &str) -> Vec<Step> {
    vec![
        ProviderEvent::TextDelta(text.to_string()).into(),
        ProviderEvent::Usage(cairn_ai::Usage {
            input: 10,
            output: 5,
            ..Default::default()
        })
        .into(),
    ]
}

/// A turn that calls one tool
pub fn tool_turn(id: &str, name: &str, arguments: serde_json::Value) -> Vec<Step> {
    vec![
        ProviderEvent::ToolCallStart {
            id: id.to_string(),
            name: name.to_string(),
        }
        .into(),
        ProviderEvent::ToolCallArgsDelta(arguments.to_string()).into(),
        ProviderEvent::ToolCallStop.into(),
        ProviderEvent::Usage(cairn_ai::Usage {
            input: 10,
            output: 5,
            ..Default::default()
        })
        .into(),
    ]
}

/// Echoes its `text` argument
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes input"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": { "type": "string" }
            },
            "required": ["text"]
        })
    }

    async fn execute(
        &self,
        _call_id: &str,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let text = arguments
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or("(empty)");
        ctx.add_reference(format!("echo:{}", text));
        Ok(ToolResult::text(text))
    }
}

/// Always fails
pub struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "fail"
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(
        &self,
        _call_id: &str,
        _arguments: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        Err(ToolError::Failed("disk on fire".into()))
    }
}

/// Hands off to the agent named in `target`
pub struct HandoffTool;

#[async_trait]
impl Tool for HandoffTool {
    fn name(&self) -> &str {
        "switch_agent"
    }

    fn description(&self) -> &str {
        "Hand off to another agent"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "target": { "type": "string" },
                "instruction": { "type": "string" }
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
        let field = |name: &str| {
            arguments
                .get(name)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        Err(ToolError::SwitchAgent(Handoff {
            target: field("target"),
            instruction: field("instruction"),
        }))
    }
}

/// Asks for diff confirmation and reports the decision
pub struct ConfirmingTool;

#[async_trait]
impl Tool for ConfirmingTool {
    fn name(&self) -> &str {
        "confirm"
    }

    fn description(&self) -> &str {
        "Confirms a change"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(
        &self,
        _call_id: &str,
        _arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        if ctx.confirm_diff("-old\n+new\n").await? {
            Ok(ToolResult::text("applied"))
        } else {
            Err(ToolError::Rejected)
        }
    }
}

/// Wraps a dispatcher and counts `dispatch` calls
pub struct CountingDispatcher<D> {
    pub inner: D,
    dispatched: AtomicUsize,
}

impl<D> CountingDispatcher<D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            dispatched: AtomicUsize::new(0),
        }
    }

    pub fn dispatched(&self) -> usize {
        self.dispatched.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<D: ToolDispatcher> ToolDispatcher for CountingDispatcher<D> {
    fn definitions(&self) -> Vec<ApiTool> {
        self.inner.definitions()
    }

    fn knows(&self, name: &str) -> bool {
        self.inner.knows(name)
    }

    async fn dispatch(&self, call: &ToolCall, ctx: &ToolContext) -> Dispatch {
        self.dispatched.fetch_add(1, Ordering::SeqCst);
        self.inner.dispatch(call, ctx).await
    }
}
