//! Worker/control-loop coordination.
//!
//! The generation worker talks to the control loop through two queues: a
//! bounded data queue for streamed text and an unbounded notify queue for
//! status transitions. Transitions that need an acknowledgment carry a
//! oneshot the control loop answers once its handler has run, which suspends
//! the worker until the sink is in the matching state.
//!
//! The control loop drains the data queue to empty before it handles a
//! notification, so everything emitted before a transition reaches the sink
//! before that transition's handler runs.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::error::{AgentError, Handoff, Outcome, Result};
use crate::sink::{PresentationSink, RenderMode};
use crate::status::{StatusStack, StatusTag};
use crate::usage::TokenUsage;

/// Capacity of the data queue; the worker waits only when the sink falls
/// this far behind.
pub const DATA_QUEUE_CAPACITY: usize = 10;

const DEFAULT_PROCESSING_LABEL: &str = "Thinking";
const DEFAULT_TOOL_LABEL: &str = "Running";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    Normal,
    Reasoning,
    /// Marks the end of the session's data
    Finished,
}

/// A piece of streamed output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamData {
    pub text: String,
    pub kind: DataKind,
}

impl StreamData {
    pub fn normal(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: DataKind::Normal,
        }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: DataKind::Reasoning,
        }
    }

    pub fn finished() -> Self {
        Self {
            text: String::new(),
            kind: DataKind::Finished,
        }
    }
}

/// Typed data attached to a notification
#[derive(Debug, Clone, PartialEq)]
pub enum NotifyExtra {
    Handoff(Handoff),
    Usage { usage: TokenUsage, cost: f64 },
}

/// A status transition as seen by the control loop
#[derive(Debug, Clone, PartialEq)]
pub struct StreamNotify {
    pub status: StatusTag,
    pub payload: Option<String>,
    pub extra: Option<NotifyExtra>,
}

/// The control loop's reply to an acknowledged transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Done,
    Approved,
    Rejected,
}

struct DataEnvelope {
    item: StreamData,
    drained: Option<oneshot::Sender<()>>,
}

struct NotifyEnvelope {
    notify: StreamNotify,
    ack: Option<oneshot::Sender<Ack>>,
}

/// Create the worker and control-loop ends for one session
pub fn channel(quiet: bool) -> (StatusHandle, ControlLoop) {
    let (data_tx, data_rx) = mpsc::channel(DATA_QUEUE_CAPACITY);
    let (notify_tx, notify_rx) = mpsc::unbounded_channel();

    let handle = StatusHandle {
        data_tx,
        notify_tx,
        stack: Arc::new(Mutex::new(StatusStack::new())),
    };
    let control = ControlLoop {
        data_rx,
        notify_rx,
        quiet,
        mode: RenderMode::Normal,
    };
    (handle, control)
}

/// The worker's end: emits data and drives the status stack
#[derive(Clone)]
pub struct StatusHandle {
    data_tx: mpsc::Sender<DataEnvelope>,
    notify_tx: mpsc::UnboundedSender<NotifyEnvelope>,
    stack: Arc<Mutex<StatusStack>>,
}

impl StatusHandle {
    /// Queue streamed output, waiting only if the data queue is full
    pub async fn emit_data(&self, item: StreamData) -> Result<()> {
        self.data_tx
            .send(DataEnvelope {
                item,
                drained: None,
            })
            .await
            .map_err(|_| AgentError::ControlLoopClosed)
    }

    /// Apply a transition and notify the control loop. Waits for the
    /// acknowledgment when the tag requires one; other tags return
    /// [`Ack::Done`] immediately.
    pub async fn change_status(
        &self,
        tag: StatusTag,
        payload: Option<String>,
        extra: Option<NotifyExtra>,
    ) -> Result<Ack> {
        self.stack.lock().apply(tag)?;

        let notify = StreamNotify {
            status: tag,
            payload,
            extra,
        };

        if !tag.requires_ack() {
            self.notify_tx
                .send(NotifyEnvelope { notify, ack: None })
                .map_err(|_| AgentError::ControlLoopClosed)?;
            return Ok(Ack::Done);
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        self.notify_tx
            .send(NotifyEnvelope {
                notify,
                ack: Some(ack_tx),
            })
            .map_err(|_| AgentError::ControlLoopClosed)?;
        ack_rx.await.map_err(|_| AgentError::ControlLoopClosed)
    }

    pub async fn warn(&self, message: impl Into<String>) -> Result<()> {
        self.change_status(StatusTag::Warn, Some(message.into()), None)
            .await
            .map(|_| ())
    }

    /// Queue the end-of-data marker and wait until the control loop has
    /// rendered everything before it
    pub async fn finish_data(&self) -> Result<()> {
        let (drained_tx, drained_rx) = oneshot::channel();
        self.data_tx
            .send(DataEnvelope {
                item: StreamData::finished(),
                drained: Some(drained_tx),
            })
            .await
            .map_err(|_| AgentError::ControlLoopClosed)?;
        drained_rx.await.map_err(|_| AgentError::ControlLoopClosed)
    }

    /// The innermost open status, if any
    pub fn peek(&self) -> Option<StatusTag> {
        self.stack.lock().peek()
    }
}

/// The rendering end; runs in the caller's task
pub struct ControlLoop {
    data_rx: mpsc::Receiver<DataEnvelope>,
    notify_rx: mpsc::UnboundedReceiver<NotifyEnvelope>,
    quiet: bool,
    mode: RenderMode,
}

impl ControlLoop {
    /// Render until the worker sends a terminal status.
    pub async fn drive<S: PresentationSink + ?Sized>(mut self, sink: &mut S) -> Result<Outcome> {
        loop {
            tokio::select! {
                biased;

                Some(envelope) = self.data_rx.recv() => {
                    self.render_data(envelope, sink)?;
                }
                notify = self.notify_rx.recv() => {
                    let Some(envelope) = notify else {
                        self.drain_data(sink)?;
                        return Err(AgentError::ControlLoopClosed);
                    };
                    self.drain_data(sink)?;
                    if let Some(outcome) = self.handle_notify(envelope, sink).await? {
                        return outcome;
                    }
                }
            }
        }
    }

    fn drain_data<S: PresentationSink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        while let Ok(envelope) = self.data_rx.try_recv() {
            self.render_data(envelope, sink)?;
        }
        Ok(())
    }

    fn render_data<S: PresentationSink + ?Sized>(
        &mut self,
        envelope: DataEnvelope,
        sink: &mut S,
    ) -> Result<()> {
        let DataEnvelope { item, drained } = envelope;
        match item.kind {
            DataKind::Normal => sink.write(&item.text)?,
            DataKind::Reasoning => {
                if !self.quiet {
                    sink.write(&item.text)?;
                }
            }
            DataKind::Finished => sink.flush()?,
        }
        if let Some(drained) = drained {
            let _ = drained.send(());
        }
        Ok(())
    }

    fn set_mode<S: PresentationSink + ?Sized>(&mut self, sink: &mut S, mode: RenderMode) -> Result<()> {
        if self.mode != mode {
            sink.set_mode(mode)?;
            self.mode = mode;
        }
        Ok(())
    }

    /// Write one line in `mode`, then return to the previous mode
    fn line_in<S: PresentationSink + ?Sized>(
        &mut self,
        sink: &mut S,
        mode: RenderMode,
        text: &str,
    ) -> Result<()> {
        let previous = self.mode;
        self.set_mode(sink, mode)?;
        sink.writeln(text)?;
        self.set_mode(sink, previous)
    }

    /// Run the handler for one notification. Returns the session result for
    /// terminal tags.
    async fn handle_notify<S: PresentationSink + ?Sized>(
        &mut self,
        envelope: NotifyEnvelope,
        sink: &mut S,
    ) -> Result<Option<Result<Outcome>>> {
        let NotifyEnvelope { notify, ack } = envelope;
        let StreamNotify {
            status,
            payload,
            extra,
        } = notify;
        tracing::trace!(%status, "control loop handling notification");

        let mut reply = Ack::Done;
        match status {
            StatusTag::Processing => {
                if !self.quiet {
                    sink.start_indicator(payload.as_deref().unwrap_or(DEFAULT_PROCESSING_LABEL));
                }
            }
            StatusTag::Started => sink.stop_indicator(),
            StatusTag::Warn => {
                sink.stop_indicator();
                self.line_in(sink, RenderMode::Warning, payload.as_deref().unwrap_or_default())?;
            }
            StatusTag::Reasoning => {
                if !self.quiet {
                    self.set_mode(sink, RenderMode::Reasoning)?;
                }
            }
            StatusTag::ReasoningOver => self.set_mode(sink, RenderMode::Normal)?,
            StatusTag::FunctionCalling => {
                sink.flush()?;
                if let Some(call) = payload.as_deref() {
                    self.line_in(sink, RenderMode::Tool, call)?;
                }
                if !self.quiet {
                    sink.start_indicator(DEFAULT_TOOL_LABEL);
                }
            }
            StatusTag::FunctionCallingOver => {
                sink.stop_indicator();
                if let Some(summary) = payload.as_deref()
                    && !self.quiet
                {
                    self.line_in(sink, RenderMode::Tool, summary)?;
                }
            }
            StatusTag::DiffConfirm => {
                sink.stop_indicator();
                self.set_mode(sink, RenderMode::Diff)?;
                if let Some(diff) = payload.as_deref() {
                    sink.write(diff)?;
                }
                self.set_mode(sink, RenderMode::Normal)?;
                reply = if sink.confirm("Apply these changes?").await? {
                    Ack::Approved
                } else {
                    Ack::Rejected
                };
            }
            StatusTag::DiffConfirmOver => {
                if !self.quiet {
                    sink.start_indicator(DEFAULT_TOOL_LABEL);
                }
            }
            StatusTag::Error => {
                sink.stop_indicator();
                sink.flush()?;
                let message = payload.unwrap_or_else(|| "unknown error".to_string());
                self.set_mode(sink, RenderMode::Error)?;
                sink.writeln(&message)?;
                return Ok(Some(Err(AgentError::Reported(message))));
            }
            StatusTag::Finished => {
                sink.stop_indicator();
                sink.flush()?;
                if let Some(NotifyExtra::Usage { usage, cost }) = extra
                    && !self.quiet
                {
                    self.line_in(sink, RenderMode::Summary, &usage.summary(cost))?;
                }
                return Ok(Some(Ok(Outcome::Completed)));
            }
            StatusTag::SwitchAgent => {
                sink.stop_indicator();
                sink.flush()?;
                let Some(NotifyExtra::Handoff(handoff)) = extra else {
                    return Ok(Some(Err(AgentError::Reported(
                        "agent switch requested without a target".to_string(),
                    ))));
                };
                if !self.quiet {
                    let line = format!("Switching to agent '{}'", handoff.target);
                    self.line_in(sink, RenderMode::Tool, &line)?;
                }
                return Ok(Some(Ok(Outcome::SwitchAgent(handoff))));
            }
        }

        if let Some(ack) = ack {
            let _ = ack.send(reply);
        }
        Ok(None)
    }
}
