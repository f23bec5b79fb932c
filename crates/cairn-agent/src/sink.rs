//! Rendering target driven by the control loop

use async_trait::async_trait;
use std::io;

/// What kind of output the sink is currently rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    #[default]
    Normal,
    Reasoning,
    Tool,
    Diff,
    Warning,
    Error,
    /// Usage line printed when a session finishes
    Summary,
}

/// Where a session's output goes. Only the control loop calls into the sink.
#[async_trait]
pub trait PresentationSink: Send {
    /// Write streamed text
    fn write(&mut self, text: &str) -> io::Result<()>;

    /// Write a complete line
    fn writeln(&mut self, text: &str) -> io::Result<()>;

    /// Show a busy indicator with a short label
    fn start_indicator(&mut self, label: &str);

    /// Hide the busy indicator if one is showing
    fn stop_indicator(&mut self);

    fn set_mode(&mut self, _mode: RenderMode) -> io::Result<()> {
        Ok(())
    }

    /// Render anything buffered
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Ask the user a yes/no question. Sinks that cannot ask decline.
    async fn confirm(&mut self, _question: &str) -> io::Result<bool> {
        Ok(false)
    }
}
