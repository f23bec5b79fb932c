//! Terminal presentation sink

use async_trait::async_trait;
use cairn_agent::{PresentationSink, RenderMode};
use crossterm::style::Color;
use crossterm::{cursor, execute, terminal};
use parking_lot::Mutex;
use std::io::{self, IsTerminal, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::markdown::{MarkdownBuffer, render_markdown};
use crate::theme::Theme;

/// Spinner animation frames
const SPINNER_FRAMES: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const SPINNER_INTERVAL: Duration = Duration::from_millis(80);

/// Animated indicator drawn on stderr by a background task
struct Spinner {
    cancel: CancellationToken,
    /// Held while drawing so a stop never races a frame
    draw: Arc<Mutex<()>>,
}

impl Spinner {
    fn start(label: &str, theme: &Theme) -> Self {
        let cancel = CancellationToken::new();
        let draw = Arc::new(Mutex::new(()));
        let style = theme.mode_style(RenderMode::Tool);
        let label = label.to_string();

        let task_cancel = cancel.clone();
        let task_draw = draw.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SPINNER_INTERVAL);
            let mut frame = 0usize;
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let _guard = task_draw.lock();
                        if task_cancel.is_cancelled() {
                            break;
                        }
                        let text = format!("{} {}", SPINNER_FRAMES[frame % SPINNER_FRAMES.len()], label);
                        let mut stderr = io::stderr();
                        let _ = write!(stderr, "\r{}", style.apply(text));
                        let _ = stderr.flush();
                        frame += 1;
                    }
                }
            }
        });

        Self { cancel, draw }
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        let _guard = self.draw.lock();
        self.cancel.cancel();
        let mut stderr = io::stderr();
        let _ = execute!(
            stderr,
            cursor::MoveToColumn(0),
            terminal::Clear(terminal::ClearType::CurrentLine)
        );
    }
}

/// Renders a session to a terminal: styled text on `out`, spinner and
/// prompts on stderr.
pub struct TerminalSink<W: Write + Send = io::Stdout> {
    out: W,
    theme: Theme,
    mode: RenderMode,
    markdown: Option<MarkdownBuffer>,
    spinner: Option<Spinner>,
    animate: bool,
    colored: bool,
}

impl TerminalSink<io::Stdout> {
    /// Sink on stdout; colors and the spinner only when attached to a terminal
    pub fn stdout(theme: Theme, markdown: bool) -> Self {
        let colored = io::stdout().is_terminal();
        let animate = io::stderr().is_terminal();
        let mut sink = Self::new(io::stdout(), theme, markdown && colored);
        sink.colored = colored;
        sink.animate = animate;
        sink
    }
}

impl<W: Write + Send> TerminalSink<W> {
    pub fn new(out: W, theme: Theme, markdown: bool) -> Self {
        Self {
            out,
            theme,
            mode: RenderMode::Normal,
            markdown: markdown.then(MarkdownBuffer::new),
            spinner: None,
            animate: false,
            colored: true,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_styled(&mut self, text: &str) -> io::Result<()> {
        let plain = self.mode == RenderMode::Normal && self.theme.fg == Color::Reset;
        if !self.colored || plain {
            return self.out.write_all(text.as_bytes());
        }
        if self.mode == RenderMode::Diff {
            for line in text.split_inclusive('\n') {
                let (body, newline) = match line.strip_suffix('\n') {
                    Some(body) => (body, "\n"),
                    None => (line, ""),
                };
                let style = self.theme.diff_line_style(body);
                write!(self.out, "{}{}", style.apply(body), newline)?;
            }
            return Ok(());
        }
        let style = self.theme.mode_style(self.mode);
        write!(self.out, "{}", style.apply(text))
    }

    /// Render whatever the markdown buffer is holding
    fn flush_markdown(&mut self) -> io::Result<()> {
        if let Some(buffer) = self.markdown.as_mut()
            && !buffer.is_empty()
        {
            let text = buffer.take();
            let rendered = render_markdown(&text, &self.theme);
            self.out.write_all(rendered.as_bytes())?;
        }
        Ok(())
    }
}

#[async_trait]
impl<W: Write + Send> PresentationSink for TerminalSink<W> {
    fn write(&mut self, text: &str) -> io::Result<()> {
        if self.mode == RenderMode::Normal
            && let Some(buffer) = self.markdown.as_mut()
        {
            if let Some(block) = buffer.push(text) {
                let rendered = render_markdown(&block, &self.theme);
                self.out.write_all(rendered.as_bytes())?;
                self.out.flush()?;
            }
            return Ok(());
        }
        self.write_styled(text)?;
        self.out.flush()
    }

    fn writeln(&mut self, text: &str) -> io::Result<()> {
        self.flush_markdown()?;
        self.write_styled(text)?;
        writeln!(self.out)?;
        self.out.flush()
    }

    fn start_indicator(&mut self, label: &str) {
        self.stop_indicator();
        if self.animate {
            self.spinner = Some(Spinner::start(label, &self.theme));
        }
    }

    fn stop_indicator(&mut self) {
        self.spinner = None;
    }

    fn set_mode(&mut self, mode: RenderMode) -> io::Result<()> {
        if self.mode == RenderMode::Normal && mode != RenderMode::Normal {
            self.flush_markdown()?;
        }
        // reasoning text runs on without a trailing newline
        if self.mode == RenderMode::Reasoning && mode != RenderMode::Reasoning {
            writeln!(self.out)?;
        }
        self.mode = mode;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_markdown()?;
        self.out.flush()
    }

    async fn confirm(&mut self, question: &str) -> io::Result<bool> {
        self.stop_indicator();
        self.flush()?;

        let prompt = self
            .theme
            .mode_style(RenderMode::Warning)
            .apply(format!("{} [y/N] ", question));
        let mut stderr = io::stderr();
        write!(stderr, "{}", prompt)?;
        stderr.flush()?;

        let answer = read_stdin_line().await?;
        Ok(matches!(
            answer.as_deref().map(|a| a.trim().to_lowercase()).as_deref(),
            Some("y" | "yes")
        ))
    }
}

/// Read one line from stdin without blocking the runtime. `None` at EOF.
pub async fn read_stdin_line() -> io::Result<Option<String>> {
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        match io::stdin().read_line(&mut line)? {
            0 => Ok(None),
            _ => Ok(Some(line)),
        }
    })
    .await
    .map_err(io::Error::other)?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink(markdown: bool) -> TerminalSink<Vec<u8>> {
        let mut sink = TerminalSink::new(Vec::new(), Theme::dark(), markdown);
        sink.colored = false;
        sink
    }

    fn output(sink: TerminalSink<Vec<u8>>) -> String {
        String::from_utf8(sink.into_inner()).unwrap()
    }

    #[test]
    fn test_plain_text_passes_through() {
        let mut sink = sink(false);
        sink.write("Hello").unwrap();
        sink.write(", world").unwrap();
        sink.writeln("").unwrap();
        assert_eq!(output(sink), "Hello, world\n");
    }

    #[test]
    fn test_markdown_buffered_until_flush() {
        let mut sink = sink(true);
        sink.write("- one\n").unwrap();
        assert!(sink.out.is_empty());
        sink.flush().unwrap();
        // markdown keeps its own styling even on an uncolored sink
        assert!(crate::markdown::strip_ansi(&output(sink)).contains("• one"));
    }

    #[test]
    fn test_mode_change_flushes_markdown() {
        let mut sink = sink(true);
        sink.write("answer").unwrap();
        sink.set_mode(RenderMode::Tool).unwrap();
        sink.writeln("read_file done").unwrap();
        let text = output(sink);
        let answer_at = text.find("answer").unwrap();
        let tool_at = text.find("read_file done").unwrap();
        assert!(answer_at < tool_at);
    }

    #[test]
    fn test_reasoning_ends_with_newline() {
        let mut sink = sink(false);
        sink.set_mode(RenderMode::Reasoning).unwrap();
        sink.write("hmm").unwrap();
        sink.set_mode(RenderMode::Normal).unwrap();
        sink.write("yes").unwrap();
        assert_eq!(output(sink), "hmm\nyes");
    }

    #[test]
    fn test_diff_lines_colored() {
        let mut sink = TerminalSink::new(Vec::new(), Theme::dark(), false);
        sink.set_mode(RenderMode::Diff).unwrap();
        sink.write("-old\n+new\n").unwrap();
        let text = output(sink);
        assert!(text.contains("old"));
        assert!(text.contains("new"));
        assert!(text.contains('\x1b'));
    }

    #[tokio::test]
    async fn test_indicator_without_terminal_is_noop() {
        let mut sink = sink(false);
        sink.start_indicator("Thinking");
        assert!(sink.spinner.is_none());
        sink.stop_indicator();
    }
}
