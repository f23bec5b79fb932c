//! Markdown rendering for terminal output

use crate::theme::Theme;
use crossterm::style::{ContentStyle, Stylize};
use pulldown_cmark::{Event, HeadingLevel, Parser, Tag, TagEnd};

/// Holds streamed text until a whole block has arrived
#[derive(Debug, Default)]
pub struct MarkdownBuffer {
    pending: String,
}

impl MarkdownBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add streamed text. Returns the complete blocks ready to render: text up
    /// to the last blank line that is not inside a code fence.
    pub fn push(&mut self, text: &str) -> Option<String> {
        self.pending.push_str(text);

        let mut in_fence = false;
        let mut split_at = None;
        let mut offset = 0;
        for line in self.pending.split_inclusive('\n') {
            offset += line.len();
            let trimmed = line.trim_start();
            if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
                in_fence = !in_fence;
                if !in_fence && line.ends_with('\n') {
                    split_at = Some(offset);
                }
                continue;
            }
            if !in_fence && trimmed.trim_end().is_empty() && line.ends_with('\n') {
                split_at = Some(offset);
            }
        }

        let split_at = split_at?;
        let rest = self.pending.split_off(split_at);
        Some(std::mem::replace(&mut self.pending, rest))
    }

    /// Everything still buffered
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.pending)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Convert markdown text to ANSI-styled terminal text
pub fn render_markdown(text: &str, theme: &Theme) -> String {
    let mut out = String::new();
    let base = ContentStyle::new().with(theme.fg);
    let mut styles: Vec<ContentStyle> = vec![base];
    let mut in_code_block = false;
    let mut list_depth: usize = 0;
    let mut ordered: Vec<Option<u64>> = Vec::new();

    let current = |styles: &[ContentStyle]| styles.last().copied().unwrap_or(base);

    for event in Parser::new(text) {
        match event {
            Event::Start(tag) => match tag {
                Tag::Heading { level, .. } => {
                    let style = match level {
                        HeadingLevel::H1 => base.with(theme.accent).bold().underlined(),
                        HeadingLevel::H2 => base.with(theme.accent).bold(),
                        _ => base.with(theme.accent),
                    };
                    styles.push(style);
                }
                Tag::CodeBlock(_) => {
                    in_code_block = true;
                }
                Tag::List(start) => {
                    list_depth += 1;
                    ordered.push(start);
                }
                Tag::Item => {
                    let indent = "  ".repeat(list_depth.saturating_sub(1));
                    let bullet = match ordered.last_mut() {
                        Some(Some(n)) => {
                            let bullet = format!("{}. ", n);
                            *n += 1;
                            bullet
                        }
                        _ => "• ".to_string(),
                    };
                    out.push_str(&format!(
                        "{}{}",
                        indent,
                        base.with(theme.dim).apply(bullet)
                    ));
                }
                Tag::Emphasis => styles.push(current(&styles).italic()),
                Tag::Strong => styles.push(current(&styles).bold()),
                Tag::Strikethrough => styles.push(current(&styles).crossed_out()),
                Tag::Link { .. } => styles.push(current(&styles).with(theme.link).underlined()),
                Tag::BlockQuote(_) => styles.push(current(&styles).with(theme.dim).italic()),
                _ => {}
            },
            Event::End(tag_end) => match tag_end {
                TagEnd::Heading(_) => {
                    styles.pop();
                    out.push_str("\n\n");
                }
                TagEnd::Paragraph => {
                    if list_depth == 0 {
                        out.push_str("\n\n");
                    } else {
                        out.push('\n');
                    }
                }
                TagEnd::CodeBlock => {
                    in_code_block = false;
                    out.push('\n');
                }
                TagEnd::List(_) => {
                    list_depth = list_depth.saturating_sub(1);
                    ordered.pop();
                    if list_depth == 0 {
                        out.push('\n');
                    }
                }
                TagEnd::Item => {
                    if !out.ends_with('\n') {
                        out.push('\n');
                    }
                }
                TagEnd::Emphasis
                | TagEnd::Strong
                | TagEnd::Strikethrough
                | TagEnd::Link
                | TagEnd::BlockQuote(_) => {
                    styles.pop();
                }
                _ => {}
            },
            Event::Text(text) => {
                if in_code_block {
                    let code_style = base.with(theme.code);
                    for line in text.split_inclusive('\n') {
                        let (body, newline) = match line.strip_suffix('\n') {
                            Some(body) => (body, "\n"),
                            None => (line, ""),
                        };
                        out.push_str(&format!("  {}{}", code_style.apply(body), newline));
                    }
                } else {
                    out.push_str(&current(&styles).apply(text.as_ref()).to_string());
                }
            }
            Event::Code(code) => {
                let code_style = base.with(theme.code).bold();
                out.push_str(&code_style.apply(format!("`{}`", code)).to_string());
            }
            Event::SoftBreak => out.push(' '),
            Event::HardBreak => out.push('\n'),
            Event::Rule => out.push_str(&format!("{}\n\n", base.with(theme.dim).apply("─".repeat(40)))),
            _ => {}
        }
    }

    out
}

/// Rendered text with its escape sequences removed
#[cfg(test)]
pub(crate) fn strip_ansi(text: &str) -> String {
    let mut out = String::new();
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            for c in chars.by_ref() {
                if c.is_ascii_alphabetic() {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_releases_whole_paragraphs() {
        let mut buffer = MarkdownBuffer::new();
        assert_eq!(buffer.push("First para"), None);
        assert_eq!(buffer.push("graph.\n\nSecond"), Some("First paragraph.\n\n".into()));
        assert_eq!(buffer.take(), "Second");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_buffer_holds_open_code_fence() {
        let mut buffer = MarkdownBuffer::new();
        assert_eq!(buffer.push("```rust\nfn main() {\n\n"), None);
        let released = buffer.push("}\n```\n").unwrap();
        assert!(released.starts_with("```rust"));
        assert!(released.ends_with("```\n"));
    }

    #[test]
    fn test_renders_list_and_code() {
        let theme = Theme::dark();
        let rendered = strip_ansi(&render_markdown(
            "# Title\n\n- one\n- two\n\n```\nlet x = 1;\n```\n",
            &theme,
        ));
        assert!(rendered.contains("Title"));
        assert!(rendered.contains("• one\n"));
        assert!(rendered.contains("• two\n"));
        assert!(rendered.contains("  let x = 1;\n"));
    }

    #[test]
    fn test_ordered_list_numbers() {
        let rendered = strip_ansi(&render_markdown("1. a\n2. b\n", &Theme::dark()));
        assert!(rendered.contains("1. a"));
        assert!(rendered.contains("2. b"));
    }

    #[test]
    fn test_inline_code_kept() {
        let rendered = strip_ansi(&render_markdown("use `cargo` here", &Theme::dark()));
        assert_eq!(rendered.trim_end(), "use `cargo` here");
    }
}
