//! Color theme support

use cairn_agent::RenderMode;
use crossterm::style::{Color, ContentStyle, Stylize};

/// Terminal colors, passed explicitly into the sink
#[derive(Debug, Clone)]
pub struct Theme {
    /// Primary text color
    pub fg: Color,
    /// Dimmed/secondary text
    pub dim: Color,
    /// Accent color (tool lines, headings)
    pub accent: Color,
    pub error: Color,
    pub success: Color,
    pub warning: Color,
    /// Code/preformatted text color
    pub code: Color,
    pub link: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self::dark()
    }
}

impl Theme {
    /// Dark theme (default)
    pub fn dark() -> Self {
        Self {
            fg: Color::Reset,
            dim: Color::DarkGrey,
            accent: Color::Cyan,
            error: Color::Red,
            success: Color::Green,
            warning: Color::Yellow,
            code: Color::Magenta,
            link: Color::Blue,
        }
    }

    /// Light theme
    pub fn light() -> Self {
        Self {
            fg: Color::Reset,
            dim: Color::Grey,
            accent: Color::DarkBlue,
            error: Color::DarkRed,
            success: Color::DarkGreen,
            warning: Color::Rgb {
                r: 180,
                g: 120,
                b: 0,
            },
            code: Color::DarkMagenta,
            link: Color::Blue,
        }
    }

    /// Theme by config name; unknown names fall back to dark
    pub fn by_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "light" => Self::light(),
            _ => Self::dark(),
        }
    }

    /// Style for text written in `mode`
    pub fn mode_style(&self, mode: RenderMode) -> ContentStyle {
        let base = ContentStyle::new();
        match mode {
            RenderMode::Normal | RenderMode::Diff => base.with(self.fg),
            RenderMode::Reasoning => base.with(self.dim).italic(),
            RenderMode::Tool => base.with(self.accent),
            RenderMode::Warning => base.with(self.warning),
            RenderMode::Error => base.with(self.error).bold(),
            RenderMode::Summary => base.with(self.dim),
        }
    }

    /// Style for one line of a unified diff
    pub fn diff_line_style(&self, line: &str) -> ContentStyle {
        let base = ContentStyle::new();
        if line.starts_with("+++") || line.starts_with("---") {
            base.with(self.fg).bold()
        } else if line.starts_with('+') {
            base.with(self.success)
        } else if line.starts_with('-') {
            base.with(self.error)
        } else if line.starts_with("@@") {
            base.with(self.accent)
        } else {
            base.with(self.dim)
        }
    }
}
