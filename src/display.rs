//! Display surface abstraction and the line-oriented terminal implementation.

use std::io::{self, Write};

use log::warn;

pub const SHORTEN_PLACEHOLDER: &str = "[...]";

/// Sink for presentation updates. Rows and titles arrive pre-formatted.
pub trait DisplaySurface {
    fn set_title(&mut self, text: &str);
    fn set_items(&mut self, rows: &[String]);
    fn show_message(&mut self, text: &str);
    fn show_resume_banner(&mut self, text: &str);
    /// Highlights the row at `index`.
    fn focus_item(&mut self, index: usize);
}

/// Truncates `text` to `width` characters, ending it with `placeholder` when cut.
pub fn shorten(text: &str, width: usize, placeholder: &str) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let keep = width.saturating_sub(placeholder.chars().count());
    let mut shortened: String = text.chars().take(keep).collect();
    shortened.push_str(placeholder);
    shortened
}

/// Writes every update as plain lines, e.g. to stdout.
pub struct TerminalSurface<W: Write> {
    out: W,
    rows: Vec<String>,
}

impl TerminalSurface<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> TerminalSurface<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            rows: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_lines<'a>(&mut self, lines: impl IntoIterator<Item = &'a str>) {
        let result = lines
            .into_iter()
            .try_for_each(|line| writeln!(self.out, "{}", line))
            .and_then(|()| self.out.flush());
        if let Err(err) = result {
            warn!("TerminalSurface: write failed: {}", err);
        }
    }
}

impl<W: Write> DisplaySurface for TerminalSurface<W> {
    fn set_title(&mut self, text: &str) {
        let rule = "=".repeat(text.chars().count());
        self.write_lines([text, rule.as_str()]);
    }

    fn set_items(&mut self, rows: &[String]) {
        self.rows = rows.to_vec();
        self.write_lines(rows.iter().map(String::as_str));
    }

    fn show_message(&mut self, text: &str) {
        self.write_lines([format!("-- {}", text).as_str()]);
    }

    fn show_resume_banner(&mut self, text: &str) {
        self.write_lines([format!("[{}]", text).as_str()]);
    }

    fn focus_item(&mut self, index: usize) {
        let Some(row) = self.rows.get(index).cloned() else {
            return;
        };
        self.write_lines([format!("> {}", row).as_str()]);
    }
}
