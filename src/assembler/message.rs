use std::fmt;

use crate::assembler::source::{SourceError, SourcePos, SourceStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub severity: Severity,
    pub pos: SourcePos,
    pub summary: String,
}

/// Collects diagnostics across all pipeline stages.
///
/// Errors sort before warnings, then by source position. A fatal error
/// additionally stops the current pass and suppresses the emission pass.
#[derive(Debug, Default)]
pub struct MessageList {
    messages: Vec<Message>,
    error_count: usize,
    warning_count: usize,
    fatal: bool,
}

impl MessageList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.messages.len()
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn warning_count(&self) -> usize {
        self.warning_count
    }

    pub fn has_fatal_error(&self) -> bool {
        self.fatal
    }

    pub fn add(&mut self, severity: Severity, pos: SourcePos, summary: String, fatal: bool) {
        match severity {
            Severity::Error => self.error_count += 1,
            Severity::Warning => self.warning_count += 1,
        }
        if fatal {
            self.fatal = true;
        }
        self.messages.push(Message {
            severity,
            pos,
            summary,
        });
    }

    pub fn error(&mut self, pos: SourcePos, summary: impl Into<String>) {
        self.add(Severity::Error, pos, summary.into(), false);
    }

    pub fn warning(&mut self, pos: SourcePos, summary: impl Into<String>) {
        self.add(Severity::Warning, pos, summary.into(), false);
    }

    pub fn source_error(&mut self, err: SourceError) {
        self.add(Severity::Error, err.pos, err.message, err.fatal);
    }

    pub fn sorted(&self) -> Vec<&Message> {
        let mut messages: Vec<&Message> = self.messages.iter().collect();
        messages.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.pos.cmp(&b.pos)));
        messages
    }

    /// Renders every message with the offending source line and a caret
    /// under the column it points at.
    pub fn render(&self, stream: &SourceStream) -> String {
        let mut out = String::new();
        for message in self.sorted() {
            out.push_str(&format!(
                "{}:{}:{}: {}: {}\n",
                stream.short_filename(message.pos.file),
                message.pos.line,
                message.pos.column + 1,
                message.severity,
                message.summary
            ));
            if let Some(text) = stream.line_text(message.pos.file, message.pos.line) {
                out.push_str(&format!("  {}\n", text));
                out.push_str(&format!("  {}^\n", " ".repeat(message.pos.column)));
            }
        }
        out
    }
}
