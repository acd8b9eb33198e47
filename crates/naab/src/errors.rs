//! Runtime error taxonomy and diagnostic rendering.
//!
//! Every failure the evaluator can produce is a [`RunError`]: a kind from the
//! fixed taxonomy, a human message, the stack trace captured at raise time,
//! and an optional payload value for user-thrown errors. Rendering follows
//! the `Kind: message` / `  at function (file:line:col)` diagnostic format,
//! with an optional caret snippet when source text is available.

use std::fmt;

use strum::{Display, EnumString, IntoStaticStr};

use crate::{token::Span, value::Value};

/// Result alias used by the evaluator and everything below it.
pub type RunResult<T> = Result<T, Box<RunError>>;

/// Error kinds. These are reporting categories, not host types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum ErrorKind {
    /// User-thrown errors and anything without a more specific kind.
    #[strum(serialize = "Error")]
    Generic,
    TypeError,
    RuntimeError,
    ReferenceError,
    SyntaxError,
    ImportError,
    BlockError,
    AssertionError,
}

/// One entry of the call-stack trace, pushed on every user-function call and
/// popped on every exit path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub function: String,
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  at {} ({}:{}:{})",
            self.function, self.file, self.line, self.column
        )
    }
}

#[derive(Debug, Clone)]
pub struct RunError {
    pub kind: ErrorKind,
    pub message: String,
    /// The evaluated value of a `throw` expression; `None` for host-raised
    /// errors. `catch (e)` binds this when present, the message otherwise.
    pub payload: Option<Value>,
    pub trace: Vec<StackFrame>,
    pub span: Option<Span>,
    pub file: Option<String>,
}

impl RunError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Box<Self> {
        Box::new(Self {
            kind,
            message: message.into(),
            payload: None,
            trace: Vec::new(),
            span: None,
            file: None,
        })
    }

    pub fn generic(message: impl Into<String>) -> Box<Self> {
        Self::new(ErrorKind::Generic, message)
    }

    pub fn type_error(message: impl Into<String>) -> Box<Self> {
        Self::new(ErrorKind::TypeError, message)
    }

    pub fn runtime(message: impl Into<String>) -> Box<Self> {
        Self::new(ErrorKind::RuntimeError, message)
    }

    pub fn reference(message: impl Into<String>) -> Box<Self> {
        Self::new(ErrorKind::ReferenceError, message)
    }

    pub fn syntax(message: impl Into<String>) -> Box<Self> {
        Self::new(ErrorKind::SyntaxError, message)
    }

    pub fn import(message: impl Into<String>) -> Box<Self> {
        Self::new(ErrorKind::ImportError, message)
    }

    pub fn block(message: impl Into<String>) -> Box<Self> {
        Self::new(ErrorKind::BlockError, message)
    }

    pub fn assertion(message: impl Into<String>) -> Box<Self> {
        Self::new(ErrorKind::AssertionError, message)
    }

    /// Wraps a `throw` payload. The message mirrors the payload's display
    /// form so uncaught throws still render something useful.
    pub fn thrown(value: Value) -> Box<Self> {
        let message = value.to_display_string();
        let mut err = Self::new(ErrorKind::Generic, message);
        err.payload = Some(value);
        err
    }

    pub fn with_span(mut self: Box<Self>, span: Span) -> Box<Self> {
        if self.span.is_none() {
            self.span = Some(span);
        }
        self
    }

    pub fn with_file(mut self: Box<Self>, file: &str) -> Box<Self> {
        if self.file.is_none() {
            self.file = Some(file.to_owned());
        }
        self
    }

    /// The value `catch (e)` binds: the thrown payload if there is one, the
    /// message string otherwise.
    pub fn catch_value(&self) -> Value {
        match &self.payload {
            Some(value) => value.clone(),
            None => Value::Str(self.message.clone()),
        }
    }

    /// Renders the diagnostic: the `Kind: message` line, the stack trace,
    /// and — when the originating source is available — a snippet with a
    /// caret under the offending column.
    pub fn render(&self, source: Option<&str>) -> String {
        let mut out = format!("{}: {}", self.kind, self.message);
        for frame in &self.trace {
            out.push('\n');
            out.push_str(&frame.to_string());
        }
        if let (Some(source), Some(span)) = (source, self.span) {
            if let Some(snippet) = render_snippet(source, span) {
                out.push('\n');
                out.push_str(&snippet);
            }
        }
        out
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Extracts the source line at `span` and draws a caret under the column.
pub fn render_snippet(source: &str, span: Span) -> Option<String> {
    let line_text = source.lines().nth(span.line.checked_sub(1)? as usize)?;
    let caret_pad = " ".repeat(span.column.saturating_sub(1) as usize);
    Some(format!(
        "  {} | {}\n  {} | {}^",
        span.line,
        line_text,
        " ".repeat(span.line.to_string().len()),
        caret_pad
    ))
}

/// A structured parse diagnostic. The parser records these and
/// resynchronizes so a single run can report several.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
    pub span: Span,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }

    /// Folds a batch of parse diagnostics into a single `SyntaxError`.
    pub fn into_error(diagnostics: &[Self], file: &str) -> Box<RunError> {
        let mut message = String::new();
        for (i, d) in diagnostics.iter().enumerate() {
            if i > 0 {
                message.push('\n');
            }
            message.push_str(&format!("{file}:{}: {}", d.span, d.message));
        }
        let first = diagnostics.first().map(|d| d.span);
        let mut err = RunError::syntax(message);
        err.span = first;
        err.file = Some(file.to_owned());
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_display_names() {
        assert_eq!(ErrorKind::Generic.to_string(), "Error");
        assert_eq!(ErrorKind::TypeError.to_string(), "TypeError");
        assert_eq!(ErrorKind::BlockError.to_string(), "BlockError");
    }

    #[test]
    fn renders_trace_lines() {
        let mut err = RunError::type_error("expected int, got string");
        err.trace.push(StackFrame {
            function: "main".to_owned(),
            file: "demo.naab".to_owned(),
            line: 3,
            column: 7,
        });
        assert_eq!(
            err.render(None),
            "TypeError: expected int, got string\n  at main (demo.naab:3:7)"
        );
    }

    #[test]
    fn snippet_points_at_column() {
        let source = "let a = 1\nlet b = oops\n";
        let snippet = render_snippet(source, Span::new(2, 9)).unwrap();
        assert!(snippet.contains("let b = oops"));
        assert!(snippet.ends_with("        ^"));
    }
}
