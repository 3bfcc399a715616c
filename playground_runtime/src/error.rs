//! Error types surfaced by a run.

use serde::Serialize;
use thiserror::Error;

use crate::safety::SafetyViolation;

/// An error thrown by user code, classified by constructor name.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{name}: {message}")]
pub struct ScriptError {
    pub name: String,
    pub message: String,
    /// 1-based source line, when known.
    pub line: Option<usize>,
}

impl ScriptError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            line: None,
        }
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new("SyntaxError", message)
    }

    pub fn reference(identifier: &str) -> Self {
        Self::new("ReferenceError", format!("{} is not defined", identifier))
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    pub fn range(message: impl Into<String>) -> Self {
        Self::new("RangeError", message)
    }

    /// Attaches a line number unless one is already known.
    pub fn at_line(mut self, line: usize) -> Self {
        if self.line.is_none() {
            self.line = Some(line);
        }
        self
    }

    /// Console-style rendering, e.g. `TypeError: x is not a function (line 3)`.
    pub fn format_entry(&self) -> String {
        match self.line {
            Some(line) => format!("{}: {} (line {})", self.name, self.message, line),
            None => format!("{}: {}", self.name, self.message),
        }
    }
}

/// Why a run did not succeed.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RunError {
    /// User code threw.
    #[error("{0}")]
    Script(ScriptError),
    /// The wall-clock timeout elapsed first.
    #[error("Execution timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    /// The safety check refused to run the code.
    #[error("{0}")]
    Rejected(SafetyViolation),
}

impl RunError {
    /// The error as recorded on the execution timeline.
    pub fn as_script_error(&self) -> ScriptError {
        match self {
            Self::Script(e) => e.clone(),
            Self::Timeout { .. } => ScriptError::new("TimeoutError", self.to_string()),
            Self::Rejected(v) => ScriptError::new("SafetyError", v.to_string()),
        }
    }

    pub fn format_entry(&self) -> String {
        match self {
            Self::Script(e) => e.format_entry(),
            other => other.as_script_error().format_entry(),
        }
    }
}
