//! Runtime faults.

use thiserror::Error;

/// One line of a stack trace: the source line and the function executing.
#[derive(Debug, Clone)]
pub struct TraceFrame {
    pub line: u32,
    /// `None` for the top-level script.
    pub function: Option<String>,
}

/// A fatal runtime fault: type errors, undefined names, bad calls, frame
/// overflow. Fatal to the current `interpret` invocation, never to the host.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RuntimeError {
    pub message: String,
    /// Most recent call first.
    pub trace: Vec<TraceFrame>,
}

impl RuntimeError {
    /// Write the message and stack trace to stderr, one line per frame.
    pub fn report(&self) {
        eprintln!("{}", self.message);
        for frame in &self.trace {
            match &frame.function {
                Some(name) => eprintln!("[line {}] in {}()", frame.line, name),
                None => eprintln!("[line {}] in script", frame.line),
            }
        }
    }
}
