//! Compile-time error types.

use std::fmt;

use thiserror::Error;

/// One located compile error, rendered exactly as the toolchain reports it:
/// `[line N] Error at 'lexeme': message.`
#[derive(Debug, Clone, Error)]
#[error("[line {line}] Error{location}: {message}")]
pub struct CompileError {
    pub line: u32,
    /// `" at end"`, `" at 'lexeme'"`, or empty for scanner errors.
    pub location: String,
    pub message: String,
}

/// Every error collected in one compile, in source order.
#[derive(Debug, Clone)]
pub struct CompileErrors(pub Vec<CompileError>);

impl fmt::Display for CompileErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, error) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileErrors {}
