//! Error taxonomy for the BCL core.
//!
//! Errors never unwind as panics.  They are rendered into
//! [`Signal::Error`](super::interp::Signal::Error) and recorded as the
//! interpreter's last error.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    /// Malformed block nesting (strict parsing only).
    #[error("syntax error at line {line}: {message}")]
    Syntax { line: usize, message: String },

    /// Wrong arity or operand type for a construct or command.
    #[error("{0}")]
    Argument(String),

    /// Failure while running an otherwise well-formed command.
    #[error("{0}")]
    Runtime(String),

    /// No built-in, procedure, or extension command with this name.
    #[error("invalid command name \"{0}\"")]
    UnknownCommand(String),

    #[error("Maximum scope depth exceeded")]
    ScopeDepth,

    #[error("maximum recursion depth exceeded (limit {0})")]
    RecursionLimit(usize),

    #[error("couldn't read file \"{path}\": {reason}")]
    File { path: String, reason: String },
}

impl ScriptError {
    pub fn argument(msg: impl Into<String>) -> Self {
        ScriptError::Argument(msg.into())
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        ScriptError::Runtime(msg.into())
    }

    /// Build a file error from an I/O failure, using the C library wording
    /// for the common cases.
    pub fn file(path: &str, err: &std::io::Error) -> Self {
        let reason = match err.kind() {
            std::io::ErrorKind::NotFound => "no such file or directory".to_owned(),
            std::io::ErrorKind::PermissionDenied => "permission denied".to_owned(),
            _ => err.to_string(),
        };
        ScriptError::File { path: path.to_owned(), reason }
    }
}
