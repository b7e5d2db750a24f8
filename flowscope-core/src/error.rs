//! Error types for flowscope-core.
//!
//! - [`enum@Error`] - Main error enum that wraps all error types
//! - [`SourceError`] - Errors from the capture source (configuration, I/O)
//! - [`ScriptError`] - Runtime faults raised by compiled dissectors/filters
//!
//! Pipeline-internal faults ([`ScriptError`]) are never fatal: they are
//! converted into host-facing log records and the pipeline continues.

use thiserror::Error;

/// Main error type for flowscope-core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Error from the capture source.
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// Runtime fault from a compiled dissector or filter.
    #[error("script error: {0}")]
    Script(#[from] ScriptError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by capture sources.
///
/// These surface synchronously from the setter or `start()` call that caused
/// them; mid-capture faults go through the source's log sink instead.
#[derive(Error, Debug)]
pub enum SourceError {
    /// Capture file not found.
    #[error("capture file not found: {path}")]
    FileNotFound { path: String },

    /// Capture data is not a recognized format.
    #[error("invalid capture format: {reason}")]
    InvalidFormat { reason: String },

    /// A BPF-style filter expression was rejected.
    #[error("invalid capture filter {expr:?}: {reason}")]
    InvalidFilter { expr: String, reason: String },

    /// The named interface does not exist or cannot be opened.
    #[error("interface unavailable: {name}")]
    InterfaceUnavailable { name: String },

    /// `start()` was called while a capture is already running.
    #[error("capture already running")]
    AlreadyStarted,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A runtime fault raised by a compiled dissector or filter.
///
/// Carries optional source coordinates pointing into the user script; these
/// feed the log deduplication key so a dissector failing identically on every
/// packet produces one host-visible record per delivery window.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct ScriptError {
    pub message: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub start: Option<u32>,
    pub end: Option<u32>,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            column: None,
            start: None,
            end: None,
        }
    }

    /// Attach a line/column position.
    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    /// Attach a byte span within the script source.
    pub fn span(mut self, start: u32, end: u32) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_error_display() {
        let err = ScriptError::new("undefined variable `x`").at(12, 4);
        assert_eq!(err.to_string(), "undefined variable `x`");
        assert_eq!(err.line, Some(12));
        assert_eq!(err.column, Some(4));
    }

    #[test]
    fn test_source_error_into_error() {
        let err: Error = SourceError::AlreadyStarted.into();
        assert!(matches!(err, Error::Source(SourceError::AlreadyStarted)));
    }
}
