//! Host-facing log records.
//!
//! Dissectors and filters report diagnostics as [`LogMessage`] values. The
//! session collapses repeats through the stable [`LogKey`] so that a dissector
//! failing identically on every packet reaches the host at most once per
//! delivery window.

use std::sync::Arc;

use compact_str::CompactString;

use crate::error::ScriptError;

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    /// Return a string representation of the level.
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }
}

/// A single diagnostic record produced inside the pipeline.
#[derive(Debug, Clone)]
pub struct LogMessage {
    pub level: Level,
    pub message: String,
    /// Which worker kind produced the record ("dissector", "filter", "source").
    pub domain: CompactString,
    /// Resource name of the script that produced the record.
    pub resource: CompactString,
    /// Source coordinates within the script, when known.
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub start: Option<u32>,
    pub end: Option<u32>,
}

impl LogMessage {
    pub fn new(
        level: Level,
        domain: impl Into<CompactString>,
        resource: impl Into<CompactString>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level,
            message: message.into(),
            domain: domain.into(),
            resource: resource.into(),
            line: None,
            column: None,
            start: None,
            end: None,
        }
    }

    /// Build an error-level record from a script fault, carrying its source
    /// coordinates.
    pub fn from_script_error(
        domain: impl Into<CompactString>,
        resource: impl Into<CompactString>,
        err: &ScriptError,
    ) -> Self {
        Self {
            level: Level::Error,
            message: err.message.clone(),
            domain: domain.into(),
            resource: resource.into(),
            line: err.line,
            column: err.column,
            start: err.start,
            end: err.end,
        }
    }

    /// Stable deduplication key: repeated records from the same source
    /// location collapse to the latest instance.
    pub fn key(&self) -> LogKey {
        LogKey {
            domain: self.domain.clone(),
            resource: self.resource.clone(),
            line: self.line,
            message: self.message.clone(),
        }
    }
}

/// Deduplication key of a [`LogMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogKey {
    pub domain: CompactString,
    pub resource: CompactString,
    pub line: Option<u32>,
    pub message: String,
}

/// Shared sink for log records flowing out of worker pools.
pub type LogCallback = Arc<dyn Fn(LogMessage) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_as_str() {
        assert_eq!(Level::Debug.as_str(), "debug");
        assert_eq!(Level::Error.as_str(), "error");
    }

    #[test]
    fn test_key_ignores_column() {
        // Same location, different columns: one key.
        let mut a = LogMessage::new(Level::Error, "dissector", "http.js", "boom");
        let mut b = a.clone();
        a.line = Some(3);
        a.column = Some(1);
        b.line = Some(3);
        b.column = Some(9);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_key_distinguishes_messages() {
        let a = LogMessage::new(Level::Error, "dissector", "http.js", "boom");
        let b = LogMessage::new(Level::Error, "dissector", "http.js", "bang");
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_from_script_error_carries_coordinates() {
        let err = ScriptError::new("bad index").at(7, 2).span(40, 49);
        let msg = LogMessage::from_script_error("filter", "even.js", &err);
        assert_eq!(msg.level, Level::Error);
        assert_eq!(msg.line, Some(7));
        assert_eq!(msg.start, Some(40));
        assert_eq!(msg.end, Some(49));
    }
}
