//! Convenient re-exports for common usage.
//!
//! # Example
//!
//! ```rust,no_run
//! use flowscope_core::prelude::*;
//! use flowscope_core::source::FileReplaySource;
//!
//! let mut session = Session::new(
//!     SessionConfig::new("eth"),
//!     Box::new(FileReplaySource::new("capture.pcap")),
//! );
//! session.start().unwrap();
//! ```

// Session types
pub use crate::session::{Session, SessionConfig, StatusReport};

// Data model
pub use crate::packet::{AttrValue, Layer, Packet};

// Dissection
pub use crate::dissect::{DissectContext, Dissection, Dissector};

// Streams
pub use crate::stream::{
    ChunkKey, Direction, StreamChunk, StreamContext, StreamDissection, StreamDissector,
    StreamReader,
};

// Filters
pub use crate::filter::{Filter, FilterContext};

// Sources
pub use crate::source::{CaptureSource, Device, SourceSink};

// Logging and errors
pub use crate::error::{Error, Result, ScriptError, SourceError};
pub use crate::log::{Level, LogMessage};
