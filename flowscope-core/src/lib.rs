//! # flowscope-core
//!
//! Concurrent capture-and-dissection core for live packet analysis.
//!
//! This crate is the engine behind a live network analyzer: it ingests raw
//! frames from a capture source, runs them through a chain of user-supplied
//! dissectors on a worker pool, reassembles stream-oriented payloads, stores
//! every resulting packet under a dense sequence number, and evaluates named
//! filters over that store while capture continues.
//!
//! ## Pipeline
//!
//! ```text
//! source -> Session::analyze -> PacketQueue -> DissectorWorker (pool)
//!        -> { PacketStore, StreamDispatcher } -> stream workers
//!        -> PacketQueue (virtual packets) -> ...
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                         flowscope-core                              |
//! +---------------------------------------------------------------------+
//! |  packet/   - Packet, Layer, AttrValue                               |
//! |  queue/    - closable MPMC packet queue                             |
//! |  store/    - sequence-indexed packet store, sequence sets           |
//! |  dissect/  - Dissector trait, dissection worker pool                |
//! |  stream/   - chunk reordering, stream workers, virtual packets      |
//! |  filter/   - Filter trait, filter worker groups                     |
//! |  session/  - wiring, control surface, coalesced host signals        |
//! |  source/   - CaptureSource trait, offline PCAP replay               |
//! |  log/      - host-facing log records with dedup keys                |
//! |  error/    - error types                                            |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use flowscope_core::prelude::*;
//! use flowscope_core::source::FileReplaySource;
//!
//! let config = SessionConfig::new("eth");
//! let source = Box::new(FileReplaySource::new("capture.pcap"));
//! let mut session = Session::new(config, source);
//!
//! session.set_status_callback(Box::new(|status| {
//!     println!("{} packets captured", status.packets);
//! }));
//! session.start().unwrap();
//! ```
//!
//! Dissectors, stream dissectors, and filters are compiled externally and
//! handed to the session as trait objects; the core never interprets frame
//! bytes itself.

pub mod dissect;
pub mod error;
pub mod filter;
pub mod log;
pub mod packet;
pub mod prelude;
pub mod queue;
pub mod session;
pub mod source;
pub mod store;
pub mod stream;

pub use dissect::{DissectContext, Dissection, Dissector};
pub use error::{Error, Result, ScriptError, SourceError};
pub use filter::{Filter, FilterContext};
pub use log::{Level, LogCallback, LogKey, LogMessage};
pub use packet::{AttrValue, Layer, Packet};
pub use queue::PacketQueue;
pub use session::{Session, SessionConfig, StatusReport};
pub use source::{CaptureSource, Device, FileReplaySource, SourceSink};
pub use store::{PacketStore, SequenceSet};
pub use stream::{
    ChunkKey, Direction, StreamChunk, StreamContext, StreamDispatcher, StreamDissection,
    StreamDissector, StreamReader,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
