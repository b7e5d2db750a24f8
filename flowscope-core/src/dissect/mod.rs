//! Packet dissection: the dissector contract and its worker pool.
//!
//! A dissector is the compiled form of a user script: a pure transformer from
//! one layer to zero or more child layers, stream chunks and log entries.
//! Dissectors are plain configured collaborators - the runtime that compiles
//! them is external, and the chain carries script identity only as the opaque
//! `resource_name`.
//!
//! ## Chain semantics
//!
//! Dissection walks a packet's layer tree breadth-first. Every dissector is
//! offered each visited layer in declared order; it either declines or
//! accepts, producing children that are appended and themselves enqueued for
//! further offers within the same packet. A dissector that returns `Err` is
//! reported as an error-level log record and skipped for that layer - the
//! packet is never dropped.

mod worker;

pub use worker::{DissectorContext, DissectorWorker, PacketCallback, StreamsCallback};

use bytes::Bytes;
use compact_str::CompactString;
use smallvec::SmallVec;

use crate::error::ScriptError;
use crate::log::{Level, LogMessage};
use crate::packet::Layer;
use crate::stream::{ChunkKey, Direction, StreamChunk};

/// Compiled form of a packet dissector.
pub trait Dissector: Send + Sync {
    /// Opaque identity of the backing script, used for log deduplication.
    fn resource_name(&self) -> &str;

    /// Offer one layer. Return [`Dissection::decline`] to pass, or an
    /// accepting result carrying child layers; chunks and logs go through the
    /// context.
    fn dissect(&self, layer: &Layer, ctx: &mut DissectContext)
        -> Result<Dissection, ScriptError>;
}

/// Result of offering a layer to a dissector.
#[derive(Debug, Default)]
pub struct Dissection {
    pub accepted: bool,
    pub children: Vec<Layer>,
}

impl Dissection {
    /// The dissector does not recognize this layer.
    pub fn decline() -> Self {
        Self {
            accepted: false,
            children: Vec::new(),
        }
    }

    /// The dissector recognizes the layer but produces no children.
    pub fn accept() -> Self {
        Self {
            accepted: true,
            children: Vec::new(),
        }
    }

    /// The dissector produced child layers.
    pub fn children(children: Vec<Layer>) -> Self {
        Self {
            accepted: true,
            children,
        }
    }
}

/// Per-packet dissection context handed to every dissector call.
///
/// Collects stream chunks (with consecutive intra-packet indices) and log
/// records; the worker forwards both once the packet completes.
pub struct DissectContext {
    resource: CompactString,
    chunks: SmallVec<[StreamChunk; 4]>,
    logs: SmallVec<[LogMessage; 2]>,
    next_index: u32,
}

impl DissectContext {
    pub(crate) fn new() -> Self {
        Self {
            resource: CompactString::default(),
            chunks: SmallVec::new(),
            logs: SmallVec::new(),
            next_index: 0,
        }
    }

    pub(crate) fn enter(&mut self, resource: &str) {
        self.resource = CompactString::from(resource);
    }

    /// Report a log record attributed to the current dissector.
    pub fn log(&mut self, level: Level, message: impl Into<String>) {
        self.logs.push(LogMessage::new(
            level,
            "dissector",
            self.resource.clone(),
            message,
        ));
    }

    /// Emit a payload fragment onto a stream. Chunks of one packet receive
    /// consecutive emission indices; the origin sequence is stamped later,
    /// when the packet is committed to the store.
    pub fn emit_chunk(
        &mut self,
        namespace: impl Into<CompactString>,
        stream_id: impl Into<CompactString>,
        direction: Direction,
        payload: Bytes,
    ) {
        let mut chunk = StreamChunk::new(ChunkKey::new(namespace, stream_id, direction), payload);
        chunk.index = self.next_index;
        self.next_index += 1;
        self.chunks.push(chunk);
    }

    pub(crate) fn take_chunks(&mut self) -> Vec<StreamChunk> {
        std::mem::take(&mut self.chunks).into_vec()
    }

    pub(crate) fn take_logs(&mut self) -> Vec<LogMessage> {
        std::mem::take(&mut self.logs).into_vec()
    }
}
