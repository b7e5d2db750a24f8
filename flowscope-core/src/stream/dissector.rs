//! The stream dissector contract.

use bytes::Bytes;
use compact_str::CompactString;
use smallvec::SmallVec;

use crate::error::ScriptError;
use crate::log::{Level, LogMessage};
use crate::packet::Layer;

use super::{ChunkKey, Direction, StreamChunk};

/// Compiled form of a stream dissector: same shape as a packet dissector,
/// but reading from a reassembled byte stream instead of a layer.
pub trait StreamDissector: Send + Sync {
    /// Opaque identity of the backing script, used for log deduplication.
    fn resource_name(&self) -> &str;

    /// Offer the stream. Reads go through `reader`; bytes left unconsumed
    /// stay buffered and the dissector is called again once more data
    /// arrives (deferred completion). Virtual layers come back in the
    /// result; further chunks and logs go through the context.
    fn dissect_stream(
        &self,
        reader: &mut StreamReader<'_>,
        ctx: &mut StreamContext,
    ) -> Result<StreamDissection, ScriptError>;
}

/// Result of offering a stream to a dissector.
#[derive(Debug, Default)]
pub struct StreamDissection {
    pub accepted: bool,
    pub layers: Vec<Layer>,
}

impl StreamDissection {
    /// The dissector does not recognize this stream; it is never offered
    /// again.
    pub fn decline() -> Self {
        Self {
            accepted: false,
            layers: Vec::new(),
        }
    }

    /// Claim the stream without producing output this round.
    pub fn accept() -> Self {
        Self {
            accepted: true,
            layers: Vec::new(),
        }
    }

    /// Claim the stream and synthesize virtual layers.
    pub fn layers(layers: Vec<Layer>) -> Self {
        Self {
            accepted: true,
            layers,
        }
    }
}

/// Cursor over the contiguous reassembled bytes of one stream.
///
/// "Read up to N" never blocks; `read_exact` returns `None` when the bytes
/// are not buffered yet, which is the deferred-completion signal - return
/// without consuming and the call is retried after the next chunk lands.
pub struct StreamReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> StreamReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes still readable.
    pub fn available(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Read up to `max` bytes, possibly fewer, possibly none.
    pub fn read(&mut self, max: usize) -> &'a [u8] {
        let end = self.pos.saturating_add(max).min(self.data.len());
        let out = &self.data[self.pos..end];
        self.pos = end;
        out
    }

    /// Read exactly `n` bytes, or `None` if they are not available yet.
    pub fn read_exact(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.available() < n {
            return None;
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Some(out)
    }

    /// Look at the next `n` bytes without consuming them.
    pub fn peek(&self, n: usize) -> Option<&'a [u8]> {
        if self.available() < n {
            return None;
        }
        Some(&self.data[self.pos..self.pos + n])
    }

    /// Bytes consumed so far; the worker drains exactly this much.
    pub fn consumed(&self) -> usize {
        self.pos
    }
}

/// Per-offer context handed to a stream dissector.
pub struct StreamContext {
    key: ChunkKey,
    origin_seq: u32,
    resource: CompactString,
    chunks: SmallVec<[StreamChunk; 2]>,
    logs: SmallVec<[LogMessage; 2]>,
    next_index: u32,
}

impl StreamContext {
    pub(crate) fn new(
        key: ChunkKey,
        origin_seq: u32,
        next_index: u32,
        resource: &str,
    ) -> Self {
        Self {
            key,
            origin_seq,
            resource: CompactString::from(resource),
            chunks: SmallVec::new(),
            logs: SmallVec::new(),
            next_index,
        }
    }

    /// Identity of the stream being dissected.
    pub fn key(&self) -> &ChunkKey {
        &self.key
    }

    /// Sequence of the packet whose chunk triggered this offer.
    pub fn origin_seq(&self) -> u32 {
        self.origin_seq
    }

    /// Report a log record attributed to the current dissector.
    pub fn log(&mut self, level: Level, message: impl Into<String>) {
        self.logs.push(LogMessage::new(
            level,
            "stream",
            self.resource.clone(),
            message,
        ));
    }

    /// Emit a chunk onto another (or the same) stream; it re-enters the
    /// dispatcher carrying the origin sequence currently being processed.
    pub fn emit_chunk(
        &mut self,
        namespace: impl Into<CompactString>,
        stream_id: impl Into<CompactString>,
        direction: Direction,
        payload: Bytes,
    ) {
        let mut chunk = StreamChunk::new(ChunkKey::new(namespace, stream_id, direction), payload);
        chunk.origin_seq = self.origin_seq;
        chunk.index = self.next_index;
        self.next_index += 1;
        self.chunks.push(chunk);
    }

    pub(crate) fn next_index(&self) -> u32 {
        self.next_index
    }

    pub(crate) fn take_chunks(&mut self) -> Vec<StreamChunk> {
        std::mem::take(&mut self.chunks).into_vec()
    }

    pub(crate) fn take_logs(&mut self) -> Vec<LogMessage> {
        std::mem::take(&mut self.logs).into_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test 1: read_exact defers until enough bytes are buffered
    #[test]
    fn test_reader_deferred_completion() {
        let mut reader = StreamReader::new(b"abc");
        assert!(reader.read_exact(4).is_none());
        assert_eq!(reader.consumed(), 0);
        assert_eq!(reader.read_exact(3).unwrap(), b"abc");
        assert_eq!(reader.consumed(), 3);
        assert_eq!(reader.available(), 0);
    }

    // Test 2: read returns up to max
    #[test]
    fn test_reader_read_up_to() {
        let mut reader = StreamReader::new(b"abcdef");
        assert_eq!(reader.read(4), b"abcd");
        assert_eq!(reader.read(4), b"ef");
        assert_eq!(reader.read(4), b"");
    }

    // Test 3: peek does not consume
    #[test]
    fn test_reader_peek() {
        let mut reader = StreamReader::new(b"xyz");
        assert_eq!(reader.peek(2).unwrap(), b"xy");
        assert_eq!(reader.consumed(), 0);
        assert_eq!(reader.read(2), b"xy");
    }

    // Test 4: emitted chunks inherit the origin sequence being processed
    #[test]
    fn test_context_chunk_stamping() {
        let key = ChunkKey::new("eth", "tcp:4", Direction::ToClient);
        let mut ctx = StreamContext::new(key, 9, 3, "tls.js");
        ctx.emit_chunk("eth", "tls:4", Direction::ToClient, Bytes::from_static(b"z"));

        let chunks = ctx.take_chunks();
        assert_eq!(chunks[0].origin_seq, 9);
        assert_eq!(chunks[0].index, 3);
        assert_eq!(ctx.next_index(), 4);
    }
}
