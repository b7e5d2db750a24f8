//! Stream reassembly and virtual packet synthesis.
//!
//! Packet dissectors emit [`StreamChunk`]s; chunks sharing a
//! (namespace, stream-id, direction) key form one totally ordered byte
//! stream. The [`StreamDispatcher`] restores order-key order across the
//! concurrently finishing dissection workers, routes each stream to a fixed
//! worker, and runs [`StreamDissector`]s over the reassembled bytes. Stream
//! dissectors may emit further chunks (re-injected into the dispatcher) and
//! virtual layers, which are wrapped into first-class packets and pushed back
//! into the main queue - that re-entry is what lets filters match synthesized
//! layers with no special case.
//!
//! ## Ordering
//!
//! Every dissected packet reports its chunks to the dispatcher exactly once,
//! chunks or not. The dispatcher tracks the *frontier* - the greatest
//! sequence S with every sequence in `1..=S` reported - and holds chunks
//! originating beyond it, releasing them in `(origin_seq, index)` order as
//! the frontier advances. A stream is always handled by the same worker
//! (stable hash routing), so the worker's FIFO inbox preserves release
//! order.

mod chunk;
mod dispatcher;
mod dissector;
mod worker;

pub use chunk::{ChunkKey, Direction, StreamChunk};
pub use dispatcher::{StreamDispatcher, StreamDispatcherContext, VpLayersCallback};
pub use dissector::{StreamContext, StreamDissection, StreamDissector, StreamReader};
