//! Chunk reordering and routing.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::debug;

use crate::log::LogCallback;
use crate::packet::Layer;

use super::worker::{self, Inbox};
use super::{ChunkKey, StreamChunk, StreamDissector};

/// Receives virtual layers synthesized by stream dissectors; the session
/// wraps each into a packet and pushes it back into the main queue.
pub type VpLayersCallback = Box<dyn Fn(Vec<Layer>) + Send + Sync>;

/// Configuration of the stream dispatcher.
pub struct StreamDispatcherContext {
    pub threads: usize,
    pub dissectors: Arc<[Box<dyn StreamDissector>]>,
    pub vp_layers_cb: VpLayersCallback,
    pub log_cb: LogCallback,
}

/// State shared between the dispatcher facade and its stream workers.
pub(crate) struct DispatchShared {
    pub(crate) dissectors: Arc<[Box<dyn StreamDissector>]>,
    pub(crate) vp_layers_cb: VpLayersCallback,
    pub(crate) log_cb: LogCallback,
    pub(crate) inboxes: Vec<Inbox>,
    route: Mutex<RouteState>,
}

struct RouteState {
    /// Greatest sequence with every sequence in `1..=frontier` reported.
    frontier: u32,
    /// Sequences reported ahead of the frontier.
    reported: BTreeSet<u32>,
    /// Chunks originating beyond the frontier, ordered by order key.
    held: HashMap<ChunkKey, BTreeMap<(u32, u32), StreamChunk>>,
}

impl DispatchShared {
    /// Route a chunk to its stream's fixed worker.
    fn deliver(&self, chunk: StreamChunk) {
        let idx = route_index(&chunk.key, self.inboxes.len());
        self.inboxes[idx].push(chunk);
    }

    /// Re-enter chunks emitted by a stream worker. Their origin sequence is
    /// already at or below the frontier, so they bypass the hold buffer; the
    /// route lock serializes delivery against concurrent releases.
    pub(crate) fn reinject(&self, chunks: Vec<StreamChunk>) {
        let _route = self.route.lock().unwrap();
        for chunk in chunks {
            self.deliver(chunk);
        }
    }
}

/// Orders stream chunks by origin sequence and fans them out to a fixed pool
/// of stream workers.
pub struct StreamDispatcher {
    shared: Arc<DispatchShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl StreamDispatcher {
    pub fn new(ctx: StreamDispatcherContext) -> Self {
        let threads = ctx.threads.max(1);
        let shared = Arc::new(DispatchShared {
            dissectors: ctx.dissectors,
            vp_layers_cb: ctx.vp_layers_cb,
            log_cb: ctx.log_cb,
            inboxes: (0..threads).map(|_| Inbox::new()).collect(),
            route: Mutex::new(RouteState {
                frontier: 0,
                reported: BTreeSet::new(),
                held: HashMap::new(),
            }),
        });

        let workers = (0..threads)
            .map(|i| worker::spawn(Arc::clone(&shared), i))
            .collect();

        Self {
            shared,
            workers: Mutex::new(workers),
        }
    }

    /// Report the chunks of one dissected packet. This is also the boundary
    /// signal: it must be called for every sequence, with an empty list when
    /// the packet emitted nothing, or the frontier stalls.
    pub fn insert(&self, origin_seq: u32, chunks: Vec<StreamChunk>) {
        let mut route = self.shared.route.lock().unwrap();
        let state = &mut *route;

        for mut chunk in chunks {
            chunk.origin_seq = origin_seq;
            state
                .held
                .entry(chunk.key.clone())
                .or_default()
                .insert(chunk.order_key(), chunk);
        }

        state.reported.insert(origin_seq);
        while state.reported.remove(&(state.frontier + 1)) {
            state.frontier += 1;
        }

        // Release everything at or below the new frontier, per key in order
        // key order. Delivery happens under the route lock so concurrent
        // releases cannot interleave a stream's chunks out of order.
        let frontier = state.frontier;
        let mut released = Vec::new();
        state.held.retain(|_, pending| {
            let tail = pending.split_off(&(frontier + 1, 0));
            let head = std::mem::replace(pending, tail);
            released.extend(head.into_values());
            !pending.is_empty()
        });
        released.sort_by_key(StreamChunk::order_key);
        for chunk in released {
            self.shared.deliver(chunk);
        }
    }

    /// Re-enter chunks emitted by stream dissection.
    pub fn reinject(&self, chunks: Vec<StreamChunk>) {
        self.shared.reinject(chunks);
    }

    /// Close all inboxes and join the workers. Held bytes that never became
    /// consumable are discarded. Idempotent.
    pub fn close(&self) {
        for inbox in &self.shared.inboxes {
            inbox.close();
        }
        let mut workers = self.workers.lock().unwrap();
        if !workers.is_empty() {
            debug!(workers = workers.len(), "stream dispatcher closing");
        }
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for StreamDispatcher {
    fn drop(&mut self) {
        self.close();
    }
}

fn route_index(key: &ChunkKey, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % workers as u64) as usize
}
