//! Per-stream worker threads.
//!
//! Each worker owns an inbox of released chunks and the state of every
//! stream routed to it. State is worker-local: the stable hash routing in
//! the dispatcher guarantees a stream never migrates, which is what makes
//! the per-stream ordering contract cheap to enforce.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use tracing::debug;

use crate::log::LogMessage;

use super::dispatcher::DispatchShared;
use super::{ChunkKey, StreamChunk, StreamContext, StreamReader};

/// Closable FIFO of released chunks, one per worker.
pub(crate) struct Inbox {
    state: Mutex<InboxState>,
    cond: Condvar,
}

struct InboxState {
    items: VecDeque<StreamChunk>,
    closed: bool,
}

impl Inbox {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(InboxState {
                items: VecDeque::new(),
                closed: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// A push after close drops the chunk: un-consumable bytes are discarded
    /// at shutdown.
    pub(crate) fn push(&self, chunk: StreamChunk) {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return;
        }
        state.items.push_back(chunk);
        drop(state);
        self.cond.notify_one();
    }

    fn pop(&self) -> Option<StreamChunk> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(chunk) = state.items.pop_front() {
                return Some(chunk);
            }
            if state.closed {
                return None;
            }
            state = self.cond.wait(state).unwrap();
        }
    }

    pub(crate) fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        drop(state);
        self.cond.notify_all();
    }
}

/// Worker-local state of one stream.
struct StreamState {
    buffer: Vec<u8>,
    /// Index of the dissector that claimed the stream.
    claimed: Option<usize>,
    declined: Vec<bool>,
    /// Origin sequence of the chunk currently (or last) processed.
    last_origin: u32,
    /// Emission index counter carried across offers.
    next_index: u32,
}

impl StreamState {
    fn new(dissectors: usize) -> Self {
        Self {
            buffer: Vec::new(),
            claimed: None,
            declined: vec![false; dissectors],
            last_origin: 0,
            next_index: 0,
        }
    }
}

pub(crate) fn spawn(shared: Arc<DispatchShared>, index: usize) -> JoinHandle<()> {
    thread::Builder::new()
        .name(format!("stream-{index}"))
        .spawn(move || run(shared, index))
        .expect("spawn stream worker")
}

fn run(shared: Arc<DispatchShared>, index: usize) {
    debug!(worker = index, "stream worker up");
    let mut streams: HashMap<ChunkKey, StreamState> = HashMap::new();

    while let Some(chunk) = shared.inboxes[index].pop() {
        let state = streams
            .entry(chunk.key.clone())
            .or_insert_with(|| StreamState::new(shared.dissectors.len()));
        state.buffer.extend_from_slice(&chunk.payload);
        state.last_origin = chunk.origin_seq;
        progress(&shared, &chunk.key, state);
    }
    debug!(worker = index, streams = streams.len(), "stream worker down");
}

enum Offer {
    Declined,
    Accepted { consumed: usize },
}

/// Drive a stream until its dissector stops consuming.
fn progress(shared: &DispatchShared, key: &ChunkKey, state: &mut StreamState) {
    loop {
        let claimed = match state.claimed {
            Some(idx) => idx,
            None => match claim(shared, key, state) {
                Some(idx) => idx,
                None => return,
            },
        };
        match offer(shared, key, state, claimed, true) {
            Offer::Accepted { consumed } if consumed > 0 => continue,
            _ => return,
        }
    }
}

/// Offer the stream to every undecided dissector in declared order; the
/// first acceptor claims it exclusively.
fn claim(shared: &DispatchShared, key: &ChunkKey, state: &mut StreamState) -> Option<usize> {
    for idx in 0..shared.dissectors.len() {
        if state.declined[idx] {
            continue;
        }
        match offer(shared, key, state, idx, false) {
            Offer::Accepted { .. } => {
                state.claimed = Some(idx);
                return Some(idx);
            }
            Offer::Declined => state.declined[idx] = true,
        }
    }
    None
}

fn offer(
    shared: &DispatchShared,
    key: &ChunkKey,
    state: &mut StreamState,
    idx: usize,
    claimed: bool,
) -> Offer {
    let dissector = &shared.dissectors[idx];
    let mut ctx = StreamContext::new(
        key.clone(),
        state.last_origin,
        state.next_index,
        dissector.resource_name(),
    );

    let (outcome, consumed) = {
        let mut reader = StreamReader::new(&state.buffer);
        let outcome = dissector.dissect_stream(&mut reader, &mut ctx);
        (outcome, reader.consumed())
    };

    state.next_index = ctx.next_index();
    for log in ctx.take_logs() {
        (shared.log_cb)(log);
    }

    match outcome {
        Ok(result) if result.accepted => {
            state.buffer.drain(..consumed);
            let chunks = ctx.take_chunks();
            if !result.layers.is_empty() {
                (shared.vp_layers_cb)(result.layers);
            }
            if !chunks.is_empty() {
                shared.reinject(chunks);
            }
            Offer::Accepted { consumed }
        }
        Ok(_) => Offer::Declined,
        Err(err) => {
            (shared.log_cb)(LogMessage::from_script_error(
                "stream",
                dissector.resource_name(),
                &err,
            ));
            // A claimed dissector keeps its claim; an undecided one is
            // dropped from further offers on this stream.
            if claimed {
                Offer::Accepted { consumed: 0 }
            } else {
                Offer::Declined
            }
        }
    }
}
