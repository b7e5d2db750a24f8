//! Session wiring and control surface.
//!
//! A [`Session`] owns the whole pipeline: the packet queue, the store, the
//! dissection worker pool, the stream dispatcher, the named filter groups and
//! the capture source. External control translates into pipeline mutations
//! here, and everything the pipeline wants to tell the host funnels into two
//! coalesced signals - "status changed" and "log arrived".

mod notify;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;

use compact_str::CompactString;
use tracing::debug;

use crate::dissect::{DissectorContext, DissectorWorker, Dissector};
use crate::error::SourceError;
use crate::filter::{Filter, FilterGroupContext, FilterWorkerGroup};
use crate::log::{LogCallback, LogKey, LogMessage};
use crate::packet::{Layer, Packet};
use crate::queue::PacketQueue;
use crate::source::{CaptureSource, Device, SourceSink};
use crate::store::{PacketStore, SequenceSet};
use crate::stream::{StreamDispatcher, StreamDispatcherContext, StreamDissector};

use notify::{Notifier, Signal};

/// Host callback for the coalesced status signal.
pub type StatusCallback = Box<dyn Fn(StatusReport) + Send + Sync>;

/// Host callback for the coalesced, deduplicated log signal.
pub type LogBatchCallback = Box<dyn Fn(Vec<LogMessage>) + Send + Sync>;

/// Payload of the status signal.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub capturing: bool,
    /// `store.max_sequence()` at delivery time.
    pub packets: u32,
    /// Result view sizes per installed filter name.
    pub filtered: HashMap<String, u32>,
}

/// Session construction parameters.
pub struct SessionConfig {
    /// Namespace of the session's raw root layer.
    pub namespace: String,
    /// Configured thread count; 0 means the machine's available parallelism.
    /// One core is left for the control thread: each pool gets
    /// `max(1, threads - 1)` workers.
    pub threads: usize,
    pub dissectors: Vec<Box<dyn Dissector>>,
    pub stream_dissectors: Vec<Box<dyn StreamDissector>>,
}

impl SessionConfig {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            threads: 0,
            dissectors: Vec::new(),
            stream_dissectors: Vec::new(),
        }
    }
}

/// State reachable from worker closures and the notifier thread.
pub(crate) struct SessionShared {
    namespace: CompactString,
    queue: Arc<PacketQueue>,
    store: Arc<PacketStore>,
    capturing: AtomicBool,
    recent_logs: Mutex<HashMap<LogKey, LogMessage>>,
    filter_views: Mutex<HashMap<String, Arc<SequenceSet>>>,
    status_cb: Mutex<Option<StatusCallback>>,
    log_batch_cb: Mutex<Option<LogBatchCallback>>,
    pub(crate) signal: Signal,
}

impl SessionShared {
    /// Record a log message under its dedup key and raise the log signal.
    /// Repeats from the same source location collapse to the latest instance.
    fn log(&self, message: LogMessage) {
        self.recent_logs
            .lock()
            .unwrap()
            .insert(message.key(), message);
        self.signal.raise_logs();
    }

    fn analyze(&self, mut packet: Packet) {
        // Wrap in the namespace root layer unless the source already did.
        if packet.layers.is_empty() {
            packet.layers.push(
                Layer::new(self.namespace.clone(), "Raw Layer").with_payload(packet.payload.clone()),
            );
        }
        self.queue.push(packet);
    }

    fn status_report(&self) -> StatusReport {
        let filtered = self
            .filter_views
            .lock()
            .unwrap()
            .iter()
            .map(|(name, set)| (name.clone(), set.len()))
            .collect();
        StatusReport {
            capturing: self.capturing.load(Ordering::SeqCst),
            packets: self.store.max_sequence(),
            filtered,
        }
    }

    pub(crate) fn deliver_status(&self) {
        let cb = self.status_cb.lock().unwrap();
        if let Some(cb) = cb.as_ref() {
            cb(self.status_report());
        }
    }

    pub(crate) fn deliver_logs(&self) {
        let cb = self.log_batch_cb.lock().unwrap();
        let Some(cb) = cb.as_ref() else {
            // No consumer: keep the dedup map until one registers.
            return;
        };
        let batch: Vec<LogMessage> = {
            let mut recent = self.recent_logs.lock().unwrap();
            if recent.is_empty() {
                return;
            }
            recent.drain().map(|(_, message)| message).collect()
        };
        cb(batch);
    }
}

/// The capture-and-dissection pipeline behind one analyzer window.
pub struct Session {
    shared: Arc<SessionShared>,
    source: Box<dyn CaptureSource>,
    dissector_workers: Vec<DissectorWorker>,
    dispatcher: Arc<StreamDispatcher>,
    filters: HashMap<String, FilterWorkerGroup>,
    threads: usize,
    notifier: Notifier,
}

impl Session {
    pub fn new(config: SessionConfig, source: Box<dyn CaptureSource>) -> Self {
        let threads = effective_threads(config.threads);

        let shared = Arc::new(SessionShared {
            namespace: CompactString::from(config.namespace),
            queue: Arc::new(PacketQueue::new()),
            store: Arc::new(PacketStore::new()),
            capturing: AtomicBool::new(false),
            recent_logs: Mutex::new(HashMap::new()),
            filter_views: Mutex::new(HashMap::new()),
            status_cb: Mutex::new(None),
            log_batch_cb: Mutex::new(None),
            signal: Signal::new(),
        });

        {
            let weak = Arc::downgrade(&shared);
            shared.store.on_change(move |_seq| {
                if let Some(shared) = weak.upgrade() {
                    shared.signal.raise_status();
                }
            });
        }

        let log_cb = shared_log_callback(&shared);

        let dispatcher = Arc::new(StreamDispatcher::new(StreamDispatcherContext {
            threads,
            dissectors: Arc::from(config.stream_dissectors),
            vp_layers_cb: {
                let queue = Arc::clone(&shared.queue);
                Box::new(move |layers| {
                    for layer in layers {
                        queue.push(Packet::from_layer(layer));
                    }
                })
            },
            log_cb: Arc::clone(&log_cb),
        }));

        let worker_ctx = Arc::new(DissectorContext {
            queue: Arc::clone(&shared.queue),
            dissectors: Arc::from(config.dissectors),
            packet_cb: {
                let store = Arc::clone(&shared.store);
                Box::new(move |packet| store.insert(packet))
            },
            streams_cb: {
                let dispatcher = Arc::clone(&dispatcher);
                Box::new(move |seq, chunks| dispatcher.insert(seq, chunks))
            },
            log_cb,
        });

        let dissector_workers = (0..threads)
            .map(|i| DissectorWorker::spawn(i, Arc::clone(&worker_ctx)))
            .collect();

        let notifier = Notifier::spawn(Arc::clone(&shared));

        debug!(namespace = %shared.namespace, threads, "session up");

        Self {
            shared,
            source,
            dissector_workers,
            dispatcher,
            filters: HashMap::new(),
            threads,
            notifier,
        }
    }

    /// The session namespace: id of every raw root layer.
    pub fn namespace(&self) -> &str {
        self.shared.namespace.as_str()
    }

    /// Workers per pool.
    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn set_status_callback(&self, cb: StatusCallback) {
        *self.shared.status_cb.lock().unwrap() = Some(cb);
    }

    pub fn set_log_callback(&self, cb: LogBatchCallback) {
        *self.shared.log_batch_cb.lock().unwrap() = Some(cb);
    }

    /// Feed one packet into the pipeline. The inbound path for capture
    /// sources; also usable directly for synthetic input.
    pub fn analyze(&self, packet: Packet) {
        self.shared.analyze(packet);
    }

    /// Start the capture source. In addition to delivered frames, the sink
    /// lets the source report diagnostics and its own termination.
    pub fn start(&mut self) -> Result<(), SourceError> {
        let deliver = {
            let weak = Arc::downgrade(&self.shared);
            Arc::new(move |packet| {
                if let Some(shared) = weak.upgrade() {
                    shared.analyze(packet);
                }
            }) as Arc<dyn Fn(Packet) + Send + Sync>
        };
        let log = shared_log_callback(&self.shared);
        let stopped = {
            let weak = Arc::downgrade(&self.shared);
            Arc::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.capturing.store(false, Ordering::SeqCst);
                    shared.signal.raise_status();
                }
            }) as Arc<dyn Fn() + Send + Sync>
        };

        // Flip the flag before the source runs: a short-lived source may
        // report its own stop from inside start(), and that transition must
        // not be overwritten afterwards.
        self.shared.capturing.store(true, Ordering::SeqCst);
        if let Err(err) = self.source.start(SourceSink::new(deliver, log, stopped)) {
            self.shared.capturing.store(false, Ordering::SeqCst);
            return Err(err);
        }
        self.shared.signal.raise_status();
        Ok(())
    }

    /// Stop the capture source. Frames already queued keep flowing through
    /// the pipeline.
    pub fn stop(&mut self) {
        self.source.stop();
        self.shared.capturing.store(false, Ordering::SeqCst);
        self.shared.signal.raise_status();
    }

    pub fn capturing(&self) -> bool {
        self.shared.capturing.load(Ordering::SeqCst)
    }

    /// Install, replace or remove the filter under `name`.
    ///
    /// Passing a filter replaces atomically: the old group's workers are
    /// joined and its result set discarded before the new group starts its
    /// scan from sequence 1. Passing `None` removes the group.
    pub fn set_filter(&mut self, name: &str, filter: Option<Box<dyn Filter>>) {
        if let Some(mut old) = self.filters.remove(name) {
            debug!(name, "replacing filter group");
            old.cancel();
        }
        self.shared.filter_views.lock().unwrap().remove(name);

        if let Some(filter) = filter {
            let matches = Arc::new(SequenceSet::new());
            {
                let weak = Arc::downgrade(&self.shared);
                matches.on_change(move |_seq| {
                    if let Some(shared) = weak.upgrade() {
                        shared.signal.raise_status();
                    }
                });
            }

            let group = FilterWorkerGroup::spawn(
                FilterGroupContext {
                    store: Arc::clone(&self.shared.store),
                    filter: Arc::from(filter),
                    matches: Arc::clone(&matches),
                    log_cb: shared_log_callback(&self.shared),
                },
                self.threads,
            );

            self.shared
                .filter_views
                .lock()
                .unwrap()
                .insert(name.to_string(), matches);
            self.filters.insert(name.to_string(), group);
        }

        self.shared.signal.raise_status();
    }

    /// Look up a stored packet by sequence.
    pub fn get(&self, seq: u32) -> Option<Arc<Packet>> {
        self.shared.store.get(seq)
    }

    /// Matches of the named filter with sequence in `start..end`.
    pub fn get_filtered(&self, name: &str, start: u32, end: u32) -> Vec<u32> {
        self.shared
            .filter_views
            .lock()
            .unwrap()
            .get(name)
            .map(|set| set.range(start, end))
            .unwrap_or_default()
    }

    /// Highest assigned sequence number.
    pub fn max_sequence(&self) -> u32 {
        self.shared.store.max_sequence()
    }

    // Pass-through configuration of the capture source.

    pub fn set_interface(&mut self, name: &str) {
        self.source.set_interface(name);
    }

    pub fn interface(&self) -> String {
        self.source.interface()
    }

    pub fn set_promiscuous(&mut self, on: bool) {
        self.source.set_promiscuous(on);
    }

    pub fn promiscuous(&self) -> bool {
        self.source.promiscuous()
    }

    pub fn set_snaplen(&mut self, snaplen: u32) {
        self.source.set_snaplen(snaplen);
    }

    pub fn snaplen(&self) -> u32 {
        self.source.snaplen()
    }

    pub fn set_bpf(&mut self, expr: &str) -> Result<(), SourceError> {
        self.source.set_bpf(expr)
    }

    pub fn devices(&self) -> Vec<Device> {
        self.source.devices()
    }

    pub fn permission(&self) -> bool {
        self.source.permission()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.source.stop();
        self.shared.queue.close();
        // Joining the dissection workers first guarantees no further inserts
        // or boundary reports reach the dispatcher mid-close.
        self.dissector_workers.clear();
        for (_, mut group) in self.filters.drain() {
            group.cancel();
        }
        self.dispatcher.close();
        // The notifier field drops after this body, delivering nothing more.
    }
}

fn effective_threads(configured: usize) -> usize {
    let configured = if configured == 0 {
        thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
    } else {
        configured
    };
    configured.saturating_sub(1).max(1)
}

/// A log callback routing into the session's dedup map; holds a `Weak` so
/// pool contexts never keep a dead session alive.
fn shared_log_callback(shared: &Arc<SessionShared>) -> LogCallback {
    let weak: Weak<SessionShared> = Arc::downgrade(shared);
    Arc::new(move |message| {
        if let Some(shared) = weak.upgrade() {
            shared.log(message);
        }
    })
}
