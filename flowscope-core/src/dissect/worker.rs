//! Dissection worker pool and the breadth-first chain driver.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use smallvec::{smallvec, SmallVec};
use tracing::debug;

use crate::log::{LogCallback, LogMessage};
use crate::packet::Packet;
use crate::queue::PacketQueue;
use crate::stream::StreamChunk;

use super::{DissectContext, Dissector};

/// Commits a fully dissected packet to the store, returning its sequence.
pub type PacketCallback = Box<dyn Fn(Packet) -> u32 + Send + Sync>;

/// Reports the chunks collected from one packet, keyed by its sequence.
/// Called for every packet, with an empty list when nothing was emitted -
/// the stream dispatcher relies on this as its completion boundary signal.
pub type StreamsCallback = Box<dyn Fn(u32, Vec<StreamChunk>) + Send + Sync>;

/// Shared context of the dissection worker pool.
pub struct DissectorContext {
    pub queue: Arc<PacketQueue>,
    pub dissectors: Arc<[Box<dyn Dissector>]>,
    pub packet_cb: PacketCallback,
    pub streams_cb: StreamsCallback,
    pub log_cb: LogCallback,
}

/// One worker of the dissection pool. Joins its thread on drop.
pub struct DissectorWorker {
    handle: Option<JoinHandle<()>>,
}

impl DissectorWorker {
    /// Spawn a worker over the shared context. The worker exits cleanly when
    /// the queue reports closed.
    pub fn spawn(index: usize, ctx: Arc<DissectorContext>) -> Self {
        let handle = thread::Builder::new()
            .name(format!("dissect-{index}"))
            .spawn(move || run(ctx))
            .expect("spawn dissection worker");
        Self {
            handle: Some(handle),
        }
    }
}

impl Drop for DissectorWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(ctx: Arc<DissectorContext>) {
    debug!(dissectors = ctx.dissectors.len(), "dissection worker up");
    while let Some(mut packet) = ctx.queue.pop() {
        let mut dctx = DissectContext::new();
        dissect_packet(&mut packet, &ctx.dissectors, &mut dctx);

        for log in dctx.take_logs() {
            (ctx.log_cb)(log);
        }

        let mut chunks = dctx.take_chunks();
        let seq = (ctx.packet_cb)(packet);
        for chunk in &mut chunks {
            chunk.origin_seq = seq;
        }
        (ctx.streams_cb)(seq, chunks);
    }
    debug!("dissection worker down");
}

/// Run the dissector chain over one packet, breadth-first.
///
/// Each visited layer is offered to every dissector in declared order; child
/// layers append to their parent and re-enter the visit queue. A dissector
/// `Err` becomes an error log record and the dissector is skipped for that
/// layer.
pub(crate) fn dissect_packet(
    packet: &mut Packet,
    dissectors: &[Box<dyn Dissector>],
    ctx: &mut DissectContext,
) {
    let mut pending: VecDeque<SmallVec<[usize; 8]>> =
        (0..packet.layers.len()).map(|i| smallvec![i]).collect();

    while let Some(path) = pending.pop_front() {
        for dissector in dissectors {
            ctx.enter(dissector.resource_name());
            let layer = match packet.layer(&path) {
                Some(layer) => layer,
                None => break,
            };
            match dissector.dissect(layer, ctx) {
                Ok(result) if result.accepted && !result.children.is_empty() => {
                    let parent = packet
                        .layer_mut(&path)
                        .expect("visited layer path resolves");
                    let base = parent.children.len();
                    let produced = result.children.len();
                    parent.children.extend(result.children);
                    for offset in 0..produced {
                        let mut child = path.clone();
                        child.push(base + offset);
                        pending.push_back(child);
                    }
                }
                Ok(_) => {}
                Err(err) => ctx.record(LogMessage::from_script_error(
                    "dissector",
                    dissector.resource_name(),
                    &err,
                )),
            }
        }
    }
}

impl DissectContext {
    pub(crate) fn record(&mut self, msg: LogMessage) {
        self.logs.push(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dissect::Dissection;
    use crate::error::ScriptError;
    use crate::log::Level;
    use crate::packet::Layer;
    use crate::store::PacketStore;
    use bytes::Bytes;
    use std::sync::Mutex;

    /// Produces `<on>.x` once for every layer whose id matches `on`.
    struct ChildOf {
        on: &'static str,
        child: &'static str,
    }

    impl Dissector for ChildOf {
        fn resource_name(&self) -> &str {
            "child_of.js"
        }

        fn dissect(
            &self,
            layer: &Layer,
            _ctx: &mut DissectContext,
        ) -> Result<Dissection, ScriptError> {
            if layer.id == self.on {
                Ok(Dissection::children(vec![Layer::new(self.child, self.child)
                    .with_payload(Bytes::from_static(&[0x01]))]))
            } else {
                Ok(Dissection::decline())
            }
        }
    }

    struct AlwaysFails;

    impl Dissector for AlwaysFails {
        fn resource_name(&self) -> &str {
            "broken.js"
        }

        fn dissect(
            &self,
            _layer: &Layer,
            _ctx: &mut DissectContext,
        ) -> Result<Dissection, ScriptError> {
            Err(ScriptError::new("kaboom").at(3, 1))
        }
    }

    fn raw_packet(ns: &str) -> Packet {
        let mut pkt = Packet::from_capture(0, 1, Bytes::from_static(&[0xaa]));
        pkt.layers
            .push(Layer::new(ns, "Raw Layer").with_payload(pkt.payload.clone()));
        pkt
    }

    // Test 1: two-stage chain n -> n.a -> n.a.b
    #[test]
    fn test_chain_descends() {
        let dissectors: Vec<Box<dyn Dissector>> = vec![
            Box::new(ChildOf {
                on: "n",
                child: "n.a",
            }),
            Box::new(ChildOf {
                on: "n.a",
                child: "n.a.b",
            }),
        ];
        let mut pkt = raw_packet("n");
        let mut ctx = DissectContext::new();
        dissect_packet(&mut pkt, &dissectors, &mut ctx);

        let ids: Vec<_> = pkt.walk().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["n", "n.a", "n.a.b"]);
    }

    // Test 2: a failing dissector is skipped, the rest of the chain runs
    #[test]
    fn test_error_isolation() {
        let dissectors: Vec<Box<dyn Dissector>> = vec![
            Box::new(AlwaysFails),
            Box::new(ChildOf {
                on: "n",
                child: "n.a",
            }),
        ];
        let mut pkt = raw_packet("n");
        let mut ctx = DissectContext::new();
        dissect_packet(&mut pkt, &dissectors, &mut ctx);

        let ids: Vec<_> = pkt.walk().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["n", "n.a"]);

        // One error per visited layer (n and n.a), attributed to the script.
        let logs = ctx.take_logs();
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().all(|l| l.level == Level::Error));
        assert!(logs.iter().all(|l| l.resource == "broken.js"));
        assert_eq!(logs[0].line, Some(3));
    }

    // Test 3: worker pool drains the queue into the store and always reports
    // the chunk boundary
    #[test]
    fn test_worker_pool_end_to_end() {
        let queue = Arc::new(PacketQueue::new());
        let store = Arc::new(PacketStore::new());
        let boundaries = Arc::new(Mutex::new(Vec::new()));

        let ctx = Arc::new(DissectorContext {
            queue: Arc::clone(&queue),
            dissectors: Arc::from(vec![Box::new(ChildOf {
                on: "n",
                child: "n.a",
            }) as Box<dyn Dissector>]),
            packet_cb: {
                let store = Arc::clone(&store);
                Box::new(move |pkt| store.insert(pkt))
            },
            streams_cb: {
                let boundaries = Arc::clone(&boundaries);
                Box::new(move |seq, chunks| {
                    boundaries.lock().unwrap().push((seq, chunks.len()));
                })
            },
            log_cb: Arc::new(|_| {}),
        });

        let workers: Vec<_> = (0..2).map(|i| DissectorWorker::spawn(i, Arc::clone(&ctx))).collect();
        for _ in 0..10 {
            queue.push(raw_packet("n"));
        }
        queue.close();
        drop(workers);

        assert_eq!(store.max_sequence(), 10);
        let boundaries = boundaries.lock().unwrap();
        assert_eq!(boundaries.len(), 10);
        assert!(boundaries.iter().all(|&(_, n)| n == 0));
        for seq in 1..=10 {
            let pkt = store.get(seq).unwrap();
            let ids: Vec<_> = pkt.walk().map(|l| l.id.as_str()).collect();
            assert_eq!(ids, vec!["n", "n.a"]);
        }
    }
}
