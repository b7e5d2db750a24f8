//! Filter worker groups.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::{self, JoinHandle};

use tracing::debug;

use crate::log::{LogCallback, LogMessage};
use crate::store::{PacketStore, SequenceSet};

use super::{Filter, FilterContext};

/// Upper bound on sequences claimed per scheduling turn. Bounded batches
/// keep multiple filter groups from starving each other on a busy store.
const CLAIM_BATCH: u32 = 256;

/// Shared context of one filter worker group.
pub struct FilterGroupContext {
    pub store: Arc<PacketStore>,
    pub filter: Arc<dyn Filter>,
    pub matches: Arc<SequenceSet>,
    pub log_cb: LogCallback,
}

struct GroupShared {
    store: Arc<PacketStore>,
    filter: Arc<dyn Filter>,
    matches: Arc<SequenceSet>,
    log_cb: LogCallback,
    /// Next unclaimed sequence.
    claim: Mutex<u32>,
    cond: Condvar,
    cancelled: AtomicBool,
}

impl GroupShared {
    /// Wake parked workers. Taking the claim lock first closes the window
    /// between a worker's caught-up check and its wait, so a store insert
    /// landing in that window cannot be missed.
    fn wake(&self) {
        let _guard = self.claim.lock().unwrap();
        self.cond.notify_all();
    }
}

/// A named pool of workers scanning the store with one compiled filter.
///
/// Workers cooperatively claim contiguous batches from sequence 1 upward and
/// park on the group condvar when caught up with the store; a store change
/// handler wakes them. Dropping the group cancels and joins the workers, so
/// replacement under a session name is atomic: results of the old group can
/// only ever land in the old, discarded set.
pub struct FilterWorkerGroup {
    shared: Arc<GroupShared>,
    workers: Vec<JoinHandle<()>>,
}

impl FilterWorkerGroup {
    pub fn spawn(ctx: FilterGroupContext, threads: usize) -> Self {
        let shared = Arc::new(GroupShared {
            store: ctx.store,
            filter: ctx.filter,
            matches: ctx.matches,
            log_cb: ctx.log_cb,
            claim: Mutex::new(1),
            cond: Condvar::new(),
            cancelled: AtomicBool::new(false),
        });

        // The handler holds a Weak so a replaced group's callback goes inert
        // instead of keeping the dead group alive through the store.
        let weak: Weak<GroupShared> = Arc::downgrade(&shared);
        shared.store.on_change(move |_seq| {
            if let Some(group) = weak.upgrade() {
                group.wake();
            }
        });

        debug!(
            filter = shared.filter.resource_name(),
            threads, "filter group up"
        );

        let workers = (0..threads.max(1))
            .map(|i| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("filter-{i}"))
                    .spawn(move || run(shared))
                    .expect("spawn filter worker")
            })
            .collect();

        Self { shared, workers }
    }

    /// The result view of this group.
    pub fn matches(&self) -> &Arc<SequenceSet> {
        &self.shared.matches
    }

    /// Signal workers to exit and join them. Idempotent.
    pub fn cancel(&mut self) {
        self.shared.cancelled.store(true, Ordering::SeqCst);
        self.shared.wake();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for FilterWorkerGroup {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn run(shared: Arc<GroupShared>) {
    loop {
        let Some((start, end)) = claim_batch(&shared) else {
            return;
        };
        for seq in start..=end {
            if shared.cancelled.load(Ordering::SeqCst) {
                return;
            }
            evaluate(&shared, seq);
        }
    }
}

/// Claim the next contiguous batch, parking while caught up with the store.
fn claim_batch(shared: &GroupShared) -> Option<(u32, u32)> {
    let mut next = shared.claim.lock().unwrap();
    loop {
        if shared.cancelled.load(Ordering::SeqCst) {
            return None;
        }
        let max = shared.store.max_sequence();
        if *next <= max {
            let start = *next;
            let end = max.min(start.saturating_add(CLAIM_BATCH - 1));
            *next = end + 1;
            return Some((start, end));
        }
        next = shared.cond.wait(next).unwrap();
    }
}

fn evaluate(shared: &GroupShared, seq: u32) {
    let Some(packet) = shared.store.get(seq) else {
        return;
    };
    let mut ctx = FilterContext::new(shared.filter.resource_name());
    match shared.filter.matches(&packet, &mut ctx) {
        Ok(true) => shared.matches.insert(seq),
        Ok(false) => {}
        Err(err) => (shared.log_cb)(LogMessage::from_script_error(
            "filter",
            shared.filter.resource_name(),
            &err,
        )),
    }
    for log in ctx.take_logs() {
        (shared.log_cb)(log);
    }
}
