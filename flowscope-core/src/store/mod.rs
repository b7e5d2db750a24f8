//! Packet storage and filter result views.
//!
//! ## Components
//!
//! - [`PacketStore`] - append-only, sequence-indexed packet repository
//! - [`SequenceSet`] - grow-only ordered set of sequence numbers
//!
//! Both fan change notifications out through copy-on-register handler lists:
//! registration swaps in a new list, and invocation walks a snapshot without
//! holding the container lock, so a slow handler can never block readers or
//! the inserting worker behind the store's own lock.

mod packets;
mod sequences;

pub use packets::PacketStore;
pub use sequences::SequenceSet;

use std::sync::{Arc, RwLock};

/// Copy-on-register handler list.
///
/// The list only ever grows; owners that may die before the container (filter
/// groups, the session notifier) capture `Weak` references inside their
/// handlers and no-op once gone.
pub(crate) struct ChangeHandlers {
    inner: RwLock<Arc<Vec<Arc<dyn Fn(u32) + Send + Sync>>>>,
}

impl ChangeHandlers {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub(crate) fn register(&self, handler: impl Fn(u32) + Send + Sync + 'static) {
        let mut guard = self.inner.write().unwrap();
        let mut next: Vec<_> = guard.iter().cloned().collect();
        next.push(Arc::new(handler));
        *guard = Arc::new(next);
    }

    /// Invoke every registered handler on a snapshot of the list.
    pub(crate) fn notify(&self, seq: u32) {
        let snapshot = Arc::clone(&self.inner.read().unwrap());
        for handler in snapshot.iter() {
            handler(seq);
        }
    }
}
