//! Grow-only ordered sequence set, the result view of a filter group.

use std::collections::BTreeSet;
use std::ops::Bound;
use std::sync::RwLock;

use super::ChangeHandlers;

/// An ordered set of store sequence numbers.
///
/// The set only grows during its owner's lifetime; a filter's results are
/// cleared by discarding the whole set together with its group. Any sequence
/// observed here is at most the store's maximum at observation time, since
/// entries are only inserted for packets already committed to the store.
pub struct SequenceSet {
    seqs: RwLock<BTreeSet<u32>>,
    handlers: ChangeHandlers,
}

impl SequenceSet {
    pub fn new() -> Self {
        Self {
            seqs: RwLock::new(BTreeSet::new()),
            handlers: ChangeHandlers::new(),
        }
    }

    /// Insert a sequence; handlers run with it after the lock is dropped.
    /// Re-inserting an existing sequence does not notify.
    pub fn insert(&self, seq: u32) {
        let added = self.seqs.write().unwrap().insert(seq);
        if added {
            self.handlers.notify(seq);
        }
    }

    /// Ordered sequences in `start..end` (inclusive-exclusive).
    pub fn range(&self, start: u32, end: u32) -> Vec<u32> {
        if start >= end {
            return Vec::new();
        }
        self.seqs
            .read()
            .unwrap()
            .range((Bound::Included(start), Bound::Excluded(end)))
            .copied()
            .collect()
    }

    /// Number of sequences in the set.
    pub fn len(&self) -> u32 {
        self.seqs.read().unwrap().len() as u32
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a change handler, invoked with each newly inserted sequence.
    pub fn on_change(&self, handler: impl Fn(u32) + Send + Sync + 'static) {
        self.handlers.register(handler);
    }
}

impl Default for SequenceSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    // Test 1: range is ordered and inclusive-exclusive
    #[test]
    fn test_range_ordered() {
        let set = SequenceSet::new();
        for seq in [5u32, 1, 9, 3] {
            set.insert(seq);
        }

        assert_eq!(set.range(1, 10), vec![1, 3, 5, 9]);
        assert_eq!(set.range(3, 9), vec![3, 5]);
        assert_eq!(set.range(4, 4), Vec::<u32>::new());
        assert_eq!(set.len(), 4);
    }

    // Test 2: duplicate inserts neither grow the set nor notify
    #[test]
    fn test_duplicate_insert() {
        let set = SequenceSet::new();
        let fired = Arc::new(AtomicU32::new(0));
        {
            let fired = Arc::clone(&fired);
            set.on_change(move |_| {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        set.insert(4);
        set.insert(4);
        assert_eq!(set.len(), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    // Test 3: handler receives the inserted sequence
    #[test]
    fn test_handler_argument() {
        let set = SequenceSet::new();
        let last = Arc::new(AtomicU32::new(0));
        {
            let last = Arc::clone(&last);
            set.on_change(move |seq| {
                last.store(seq, Ordering::SeqCst);
            });
        }

        set.insert(17);
        assert_eq!(last.load(Ordering::SeqCst), 17);
    }
}
