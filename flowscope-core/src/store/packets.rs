//! Append-only, sequence-indexed packet repository.

use std::sync::{Arc, RwLock};

use crate::packet::Packet;

use super::ChangeHandlers;

/// The canonical packet repository: one writer commits at a time, many
/// readers observe.
///
/// Sequence numbers are dense, start at 1 and are assigned in insert
/// serialization order - sequence `n` always lives at index `n - 1`.
/// Dissection completion order determines sequence order, not capture time.
pub struct PacketStore {
    packets: RwLock<Vec<Arc<Packet>>>,
    handlers: ChangeHandlers,
}

impl PacketStore {
    pub fn new() -> Self {
        Self {
            packets: RwLock::new(Vec::new()),
            handlers: ChangeHandlers::new(),
        }
    }

    /// Insert a packet, assigning the next sequence number.
    ///
    /// Concurrent inserts are serialized by the write lock; change handlers
    /// run on the inserting thread with the new maximum sequence, after the
    /// lock has been released. Handlers must not block; coalescing is the
    /// handler's responsibility.
    pub fn insert(&self, mut packet: Packet) -> u32 {
        let seq = {
            let mut packets = self.packets.write().unwrap();
            let seq = packets.len() as u32 + 1;
            packet.assign_seq(seq);
            packets.push(Arc::new(packet));
            seq
        };
        self.handlers.notify(seq);
        seq
    }

    /// Constant-time lookup by sequence number.
    pub fn get(&self, seq: u32) -> Option<Arc<Packet>> {
        if seq == 0 {
            return None;
        }
        self.packets
            .read()
            .unwrap()
            .get(seq as usize - 1)
            .cloned()
    }

    /// Packets with sequence in `start..end` (inclusive-exclusive); portions
    /// outside the stored range yield nothing.
    pub fn range(&self, start: u32, end: u32) -> Vec<Arc<Packet>> {
        let packets = self.packets.read().unwrap();
        let lo = start.max(1) as usize - 1;
        let hi = (end.max(1) as usize - 1).min(packets.len());
        if lo >= hi {
            return Vec::new();
        }
        packets[lo..hi].to_vec()
    }

    /// Highest assigned sequence number; 0 while empty.
    pub fn max_sequence(&self) -> u32 {
        self.packets.read().unwrap().len() as u32
    }

    /// Register a change handler, invoked with the newly assigned sequence
    /// after each insert.
    pub fn on_change(&self, handler: impl Fn(u32) + Send + Sync + 'static) {
        self.handlers.register(handler);
    }
}

impl Default for PacketStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;

    fn packet() -> Packet {
        Packet::from_capture(0, 0, Bytes::new())
    }

    // Test 1: sequences are dense from 1 and stamped onto the packet
    #[test]
    fn test_dense_sequences() {
        let store = PacketStore::new();
        assert_eq!(store.max_sequence(), 0);

        assert_eq!(store.insert(packet()), 1);
        assert_eq!(store.insert(packet()), 2);
        assert_eq!(store.insert(packet()), 3);

        assert_eq!(store.max_sequence(), 3);
        assert_eq!(store.get(2).unwrap().seq(), 2);
    }

    // Test 2: get outside the stored range
    #[test]
    fn test_get_out_of_range() {
        let store = PacketStore::new();
        store.insert(packet());
        assert!(store.get(0).is_none());
        assert!(store.get(2).is_none());
    }

    // Test 3: range is inclusive-exclusive and clamped
    #[test]
    fn test_range_clamped() {
        let store = PacketStore::new();
        for _ in 0..5 {
            store.insert(packet());
        }

        let seqs: Vec<u32> = store.range(2, 4).iter().map(|p| p.seq()).collect();
        assert_eq!(seqs, vec![2, 3]);

        assert_eq!(store.range(4, 100).len(), 2);
        assert!(store.range(6, 10).is_empty());
        assert!(store.range(3, 3).is_empty());
        assert!(store.range(4, 2).is_empty());

        // start of 0 is clamped to the first sequence
        assert_eq!(store.range(0, 2).len(), 1);
    }

    // Test 4: change handlers observe every insert
    #[test]
    fn test_change_handler_invoked() {
        let store = PacketStore::new();
        let seen = Arc::new(AtomicU32::new(0));
        {
            let seen = Arc::clone(&seen);
            store.on_change(move |seq| {
                seen.fetch_max(seq, Ordering::SeqCst);
            });
        }

        store.insert(packet());
        store.insert(packet());
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    // Test 5: concurrent inserts never duplicate or skip sequences
    #[test]
    fn test_concurrent_inserts() {
        let store = Arc::new(PacketStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let mut seqs = Vec::new();
                    for _ in 0..50 {
                        seqs.push(store.insert(packet()));
                    }
                    seqs
                })
            })
            .collect();

        let mut all = HashSet::new();
        for h in handles {
            for seq in h.join().unwrap() {
                assert!(all.insert(seq), "sequence {} assigned twice", seq);
            }
        }
        assert_eq!(all.len(), 400);
        assert_eq!(store.max_sequence(), 400);
        assert_eq!(*all.iter().max().unwrap(), 400);
    }

    // Test 6: stored packets are shared, not copied
    #[test]
    fn test_shared_packets() {
        let store = PacketStore::new();
        store.insert(Packet::from_capture(42, 9, Bytes::from_static(b"x")));

        let a = store.get(1).unwrap();
        let b = store.get(1).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.timestamp_us, 42);
    }
}
