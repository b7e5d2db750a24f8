//! Closable multi-producer/multi-consumer packet queue.
//!
//! The queue is the spine of the dissection pipeline and its global stop
//! signal: closing it is how the session winds the worker pool down. Items
//! already queued at close time are still drained so in-flight packets finish
//! dissection.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use crate::packet::Packet;

/// FIFO of owned packets shared between the session, the capture source, the
/// stream dispatcher (virtual packets) and the dissection workers.
///
/// Ordering is FIFO per producer; among concurrent producers any interleaving
/// is admissible - sequence numbers are assigned downstream at store insert.
pub struct PacketQueue {
    state: Mutex<QueueState>,
    cond: Condvar,
}

struct QueueState {
    items: VecDeque<Packet>,
    closed: bool,
}

impl PacketQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Enqueue a packet. Never blocks; a push after `close()` is a silent
    /// no-op.
    pub fn push(&self, packet: Packet) {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return;
        }
        state.items.push_back(packet);
        drop(state);
        self.cond.notify_one();
    }

    /// Dequeue a packet, blocking while the queue is open and empty.
    ///
    /// After `close()` the remaining items are drained in order; once empty,
    /// every caller gets `None`.
    pub fn pop(&self) -> Option<Packet> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(packet) = state.items.pop_front() {
                return Some(packet);
            }
            if state.closed {
                return None;
            }
            state = self.cond.wait(state).unwrap();
        }
    }

    /// Close the queue, waking all blocked consumers. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return;
        }
        state.closed = true;
        drop(state);
        self.cond.notify_all();
    }

    /// Whether `close()` has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Number of queued packets (racy, for diagnostics).
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    /// Check if the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn packet(n: i64) -> Packet {
        Packet::from_capture(n, 0, Bytes::new())
    }

    // Test 1: FIFO order with a single producer
    #[test]
    fn test_fifo_order() {
        let queue = PacketQueue::new();
        queue.push(packet(1));
        queue.push(packet(2));
        queue.push(packet(3));

        assert_eq!(queue.pop().unwrap().timestamp_us, 1);
        assert_eq!(queue.pop().unwrap().timestamp_us, 2);
        assert_eq!(queue.pop().unwrap().timestamp_us, 3);
    }

    // Test 2: pop blocks until a push arrives
    #[test]
    fn test_pop_blocks_until_push() {
        let queue = Arc::new(PacketQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };

        thread::sleep(Duration::from_millis(20));
        queue.push(packet(7));

        let got = consumer.join().unwrap();
        assert_eq!(got.unwrap().timestamp_us, 7);
    }

    // Test 3: close wakes all blocked consumers with None
    #[test]
    fn test_close_wakes_waiters() {
        let queue = Arc::new(PacketQueue::new());
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.pop())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        queue.close();

        for c in consumers {
            assert!(c.join().unwrap().is_none());
        }
    }

    // Test 4: items queued before close are drained, then None
    #[test]
    fn test_drain_after_close() {
        let queue = PacketQueue::new();
        queue.push(packet(1));
        queue.push(packet(2));
        queue.close();

        assert!(queue.pop().is_some());
        assert!(queue.pop().is_some());
        assert!(queue.pop().is_none());
    }

    // Test 5: push after close is a silent no-op
    #[test]
    fn test_push_after_close() {
        let queue = PacketQueue::new();
        queue.close();
        queue.push(packet(1));
        assert!(queue.is_empty());
        assert!(queue.pop().is_none());
    }

    // Test 6: close is idempotent
    #[test]
    fn test_close_idempotent() {
        let queue = PacketQueue::new();
        queue.close();
        queue.close();
        assert!(queue.is_closed());
    }

    // Test 7: concurrent producers all land
    #[test]
    fn test_concurrent_producers() {
        let queue = Arc::new(PacketQueue::new());
        let producers: Vec<_> = (0..8)
            .map(|i| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for j in 0..100 {
                        queue.push(packet(i * 100 + j));
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }

        let mut count = 0;
        queue.close();
        while queue.pop().is_some() {
            count += 1;
        }
        assert_eq!(count, 800);
    }
}
