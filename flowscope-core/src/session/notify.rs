//! Coalescing host signals.
//!
//! The session presents two level-triggered signals to the host: "status
//! changed" and "log arrived". Each is a dirty flag, not a queue: any number
//! of raises between two drains is equivalent to one raise. A single
//! notifier thread services both flags and invokes the host callbacks off
//! every pipeline thread.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use tracing::debug;

use super::SessionShared;

/// The pair of coalescing dirty flags plus their wake primitive.
pub(crate) struct Signal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

struct SignalState {
    status: bool,
    logs: bool,
    shutdown: bool,
}

impl Signal {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SignalState {
                status: false,
                logs: false,
                shutdown: false,
            }),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn raise_status(&self) {
        let mut state = self.state.lock().unwrap();
        state.status = true;
        drop(state);
        self.cond.notify_one();
    }

    pub(crate) fn raise_logs(&self) {
        let mut state = self.state.lock().unwrap();
        state.logs = true;
        drop(state);
        self.cond.notify_one();
    }

    fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        state.shutdown = true;
        drop(state);
        self.cond.notify_all();
    }

    /// Block until a flag is raised, then drain both. `None` means shutdown.
    fn wait(&self) -> Option<(bool, bool)> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.shutdown {
                return None;
            }
            if state.status || state.logs {
                let raised = (state.status, state.logs);
                state.status = false;
                state.logs = false;
                return Some(raised);
            }
            state = self.cond.wait(state).unwrap();
        }
    }
}

/// The thread draining the session's coalescing signals.
pub(crate) struct Notifier {
    shared: Arc<SessionShared>,
    handle: Option<JoinHandle<()>>,
}

impl Notifier {
    pub(crate) fn spawn(shared: Arc<SessionShared>) -> Self {
        let handle = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("session-notify".to_string())
                .spawn(move || {
                    while let Some((status, logs)) = shared.signal.wait() {
                        if status {
                            shared.deliver_status();
                        }
                        if logs {
                            shared.deliver_logs();
                        }
                    }
                    debug!("session notifier down");
                })
                .expect("spawn session notifier")
        };
        Self {
            shared,
            handle: Some(handle),
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.shared.signal.shutdown();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test 1: raises coalesce into a single drain
    #[test]
    fn test_raises_coalesce() {
        let signal = Signal::new();
        signal.raise_status();
        signal.raise_status();
        signal.raise_logs();

        assert_eq!(signal.wait(), Some((true, true)));
        signal.shutdown();
        assert_eq!(signal.wait(), None);
    }

    // Test 2: wait blocks until raised
    #[test]
    fn test_wait_blocks() {
        let signal = Arc::new(Signal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.wait())
        };
        thread::sleep(std::time::Duration::from_millis(20));
        signal.raise_logs();
        assert_eq!(waiter.join().unwrap(), Some((false, true)));
    }
}
