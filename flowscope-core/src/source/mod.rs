//! Capture sources.
//!
//! The frame source is an external collaborator: live pcap/BPF capture,
//! device enumeration and the permission probe live behind [`CaptureSource`],
//! and the core only contracts with that trait. One offline implementation
//! ships with the crate: [`FileReplaySource`], which replays PCAP/PCAPNG
//! files.

mod replay;

pub use replay::FileReplaySource;

use std::sync::Arc;

use crate::error::SourceError;
use crate::log::{LogCallback, LogMessage};
use crate::packet::Packet;

/// A capture device visible to the source.
#[derive(Debug, Clone)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Data-link type of frames captured on this device.
    pub link: u32,
    pub loopback: bool,
}

/// Callbacks a source uses to feed the session.
///
/// `deliver` hands off one captured frame; `log` reports source diagnostics;
/// `stopped` announces a source-initiated stop (end of file, interface down),
/// after which the session flips its capturing flag and raises status.
#[derive(Clone)]
pub struct SourceSink {
    deliver: Arc<dyn Fn(Packet) + Send + Sync>,
    log: LogCallback,
    stopped: Arc<dyn Fn() + Send + Sync>,
}

impl SourceSink {
    pub(crate) fn new(
        deliver: Arc<dyn Fn(Packet) + Send + Sync>,
        log: LogCallback,
        stopped: Arc<dyn Fn() + Send + Sync>,
    ) -> Self {
        Self {
            deliver,
            log,
            stopped,
        }
    }

    /// Hand one captured frame to the pipeline.
    pub fn deliver(&self, packet: Packet) {
        (self.deliver)(packet);
    }

    /// Report a source diagnostic.
    pub fn log(&self, message: LogMessage) {
        (self.log)(message);
    }

    /// Announce that the source stopped on its own.
    pub fn stopped(&self) {
        (self.stopped)();
    }
}

/// Contract between the session and its frame source.
///
/// Configuration setters are synchronous and validated where validation is
/// possible ([`CaptureSource::set_bpf`]); capture itself runs on the source's
/// own thread and feeds the sink handed to `start`.
pub trait CaptureSource: Send {
    /// Begin capturing into the sink. Errors surface synchronously;
    /// mid-capture faults go through `sink.log` followed by `sink.stopped`.
    fn start(&mut self, sink: SourceSink) -> Result<(), SourceError>;

    /// Stop capturing. Idempotent; frames already delivered keep flowing
    /// through the pipeline.
    fn stop(&mut self);

    fn set_interface(&mut self, _name: &str) {}

    fn interface(&self) -> String {
        String::new()
    }

    fn set_promiscuous(&mut self, _on: bool) {}

    fn promiscuous(&self) -> bool {
        false
    }

    fn set_snaplen(&mut self, _snaplen: u32) {}

    fn snaplen(&self) -> u32 {
        65535
    }

    /// Install a BPF-style capture filter expression.
    fn set_bpf(&mut self, _expr: &str) -> Result<(), SourceError> {
        Ok(())
    }

    /// Enumerate capture devices.
    fn devices(&self) -> Vec<Device> {
        Vec::new()
    }

    /// Whether the process has capture permission on this source.
    fn permission(&self) -> bool {
        true
    }
}
