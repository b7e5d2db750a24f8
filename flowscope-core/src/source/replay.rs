//! Offline PCAP/PCAPNG replay source.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{LegacyPcapReader, PcapBlockOwned, PcapNGReader};
use tracing::debug;

use crate::error::SourceError;
use crate::log::{Level, LogMessage};
use crate::packet::Packet;

use super::{CaptureSource, SourceSink};

/// Buffer size for pcap_parser readers.
const BUFFER_SIZE: usize = 262144;

/// Capture file format, detected from the magic number.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReplayFormat {
    Legacy,
    PcapNg,
}

impl ReplayFormat {
    fn detect(magic: &[u8]) -> Result<Self, SourceError> {
        if magic.len() < 4 {
            return Err(SourceError::InvalidFormat {
                reason: "file too short for a capture magic number".to_string(),
            });
        }
        match u32::from_ne_bytes([magic[0], magic[1], magic[2], magic[3]]) {
            0xa1b2c3d4 | 0xd4c3b2a1 | 0xa1b23c4d | 0x4d3cb2a1 => Ok(ReplayFormat::Legacy),
            0x0a0d0d0a => Ok(ReplayFormat::PcapNg),
            magic => Err(SourceError::InvalidFormat {
                reason: format!("unknown capture magic: 0x{:08x}", magic),
            }),
        }
    }
}

/// Replays a capture file as if it were a live interface.
///
/// Frames are delivered on the source's own thread; end of file is announced
/// through `sink.stopped()`. A configured snaplen truncates delivered bytes.
/// BPF expressions are accepted and recorded but not evaluated offline.
pub struct FileReplaySource {
    path: PathBuf,
    snaplen: u32,
    bpf: Option<String>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl FileReplaySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            snaplen: 65535,
            bpf: None,
            stop: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }
}

impl CaptureSource for FileReplaySource {
    fn start(&mut self, sink: SourceSink) -> Result<(), SourceError> {
        if self.thread.is_some() {
            return Err(SourceError::AlreadyStarted);
        }

        let mut file = File::open(&self.path).map_err(|_| SourceError::FileNotFound {
            path: self.path.display().to_string(),
        })?;

        let mut magic = [0u8; 4];
        let read = file.read(&mut magic).map_err(SourceError::Io)?;
        let format = ReplayFormat::detect(&magic[..read])?;

        // Re-open so the reader sees the magic again.
        let file = File::open(&self.path).map_err(SourceError::Io)?;

        self.stop.store(false, Ordering::SeqCst);
        let stop = Arc::clone(&self.stop);
        let snaplen = self.snaplen as usize;
        let path = self.path.display().to_string();

        self.thread = Some(
            thread::Builder::new()
                .name("replay-source".to_string())
                .spawn(move || {
                    debug!(path = %path, "replay source up");
                    if let Err(err) = replay(file, format, snaplen, &stop, &sink) {
                        sink.log(LogMessage::new(
                            Level::Error,
                            "source",
                            path,
                            err.to_string(),
                        ));
                    }
                    sink.stopped();
                })
                .expect("spawn replay source"),
        );
        Ok(())
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    fn interface(&self) -> String {
        self.path.display().to_string()
    }

    fn set_snaplen(&mut self, snaplen: u32) {
        self.snaplen = snaplen;
    }

    fn snaplen(&self) -> u32 {
        self.snaplen
    }

    fn set_bpf(&mut self, expr: &str) -> Result<(), SourceError> {
        self.bpf = if expr.is_empty() {
            None
        } else {
            Some(expr.to_string())
        };
        Ok(())
    }
}

impl Drop for FileReplaySource {
    fn drop(&mut self) {
        CaptureSource::stop(self);
    }
}

fn replay(
    file: File,
    format: ReplayFormat,
    snaplen: usize,
    stop: &AtomicBool,
    sink: &SourceSink,
) -> Result<(), SourceError> {
    let reader = BufReader::with_capacity(BUFFER_SIZE, file);
    match format {
        ReplayFormat::Legacy => {
            let reader = LegacyPcapReader::new(BUFFER_SIZE, reader).map_err(|e| {
                SourceError::InvalidFormat {
                    reason: format!("failed to parse legacy PCAP: {}", e),
                }
            })?;
            replay_legacy(reader, snaplen, stop, sink)
        }
        ReplayFormat::PcapNg => {
            let reader = PcapNGReader::new(BUFFER_SIZE, reader).map_err(|e| {
                SourceError::InvalidFormat {
                    reason: format!("failed to parse PCAPNG: {}", e),
                }
            })?;
            replay_pcapng(reader, snaplen, stop, sink)
        }
    }
}

fn deliver(sink: &SourceSink, timestamp_us: i64, original_length: u32, data: &[u8], snaplen: usize) {
    let data = &data[..data.len().min(snaplen)];
    sink.deliver(Packet::from_capture(
        timestamp_us,
        original_length,
        Bytes::copy_from_slice(data),
    ));
}

fn replay_legacy<R: Read>(
    mut reader: LegacyPcapReader<R>,
    snaplen: usize,
    stop: &AtomicBool,
    sink: &SourceSink,
) -> Result<(), SourceError> {
    use pcap_parser::PcapError as ParserError;

    while !stop.load(Ordering::SeqCst) {
        match reader.next() {
            Ok((offset, block)) => {
                if let PcapBlockOwned::Legacy(packet) = block {
                    let timestamp_us =
                        (packet.ts_sec as i64) * 1_000_000 + (packet.ts_usec as i64);
                    deliver(sink, timestamp_us, packet.origlen, packet.data, snaplen);
                }
                reader.consume(offset);
            }
            Err(ParserError::Eof) => return Ok(()),
            Err(ParserError::Incomplete(_)) => {
                reader.refill().map_err(|e| SourceError::InvalidFormat {
                    reason: format!("legacy PCAP refill error: {}", e),
                })?;
            }
            Err(e) => {
                return Err(SourceError::InvalidFormat {
                    reason: format!("legacy PCAP parse error: {}", e),
                });
            }
        }
    }
    Ok(())
}

fn replay_pcapng<R: Read>(
    mut reader: PcapNGReader<R>,
    snaplen: usize,
    stop: &AtomicBool,
    sink: &SourceSink,
) -> Result<(), SourceError> {
    use pcap_parser::pcapng::Block;
    use pcap_parser::PcapError as ParserError;

    while !stop.load(Ordering::SeqCst) {
        match reader.next() {
            Ok((offset, block)) => {
                if let PcapBlockOwned::NG(block) = block {
                    match block {
                        Block::EnhancedPacket(epb) => {
                            let timestamp_us = ((epb.ts_high as i64) << 32) | (epb.ts_low as i64);
                            deliver(sink, timestamp_us, epb.origlen, epb.data, snaplen);
                        }
                        Block::SimplePacket(spb) => {
                            deliver(sink, 0, spb.origlen, spb.data, snaplen);
                        }
                        _ => {}
                    }
                }
                reader.consume(offset);
            }
            Err(ParserError::Eof) => return Ok(()),
            Err(ParserError::Incomplete(_)) => {
                reader.refill().map_err(|e| SourceError::InvalidFormat {
                    reason: format!("PCAPNG refill error: {}", e),
                })?;
            }
            Err(e) => {
                return Err(SourceError::InvalidFormat {
                    reason: format!("PCAPNG parse error: {}", e),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};
    use tempfile::NamedTempFile;

    /// Create a minimal legacy PCAP file with the given frame payloads.
    fn write_pcap(frames: &[&[u8]]) -> NamedTempFile {
        let mut data = Vec::new();

        // Global header: little-endian, microsecond resolution, Ethernet.
        data.extend_from_slice(&0xa1b2c3d4u32.to_le_bytes());
        data.extend_from_slice(&[0x02, 0x00, 0x04, 0x00]); // version 2.4
        data.extend_from_slice(&[0x00; 8]); // thiszone, sigfigs
        data.extend_from_slice(&65535u32.to_le_bytes()); // snaplen
        data.extend_from_slice(&1u32.to_le_bytes()); // linktype

        for (i, frame) in frames.iter().enumerate() {
            data.extend_from_slice(&(1000 + i as u32).to_le_bytes()); // ts_sec
            data.extend_from_slice(&0u32.to_le_bytes()); // ts_usec
            data.extend_from_slice(&(frame.len() as u32).to_le_bytes()); // caplen
            data.extend_from_slice(&(frame.len() as u32).to_le_bytes()); // origlen
            data.extend_from_slice(frame);
        }

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();
        file.flush().unwrap();
        file
    }

    fn collecting_sink(
        packets: Arc<Mutex<Vec<Packet>>>,
        stopped: Arc<AtomicBool>,
    ) -> SourceSink {
        SourceSink::new(
            Arc::new(move |pkt| packets.lock().unwrap().push(pkt)),
            Arc::new(|_| {}),
            Arc::new(move || stopped.store(true, Ordering::SeqCst)),
        )
    }

    fn wait_for(predicate: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !predicate() {
            assert!(Instant::now() < deadline, "timed out waiting for replay");
            thread::sleep(Duration::from_millis(5));
        }
    }

    // Test 1: replays every frame, then announces the stop
    #[test]
    fn test_replay_to_eof() {
        let file = write_pcap(&[b"abc", b"defgh"]);
        let packets = Arc::new(Mutex::new(Vec::new()));
        let stopped = Arc::new(AtomicBool::new(false));

        let mut source = FileReplaySource::new(file.path());
        source
            .start(collecting_sink(Arc::clone(&packets), Arc::clone(&stopped)))
            .unwrap();

        wait_for(|| stopped.load(Ordering::SeqCst));
        let packets = packets.lock().unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(&packets[0].payload[..], b"abc");
        assert_eq!(packets[1].original_length, 5);
        assert_eq!(packets[0].timestamp_us, 1_000_000_000);
    }

    // Test 2: snaplen truncates delivered bytes, original length survives
    #[test]
    fn test_snaplen_truncation() {
        let file = write_pcap(&[b"0123456789"]);
        let packets = Arc::new(Mutex::new(Vec::new()));
        let stopped = Arc::new(AtomicBool::new(false));

        let mut source = FileReplaySource::new(file.path());
        source.set_snaplen(4);
        source
            .start(collecting_sink(Arc::clone(&packets), Arc::clone(&stopped)))
            .unwrap();

        wait_for(|| stopped.load(Ordering::SeqCst));
        let packets = packets.lock().unwrap();
        assert_eq!(&packets[0].payload[..], b"0123");
        assert_eq!(packets[0].captured_length, 4);
        assert_eq!(packets[0].original_length, 10);
    }

    // Test 3: missing file and bad magic fail synchronously
    #[test]
    fn test_start_errors() {
        let mut source = FileReplaySource::new("/nonexistent/capture.pcap");
        let sink = collecting_sink(Arc::new(Mutex::new(Vec::new())), Arc::new(AtomicBool::new(false)));
        assert!(matches!(
            source.start(sink.clone()),
            Err(SourceError::FileNotFound { .. })
        ));

        let mut junk = NamedTempFile::new().unwrap();
        junk.write_all(b"not a capture").unwrap();
        junk.flush().unwrap();
        let mut source = FileReplaySource::new(junk.path());
        assert!(matches!(
            source.start(sink),
            Err(SourceError::InvalidFormat { .. })
        ));
    }

    // Test 4: double start is rejected
    #[test]
    fn test_double_start() {
        let file = write_pcap(&[b"x"]);
        let packets = Arc::new(Mutex::new(Vec::new()));
        let stopped = Arc::new(AtomicBool::new(false));

        let mut source = FileReplaySource::new(file.path());
        let sink = collecting_sink(packets, stopped);
        source.start(sink.clone()).unwrap();
        assert!(matches!(
            source.start(sink),
            Err(SourceError::AlreadyStarted)
        ));
        source.stop();
    }
}
