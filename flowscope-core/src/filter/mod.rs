//! Packet filtering: the filter contract and its worker groups.
//!
//! A filter is the compiled form of a user expression; the expression
//! language and its compiler are external. Each installed filter owns a named
//! worker group that scans the store from sequence 1 upward and materializes
//! matches into a grow-only [`SequenceSet`](crate::store::SequenceSet).

mod group;

pub use group::{FilterGroupContext, FilterWorkerGroup};

use compact_str::CompactString;
use smallvec::SmallVec;

use crate::error::ScriptError;
use crate::log::{Level, LogMessage};
use crate::packet::Packet;

/// Compiled form of a filter expression.
pub trait Filter: Send + Sync {
    /// Opaque identity of the backing expression, used for log deduplication.
    fn resource_name(&self) -> &str;

    /// Evaluate one packet. An `Err` is reported as an error-level log record
    /// and the packet is treated as non-matching.
    fn matches(&self, packet: &Packet, ctx: &mut FilterContext) -> Result<bool, ScriptError>;
}

/// Per-evaluation context handed to a filter; provides logging only.
pub struct FilterContext {
    resource: CompactString,
    logs: SmallVec<[LogMessage; 2]>,
}

impl FilterContext {
    pub(crate) fn new(resource: &str) -> Self {
        Self {
            resource: CompactString::from(resource),
            logs: SmallVec::new(),
        }
    }

    /// Report a log record attributed to the filter.
    pub fn log(&mut self, level: Level, message: impl Into<String>) {
        self.logs.push(LogMessage::new(
            level,
            "filter",
            self.resource.clone(),
            message,
        ));
    }

    pub(crate) fn take_logs(&mut self) -> Vec<LogMessage> {
        std::mem::take(&mut self.logs).into_vec()
    }
}
