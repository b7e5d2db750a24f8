//! Packet and layer data model.
//!
//! A [`Packet`] owns a tree of [`Layer`]s. Dissection workers grow the tree
//! breadth-first; once the packet is inserted into the store it is shared as
//! `Arc<Packet>` and never mutated again. Layers hold no pointers upward -
//! parent navigation goes through [`Packet::walk`].

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use compact_str::CompactString;

/// An owned attribute value attached to a layer.
///
/// Dissector output outlives the dissection call, so every variant owns its
/// data; `Str` uses small-string optimization for the common short case.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Bool(bool),
    UInt(u64),
    Int(i64),
    Float(f64),
    Str(CompactString),
    Bytes(Bytes),
    Nil,
}

impl AttrValue {
    /// Check if this is a nil value.
    pub fn is_nil(&self) -> bool {
        matches!(self, AttrValue::Nil)
    }

    /// Try to get as u64.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            AttrValue::UInt(v) => Some(*v),
            AttrValue::Int(v) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }

    /// Try to get as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// A single decoded protocol level.
///
/// `id` is the namespace-qualified name (e.g. `"eth.ipv4"`); `name` is the
/// human-readable form. `confidence` expresses how certain the producing
/// dissector was, 1.0 meaning certain.
#[derive(Debug, Clone)]
pub struct Layer {
    pub id: CompactString,
    pub name: CompactString,
    pub payload: Bytes,
    pub attrs: Vec<(CompactString, AttrValue)>,
    pub confidence: f32,
    pub children: Vec<Layer>,
}

impl Layer {
    pub fn new(id: impl Into<CompactString>, name: impl Into<CompactString>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            payload: Bytes::new(),
            attrs: Vec::new(),
            confidence: 1.0,
            children: Vec::new(),
        }
    }

    /// Builder-style payload assignment.
    pub fn with_payload(mut self, payload: Bytes) -> Self {
        self.payload = payload;
        self
    }

    /// Builder-style confidence assignment.
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    /// Get an attribute value by key (linear search, but N is small).
    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Set an attribute value (updates existing or appends).
    pub fn set_attr(&mut self, key: impl Into<CompactString>, value: AttrValue) {
        let key = key.into();
        if let Some(entry) = self.attrs.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.attrs.push((key, value));
        }
    }
}

/// A captured (or synthesized) packet: a tree of layers plus capture
/// metadata.
///
/// The sequence number is 0 until the store assigns one at insert time;
/// sequence order reflects dissection completion, not capture time. Callers
/// that need temporal order must sort by `timestamp_us`.
#[derive(Debug)]
pub struct Packet {
    seq: u32,
    pub timestamp_us: i64,
    pub original_length: u32,
    pub captured_length: u32,
    pub payload: Bytes,
    pub layers: Vec<Layer>,
}

impl Packet {
    /// Build a packet from captured frame bytes. No layers are attached; the
    /// session wraps the payload in its namespace root layer on `analyze`.
    pub fn from_capture(timestamp_us: i64, original_length: u32, payload: Bytes) -> Self {
        Self {
            seq: 0,
            timestamp_us,
            original_length,
            captured_length: payload.len() as u32,
            payload,
            layers: Vec::new(),
        }
    }

    /// Build a virtual packet around a layer synthesized by stream
    /// dissection. Virtual packets are first-class: they re-enter the main
    /// queue and receive their own sequence numbers.
    pub fn from_layer(layer: Layer) -> Self {
        let payload = layer.payload.clone();
        Self {
            seq: 0,
            timestamp_us: now_us(),
            original_length: payload.len() as u32,
            captured_length: payload.len() as u32,
            payload,
            layers: vec![layer],
        }
    }

    /// Store-assigned sequence number; 0 before insertion.
    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub(crate) fn assign_seq(&mut self, seq: u32) {
        debug_assert_eq!(self.seq, 0, "sequence assigned twice");
        self.seq = seq;
    }

    /// Breadth-first traversal over the layer tree.
    pub fn walk(&self) -> impl Iterator<Item = &Layer> {
        let mut pending: VecDeque<&Layer> = self.layers.iter().collect();
        std::iter::from_fn(move || {
            let layer = pending.pop_front()?;
            pending.extend(layer.children.iter());
            Some(layer)
        })
    }

    /// Resolve a layer by its child-index path from the roots.
    pub fn layer(&self, path: &[usize]) -> Option<&Layer> {
        let (&first, rest) = path.split_first()?;
        let mut layer = self.layers.get(first)?;
        for &idx in rest {
            layer = layer.children.get(idx)?;
        }
        Some(layer)
    }

    pub(crate) fn layer_mut(&mut self, path: &[usize]) -> Option<&mut Layer> {
        let (&first, rest) = path.split_first()?;
        let mut layer = self.layers.get_mut(first)?;
        for &idx in rest {
            layer = layer.children.get_mut(idx)?;
        }
        Some(layer)
    }
}

fn now_us() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}
