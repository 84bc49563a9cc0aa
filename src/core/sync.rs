//! Cross-stream merging of smoothed values into emitted rows.
//!
//! The three streams arrive at unrelated, unknown rates with no shared clock.
//! A row is emitted when some stream delivers a second value before the
//! current round has been emitted: that stream is the fastest one this round,
//! and every slower stream has had a chance to contribute. The pending row is
//! emitted *before* the repeated value is applied.
//!
//! A stream that stalls completely never triggers emission on its own, so
//! callers may [`flush`](StreamSynchronizer::flush) on a timeout.

use crate::device::StreamKind;
use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::ops::Range;
use std::sync::Arc;

/// Ordered channel names of a merged row, grouped by source stream.
#[derive(Debug, Clone)]
pub struct RowLayout {
    channels: Arc<[String]>,
    slots: HashMap<StreamKind, Range<usize>>,
}

impl RowLayout {
    /// Lay out channel groups in the given order.
    ///
    /// Fails with [`SyncError::DuplicateChannel`] if a name appears twice.
    pub fn new(groups: &[(StreamKind, Vec<String>)]) -> SyncResult<Self> {
        let mut channels = Vec::new();
        let mut slots = HashMap::new();
        let mut seen = HashSet::new();

        for (stream, names) in groups {
            let start = channels.len();
            for name in names {
                if !seen.insert(name.as_str()) {
                    return Err(SyncError::DuplicateChannel { name: name.clone() });
                }
                channels.push(name.clone());
            }
            slots.insert(*stream, start..channels.len());
        }

        Ok(Self {
            channels: channels.into(),
            slots,
        })
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Row positions written by a stream.
    pub fn slot(&self, stream: StreamKind) -> Option<Range<usize>> {
        self.slots.get(&stream).cloned()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// One emitted instant of merged telemetry.
#[derive(Debug, Clone)]
pub struct Row {
    /// Emission index within the session, starting at 0
    pub seq: u64,
    /// Wall-clock time of emission
    pub timestamp: DateTime<Utc>,
    channels: Arc<[String]>,
    values: Vec<f64>,
}

impl Row {
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, channel: &str) -> Option<f64> {
        self.channels
            .iter()
            .position(|c| c == channel)
            .map(|i| self.values[i])
    }

    /// Iterate `(channel, value)` pairs in layout order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.channels
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Row", 3)?;
        s.serialize_field("seq", &self.seq)?;
        s.serialize_field("timestamp", &self.timestamp)?;
        s.serialize_field("channels", &OrderedChannels(self))?;
        s.end()
    }
}

/// Channel map serialized in layout order.
struct OrderedChannels<'a>(&'a Row);

impl Serialize for OrderedChannels<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in self.0.iter() {
            map.serialize_entry(name, &value)?;
        }
        map.end()
    }
}

/// Merges per-stream values and decides when a row is complete.
#[derive(Debug)]
pub struct StreamSynchronizer {
    layout: RowLayout,
    values: Vec<f64>,
    /// Streams that delivered a value since the last emission
    fresh: BTreeSet<StreamKind>,
    rows_emitted: u64,
}

impl StreamSynchronizer {
    /// All channels start at `0.0` until their stream first reports.
    pub fn new(layout: RowLayout) -> Self {
        let values = vec![0.0; layout.len()];
        Self {
            layout,
            values,
            fresh: BTreeSet::new(),
            rows_emitted: 0,
        }
    }

    /// Offer a new set of values for one stream.
    ///
    /// Returns the row completed by this arrival, if any. On a shape mismatch
    /// nothing is merged and no row is emitted.
    pub fn offer(&mut self, stream: StreamKind, values: &[f64]) -> SyncResult<Option<Row>> {
        let slot = self.layout.slot(stream).unwrap_or(0..0);
        if slot.len() != values.len() {
            return Err(SyncError::shape(stream.group(), slot.len(), values.len()));
        }

        let emitted = if self.fresh.contains(&stream) {
            self.emit()
        } else {
            None
        };

        self.values[slot].copy_from_slice(values);
        self.fresh.insert(stream);
        Ok(emitted)
    }

    /// Emit the pending row if any stream has reported since the last one.
    pub fn flush(&mut self) -> Option<Row> {
        if self.fresh.is_empty() {
            return None;
        }
        self.emit()
    }

    /// Snapshot of the row as it stands, without emitting it.
    pub fn current(&self) -> Row {
        self.snapshot()
    }

    /// Streams that have reported since the last emission.
    pub fn fresh(&self) -> impl Iterator<Item = StreamKind> + '_ {
        self.fresh.iter().copied()
    }

    pub fn is_fresh(&self, stream: StreamKind) -> bool {
        self.fresh.contains(&stream)
    }

    pub fn rows_emitted(&self) -> u64 {
        self.rows_emitted
    }

    pub fn layout(&self) -> &RowLayout {
        &self.layout
    }

    fn emit(&mut self) -> Option<Row> {
        let row = self.snapshot();
        self.fresh.clear();
        self.rows_emitted += 1;
        Some(row)
    }

    fn snapshot(&self) -> Row {
        Row {
            seq: self.rows_emitted,
            timestamp: Utc::now(),
            channels: Arc::clone(&self.layout.channels),
            values: self.values.clone(),
        }
    }
}
