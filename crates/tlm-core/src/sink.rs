//! Measurement consumers

use crate::record::MeasurementRecord;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Receives the records of one subscription, in arrival order
pub trait MeasurementSink: Send + Sync {
    /// Append the next record
    fn append(&self, record: MeasurementRecord);

    /// Called once, with the first record the subscription delivers
    fn select(&self, _record: &MeasurementRecord) {}
}

#[derive(Debug, Default)]
struct BufferState {
    records: VecDeque<MeasurementRecord>,
    selected: Option<MeasurementRecord>,
    evicted: u64,
}

/// Ordered in-memory sink, optionally bounded
///
/// A bounded buffer evicts its oldest records first.
#[derive(Debug, Default)]
pub struct MeasurementBuffer {
    capacity: Option<usize>,
    state: Mutex<BufferState>,
}

impl MeasurementBuffer {
    /// Unbounded buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer keeping at most `capacity` records
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity.max(1)),
            state: Mutex::default(),
        }
    }

    /// Buffer with an optional bound
    #[must_use]
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        capacity.map_or_else(Self::new, Self::bounded)
    }

    /// Buffered records, oldest first
    #[must_use]
    pub fn records(&self) -> Vec<MeasurementRecord> {
        self.state.lock().records.iter().cloned().collect()
    }

    /// Labels of the buffered records, oldest first
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.state
            .lock()
            .records
            .iter()
            .map(MeasurementRecord::label)
            .collect()
    }

    /// Record passed to `select`
    #[must_use]
    pub fn selected(&self) -> Option<MeasurementRecord> {
        self.state.lock().selected.clone()
    }

    /// Number of buffered records
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Whether nothing is buffered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().records.is_empty()
    }

    /// Records dropped to respect the bound
    #[must_use]
    pub fn evicted(&self) -> u64 {
        self.state.lock().evicted
    }
}

impl MeasurementSink for MeasurementBuffer {
    fn append(&self, record: MeasurementRecord) {
        let mut state = self.state.lock();
        state.records.push_back(record);
        if let Some(capacity) = self.capacity {
            while state.records.len() > capacity {
                state.records.pop_front();
                state.evicted += 1;
            }
        }
    }

    fn select(&self, record: &MeasurementRecord) {
        self.state.lock().selected = Some(record.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tlm_stream::{Encoding, SecurityTier};

    fn record(seq: u64) -> MeasurementRecord {
        MeasurementRecord::decode(seq, SecurityTier::Strong, Encoding::Gpb, vec![u8::try_from(seq).unwrap()])
    }

    #[test]
    fn keeps_arrival_order() {
        let buffer = MeasurementBuffer::new();
        for seq in 1..=5 {
            buffer.append(record(seq));
        }
        let seqs: Vec<u64> = buffer.records().iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn bounded_buffer_evicts_oldest() {
        let buffer = MeasurementBuffer::bounded(2);
        for seq in 1..=4 {
            buffer.append(record(seq));
        }
        let seqs: Vec<u64> = buffer.records().iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![3, 4]);
        assert_eq!(buffer.evicted(), 2);
    }

    #[test]
    fn select_is_remembered() {
        let buffer = MeasurementBuffer::with_capacity(None);
        assert!(buffer.selected().is_none());
        buffer.select(&record(1));
        assert_eq!(buffer.selected().map(|r| r.seq), Some(1));
    }
}
