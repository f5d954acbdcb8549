use std::io::Write;

use anyhow::{anyhow, Context};

use crate::alignment_record::AlignmentRecord;
use crate::big_buffer::{BigBuffer, DEFAULT_SEGMENT_SIZE};
use crate::record_comparator::{NameSource, RecordComparator};
use crate::serialized_record::SerializedRecord;

/// Memory bounded append only store of serialized records.
///
/// Record bytes are copied into a [BigBuffer] sized to the container budget, so the bytes held
/// never exceed the budget. A parallel index of [SerializedRecord] keys is sorted instead of the
/// bytes. A container is not synchronized, the owner serializes access to it.
#[derive(Debug)]
pub struct RecordContainer {
    buffer: BigBuffer,
    cursor: u64,
    records: Vec<SerializedRecord>,
    sorted: bool,
}

impl NameSource for BigBuffer {
    fn read_name(&self, record: &SerializedRecord) -> &[u8] {
        match self.slice(record.offset(), record.size() as usize) {
            Some(bytes) => bytes.read_name(record),
            None => &[],
        }
    }
}

impl RecordContainer {
    /// Create a container holding at most `budget_bytes` of record data.
    pub fn new(budget_bytes: u64) -> RecordContainer {
        Self::with_segment_size(budget_bytes, DEFAULT_SEGMENT_SIZE)
    }

    pub fn with_segment_size(budget_bytes: u64, segment_size: usize) -> RecordContainer {
        RecordContainer {
            buffer: BigBuffer::with_segment_size(budget_bytes, segment_size),
            cursor: 0,
            records: Vec::new(),
            sorted: false,
        }
    }

    /// Copy `record` into the buffer. Returns false, leaving the container unchanged, when the
    /// record does not fit into the remaining space.
    pub fn try_append(&mut self, record: &AlignmentRecord) -> bool {
        let offset = match self.buffer.next_fit(self.cursor, record.len()) {
            Some(offset) => offset,
            None => return false,
        };
        let written = self.buffer.write(offset, record.as_bytes());
        debug_assert!(written.is_ok(), "next_fit placed {} bytes at {} but the write failed: {:?}", record.len(), offset, written);
        if written.is_err() {
            // the writer reports a record that fits but fails to append as an invariant violation
            return false;
        }
        self.cursor = offset + record.len() as u64;
        self.records.push(SerializedRecord::new(offset, record));
        self.sorted = false;
        true
    }

    /// Whether a record of `size` bytes would fit into the remaining space.
    pub fn can_fit(&self, size: usize) -> bool {
        self.buffer.next_fit(self.cursor, size).is_some()
    }

    /// Sort the index by [RecordComparator]. Record bytes stay in place.
    pub fn sort(&mut self) {
        let buffer = &self.buffer;
        self.records.sort_by(|left, right| RecordComparator::compare(left, buffer, right, buffer));
        self.sorted = true;
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Bytes consumed so far, including segment tails skipped to avoid splitting a record.
    pub fn bytes_used(&self) -> u64 {
        self.cursor
    }

    pub fn budget(&self) -> u64 {
        self.buffer.capacity()
    }

    /// Key of the `i`-th record in the current index order.
    pub fn key(&self, i: usize) -> Option<&SerializedRecord> {
        self.records.get(i)
    }

    /// Bytes of the `i`-th record in the current index order.
    pub fn record_bytes(&self, i: usize) -> Option<&[u8]> {
        let record = self.records.get(i)?;
        self.buffer.slice(record.offset(), record.size() as usize)
    }

    /// Stream the `i`-th record to `sink`.
    pub fn write<W: Write + ?Sized>(&self, i: usize, sink: &mut W) -> Result<(), anyhow::Error> {
        let bytes = self.record_bytes(i)
            .ok_or_else(|| anyhow!("Record {} is out of range, the container holds {} records", i, self.len()))?;
        sink.write_all(bytes)
            .with_context(|| format!("write record {} of {} bytes", i, bytes.len()))?;
        Ok(())
    }

    /// Drop all records and zero the buffer.
    pub fn clear(&mut self) {
        self.records.clear();
        self.cursor = 0;
        self.sorted = false;
        self.buffer.clear();
    }
}
