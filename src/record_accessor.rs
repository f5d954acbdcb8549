use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::io::Write;
use std::thread;

use anyhow::{anyhow, Context};

use crate::record_comparator::RecordComparator;
use crate::record_container::RecordContainer;
use crate::serialized_record::SerializedRecord;

/// Cursor over a sorted source of records.
///
/// Implemented by in-memory containers and by sorted partition files so that the k-way merge
/// treats both alike.
pub trait RecordAccessor {
    /// Key of the current record, `None` once exhausted.
    fn current(&self) -> Option<&SerializedRecord>;

    /// Bytes of the current record, `None` once exhausted.
    fn current_bytes(&self) -> Option<&[u8]>;

    /// Move to the next record.
    fn advance(&mut self) -> Result<(), anyhow::Error>;

    fn is_exhausted(&self) -> bool;

    /// Release the source. Called once, after the accessor is exhausted.
    fn close(&mut self) -> Result<(), anyhow::Error>;
}

/// [RecordAccessor] over a sorted [RecordContainer].
pub struct ContainerAccessor<'a> {
    container: &'a RecordContainer,
    index: usize,
}

impl<'a> ContainerAccessor<'a> {
    /// Fails if the container holds records that were not sorted.
    pub fn new(container: &'a RecordContainer) -> Result<ContainerAccessor<'a>, anyhow::Error> {
        if !container.is_empty() && !container.is_sorted() {
            return Err(anyhow!("Container with {} records must be sorted before it is merged", container.len()));
        }
        Ok(ContainerAccessor { container, index: 0 })
    }
}

impl<'a> RecordAccessor for ContainerAccessor<'a> {
    fn current(&self) -> Option<&SerializedRecord> {
        self.container.key(self.index)
    }

    fn current_bytes(&self) -> Option<&[u8]> {
        self.container.record_bytes(self.index)
    }

    fn advance(&mut self) -> Result<(), anyhow::Error> {
        if !self.is_exhausted() {
            self.index += 1;
        }
        Ok(())
    }

    fn is_exhausted(&self) -> bool {
        self.index >= self.container.len()
    }

    fn close(&mut self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

struct MergeEntry<'a> {
    source: usize,
    accessor: Box<dyn RecordAccessor + 'a>,
}

impl<'a> MergeEntry<'a> {
    fn head(&self) -> Option<(&SerializedRecord, &[u8])> {
        Some((self.accessor.current()?, self.accessor.current_bytes()?))
    }
}

impl<'a> Eq for MergeEntry<'a> {}

impl<'a> PartialEq<Self> for MergeEntry<'a> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<'a> PartialOrd<Self> for MergeEntry<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'a> Ord for MergeEntry<'a> {
    // comparison is flipped to work with BinaryHeap (max heap), ties go to the lower source
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.head(), other.head()) {
            (Some((left, left_bytes)), Some((right, right_bytes))) => {
                RecordComparator::compare(right, right_bytes, left, left_bytes)
                    .then_with(|| other.source.cmp(&self.source))
            }
            (None, None) => other.source.cmp(&self.source),
            // exhausted sources sink to the bottom
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
        }
    }
}

/// Merge sorted accessors into `sink` and return the number of records written.
///
/// Each accessor is closed as soon as it is exhausted, before the next record is written. When
/// an error occurs the remaining accessors are dropped without being closed.
pub fn merge_into<'a, W: Write + ?Sized>(accessors: Vec<Box<dyn RecordAccessor + 'a>>, sink: &mut W) -> Result<u64, anyhow::Error> {
    log::debug!("Merging {} sorted sources, thread: {}", accessors.len(), thread::current().name().unwrap_or("unnamed"));
    let mut heap = BinaryHeap::with_capacity(accessors.len());
    for (source, mut accessor) in accessors.into_iter().enumerate() {
        if accessor.is_exhausted() {
            accessor.close()?;
        } else {
            heap.push(MergeEntry { source, accessor });
        }
    }

    let mut merged: u64 = 0;
    while let Some(mut entry) = heap.pop() {
        let bytes = entry.accessor.current_bytes()
            .ok_or_else(|| anyhow!("Source {} has no current record", entry.source))?;
        sink.write_all(bytes)
            .with_context(|| format!("write merged record {}", merged))?;
        merged += 1;
        entry.accessor.advance()?;
        if entry.accessor.is_exhausted() {
            entry.accessor.close()?;
        } else {
            heap.push(entry);
        }
    }
    Ok(merged)
}
