//! The total order of alignment records.
//!
//! Records are ordered by, each tier breaking the ties of the previous one:
//! 1. mapped records before unmapped ones, unmapped records are equal under this tier
//! 2. reference id ascending, then position ascending
//! 3. forward strand before reverse strand
//! 4. map quality descending
//! 5. read name, byte wise up to the first NUL
//! 6. flags, mate reference id, mate position and template length, all ascending
//!
//! This is the order of the on-disk coordinate sort convention the output must interoperate
//! with. Any change to it changes the output format.

use std::cmp::Ordering;

use crate::alignment_record;
use crate::alignment_record::AlignmentRecord;
use crate::serialized_record::SerializedRecord;

/// Access to the read name of a record described by a [SerializedRecord].
///
/// Names are compared in place in the bytes that hold the record, without copying them into a
/// key. Implementations return the name up to, not including, the first NUL.
pub trait NameSource {
    fn read_name(&self, record: &SerializedRecord) -> &[u8];
}

/// The bytes of a single record, the key offset is ignored.
impl NameSource for [u8] {
    fn read_name(&self, _record: &SerializedRecord) -> &[u8] {
        alignment_record::read_name(self)
    }
}

impl NameSource for AlignmentRecord {
    fn read_name(&self, _record: &SerializedRecord) -> &[u8] {
        self.name()
    }
}

/// Stateless comparator implementing the record order.
pub struct RecordComparator;

impl RecordComparator {
    /// Compare two records given their keys and where their names can be read.
    pub fn compare<L, R>(left: &SerializedRecord, left_names: &L, right: &SerializedRecord, right_names: &R) -> Ordering
        where L: NameSource + ?Sized, R: NameSource + ?Sized {
        Self::compare_placement(left, right)
            .then_with(|| left.is_reverse().cmp(&right.is_reverse()))
            .then_with(|| right.mapq().cmp(&left.mapq()))
            .then_with(|| left_names.read_name(left).cmp(right_names.read_name(right)))
            .then_with(|| left.flags().cmp(&right.flags()))
            .then_with(|| left.mate_ref_id().cmp(&right.mate_ref_id()))
            .then_with(|| left.mate_position().cmp(&right.mate_position()))
            .then_with(|| left.template_length().cmp(&right.template_length()))
    }

    /// Compare two standalone records.
    pub fn compare_records(left: &AlignmentRecord, right: &AlignmentRecord) -> Ordering {
        Self::compare(
            &SerializedRecord::new(0, left),
            left,
            &SerializedRecord::new(0, right),
            right,
        )
    }

    fn compare_placement(left: &SerializedRecord, right: &SerializedRecord) -> Ordering {
        match (left.is_unmapped(), right.is_unmapped()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => {
                left.ref_id()
                    .cmp(&right.ref_id())
                    .then_with(|| left.position().cmp(&right.position()))
            }
        }
    }
}
