use crate::alignment_record;
use crate::alignment_record::{AlignmentRecord, FLAG_REVERSE};
use crate::error::SortError;

/// Location of one record inside a byte store plus a copy of the fields it is sorted by.
///
/// `offset` is relative to whatever holds the record bytes: a [crate::big_buffer::BigBuffer]
/// for records in memory, the file for records in a sorted partition file. The read name is
/// not copied, it is compared in place through a [crate::record_comparator::NameSource].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SerializedRecord {
    offset: u64,
    size: u32,
    ref_id: i32,
    position: i32,
    mapq: u8,
    flags: u16,
    mate_ref_id: i32,
    mate_position: i32,
    template_length: i32,
}

impl SerializedRecord {
    pub fn new(offset: u64, record: &AlignmentRecord) -> SerializedRecord {
        Self::from_valid_bytes(offset, record.as_bytes())
    }

    /// Build the key of the raw record `bytes` found at `offset`.
    pub fn from_bytes(offset: u64, bytes: &[u8]) -> Result<SerializedRecord, SortError> {
        alignment_record::check_layout(bytes)?;
        Ok(Self::from_valid_bytes(offset, bytes))
    }

    // check_layout rejects records longer than u32::MAX
    fn from_valid_bytes(offset: u64, bytes: &[u8]) -> SerializedRecord {
        SerializedRecord {
            offset,
            size: alignment_record::size(bytes),
            ref_id: alignment_record::ref_id(bytes),
            position: alignment_record::position(bytes),
            mapq: alignment_record::mapq(bytes),
            flags: alignment_record::flags(bytes),
            mate_ref_id: alignment_record::mate_ref_id(bytes),
            mate_position: alignment_record::mate_position(bytes),
            template_length: alignment_record::template_length(bytes),
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Encoded length of the record in bytes.
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn ref_id(&self) -> i32 {
        self.ref_id
    }

    pub fn position(&self) -> i32 {
        self.position
    }

    pub fn mapq(&self) -> u8 {
        self.mapq
    }

    pub fn flags(&self) -> u16 {
        self.flags
    }

    pub fn mate_ref_id(&self) -> i32 {
        self.mate_ref_id
    }

    pub fn mate_position(&self) -> i32 {
        self.mate_position
    }

    pub fn template_length(&self) -> i32 {
        self.template_length
    }

    pub fn is_reverse(&self) -> bool {
        self.flags & FLAG_REVERSE != 0
    }

    pub fn is_unmapped(&self) -> bool {
        self.ref_id < 0
    }
}
