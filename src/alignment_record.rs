//! Raw alignment records.
//!
//! An [AlignmentRecord] holds the little endian BAM v1 encoding of one alignment, including the
//! leading `block_size` field, so records are self delimiting and a sorted stream of records is a
//! plain concatenation of their bytes.
//!
//! ```text
//! offset  size  field
//!      0     4  block_size       u32, length of the record without this field
//!      4     4  ref_id           i32, -1 when the record has no reference
//!      8     4  position         i32, 0-based
//!     12     1  l_read_name      u8, includes the NUL terminator
//!     13     1  mapq             u8
//!     14     2  bin              u16
//!     16     2  n_cigar_op       u16
//!     18     2  flags            u16
//!     20     4  l_seq            u32
//!     24     4  mate ref_id      i32
//!     28     4  mate position    i32
//!     32     4  template length  i32
//!     36     *  read name, NUL terminated, followed by the opaque remainder of the record
//! ```
//!
//! Only the fields above are interpreted. Everything following the read name is carried as is.

use std::fmt::{Debug, Formatter};

use crate::error::SortError;

/// Size of the fixed part of a record, `block_size` included.
pub const FIXED_FIELDS_SIZE: usize = 36;
/// Offset of the NUL terminated read name.
pub const READ_NAME_OFFSET: usize = FIXED_FIELDS_SIZE;
/// Flag bit set for records without an alignment.
pub const FLAG_UNMAPPED: u16 = 0x4;
/// Flag bit set for records aligned to the reverse strand.
pub const FLAG_REVERSE: u16 = 0x10;

const REF_ID_OFFSET: usize = 4;
const POSITION_OFFSET: usize = 8;
const L_READ_NAME_OFFSET: usize = 12;
const MAPQ_OFFSET: usize = 13;
const BIN_OFFSET: usize = 14;
const FLAGS_OFFSET: usize = 18;
const MATE_REF_ID_OFFSET: usize = 24;
const MATE_POSITION_OFFSET: usize = 28;
const TEMPLATE_LENGTH_OFFSET: usize = 32;
const MAX_READ_NAME_LEN: usize = 254;

fn invalid(reason: String) -> SortError {
    SortError::InvalidRecord { reason }
}

/// Total length of a record as stored in a sort key, rejecting records longer than `u32::MAX`.
pub(crate) fn record_size(len: usize) -> Result<u32, SortError> {
    u32::try_from(len).map_err(|_| invalid(format!("record of {} bytes exceeds {} bytes", len, u32::MAX)))
}

/// Validate the layout of raw record bytes.
pub(crate) fn check_layout(bytes: &[u8]) -> Result<(), SortError> {
    record_size(bytes.len())?;
    if bytes.len() < FIXED_FIELDS_SIZE {
        return Err(invalid(format!("record of {} bytes is shorter than the {} byte fixed header", bytes.len(), FIXED_FIELDS_SIZE)));
    }
    let block_size = read_u32(bytes, 0) as usize;
    if block_size + 4 != bytes.len() {
        return Err(invalid(format!("block size {} does not match the record length {}", block_size, bytes.len())));
    }
    let l_read_name = bytes[L_READ_NAME_OFFSET] as usize;
    if l_read_name == 0 {
        return Err(invalid("read name length is zero".to_string()));
    }
    let name_end = READ_NAME_OFFSET + l_read_name;
    if name_end > bytes.len() {
        return Err(invalid(format!("read name of {} bytes exceeds the record length {}", l_read_name, bytes.len())));
    }
    if bytes[name_end - 1] != 0 {
        return Err(invalid("read name is not NUL terminated".to_string()));
    }
    Ok(())
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn read_i32(bytes: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

// field readers below expect bytes that passed check_layout

pub(crate) fn size(bytes: &[u8]) -> u32 {
    read_u32(bytes, 0) + 4
}

pub(crate) fn ref_id(bytes: &[u8]) -> i32 {
    read_i32(bytes, REF_ID_OFFSET)
}

pub(crate) fn position(bytes: &[u8]) -> i32 {
    read_i32(bytes, POSITION_OFFSET)
}

pub(crate) fn mapq(bytes: &[u8]) -> u8 {
    bytes[MAPQ_OFFSET]
}

pub(crate) fn flags(bytes: &[u8]) -> u16 {
    read_u16(bytes, FLAGS_OFFSET)
}

pub(crate) fn mate_ref_id(bytes: &[u8]) -> i32 {
    read_i32(bytes, MATE_REF_ID_OFFSET)
}

pub(crate) fn mate_position(bytes: &[u8]) -> i32 {
    read_i32(bytes, MATE_POSITION_OFFSET)
}

pub(crate) fn template_length(bytes: &[u8]) -> i32 {
    read_i32(bytes, TEMPLATE_LENGTH_OFFSET)
}

/// The read name bytes up to, not including, the first NUL. Does not allocate.
pub(crate) fn read_name(bytes: &[u8]) -> &[u8] {
    let field = bytes.get(READ_NAME_OFFSET..).unwrap_or(&[]);
    let end = field.iter().position(|b| *b == 0).unwrap_or(field.len());
    &field[..end]
}

/// BAM bin for the zero based, half open interval `[beg, end)`.
fn reg2bin(beg: i32, end: i32) -> u16 {
    let end = end - 1;
    let bin = if beg >> 14 == end >> 14 {
        ((1 << 15) - 1) / 7 + (beg >> 14)
    } else if beg >> 17 == end >> 17 {
        ((1 << 12) - 1) / 7 + (beg >> 17)
    } else if beg >> 20 == end >> 20 {
        ((1 << 9) - 1) / 7 + (beg >> 20)
    } else if beg >> 23 == end >> 23 {
        ((1 << 6) - 1) / 7 + (beg >> 23)
    } else if beg >> 26 == end >> 26 {
        ((1 << 3) - 1) / 7 + (beg >> 26)
    } else {
        0
    };
    bin as u16
}

/// One alignment record in its raw encoding.
#[derive(Clone, PartialEq, Eq)]
pub struct AlignmentRecord {
    bytes: Vec<u8>,
}

impl AlignmentRecord {
    /// Wrap raw record bytes, `block_size` included, after validating their layout.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<AlignmentRecord, SortError> {
        check_layout(&bytes)?;
        Ok(AlignmentRecord { bytes })
    }

    /// Start building a record. See [AlignmentRecordBuilder].
    pub fn builder() -> AlignmentRecordBuilder {
        AlignmentRecordBuilder::new()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn ref_id(&self) -> i32 {
        ref_id(&self.bytes)
    }

    pub fn position(&self) -> i32 {
        position(&self.bytes)
    }

    pub fn mapq(&self) -> u8 {
        mapq(&self.bytes)
    }

    pub fn bin(&self) -> u16 {
        read_u16(&self.bytes, BIN_OFFSET)
    }

    pub fn flags(&self) -> u16 {
        flags(&self.bytes)
    }

    pub fn mate_ref_id(&self) -> i32 {
        mate_ref_id(&self.bytes)
    }

    pub fn mate_position(&self) -> i32 {
        mate_position(&self.bytes)
    }

    pub fn template_length(&self) -> i32 {
        template_length(&self.bytes)
    }

    /// Read name without the NUL terminator.
    pub fn name(&self) -> &[u8] {
        read_name(&self.bytes)
    }

    pub fn is_reverse(&self) -> bool {
        self.flags() & FLAG_REVERSE != 0
    }

    /// A record is unmapped for sorting purposes when it has no reference.
    pub fn is_unmapped(&self) -> bool {
        self.ref_id() < 0
    }

    /// The opaque part of the record following the read name.
    pub fn payload(&self) -> &[u8] {
        let l_read_name = self.bytes[L_READ_NAME_OFFSET] as usize;
        &self.bytes[READ_NAME_OFFSET + l_read_name..]
    }
}

impl Debug for AlignmentRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignmentRecord")
            .field("name", &String::from_utf8_lossy(self.name()))
            .field("ref_id", &self.ref_id())
            .field("position", &self.position())
            .field("flags", &self.flags())
            .field("mapq", &self.mapq())
            .field("len", &self.len())
            .finish()
    }
}

/// Builds valid [AlignmentRecord]s from their sort relevant fields and an opaque payload.
///
/// The default is an unmapped record with no mate, an empty name and no payload.
///
/// # Examples
/// ```
/// use alignment_file_sort::alignment_record::AlignmentRecord;
///
/// let record = AlignmentRecord::builder()
///     .with_name(b"read-1")
///     .with_reference(0, 1000)
///     .with_reverse(true)
///     .with_mapq(60)
///     .build()
///     .unwrap();
/// assert_eq!(record.name(), b"read-1");
/// assert!(record.is_reverse());
/// assert!(!record.is_unmapped());
/// ```
#[derive(Clone, Debug)]
pub struct AlignmentRecordBuilder {
    name: Vec<u8>,
    ref_id: i32,
    position: i32,
    mapq: u8,
    flags: u16,
    mate_ref_id: i32,
    mate_position: i32,
    template_length: i32,
    payload: Vec<u8>,
}

impl AlignmentRecordBuilder {
    pub fn new() -> AlignmentRecordBuilder {
        AlignmentRecordBuilder {
            name: Vec::new(),
            ref_id: -1,
            position: -1,
            mapq: 0,
            flags: FLAG_UNMAPPED,
            mate_ref_id: -1,
            mate_position: -1,
            template_length: 0,
            payload: Vec::new(),
        }
    }

    /// Read name, without a NUL terminator.
    pub fn with_name(mut self, name: &[u8]) -> AlignmentRecordBuilder {
        self.name = name.to_vec();
        self
    }

    /// Place the record on `ref_id` at the 0-based `position`. A non negative `ref_id` clears
    /// the unmapped flag.
    pub fn with_reference(mut self, ref_id: i32, position: i32) -> AlignmentRecordBuilder {
        self.ref_id = ref_id;
        self.position = position;
        if ref_id >= 0 {
            self.flags &= !FLAG_UNMAPPED;
        }
        self
    }

    pub fn with_mapq(mut self, mapq: u8) -> AlignmentRecordBuilder {
        self.mapq = mapq;
        self
    }

    /// Replace all flags.
    pub fn with_flags(mut self, flags: u16) -> AlignmentRecordBuilder {
        self.flags = flags;
        self
    }

    pub fn with_reverse(mut self, reverse: bool) -> AlignmentRecordBuilder {
        if reverse {
            self.flags |= FLAG_REVERSE;
        } else {
            self.flags &= !FLAG_REVERSE;
        }
        self
    }

    pub fn with_mate(mut self, mate_ref_id: i32, mate_position: i32) -> AlignmentRecordBuilder {
        self.mate_ref_id = mate_ref_id;
        self.mate_position = mate_position;
        self
    }

    pub fn with_template_length(mut self, template_length: i32) -> AlignmentRecordBuilder {
        self.template_length = template_length;
        self
    }

    /// Opaque bytes stored after the read name.
    pub fn with_payload(mut self, payload: Vec<u8>) -> AlignmentRecordBuilder {
        self.payload = payload;
        self
    }

    pub fn build(self) -> Result<AlignmentRecord, SortError> {
        if self.name.contains(&0) {
            return Err(invalid("read name contains a NUL byte".to_string()));
        }
        if self.name.len() > MAX_READ_NAME_LEN {
            return Err(invalid(format!("read name of {} bytes is longer than {}", self.name.len(), MAX_READ_NAME_LEN)));
        }
        let l_read_name = self.name.len() + 1;
        let len = FIXED_FIELDS_SIZE + l_read_name + self.payload.len();
        let block_size = u32::try_from(len - 4)
            .map_err(|_| invalid(format!("record of {} bytes is too large", len)))?;
        let bin = if self.ref_id < 0 || self.position < 0 {
            reg2bin(-1, 0)
        } else {
            reg2bin(self.position, self.position.saturating_add(1))
        };

        let mut bytes = Vec::with_capacity(len);
        bytes.extend_from_slice(&block_size.to_le_bytes());
        bytes.extend_from_slice(&self.ref_id.to_le_bytes());
        bytes.extend_from_slice(&self.position.to_le_bytes());
        bytes.push(l_read_name as u8);
        bytes.push(self.mapq);
        bytes.extend_from_slice(&bin.to_le_bytes());
        // no cigar operations and no sequence, anything else lives in the payload
        bytes.extend_from_slice(&0u16.to_le_bytes());
        bytes.extend_from_slice(&self.flags.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&self.mate_ref_id.to_le_bytes());
        bytes.extend_from_slice(&self.mate_position.to_le_bytes());
        bytes.extend_from_slice(&self.template_length.to_le_bytes());
        bytes.extend_from_slice(&self.name);
        bytes.push(0);
        bytes.extend_from_slice(&self.payload);

        AlignmentRecord::from_bytes(bytes)
    }
}

impl Default for AlignmentRecordBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use crate::alignment_record::{AlignmentRecord, FLAG_REVERSE, FLAG_UNMAPPED, record_size, reg2bin};
    use crate::error::SortError;

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_record_size_limit() {
        assert_eq!(record_size(u32::MAX as usize).ok(), Some(u32::MAX));
        let error = record_size(u32::MAX as usize + 4).unwrap_err();
        assert!(matches!(error, SortError::InvalidRecord { .. }));
    }

    #[test]
    fn test_builder_fields() -> Result<(), anyhow::Error> {
        let record = AlignmentRecord::builder()
            .with_name(b"q17")
            .with_reference(2, 12345)
            .with_mapq(37)
            .with_reverse(true)
            .with_mate(3, 999)
            .with_template_length(-250)
            .with_payload(vec![9, 8, 7])
            .build()?;

        assert_eq!(record.len(), 36 + 4 + 3);
        assert_eq!(record.ref_id(), 2);
        assert_eq!(record.position(), 12345);
        assert_eq!(record.mapq(), 37);
        assert_eq!(record.flags(), FLAG_REVERSE);
        assert!(record.is_reverse());
        assert!(!record.is_unmapped());
        assert_eq!(record.mate_ref_id(), 3);
        assert_eq!(record.mate_position(), 999);
        assert_eq!(record.template_length(), -250);
        assert_eq!(record.name(), b"q17");
        assert_eq!(record.payload(), &[9, 8, 7]);
        assert_eq!(record.bin(), reg2bin(12345, 12346));
        Ok(())
    }

    #[test]
    fn test_default_is_unmapped() -> Result<(), anyhow::Error> {
        let record = AlignmentRecord::builder().with_name(b"u").build()?;
        assert!(record.is_unmapped());
        assert_eq!(record.flags() & FLAG_UNMAPPED, FLAG_UNMAPPED);
        assert_eq!(record.bin(), 4680);
        Ok(())
    }

    #[test]
    fn test_reg2bin() {
        assert_eq!(reg2bin(0, 1), 4681);
        assert_eq!(reg2bin(16384, 16385), 4682);
        assert_eq!(reg2bin(16000, 17000), 585);
    }

    #[test]
    fn test_from_bytes_rejects_malformed() -> Result<(), anyhow::Error> {
        let bytes = AlignmentRecord::builder().with_name(b"abc").build()?.into_bytes();

        let short = bytes[..20].to_vec();
        assert!(matches!(AlignmentRecord::from_bytes(short), Err(SortError::InvalidRecord { .. })));

        let mut wrong_size = bytes.clone();
        wrong_size.push(1);
        assert!(matches!(AlignmentRecord::from_bytes(wrong_size), Err(SortError::InvalidRecord { .. })));

        let mut unterminated = bytes.clone();
        let last = unterminated.len() - 1;
        unterminated[last] = b'x';
        assert!(matches!(AlignmentRecord::from_bytes(unterminated), Err(SortError::InvalidRecord { .. })));

        let mut no_name = bytes.clone();
        no_name[12] = 0;
        assert!(matches!(AlignmentRecord::from_bytes(no_name), Err(SortError::InvalidRecord { .. })));

        let mut long_name = bytes;
        long_name[12] = 200;
        assert!(matches!(AlignmentRecord::from_bytes(long_name), Err(SortError::InvalidRecord { .. })));
        Ok(())
    }

    #[test]
    fn test_builder_rejects_nul_in_name() {
        let result = AlignmentRecord::builder().with_name(b"a\0b").build();
        assert!(matches!(result, Err(SortError::InvalidRecord { .. })));
    }
}
