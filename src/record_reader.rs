use std::io::{ErrorKind, Read};

use anyhow::{anyhow, Context};

use crate::alignment_record;
use crate::alignment_record::AlignmentRecord;

/// Reads raw records, one after the other, from a byte stream.
///
/// Sorted partition files and the merged output are plain concatenations of records, each
/// starting with its `block_size`. The end of the stream is only valid at a record boundary.
///
/// # Examples
/// ```
/// use alignment_file_sort::alignment_record::AlignmentRecord;
/// use alignment_file_sort::record_reader::RecordReader;
///
/// let mut bytes = Vec::new();
/// for name in ["r1", "r2"] {
///     let record = AlignmentRecord::builder().with_name(name.as_bytes()).build().unwrap();
///     bytes.extend_from_slice(record.as_bytes());
/// }
/// let records: Vec<AlignmentRecord> = RecordReader::new(bytes.as_slice())
///     .collect::<Result<_, _>>()
///     .unwrap();
/// assert_eq!(records.len(), 2);
/// ```
pub struct RecordReader<R: Read> {
    reader: R,
    position: u64,
}

impl<R: Read> RecordReader<R> {
    pub fn new(reader: R) -> RecordReader<R> {
        RecordReader {
            reader,
            position: 0,
        }
    }

    /// Offset of the next record in the stream.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read the next record into `buf`, replacing its content. Returns false at the end of the
    /// stream.
    pub fn read_record(&mut self, buf: &mut Vec<u8>) -> Result<bool, anyhow::Error> {
        let mut header = [0u8; 4];
        let mut filled = 0;
        while filled < header.len() {
            match self.reader.read(&mut header[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).with_context(|| format!("read block size at offset {}", self.position)),
            }
        }
        if filled == 0 {
            return Ok(false);
        }
        if filled < header.len() {
            return Err(anyhow!("Truncated block size at offset {}", self.position));
        }

        let block_size = u32::from_le_bytes(header) as usize;
        buf.clear();
        buf.extend_from_slice(&header);
        buf.resize(header.len() + block_size, 0);
        self.reader.read_exact(&mut buf[header.len()..])
            .with_context(|| format!("read record of {} bytes at offset {}", block_size, self.position))?;
        alignment_record::check_layout(buf)
            .with_context(|| format!("record at offset {}", self.position))?;
        self.position += buf.len() as u64;
        Ok(true)
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<AlignmentRecord, anyhow::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = Vec::new();
        match self.read_record(&mut buf) {
            Ok(true) => Some(AlignmentRecord::from_bytes(buf).map_err(anyhow::Error::from)),
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::alignment_record::AlignmentRecord;
    use crate::record_reader::RecordReader;

    fn stream(names: &[&str]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for name in names {
            let record = AlignmentRecord::builder()
                .with_name(name.as_bytes())
                .with_payload(vec![1, 2, 3])
                .build()
                .unwrap();
            bytes.extend_from_slice(record.as_bytes());
        }
        bytes
    }

    #[test]
    fn test_empty_stream() -> Result<(), anyhow::Error> {
        let mut reader = RecordReader::new(&b""[..]);
        let mut buf = Vec::new();
        assert!(!reader.read_record(&mut buf)?);
        Ok(())
    }

    #[test]
    fn test_positions() -> Result<(), anyhow::Error> {
        let bytes = stream(&["a", "bb"]);
        let mut reader = RecordReader::new(bytes.as_slice());
        let mut buf = Vec::new();
        assert!(reader.read_record(&mut buf)?);
        assert_eq!(reader.position(), buf.len() as u64);
        let first = buf.len() as u64;
        assert!(reader.read_record(&mut buf)?);
        assert_eq!(AlignmentRecord::from_bytes(buf.clone())?.name(), b"bb");
        assert_eq!(reader.position(), first + buf.len() as u64);
        assert!(!reader.read_record(&mut buf)?);
        Ok(())
    }

    #[test]
    fn test_truncated_record() {
        let bytes = stream(&["a", "b"]);
        let truncated = &bytes[..bytes.len() - 2];
        let results: Vec<_> = RecordReader::new(truncated).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());

        let bytes = stream(&["a"]);
        let mut partial_header = bytes.clone();
        partial_header.extend_from_slice(&[1, 2]);
        let results: Vec<_> = RecordReader::new(partial_header.as_slice()).collect();
        assert_eq!(results.len(), 2);
        assert!(results[1].is_err());
    }
}
