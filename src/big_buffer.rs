use std::cmp::min;

use anyhow::anyhow;

/// Default capacity of a single [BigBuffer] segment, 1 GiB.
pub const DEFAULT_SEGMENT_SIZE: usize = 1 << 30;

/// A logically contiguous byte space addressed by 64 bit offsets.
///
/// The space is backed by a list of fixed size segments, so the total capacity is not limited
/// by the maximum size of a single allocation. Offset `o` lives in segment `o / segment_size` at
/// `o % segment_size`. All segments but the last have `segment_size` bytes, the last one is
/// truncated to the remainder.
///
/// Writes never span a segment boundary. [BigBuffer::next_fit] finds the placement for a
/// write of a given length: the cursor itself when the bytes fit in the rest of the current
/// segment, otherwise the start of the next segment. The skipped tail of the current segment
/// is wasted.
///
/// # Examples
/// ```
/// use alignment_file_sort::big_buffer::BigBuffer;
///
/// let buffer = BigBuffer::with_segment_size(10, 4);
/// assert_eq!(buffer.segments(), 3);
/// assert_eq!(buffer.locate(9), Some((2, 1)));
/// assert_eq!(buffer.locate(10), None);
/// // 3 bytes at offset 2 would cross into the second segment
/// assert_eq!(buffer.next_fit(2, 3), Some(4));
/// ```
#[derive(Debug)]
pub struct BigBuffer {
    segments: Vec<Vec<u8>>,
    segment_size: usize,
    capacity: u64,
}

impl BigBuffer {
    /// Allocate `total_bytes` using [DEFAULT_SEGMENT_SIZE] segments.
    pub fn allocate(total_bytes: u64) -> BigBuffer {
        Self::with_segment_size(total_bytes, DEFAULT_SEGMENT_SIZE)
    }

    /// Allocate `total_bytes` split into segments of `segment_size` bytes. A `segment_size` of
    /// zero is treated as one.
    pub fn with_segment_size(total_bytes: u64, segment_size: usize) -> BigBuffer {
        let segment_size = segment_size.max(1);
        let mut segments = Vec::new();
        let mut remainder = total_bytes;
        while remainder > 0 {
            let size = min(remainder, segment_size as u64) as usize;
            segments.push(vec![0u8; size]);
            remainder -= size as u64;
        }

        BigBuffer {
            segments,
            segment_size,
            capacity: total_bytes,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    /// Number of allocated segments.
    pub fn segments(&self) -> usize {
        self.segments.len()
    }

    /// Translate `offset` to `(segment, offset_in_segment)`, `None` if outside the capacity.
    pub fn locate(&self, offset: u64) -> Option<(usize, usize)> {
        if offset >= self.capacity {
            return None;
        }
        let segment = (offset / self.segment_size as u64) as usize;
        let offset_in_segment = (offset % self.segment_size as u64) as usize;
        Some((segment, offset_in_segment))
    }

    /// Offset at which `len` bytes can be written without crossing a segment boundary, given
    /// that the free space starts at `cursor`. `None` when there is no room left anywhere.
    pub fn next_fit(&self, cursor: u64, len: usize) -> Option<u64> {
        if len > self.segment_size {
            return None;
        }
        let (segment, offset_in_segment) = self.locate(cursor)?;
        if offset_in_segment + len <= self.segments[segment].len() {
            return Some(cursor);
        }
        let next = segment + 1;
        if next < self.segments.len() && len <= self.segments[next].len() {
            Some(next as u64 * self.segment_size as u64)
        } else {
            None
        }
    }

    /// Copy `bytes` to `offset`. The whole range must lie inside one segment.
    pub fn write(&mut self, offset: u64, bytes: &[u8]) -> Result<(), anyhow::Error> {
        let (segment, start) = self.locate(offset)
            .ok_or_else(|| anyhow!("Offset {} is outside of the buffer capacity {}", offset, self.capacity))?;
        let target = self.segments[segment]
            .get_mut(start..start + bytes.len())
            .ok_or_else(|| anyhow!("Write of {} bytes at offset {} crosses a segment boundary", bytes.len(), offset))?;
        target.copy_from_slice(bytes);
        Ok(())
    }

    /// Borrow `len` bytes starting at `offset`, `None` if the range is not inside one segment.
    pub fn slice(&self, offset: u64, len: usize) -> Option<&[u8]> {
        let (segment, start) = self.locate(offset)?;
        self.segments[segment].get(start..start + len)
    }

    /// Zero all segments.
    pub fn clear(&mut self) {
        for segment in &mut self.segments {
            segment.fill(0);
        }
    }
}
