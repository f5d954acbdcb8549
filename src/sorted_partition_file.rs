use std::fs;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{anyhow, Context};

use crate::record_accessor::{merge_into, RecordAccessor};
use crate::record_reader::RecordReader;
use crate::serialized_record::SerializedRecord;

/// A temp file holding the sorted records of one flush cycle.
///
/// The file is deleted at most once: explicitly by [SortedPartitionFile::delete] once its last
/// reader is done, or on drop if that never happened.
#[derive(Debug)]
pub(crate) struct SortedPartitionFile {
    path: PathBuf,
    cycle: usize,
    records: u64,
    deleted: bool,
}

impl SortedPartitionFile {
    /// Merge the sorted `accessors` into a new file at `path`.
    pub(crate) fn write<'a>(path: PathBuf, cycle: usize, accessors: Vec<Box<dyn RecordAccessor + 'a>>) -> Result<SortedPartitionFile, anyhow::Error> {
        let file = File::create(&path)
            .with_context(|| format!("create partition file: {}", path.display()))?;
        let mut partition = SortedPartitionFile {
            path,
            cycle,
            records: 0,
            deleted: false,
        };
        let mut writer = BufWriter::new(file);
        partition.records = merge_into(accessors, &mut writer)
            .with_context(|| format!("write partition file: {}", partition.path.display()))?;
        writer.flush()
            .with_context(|| format!("flush partition file: {}", partition.path.display()))?;
        log::debug!("Wrote partition {}, records: {}, path: {}", cycle, partition.records, partition.path.display());
        Ok(partition)
    }

    pub(crate) fn path(&self) -> &PathBuf {
        &self.path
    }

    pub(crate) fn cycle(&self) -> usize {
        self.cycle
    }

    pub(crate) fn records(&self) -> u64 {
        self.records
    }

    pub(crate) fn delete(&mut self) -> Result<(), anyhow::Error> {
        if !self.deleted {
            fs::remove_file(&self.path)
                .with_context(|| format!("remove partition file: {}", self.path.display()))?;
            self.deleted = true;
            log::debug!("Removed partition {}, path: {}", self.cycle, self.path.display());
        }
        Ok(())
    }
}

impl Drop for SortedPartitionFile {
    fn drop(&mut self) {
        if !self.deleted {
            if let Err(e) = fs::remove_file(&self.path) {
                log::warn!("Failed to remove partition file {}: {}", self.path.display(), e);
            }
        }
    }
}

/// [RecordAccessor] reading a [SortedPartitionFile]. Closing it deletes the file.
pub(crate) struct FileAccessor {
    partition: SortedPartitionFile,
    reader: Option<RecordReader<BufReader<File>>>,
    current: Option<SerializedRecord>,
    bytes: Vec<u8>,
    read: u64,
}

impl FileAccessor {
    pub(crate) fn open(partition: SortedPartitionFile) -> Result<FileAccessor, anyhow::Error> {
        let file = File::open(partition.path())
            .with_context(|| format!("open partition file: {}", partition.path().display()))?;
        let mut accessor = FileAccessor {
            partition,
            reader: Some(RecordReader::new(BufReader::new(file))),
            current: None,
            bytes: Vec::new(),
            read: 0,
        };
        accessor.advance()?;
        Ok(accessor)
    }
}

impl RecordAccessor for FileAccessor {
    fn current(&self) -> Option<&SerializedRecord> {
        self.current.as_ref()
    }

    fn current_bytes(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|_| self.bytes.as_slice())
    }

    fn advance(&mut self) -> Result<(), anyhow::Error> {
        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => {
                self.current = None;
                return Ok(());
            }
        };
        let offset = RecordReader::position(reader);
        let found = reader.read_record(&mut self.bytes)
            .with_context(|| format!("read partition file: {}", self.partition.path().display()))?;
        if found {
            self.current = Some(SerializedRecord::from_bytes(offset, &self.bytes)?);
            self.read += 1;
        } else {
            self.current = None;
            self.reader = None;
        }
        Ok(())
    }

    fn is_exhausted(&self) -> bool {
        self.current.is_none()
    }

    fn close(&mut self) -> Result<(), anyhow::Error> {
        self.reader = None;
        if self.read != self.partition.records() {
            return Err(anyhow!(
                "Partition file {} returned {} records, {} were written",
                self.partition.path().display(),
                self.read,
                self.partition.records(),
            ));
        }
        self.partition.delete()
    }
}
