use std::path::PathBuf;

use crate::error::SortError;

#[derive(Clone, Debug)]
pub(crate) struct Config {
    output: PathBuf,
    tmp_prefix: String,
    tmp_suffix: String,
    tasks: usize,
    max_memory_bytes: u64,
    segment_size: usize,
}

impl Config {
    pub(crate) fn new(
        output: PathBuf,
        tmp_prefix: String,
        tmp_suffix: String,
        tasks: usize,
        max_memory_bytes: u64,
        segment_size: usize,
    ) -> Result<Config, SortError> {
        if output.file_name().is_none() {
            return Err(SortError::InvalidConfiguration {
                reason: format!("output path {} does not name a file", output.display()),
            });
        }
        if tasks == 0 {
            return Err(SortError::InvalidConfiguration {
                reason: "thread count must be positive".to_string(),
            });
        }
        if max_memory_bytes / tasks as u64 == 0 {
            return Err(SortError::InvalidConfiguration {
                reason: format!("{} bytes of memory cannot be split across {} threads", max_memory_bytes, tasks),
            });
        }
        Ok(Config {
            output,
            tmp_prefix,
            tmp_suffix,
            tasks,
            max_memory_bytes,
            segment_size,
        })
    }

    pub(crate) fn output(&self) -> &PathBuf {
        &self.output
    }

    pub(crate) fn tasks(&self) -> usize {
        self.tasks
    }

    pub(crate) fn max_memory_bytes(&self) -> u64 {
        self.max_memory_bytes
    }

    pub(crate) fn segment_size(&self) -> usize {
        self.segment_size
    }

    pub(crate) fn with_segment_size(mut self, segment_size: usize) -> Config {
        self.segment_size = segment_size;
        self
    }

    /// Byte budget of each per-thread container.
    pub(crate) fn container_budget(&self) -> u64 {
        self.max_memory_bytes / self.tasks as u64
    }

    /// Temp file of flush cycle `cycle`, next to the output: `<output>.part-00001.sorted`.
    pub(crate) fn partition_path(&self, cycle: usize) -> PathBuf {
        let mut name = self.output.clone().into_os_string();
        name.push(format!(".{}{:05}{}", self.tmp_prefix, cycle, self.tmp_suffix));
        PathBuf::from(name)
    }
}
