use std::cmp::{max, min, Ordering};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;

use anyhow::{anyhow, Context};
use command_executor::shutdown_mode::ShutdownMode;
use command_executor::thread_pool_builder::ThreadPoolBuilder;
use rlimit::{getrlimit, Resource, setrlimit};
use tempfile::Builder;

use crate::alignment_record::AlignmentRecord;
use crate::big_buffer::DEFAULT_SEGMENT_SIZE;
use crate::config::Config;
use crate::error::SortError;
use crate::record_accessor::{ContainerAccessor, merge_into, RecordAccessor};
use crate::record_comparator::RecordComparator;
use crate::record_container::RecordContainer;
use crate::record_reader::RecordReader;
use crate::serialized_record::SerializedRecord;
use crate::sort_command::SortCommand;
use crate::sorted_partition_file::{FileAccessor, SortedPartitionFile};

/// Default memory ceiling shared by all containers, 512 MiB.
pub const DEFAULT_MAX_MEMORY_BYTES: u64 = 512 * 1024 * 1024;

/// Lifecycle of a [SortedWriter].
///
/// `Accepting` and `Flushing` alternate while producers append, a flush runs with exclusive
/// access to all containers and leaves every container empty. Closing moves through `Merging`
/// to `Done`. A writer whose flush failed is `Failed` and rejects further records.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriterState {
    Accepting,
    Flushing,
    Merging,
    Done,
    Failed,
}

/// Summary of a completed run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SortStats {
    records: u64,
    flush_cycles: usize,
    spilled_partitions: usize,
}

impl SortStats {
    /// Records written to the output.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Flushes performed, including the final one at close when it had records to sort.
    pub fn flush_cycles(&self) -> usize {
        self.flush_cycles
    }

    /// Flushes that were persisted to a temp file.
    pub fn spilled_partitions(&self) -> usize {
        self.spilled_partitions
    }
}

/// Options for opening a [SortedWriter].
///
/// # Examples
/// ```
/// use std::path::PathBuf;
/// use alignment_file_sort::sorted_writer::WriterOptions;
///
/// fn open_writer(output: PathBuf) -> Result<(), anyhow::Error> {
///     let mut options = WriterOptions::new(output);
///     options.with_threads(4);
///     options.with_max_memory_mb(256);
///     let writer = options.open()?;
///     writer.close()?;
///     Ok(())
/// }
/// ```
#[derive(Clone, Debug)]
pub struct WriterOptions {
    output: PathBuf,
    threads: usize,
    max_memory_bytes: u64,
}

impl WriterOptions {
    /// Create default options writing to `output`.
    ///
    /// * one producer thread per available CPU core
    /// * a memory ceiling of [DEFAULT_MAX_MEMORY_BYTES], split evenly across the threads
    ///
    /// Temp files are created next to `output` and named after it.
    pub fn new(output: PathBuf) -> WriterOptions {
        WriterOptions {
            output,
            threads: 0,
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
        }
    }

    /// Set the number of producer threads, one container each. Zero uses all system cores.
    pub fn with_threads(&mut self, threads: usize) {
        self.threads = threads;
    }

    /// Set the memory ceiling for buffered records, in bytes.
    pub fn with_max_memory_bytes(&mut self, max_memory_bytes: u64) {
        self.max_memory_bytes = max_memory_bytes;
    }

    /// Set the memory ceiling for buffered records, in MB.
    pub fn with_max_memory_mb(&mut self, max_memory_mb: u64) {
        self.max_memory_bytes = max_memory_mb * 1_000_000;
    }

    pub fn open(&self) -> Result<SortedWriter, anyhow::Error> {
        Ok(SortedWriter::with_config(self.create_config()?))
    }

    fn create_config(&self) -> Result<Config, SortError> {
        let mut tasks = self.threads;
        if tasks == 0 {
            tasks = num_cpus::get();
        }

        Config::new(
            self.output.clone(),
            "part-".to_string(),
            ".sorted".to_string(),
            tasks,
            self.max_memory_bytes,
            DEFAULT_SEGMENT_SIZE,
        )
    }
}

struct ContainerSet {
    containers: Vec<Arc<Mutex<RecordContainer>>>,
    partitions: Vec<SortedPartitionFile>,
    state: WriterState,
    flush_cycles: usize,
}

impl ContainerSet {
    fn ensure_accepting(&self) -> Result<(), SortError> {
        if self.state == WriterState::Accepting {
            Ok(())
        } else {
            Err(SortError::NotAccepting { state: self.state })
        }
    }

    fn container(&self, thread_index: usize) -> Result<&Arc<Mutex<RecordContainer>>, SortError> {
        self.containers.get(thread_index).ok_or(SortError::InvalidThreadIndex {
            thread_index,
            threads: self.containers.len(),
        })
    }
}

fn lock(container: &Mutex<RecordContainer>) -> Result<MutexGuard<'_, RecordContainer>, anyhow::Error> {
    container.lock().map_err(|_| anyhow!("Record container lock is poisoned"))
}

fn lock_all(containers: &[Arc<Mutex<RecordContainer>>]) -> Result<Vec<MutexGuard<'_, RecordContainer>>, anyhow::Error> {
    containers.iter().map(|container| lock(container)).collect()
}

fn thread_name() -> String {
    thread::current().name().unwrap_or("unnamed").to_string()
}

/// Memory bounded, multi-threaded sort-and-merge writer for alignment records.
///
/// Every producer thread appends to its own container. When a container runs out of space all
/// containers are sorted in parallel and merged into one sorted temp file, after which every
/// container is empty again. Closing the writer merges the temp files and whatever is still in
/// memory into one stream in [RecordComparator] order. Without any temp file the containers are
/// merged straight to the output.
///
/// The container set is guarded by a single reader/writer lock: appends share it, a flush holds
/// it exclusively.
///
/// # Examples
/// ```
/// use std::path::PathBuf;
/// use std::thread;
/// use alignment_file_sort::alignment_record::AlignmentRecord;
/// use alignment_file_sort::sorted_writer::SortedWriter;
///
/// fn sort_records(output: PathBuf, records: Vec<Vec<AlignmentRecord>>) -> Result<(), anyhow::Error> {
///     let writer = SortedWriter::open(output, records.len(), 64 * 1024 * 1024)?;
///     thread::scope(|scope| {
///         for (thread_index, chunk) in records.iter().enumerate() {
///             let writer = &writer;
///             scope.spawn(move || {
///                 for record in chunk {
///                     writer.append(thread_index, record)?;
///                 }
///                 Ok::<(), anyhow::Error>(())
///             });
///         }
///     });
///     let stats = writer.close()?;
///     log::info!("Sorted {} records", stats.records());
///     Ok(())
/// }
/// ```
pub struct SortedWriter {
    config: Config,
    set: RwLock<ContainerSet>,
    appended: AtomicU64,
}

impl SortedWriter {
    /// Open a writer with `thread_count` containers sharing `max_memory_bytes`. The sorted
    /// records are written to `output` on [SortedWriter::close].
    pub fn open(output: PathBuf, thread_count: usize, max_memory_bytes: u64) -> Result<SortedWriter, anyhow::Error> {
        let mut options = WriterOptions::new(output);
        options.with_threads(thread_count);
        options.with_max_memory_bytes(max_memory_bytes);
        options.open()
    }

    pub(crate) fn with_config(config: Config) -> SortedWriter {
        let budget = config.container_budget();
        log::info!(
            "Open sorted writer, threads: {}, memory: {} bytes, per thread: {} bytes, output: {}",
            config.tasks(),
            config.max_memory_bytes(),
            budget,
            config.output().display()
        );
        let containers = (0..config.tasks())
            .map(|_| Arc::new(Mutex::new(RecordContainer::with_segment_size(budget, config.segment_size()))))
            .collect();

        SortedWriter {
            config,
            set: RwLock::new(ContainerSet {
                containers,
                partitions: Vec::new(),
                state: WriterState::Accepting,
                flush_cycles: 0,
            }),
            appended: AtomicU64::new(0),
        }
    }

    fn read_set(&self) -> Result<RwLockReadGuard<'_, ContainerSet>, anyhow::Error> {
        self.set.read().map_err(|_| anyhow!("Container set lock is poisoned"))
    }

    fn write_set(&self) -> Result<RwLockWriteGuard<'_, ContainerSet>, anyhow::Error> {
        self.set.write().map_err(|_| anyhow!("Container set lock is poisoned"))
    }

    pub fn state(&self) -> WriterState {
        self.read_set()
            .map(|set| set.state)
            .unwrap_or(WriterState::Failed)
    }

    /// Flushes performed so far.
    pub fn flush_cycles(&self) -> usize {
        self.read_set()
            .map(|set| set.flush_cycles)
            .unwrap_or(0)
    }

    /// Temp files currently held.
    pub fn spilled_partitions(&self) -> usize {
        self.read_set()
            .map(|set| set.partitions.len())
            .unwrap_or(0)
    }

    /// Records appended so far.
    pub fn appended(&self) -> u64 {
        self.appended.load(AtomicOrdering::Relaxed)
    }

    /// Append `record` to the container of `thread_index`.
    ///
    /// When the container is full all containers are flushed and the append is retried once.
    /// A record that does not fit into an empty container fails with
    /// [SortError::FatalAllocation].
    pub fn append(&self, thread_index: usize, record: &AlignmentRecord) -> Result<(), anyhow::Error> {
        {
            let set = self.read_set()?;
            set.ensure_accepting()?;
            let mut container = lock(set.container(thread_index)?)?;
            if container.try_append(record) {
                self.appended.fetch_add(1, AtomicOrdering::Relaxed);
                return Ok(());
            }
        }

        let mut set = self.write_set()?;
        set.ensure_accepting()?;
        let container = set.container(thread_index)?.clone();
        // another thread may have flushed while this one waited for the lock
        let must_flush = {
            let container = lock(&container)?;
            !container.is_empty() && !container.can_fit(record.len())
        };
        if must_flush {
            log::info!("Container of thread {} is full, flushing all containers, thread: {}", thread_index, thread_name());
            if let Err(e) = self.flush(&mut set) {
                set.state = WriterState::Failed;
                return Err(e);
            }
        }

        let mut container = lock(&container)?;
        if container.try_append(record) {
            self.appended.fetch_add(1, AtomicOrdering::Relaxed);
            Ok(())
        } else if container.can_fit(record.len()) {
            Err(SortError::InvariantViolation { thread_index, size: record.len() }.into())
        } else {
            Err(SortError::FatalAllocation {
                thread_index,
                size: record.len(),
                budget: container.budget(),
            }.into())
        }
    }

    /// Sort all containers, merge them into one temp file and empty them.
    fn flush(&self, set: &mut ContainerSet) -> Result<(), anyhow::Error> {
        set.state = WriterState::Flushing;
        let cycle = set.flush_cycles + 1;
        let records = Self::sort_containers(&set.containers, self.config.tasks())?;
        log::info!("Flush cycle {}, records: {}, thread: {}", cycle, records, thread_name());

        let partition = {
            let guards = lock_all(&set.containers)?;
            let mut accessors: Vec<Box<dyn RecordAccessor + '_>> = Vec::with_capacity(guards.len());
            for guard in &guards {
                accessors.push(Box::new(ContainerAccessor::new(guard)?));
            }
            SortedPartitionFile::write(self.config.partition_path(cycle), cycle, accessors)
                .with_context(|| format!("flush cycle {}", cycle))?
        };
        if partition.records() != records as u64 {
            return Err(anyhow!("Flush cycle {} wrote {} records out of {}", cycle, partition.records(), records));
        }
        set.partitions.push(partition);

        for container in &set.containers {
            let mut container = lock(container)?;
            container.clear();
            if !container.is_empty() {
                return Err(anyhow!("Container is not empty after flush cycle {}", cycle));
            }
        }
        set.flush_cycles = cycle;
        set.state = WriterState::Accepting;
        Ok(())
    }

    /// Sort the non-empty containers in parallel and return the number of records they hold.
    fn sort_containers(containers: &[Arc<Mutex<RecordContainer>>], tasks: usize) -> Result<usize, anyhow::Error> {
        let mut records = 0;
        let mut pending = Vec::new();
        for container in containers {
            let guard = lock(container)?;
            records += guard.len();
            if !guard.is_empty() && !guard.is_sorted() {
                pending.push(container.clone());
            }
        }
        if pending.is_empty() {
            return Ok(records);
        }

        let mut thread_pool_builder = ThreadPoolBuilder::new();
        let mut sorting_pool = thread_pool_builder
            .with_name("sorting".to_string())
            .with_tasks(min(max(tasks, 1), pending.len()))
            .with_queue_size(pending.len())
            .with_shutdown_mode(ShutdownMode::CompletePending)
            .build()
            .map_err(|e| anyhow!("Failed to start the sorting pool: {:?}", e))?;

        for container in &pending {
            sorting_pool.submit(Box::new(SortCommand::new(container.clone())));
        }
        sorting_pool.shutdown();
        sorting_pool.join()?;

        for container in &pending {
            if !lock(container)?.is_sorted() {
                return Err(anyhow!("Sorting pool finished without sorting all containers"));
            }
        }
        Ok(records)
    }

    /// Merge all remaining records into `sink`.
    ///
    /// Temp files are deleted as soon as they are fully merged. On error the remaining temp
    /// files are removed as well and nothing is retained.
    pub fn close_into<W: Write + ?Sized>(self, sink: &mut W) -> Result<SortStats, anyhow::Error> {
        let SortedWriter { config, set, appended } = self;
        let appended = appended.into_inner();
        let mut set = set.into_inner().map_err(|_| anyhow!("Container set lock is poisoned"))?;
        set.ensure_accepting()?;
        set.state = WriterState::Merging;

        let in_memory = Self::sort_containers(&set.containers, config.tasks())?;
        if in_memory > 0 {
            set.flush_cycles += 1;
        }
        let partitions = std::mem::take(&mut set.partitions);
        let spilled_partitions = partitions.len();
        log::info!(
            "Start merging, partition files: {}, in-memory records: {}, thread: {}",
            spilled_partitions,
            in_memory,
            thread_name()
        );

        let merged = if partitions.is_empty() {
            Self::final_merge(&set.containers, partitions, sink)?
        } else {
            let (current_soft, current_hard) = Self::get_rlimits()?;
            log::info!("Current rlimit NOFILE, soft: {}, hard: {}", current_soft, current_hard);
            let new_soft = min(max((spilled_partitions + 256) as u64, current_soft), current_hard);
            log::info!("Set new rlimit NOFILE, soft: {}, hard: {}", new_soft, current_hard);
            Self::set_rlimits(new_soft, current_hard)?;
            let merged = Self::final_merge(&set.containers, partitions, sink);
            log::info!("Restore rlimit NOFILE, soft: {}, hard: {}", current_soft, current_hard);
            let restored = Self::set_rlimits(current_soft, current_hard);
            let merged = merged?;
            restored?;
            merged
        };

        if merged != appended {
            return Err(anyhow!("Merged {} records but {} were appended", merged, appended));
        }
        set.state = WriterState::Done;
        log::info!("Finished merging, records: {}, flush cycles: {}", merged, set.flush_cycles);

        Ok(SortStats {
            records: merged,
            flush_cycles: set.flush_cycles,
            spilled_partitions,
        })
    }

    /// Merge all remaining records into the output file.
    ///
    /// The output is staged in a temp file next to it and renamed over it only once the merge
    /// succeeded, so a failed run never leaves a partial output behind.
    pub fn close(self) -> Result<SortStats, anyhow::Error> {
        let output = self.config.output().clone();
        let directory = match output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let prefix = format!(".{}.", output.file_name().unwrap_or_default().to_string_lossy());
        let staged = Builder::new()
            .prefix(&prefix)
            .suffix(".staged")
            .tempfile_in(&directory)
            .with_context(|| format!("create staged output in {}", directory.display()))?;

        let mut writer = BufWriter::new(staged);
        let stats = self.close_into(&mut writer)?;
        let staged = writer
            .into_inner()
            .map_err(|e| anyhow!("Failed to flush staged output for {}: {}", output.display(), e.error()))?;
        staged
            .persist(&output)
            .with_context(|| format!("Rename staged output to {}", output.display()))?;
        Ok(stats)
    }

    fn final_merge<W: Write + ?Sized>(containers: &[Arc<Mutex<RecordContainer>>], partitions: Vec<SortedPartitionFile>, sink: &mut W) -> Result<u64, anyhow::Error> {
        let guards = lock_all(containers)?;
        let mut accessors: Vec<Box<dyn RecordAccessor + '_>> = Vec::with_capacity(partitions.len() + guards.len());
        for partition in partitions {
            let cycle = partition.cycle();
            accessors.push(Box::new(FileAccessor::open(partition).with_context(|| format!("partition {}", cycle))?));
        }
        for guard in &guards {
            accessors.push(Box::new(ContainerAccessor::new(guard)?));
        }
        merge_into(accessors, sink)
    }

    fn get_rlimits() -> Result<(u64, u64), anyhow::Error> {
        getrlimit(Resource::NOFILE).with_context(|| "getrlimit")
    }

    fn set_rlimits(soft: u64, hard: u64) -> Result<(), anyhow::Error> {
        setrlimit(Resource::NOFILE, soft, hard)
            .with_context(|| format!("set rlimit NOFILE, soft: {}, hard: {}", soft, hard))?;
        Ok(())
    }

    /// Check that the records in `path` are in [RecordComparator] order.
    pub fn check(path: &Path) -> Result<bool, anyhow::Error> {
        let file = File::open(path).with_context(|| format!("path: {}", path.display()))?;
        let mut reader = RecordReader::new(BufReader::new(file));
        let mut previous_bytes = Vec::new();
        let mut current_bytes = Vec::new();
        let mut previous: Option<SerializedRecord> = None;
        loop {
            let offset = reader.position();
            if !reader.read_record(&mut current_bytes)? {
                break;
            }
            let current = SerializedRecord::from_bytes(offset, &current_bytes)?;
            if let Some(previous) = &previous {
                let ordering = RecordComparator::compare(previous, previous_bytes.as_slice(), &current, current_bytes.as_slice());
                if ordering == Ordering::Greater {
                    log::info!("Record at offset {} of {} is out of order", offset, path.display());
                    return Ok(false);
                }
            }
            previous = Some(current);
            std::mem::swap(&mut previous_bytes, &mut current_bytes);
        }
        Ok(true)
    }
}
