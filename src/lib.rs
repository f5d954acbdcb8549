//! This crate implements a memory bounded, multi-threaded sort of alignment records, producing a
//! single stream in genomic coordinate order.
//!
//! Producer threads hand records to a shared [sorted_writer::SortedWriter], each thread appending
//! to its own fixed-budget container. When any container fills up, all containers are sorted in
//! parallel and merged into a sorted temp file. Closing the writer merges all temp files together
//! with the records still in memory. The motivation is sorting aligner output that does not fit
//! in memory, without giving up the throughput of many aligner threads.
//!
//! Records use the binary layout of a BAM v1 alignment record, including the leading
//! `block_size`. The order is coordinate order with deterministic tie breaking, see
//! [record_comparator::RecordComparator].
//!
//! # Examples
//! ```
//! use std::path::PathBuf;
//! use alignment_file_sort::alignment_record::AlignmentRecord;
//! use alignment_file_sort::sorted_writer::{SortedWriter, WriterOptions};
//!
//! // optimized for use with Jemalloc
//! use tikv_jemallocator::Jemalloc;
//! #[global_allocator]
//! static GLOBAL: Jemalloc = Jemalloc;
//!
//! fn sort_records(output: PathBuf) -> Result<(), anyhow::Error> {
//!     let mut options = WriterOptions::new(output.clone());
//!
//!     // set the number of producer threads, each gets its own container. The default is to
//!     // use all available cores.
//!     options.with_threads(2);
//!
//!     // set the memory ceiling shared by all containers. Temp files are created next to the
//!     // output when the records do not fit.
//!     options.with_max_memory_mb(64);
//!
//!     let writer = options.open()?;
//!     let record = AlignmentRecord::builder()
//!         .with_name(b"read-1")
//!         .with_reference(0, 1000)
//!         .with_mapq(60)
//!         .build()?;
//!     writer.append(0, &record)?;
//!     writer.close()?;
//!
//!     assert!(SortedWriter::check(&output)?);
//!     Ok(())
//! }
//! ```
//!

pub(crate) mod config;
pub(crate) mod sort_command;
pub(crate) mod sorted_partition_file;

pub mod alignment_record;
pub mod big_buffer;
pub mod error;
pub mod record_accessor;
pub mod record_comparator;
pub mod record_container;
pub mod record_reader;
pub mod serialized_record;
pub mod sorted_writer;
