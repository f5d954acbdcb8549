use thiserror::Error;

use crate::sorted_writer::WriterState;

/// Errors raised by the sorted writer.
///
/// All fallible operations of this crate return [anyhow::Error]. Kinds that callers may want to
/// react to are raised as a [SortError] and can be recovered with
/// `error.downcast_ref::<SortError>()`. I/O failures are propagated as the underlying
/// [std::io::Error] with context describing the file involved.
///
/// A container running out of space is not an error, it is the `false` result of
/// [crate::record_container::RecordContainer::try_append] and triggers a flush.
#[derive(Error, Debug)]
pub enum SortError {
    /// A record does not fit into its thread's container even after all containers were flushed.
    /// This is a misconfiguration: a single record is larger than a whole per-thread budget.
    #[error("Record of about {size} bytes from thread {thread_index} does not fit into a {budget} byte container after a flush")]
    FatalAllocation {
        thread_index: usize,
        size: usize,
        budget: u64,
    },

    /// An append that was verified to fit failed right after a flush.
    #[error("Append of a {size} byte record from thread {thread_index} failed after a flush although it fits")]
    InvariantViolation {
        thread_index: usize,
        size: usize,
    },

    #[error("Thread index {thread_index} is out of range, the writer has {threads} containers")]
    InvalidThreadIndex {
        thread_index: usize,
        threads: usize,
    },

    #[error("Invalid alignment record: {reason}")]
    InvalidRecord {
        reason: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        reason: String,
    },

    #[error("The writer does not accept records in state {state:?}")]
    NotAccepting {
        state: WriterState,
    },
}
