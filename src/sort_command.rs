use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::anyhow;
use command_executor::command::Command;

use crate::record_container::RecordContainer;

/// Sorts one container on a thread of the sorting pool.
pub(crate) struct SortCommand {
    container: Arc<Mutex<RecordContainer>>,
}

impl SortCommand {
    pub(crate) fn new(container: Arc<Mutex<RecordContainer>>) -> SortCommand {
        SortCommand {
            container,
        }
    }
}

impl Command for SortCommand {
    fn execute(&self) -> Result<(), anyhow::Error> {
        let mut container = self.container
            .lock()
            .map_err(|_| anyhow!("Record container lock is poisoned"))?;
        container.sort();
        log::debug!("Sorted {} records, thread: {}", container.len(), thread::current().name().unwrap_or("unnamed"));
        Ok(())
    }
}
