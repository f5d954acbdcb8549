use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{anyhow, Error};
use rand::prelude::StdRng;
use rand::{Rng, SeedableRng};
use simple_logger::SimpleLogger;

use alignment_file_sort::alignment_record::AlignmentRecord;
use alignment_file_sort::sorted_writer::{SortedWriter, WriterOptions};

use tikv_jemallocator::Jemalloc;
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

// stands in for an aligner thread producing records in arbitrary order
fn produce(writer: &SortedWriter, thread_index: usize, count: usize) -> Result<(), Error> {
    let mut rng = StdRng::seed_from_u64(thread_index as u64);
    for i in 0..count {
        let mut builder = AlignmentRecord::builder()
            .with_name(format!("thread-{}-read-{}", thread_index, i).as_bytes())
            .with_payload(vec![b'C'; rng.gen_range(50..150)]);
        if rng.gen_range(0..20) != 0 {
            builder = builder
                .with_reference(rng.gen_range(0..3), rng.gen_range(0..1_000_000))
                .with_reverse(rng.gen_bool(0.5))
                .with_mapq(rng.gen_range(0..61));
        }
        writer.append(thread_index, &builder.build()?)?;
    }
    Ok(())
}

fn sort_in_memory(output_path: &Path) -> Result<(), Error> {
    // all cores and 512 MiB are the defaults
    let writer = WriterOptions::new(output_path.to_path_buf()).open()?;
    produce(&writer, 0, 10_000)?;
    let stats = writer.close()?;
    log::info!("In memory: {} records, {} spilled partitions", stats.records(), stats.spilled_partitions());
    Ok(())
}

fn sort_with_spills(output_path: &Path, threads: usize) -> Result<(), Error> {
    let mut options = WriterOptions::new(output_path.to_path_buf());
    options.with_threads(threads);
    options.with_max_memory_mb(4);
    let writer = options.open()?;

    thread::scope(|scope| -> Result<(), Error> {
        let handles: Vec<_> = (0..threads)
            .map(|thread_index| {
                let writer = &writer;
                scope.spawn(move || produce(writer, thread_index, 50_000))
            })
            .collect();
        for handle in handles {
            handle.join().map_err(|_| anyhow!("producer panicked"))??;
        }
        Ok(())
    })?;

    let stats = writer.close()?;
    log::info!(
        "With spills: {} records, {} flush cycles, {} spilled partitions",
        stats.records(),
        stats.flush_cycles(),
        stats.spilled_partitions()
    );
    Ok(())
}

// cargo run -r --example sort_alignments
pub fn main() -> Result<(), Error> {
    SimpleLogger::new().init()?;
    let in_memory_path = PathBuf::from("./target/in-memory.bam");
    let spilled_path = PathBuf::from("./target/spilled.bam");

    sort_in_memory(&in_memory_path)?;
    sort_with_spills(&spilled_path, 4)?;

    for path in [&in_memory_path, &spilled_path] {
        log::info!("{} sorted: {}", path.display(), SortedWriter::check(path)?);
    }
    Ok(())
}
