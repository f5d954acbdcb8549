use std::fs;

use alignment_file_sort::sorted_writer::{SortedWriter, WriterOptions, WriterState};

mod common;

#[test]
fn test_round_robin_two_flush_cycles() -> Result<(), anyhow::Error> {
    let dir = common::setup();
    let output = dir.join("round-robin.bam");
    let positions = [90, 10, 50, 70, 20, 100, 30, 80, 60, 40];
    let records: Vec<_> = positions
        .iter()
        .enumerate()
        .map(|(i, position)| common::record(&format!("r{}", i), 0, *position))
        .collect();
    let size = records[0].len() as u64;
    assert!(records.iter().all(|r| r.len() as u64 == size));

    let writer = SortedWriter::open(output.clone(), 3, 3 * 2 * size)?;
    for (i, record) in records.iter().enumerate() {
        writer.append(i % 3, record)?;
    }
    let stats = writer.close()?;

    assert_eq!(stats.flush_cycles(), 2);
    assert_eq!(stats.records(), 10);
    let sorted = common::read_records(&output)?;
    let sorted_positions: Vec<i32> = sorted.iter().map(|r| r.position()).collect();
    assert_eq!(sorted_positions, vec![10, 20, 30, 40, 50, 60, 70, 80, 90, 100]);
    assert!(common::leftover_files(&dir, &output)?.is_empty());
    fs::remove_dir_all(dir)?;
    Ok(())
}

#[test]
fn test_unmapped_records_last() -> Result<(), anyhow::Error> {
    let dir = common::setup();
    let output = dir.join("unmapped.bam");
    let writer = SortedWriter::open(output.clone(), 2, 1 << 20)?;
    writer.append(0, &common::unmapped("u1"))?;
    writer.append(1, &common::record("m1", 1, 5))?;
    writer.append(0, &common::record("m2", 0, 500))?;
    writer.append(1, &common::unmapped("u2"))?;
    writer.append(0, &common::record("m3", 0, 7))?;
    writer.append(1, &common::record("m4", 2, 0))?;
    writer.append(0, &common::record("m5", 0, 8))?;
    writer.close()?;

    let sorted = common::read_records(&output)?;
    assert_eq!(sorted.len(), 7);
    assert!(sorted[..5].iter().all(|r| !r.is_unmapped()));
    assert!(sorted[5..].iter().all(|r| r.is_unmapped()));
    let coordinates: Vec<(i32, i32)> = sorted[..5].iter().map(|r| (r.ref_id(), r.position())).collect();
    assert_eq!(coordinates, vec![(0, 7), (0, 8), (0, 500), (1, 5), (2, 0)]);
    fs::remove_dir_all(dir)?;
    Ok(())
}

#[test]
fn test_name_prefix_sorts_first() -> Result<(), anyhow::Error> {
    let dir = common::setup();
    let output = dir.join("names.bam");
    let writer = SortedWriter::open(output.clone(), 1, 1 << 20)?;
    writer.append(0, &common::record("alphabet", 3, 33))?;
    writer.append(0, &common::record("alpha", 3, 33))?;
    writer.close()?;

    let names: Vec<Vec<u8>> = common::read_records(&output)?
        .iter()
        .map(|r| r.name().to_vec())
        .collect();
    assert_eq!(names, vec![b"alpha".to_vec(), b"alphabet".to_vec()]);
    fs::remove_dir_all(dir)?;
    Ok(())
}

#[test]
fn test_global_order() -> Result<(), anyhow::Error> {
    let dir = common::setup();
    let records = common::random_records(17, 2_000);
    let expected = common::sorted(&records);
    let total: u64 = records.iter().map(|r| r.len() as u64).sum();

    // no flush at all, a single spill, many spills
    for (threads, max_memory_bytes) in [(1, total * 2), (4, total * 2), (1, total * 3 / 4), (4, total / 20), (7, total / 50)] {
        let output = dir.join(format!("global-{}-{}.bam", threads, max_memory_bytes));
        let writer = SortedWriter::open(output.clone(), threads, max_memory_bytes)?;
        for (i, record) in records.iter().enumerate() {
            writer.append(i % threads, record)?;
        }
        assert_eq!(writer.appended(), records.len() as u64);
        let spilled = writer.spilled_partitions();
        let stats = writer.close()?;
        assert_eq!(stats.spilled_partitions(), spilled);
        if max_memory_bytes > total {
            assert_eq!(stats.spilled_partitions(), 0);
            assert_eq!(stats.flush_cycles(), 1);
        } else {
            assert!(stats.spilled_partitions() > 0);
        }

        assert_eq!(common::read_records(&output)?, expected);
        assert!(SortedWriter::check(&output)?);
        assert!(common::partition_files(&dir)?.is_empty());
    }
    fs::remove_dir_all(dir)?;
    Ok(())
}

#[test]
fn test_flush_at_exact_boundary() -> Result<(), anyhow::Error> {
    let dir = common::setup();
    let output = dir.join("boundary.bam");
    let records: Vec<_> = (0..7).rev().map(|i| common::record(&format!("b{}", i), 0, i)).collect();
    let size = records[0].len() as u64;
    let writer = SortedWriter::open(output.clone(), 1, 3 * size)?;
    for record in &records[..3] {
        writer.append(0, record)?;
    }
    // the container is exactly full, nothing spilled yet
    assert_eq!(writer.flush_cycles(), 0);
    writer.append(0, &records[3])?;
    assert_eq!(writer.flush_cycles(), 1);
    assert_eq!(common::partition_files(&dir)?.len(), 1);
    for record in &records[4..] {
        writer.append(0, record)?;
    }
    assert_eq!(writer.flush_cycles(), 2);

    let stats = writer.close()?;
    assert_eq!(stats.flush_cycles(), 3);
    assert_eq!(stats.spilled_partitions(), 2);
    let positions: Vec<i32> = common::read_records(&output)?.iter().map(|r| r.position()).collect();
    assert_eq!(positions, (0..7).collect::<Vec<i32>>());
    assert!(common::leftover_files(&dir, &output)?.is_empty());
    fs::remove_dir_all(dir)?;
    Ok(())
}

#[test]
fn test_empty_output() -> Result<(), anyhow::Error> {
    let dir = common::setup();
    let output = dir.join("empty.bam");
    let writer = SortedWriter::open(output.clone(), 2, 1 << 16)?;
    assert_eq!(writer.state(), WriterState::Accepting);
    let stats = writer.close()?;
    assert_eq!(stats.records(), 0);
    assert_eq!(stats.flush_cycles(), 0);
    assert_eq!(fs::metadata(&output)?.len(), 0);
    assert!(SortedWriter::check(&output)?);
    fs::remove_dir_all(dir)?;
    Ok(())
}

#[test]
fn test_options() -> Result<(), anyhow::Error> {
    let dir = common::setup();
    let output = dir.join("options.bam");
    let mut options = WriterOptions::new(output.clone());
    options.with_threads(0);
    options.with_max_memory_mb(1);
    let writer = options.open()?;
    for thread_index in 0..num_cpus::get() {
        writer.append(thread_index, &common::record("t", 0, thread_index as i32))?;
    }
    assert!(writer.append(num_cpus::get(), &common::record("t", 0, 0)).is_err());
    let stats = writer.close()?;
    assert_eq!(stats.records(), num_cpus::get() as u64);

    let mut invalid = WriterOptions::new(output);
    invalid.with_threads(4);
    invalid.with_max_memory_bytes(3);
    assert!(invalid.open().is_err());
    fs::remove_dir_all(dir)?;
    Ok(())
}

#[test]
fn test_check_detects_unsorted() -> Result<(), anyhow::Error> {
    let dir = common::setup();
    let path = dir.join("unsorted.bam");
    let mut bytes = Vec::new();
    bytes.extend_from_slice(common::record("a", 0, 20).as_bytes());
    bytes.extend_from_slice(common::record("b", 0, 10).as_bytes());
    fs::write(&path, &bytes)?;
    assert!(!SortedWriter::check(&path)?);

    let mut truncated = bytes.clone();
    truncated.truncate(bytes.len() - 1);
    fs::write(&path, &truncated)?;
    assert!(SortedWriter::check(&path).is_err());
    fs::remove_dir_all(dir)?;
    Ok(())
}
