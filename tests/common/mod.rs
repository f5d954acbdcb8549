use std::fs;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use alignment_file_sort::alignment_record::AlignmentRecord;
use alignment_file_sort::record_comparator::RecordComparator;
use alignment_file_sort::record_reader::RecordReader;
use rand::prelude::StdRng;
use rand::{Rng, SeedableRng};

/// Create a fresh results directory for one test under `./target/results/`.
pub fn setup() -> PathBuf {
    let mut results_dir_path = PathBuf::from_str("./target/results/").unwrap();
    results_dir_path.push(format!("{:032x}", rand::random::<u128>()));
    fs::create_dir_all(&results_dir_path).unwrap_or_else(|_|
        panic!("Failed to create results directory: {:?}", results_dir_path)
    );
    results_dir_path
}

#[allow(dead_code)]
pub fn record(name: &str, ref_id: i32, position: i32) -> AlignmentRecord {
    AlignmentRecord::builder()
        .with_name(name.as_bytes())
        .with_reference(ref_id, position)
        .with_mapq(30)
        .build()
        .unwrap()
}

#[allow(dead_code)]
pub fn unmapped(name: &str) -> AlignmentRecord {
    AlignmentRecord::builder()
        .with_name(name.as_bytes())
        .build()
        .unwrap()
}

/// Records with unique names, about one in ten unmapped, varying in size.
#[allow(dead_code)]
pub fn random_records(seed: u64, count: usize) -> Vec<AlignmentRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let mut builder = AlignmentRecord::builder()
                .with_name(format!("read-{:07}", i).as_bytes())
                .with_payload(vec![b'N'; rng.gen_range(0..48)]);
            if rng.gen_range(0..10) != 0 {
                builder = builder
                    .with_reference(rng.gen_range(0..3), rng.gen_range(0..2_000))
                    .with_reverse(rng.gen_bool(0.5))
                    .with_mapq(rng.gen_range(0..61))
                    .with_mate(rng.gen_range(0..3), rng.gen_range(0..2_000));
            }
            builder.build().unwrap()
        })
        .collect()
}

#[allow(dead_code)]
pub fn sorted(records: &[AlignmentRecord]) -> Vec<AlignmentRecord> {
    let mut sorted = records.to_vec();
    sorted.sort_by(RecordComparator::compare_records);
    sorted
}

#[allow(dead_code)]
pub fn read_records(path: &Path) -> Result<Vec<AlignmentRecord>, anyhow::Error> {
    RecordReader::new(BufReader::new(File::open(path)?)).collect()
}

#[allow(dead_code)]
pub fn read_records_from(bytes: &[u8]) -> Result<Vec<AlignmentRecord>, anyhow::Error> {
    RecordReader::new(bytes).collect()
}

/// Files in `dir` other than `keep`.
#[allow(dead_code)]
pub fn leftover_files(dir: &Path, keep: &Path) -> Result<Vec<PathBuf>, anyhow::Error> {
    let mut leftovers = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.file_name() != keep.file_name() {
            leftovers.push(path);
        }
    }
    Ok(leftovers)
}

#[allow(dead_code)]
pub fn partition_files(dir: &Path) -> Result<Vec<PathBuf>, anyhow::Error> {
    let mut partitions = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.to_string_lossy().ends_with(".sorted") {
            partitions.push(path);
        }
    }
    partitions.sort();
    Ok(partitions)
}
