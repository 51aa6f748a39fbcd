//! Shared helpers for index integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Once;

use oxitable::index::{IndexReader, IndexWriter, KeyHash, KeyHasher, TableBucket, TableKey};
use oxitable::segment::{MemorySegment, SyncSegmentAttributes};
use oxitable::{IndexError, Offset};
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Install a test-friendly tracing subscriber once per test binary.
///
/// Honors `RUST_LOG`; defaults to warnings only.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Hasher that maps keys onto a handful of hashes so buckets collide often.
pub fn colliding_hash(key: &[u8]) -> KeyHash {
    let sum: u128 = key.iter().map(|b| *b as u128).sum();
    KeyHash::new(sum % 5)
}

/// Create a segment with its table attributes initialized.
pub fn new_segment(id: u64) -> MemorySegment {
    let segment = MemorySegment::new(id);
    segment
        .update_attributes_sync(&IndexWriter::generate_initial_table_attributes())
        .unwrap();
    segment
}

/// Index everything appended since the last checkpoint.
///
/// Returns the number of attribute mutations applied.
pub async fn index_pass<H: KeyHasher>(
    writer: &IndexWriter<H>,
    segment: &MemorySegment,
) -> Result<usize, IndexError> {
    let reader = IndexReader::new(segment);
    let first = reader.get_last_indexed_offset().await?;
    let last = segment.length();
    let key_updates = segment.read_key_updates(first..last);

    let mut bucket_updates = writer.group_by_bucket(key_updates, &reader).await?;
    for update in &mut bucket_updates {
        reader
            .collect_existing_keys(segment, writer.hasher(), update)
            .await?;
    }
    writer.update_buckets(&bucket_updates, segment, first, last).await
}

/// Keys reachable from the bucket of `hash`, newest first.
pub async fn chain_keys(segment: &MemorySegment, hash: KeyHash) -> Vec<(TableKey, Offset)> {
    let reader = IndexReader::new(segment);
    let buckets = reader.locate_buckets(&[hash]).await.unwrap();
    let bucket: TableBucket = buckets[&hash];
    let mut keys = Vec::new();
    for offset in reader.get_bucket_offsets(&bucket).await.unwrap() {
        let key = oxitable::segment::EntryLog::read_key(segment, offset)
            .await
            .unwrap()
            .unwrap();
        keys.push((key, offset));
    }
    keys
}

/// Live keys of `model` grouped by hash, each group newest first.
pub fn expected_chains<H: KeyHasher>(
    hasher: &H,
    model: &HashMap<TableKey, Offset>,
) -> BTreeMap<KeyHash, Vec<(TableKey, Offset)>> {
    let mut chains: BTreeMap<KeyHash, Vec<(TableKey, Offset)>> = BTreeMap::new();
    for (key, offset) in model {
        chains
            .entry(hasher.hash(key.as_bytes()))
            .or_default()
            .push((key.clone(), *offset));
    }
    for chain in chains.values_mut() {
        chain.sort_by(|a, b| b.1.cmp(&a.1));
    }
    chains
}
