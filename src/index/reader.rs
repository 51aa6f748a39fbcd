//! Index reader for table segments
//!
//! Reads the bucket, backpointer and checkpoint attributes written by the
//! index writer. A bucket attribute holding `NULL_ATTRIBUTE_VALUE` is treated
//! exactly like a bucket attribute that was never set.

use std::collections::{HashMap, HashSet};

use crate::attribute::AttributeKey;
use crate::index::{BucketUpdate, KeyHash, KeyHasher, KeyInfo, TableBucket};
use crate::offset::{Offset, NULL_ATTRIBUTE_VALUE};
use crate::segment::{BucketLocator, EntryLog, SegmentAttributes, StoreFuture};
use crate::status::{IndexError, StoreError};

/// Read access to a segment's index attributes
pub struct IndexReader<'a, S: SegmentAttributes + ?Sized> {
    segment: &'a S,
}

impl<'a, S: SegmentAttributes + ?Sized> IndexReader<'a, S> {
    /// Create a reader over `segment`
    pub fn new(segment: &'a S) -> Self {
        Self { segment }
    }

    /// The segment being read
    pub fn segment(&self) -> &'a S {
        self.segment
    }

    /// Locate the buckets for `hashes` with a single attribute read.
    ///
    /// Every requested hash is present in the result.
    pub async fn locate_buckets(
        &self,
        hashes: &[KeyHash],
    ) -> Result<HashMap<KeyHash, TableBucket>, StoreError> {
        let keys: Vec<AttributeKey> = hashes.iter().map(|h| AttributeKey::Bucket(*h)).collect();
        let values = self.segment.get_attributes(&keys).await?;

        let mut buckets = HashMap::with_capacity(hashes.len());
        for (hash, key) in hashes.iter().zip(&keys) {
            let head = match values.get(key) {
                Some(value) => decode_offset(*key, *value)?,
                None => None,
            };
            buckets.insert(*hash, TableBucket::new(*hash, head));
        }
        Ok(buckets)
    }

    /// Offset up to which the segment has been indexed.
    ///
    /// Fails with a contract violation when the table attributes were never
    /// initialized (see
    /// [`IndexWriter::generate_initial_table_attributes`](crate::index::IndexWriter::generate_initial_table_attributes)).
    /// No conditional update can succeed against such a checkpoint.
    pub async fn get_last_indexed_offset(&self) -> Result<Offset, IndexError> {
        let key = AttributeKey::TableIndexOffset;
        let values = self.segment.get_attributes(&[key]).await?;
        let offset = match values.get(&key) {
            Some(value) => decode_offset(key, *value)?,
            None => None,
        };
        offset.ok_or_else(|| {
            IndexError::contract(format!(
                "table attributes of segment {} are not initialized",
                self.segment.segment_id()
            ))
        })
    }

    /// Offset of the entry the backpointer at `offset` leads to, if any
    pub async fn get_backpointer_offset(&self, offset: Offset) -> Result<Option<Offset>, StoreError> {
        let key = AttributeKey::Backpointer(offset);
        let values = self.segment.get_attributes(&[key]).await?;
        match values.get(&key) {
            Some(value) => decode_offset(key, *value),
            None => Ok(None),
        }
    }

    /// Offsets of every entry in the bucket's chain, newest first.
    pub async fn get_bucket_offsets(&self, bucket: &TableBucket) -> Result<Vec<Offset>, IndexError> {
        let mut offsets = Vec::new();
        let mut next = bucket.segment_offset();
        while let Some(offset) = next {
            if let Some(previous) = offsets.last() {
                if offset >= *previous {
                    return Err(IndexError::Corruption(format!(
                        "backpointer from {previous} leads forward to {offset} in bucket {}",
                        bucket.hash()
                    )));
                }
            }
            offsets.push(offset);
            next = self.get_backpointer_offset(offset).await?;
        }
        Ok(offsets)
    }

    /// Attach the keys currently indexed in a bucket to `update`.
    ///
    /// Walks the bucket chain and resolves each offset to its key through
    /// `log`. Returns the number of keys attached.
    pub async fn collect_existing_keys<L, H>(
        &self,
        log: &L,
        hasher: &H,
        update: &mut BucketUpdate,
    ) -> Result<usize, IndexError>
    where
        L: EntryLog + ?Sized,
        H: KeyHasher + ?Sized,
    {
        let bucket = *update.bucket();
        let mut seen = HashSet::new();
        for offset in self.get_bucket_offsets(&bucket).await? {
            let key = log.read_key(offset).await?.ok_or_else(|| {
                IndexError::Corruption(format!(
                    "bucket {} links offset {offset}, which holds no live entry",
                    bucket.hash()
                ))
            })?;
            if hasher.hash(key.as_bytes()) != bucket.hash() {
                return Err(IndexError::Corruption(format!(
                    "entry at offset {offset} does not hash to bucket {}",
                    bucket.hash()
                )));
            }
            if seen.insert(key.clone()) {
                update.with_existing_key(KeyInfo::new(key, offset));
            }
        }
        Ok(seen.len())
    }
}

impl<S: SegmentAttributes + ?Sized> BucketLocator for IndexReader<'_, S> {
    fn locate_buckets<'b>(
        &'b self,
        hashes: &'b [KeyHash],
    ) -> StoreFuture<'b, HashMap<KeyHash, TableBucket>> {
        Box::pin(IndexReader::locate_buckets(self, hashes))
    }
}

fn decode_offset(key: AttributeKey, value: i64) -> Result<Option<Offset>, StoreError> {
    if value == NULL_ATTRIBUTE_VALUE {
        return Ok(None);
    }
    match Offset::from_attribute_value(value) {
        Some(offset) => Ok(Some(offset)),
        None => Err(StoreError::InvalidAttributeValue { key, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::AttributeMutation;
    use crate::index::TableKey;
    use crate::segment::{MemorySegment, SyncSegmentAttributes};

    fn off(v: u64) -> Offset {
        Offset::new(v).unwrap()
    }

    fn set(segment: &MemorySegment, key: AttributeKey, value: Option<Offset>) {
        segment
            .update_attributes_sync(&[AttributeMutation::replace(key, value)])
            .unwrap();
    }

    #[tokio::test]
    async fn test_locate_treats_sentinel_as_absent() {
        let segment = MemorySegment::new(1);
        let live = KeyHash::new(1);
        let deleted = KeyHash::new(2);
        let never = KeyHash::new(3);
        set(&segment, AttributeKey::Bucket(live), Some(off(40)));
        set(&segment, AttributeKey::Bucket(deleted), None);

        let reader = IndexReader::new(&segment);
        let buckets = reader.locate_buckets(&[live, deleted, never]).await.unwrap();
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[&live].segment_offset(), Some(off(40)));
        assert!(!buckets[&deleted].exists());
        assert!(!buckets[&never].exists());
        assert_eq!(segment.attribute_reads(), 1);
    }

    #[test]
    fn test_decode_rejects_negative_values() {
        let key = AttributeKey::Bucket(KeyHash::new(5));
        assert!(matches!(
            decode_offset(key, -5),
            Err(StoreError::InvalidAttributeValue { value: -5, .. })
        ));
        assert_eq!(decode_offset(key, NULL_ATTRIBUTE_VALUE).unwrap(), None);
        assert_eq!(decode_offset(key, 5).unwrap(), Some(off(5)));
    }

    #[tokio::test]
    async fn test_last_indexed_offset() {
        let segment = MemorySegment::new(1);
        let reader = IndexReader::new(&segment);
        set(&segment, AttributeKey::TableIndexOffset, Some(Offset::ZERO));
        assert_eq!(reader.get_last_indexed_offset().await.unwrap(), Offset::ZERO);

        set(&segment, AttributeKey::TableIndexOffset, Some(off(77)));
        assert_eq!(reader.get_last_indexed_offset().await.unwrap(), off(77));
    }

    #[tokio::test]
    async fn test_uninitialized_checkpoint_is_contract_violation() {
        let segment = MemorySegment::new(1);
        let reader = IndexReader::new(&segment);
        let err = reader.get_last_indexed_offset().await.unwrap_err();
        assert!(matches!(err, IndexError::ContractViolation(_)));

        // A checkpoint holding the sentinel is no more usable than a missing one.
        set(&segment, AttributeKey::TableIndexOffset, None);
        let err = reader.get_last_indexed_offset().await.unwrap_err();
        assert!(matches!(err, IndexError::ContractViolation(_)));
        assert!(!err.status().is_retryable());
    }

    #[tokio::test]
    async fn test_bucket_offsets_walk_backpointers() {
        let segment = MemorySegment::new(1);
        let hash = KeyHash::new(9);
        set(&segment, AttributeKey::Backpointer(off(30)), Some(off(10)));
        set(&segment, AttributeKey::Backpointer(off(10)), None);

        let reader = IndexReader::new(&segment);
        let offsets = reader
            .get_bucket_offsets(&TableBucket::new(hash, Some(off(30))))
            .await
            .unwrap();
        assert_eq!(offsets, vec![off(30), off(10)]);

        let empty = reader.get_bucket_offsets(&TableBucket::absent(hash)).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_bucket_offsets_detect_cycle() {
        let segment = MemorySegment::new(1);
        set(&segment, AttributeKey::Backpointer(off(30)), Some(off(10)));
        set(&segment, AttributeKey::Backpointer(off(10)), Some(off(30)));

        let reader = IndexReader::new(&segment);
        let err = reader
            .get_bucket_offsets(&TableBucket::new(KeyHash::new(1), Some(off(30))))
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Corruption(_)));
    }

    #[tokio::test]
    async fn test_collect_existing_keys() {
        let segment = MemorySegment::new(1);
        let hasher = |_: &[u8]| KeyHash::new(4);
        let a = segment.append("a").unwrap();
        let b = segment.append("b").unwrap();
        set(&segment, AttributeKey::Bucket(KeyHash::new(4)), Some(b));
        set(&segment, AttributeKey::Backpointer(b), Some(a));

        let reader = IndexReader::new(&segment);
        let mut update = BucketUpdate::new(TableBucket::new(KeyHash::new(4), Some(b)));
        let count = reader
            .collect_existing_keys(&segment, &hasher, &mut update)
            .await
            .unwrap();
        assert_eq!(count, 2);
        let keys: Vec<(TableKey, Offset)> = update
            .existing_keys_by_offset()
            .into_iter()
            .map(|k| (k.key().clone(), k.offset()))
            .collect();
        assert_eq!(keys, vec![(TableKey::from("a"), a), (TableKey::from("b"), b)]);
    }

    #[tokio::test]
    async fn test_collect_existing_keys_rejects_foreign_hash() {
        let segment = MemorySegment::new(1);
        let hasher = |key: &[u8]| KeyHash::new(key[0] as u128);
        let a = segment.append("a").unwrap();

        let reader = IndexReader::new(&segment);
        let mut update = BucketUpdate::new(TableBucket::new(KeyHash::new(1), Some(a)));
        let err = reader
            .collect_existing_keys(&segment, &hasher, &mut update)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Corruption(_)));
    }
}
