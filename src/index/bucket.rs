//! Table buckets and per-bucket update sets

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

use crate::index::KeyHash;
use crate::offset::Offset;

/// Opaque table key
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TableKey(Vec<u8>);

impl TableKey {
    /// Create a key from raw bytes
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Key bytes
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Key length in bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the key is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Borrow<[u8]> for TableKey {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for TableKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for TableKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for TableKey {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<String> for TableKey {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl From<&str> for TableKey {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl fmt::Debug for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "TableKey({:?})", s),
            Err(_) => write!(f, "TableKey({:02x?})", self.0),
        }
    }
}

/// Head of the collision chain for one hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableBucket {
    hash: KeyHash,
    segment_offset: Option<Offset>,
}

impl TableBucket {
    /// Create a bucket pointing at `segment_offset`
    pub const fn new(hash: KeyHash, segment_offset: Option<Offset>) -> Self {
        Self {
            hash,
            segment_offset,
        }
    }

    /// Create a bucket that does not exist yet
    pub const fn absent(hash: KeyHash) -> Self {
        Self::new(hash, None)
    }

    /// Bucket hash
    #[inline]
    pub const fn hash(&self) -> KeyHash {
        self.hash
    }

    /// Offset of the most recent entry in this bucket, if any
    #[inline]
    pub const fn segment_offset(&self) -> Option<Offset> {
        self.segment_offset
    }

    /// Check if the bucket exists
    #[inline]
    pub const fn exists(&self) -> bool {
        self.segment_offset.is_some()
    }
}

/// A key that is already indexed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    key: TableKey,
    offset: Offset,
}

impl KeyInfo {
    /// Create key info
    pub fn new(key: impl Into<TableKey>, offset: Offset) -> Self {
        Self {
            key: key.into(),
            offset,
        }
    }

    /// The key
    #[inline]
    pub fn key(&self) -> &TableKey {
        &self.key
    }

    /// Offset of the key's current entry
    #[inline]
    pub fn offset(&self) -> Offset {
        self.offset
    }
}

/// An incoming change to a key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyUpdate {
    key: TableKey,
    offset: Offset,
    deleted: bool,
}

impl KeyUpdate {
    /// Insert or update of `key` at `offset`
    pub fn upsert(key: impl Into<TableKey>, offset: Offset) -> Self {
        Self::new(key, offset, false)
    }

    /// Removal of `key`, recorded at `offset`
    pub fn delete(key: impl Into<TableKey>, offset: Offset) -> Self {
        Self::new(key, offset, true)
    }

    /// Create a key update
    pub fn new(key: impl Into<TableKey>, offset: Offset, deleted: bool) -> Self {
        Self {
            key: key.into(),
            offset,
            deleted,
        }
    }

    /// The key
    #[inline]
    pub fn key(&self) -> &TableKey {
        &self.key
    }

    /// Offset of the update's entry in the segment
    #[inline]
    pub fn offset(&self) -> Offset {
        self.offset
    }

    /// Check if this update removes the key
    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }
}

/// Pending changes for one bucket
///
/// Combines the bucket's observed state, the keys already indexed in it and
/// the updates (from the current batch) whose hash maps to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketUpdate {
    bucket: TableBucket,
    existing_keys: BTreeMap<TableKey, KeyInfo>,
    key_updates: BTreeMap<TableKey, KeyUpdate>,
}

impl BucketUpdate {
    /// Create an empty update for `bucket`
    pub fn new(bucket: TableBucket) -> Self {
        Self {
            bucket,
            existing_keys: BTreeMap::new(),
            key_updates: BTreeMap::new(),
        }
    }

    /// Record a key that is already indexed in this bucket.
    ///
    /// If the key is recorded twice, the entry with the higher offset is kept.
    pub fn with_existing_key(&mut self, info: KeyInfo) -> &mut Self {
        let newer_known = self
            .existing_keys
            .get(&info.key)
            .is_some_and(|current| current.offset >= info.offset);
        if !newer_known {
            self.existing_keys.insert(info.key.clone(), info);
        }
        self
    }

    /// Record an incoming update.
    ///
    /// If the same key is updated more than once, the latest offset wins.
    pub fn with_key_update(&mut self, update: KeyUpdate) -> &mut Self {
        let newer_known = self
            .key_updates
            .get(&update.key)
            .is_some_and(|current| current.offset >= update.offset);
        if !newer_known {
            self.key_updates.insert(update.key.clone(), update);
        }
        self
    }

    /// The bucket being updated
    #[inline]
    pub fn bucket(&self) -> &TableBucket {
        &self.bucket
    }

    /// Existing keys, in key order
    pub fn existing_keys(&self) -> impl Iterator<Item = &KeyInfo> + '_ {
        self.existing_keys.values()
    }

    /// Incoming updates, in key order
    pub fn key_updates(&self) -> impl Iterator<Item = &KeyUpdate> + '_ {
        self.key_updates.values()
    }

    /// Number of existing keys
    #[inline]
    pub fn existing_key_count(&self) -> usize {
        self.existing_keys.len()
    }

    /// Number of incoming updates
    #[inline]
    pub fn key_update_count(&self) -> usize {
        self.key_updates.len()
    }

    /// Check if the key is replaced or removed by this batch
    #[inline]
    pub fn is_key_updated(&self, key: &TableKey) -> bool {
        self.key_updates.contains_key(key)
    }

    /// Check if there is anything to index
    #[inline]
    pub fn has_updates(&self) -> bool {
        !self.key_updates.is_empty()
    }

    /// Existing keys sorted by ascending offset
    pub fn existing_keys_by_offset(&self) -> Vec<&KeyInfo> {
        let mut keys: Vec<&KeyInfo> = self.existing_keys.values().collect();
        keys.sort_by_key(|k| k.offset);
        keys
    }

    /// Non-deleted updates sorted by ascending offset
    pub fn surviving_updates_by_offset(&self) -> Vec<&KeyUpdate> {
        let mut updates: Vec<&KeyUpdate> =
            self.key_updates.values().filter(|u| !u.deleted).collect();
        updates.sort_by_key(|u| u.offset);
        updates
    }

    /// Highest offset of any key that survives this update.
    ///
    /// Returns `None` when every key in the bucket is removed.
    pub fn bucket_offset(&self) -> Option<Offset> {
        let existing = self
            .existing_keys
            .values()
            .filter(|k| !self.is_key_updated(&k.key))
            .map(|k| k.offset);
        let updated = self
            .key_updates
            .values()
            .filter(|u| !u.deleted)
            .map(|u| u.offset);
        existing.chain(updated).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn off(v: u64) -> Offset {
        Offset::new(v).unwrap()
    }

    fn bucket() -> TableBucket {
        TableBucket::new(KeyHash::new(1), Some(off(30)))
    }

    #[test]
    fn test_table_bucket_exists() {
        assert!(bucket().exists());
        assert!(!TableBucket::absent(KeyHash::new(1)).exists());
        assert_eq!(bucket().segment_offset(), Some(off(30)));
    }

    #[test]
    fn test_bucket_offset_mixes_existing_and_new() {
        let mut update = BucketUpdate::new(bucket());
        update
            .with_existing_key(KeyInfo::new("a", off(10)))
            .with_existing_key(KeyInfo::new("b", off(30)));
        assert!(!update.has_updates());
        assert_eq!(update.bucket_offset(), Some(off(30)));

        update.with_key_update(KeyUpdate::delete("b", off(40)));
        assert!(update.has_updates());
        assert!(update.is_key_updated(&TableKey::from("b")));
        assert_eq!(update.bucket_offset(), Some(off(10)));

        update.with_key_update(KeyUpdate::upsert("c", off(50)));
        assert_eq!(update.bucket_offset(), Some(off(50)));
    }

    #[test]
    fn test_bucket_offset_empty_after_delete() {
        let mut update = BucketUpdate::new(bucket());
        update.with_existing_key(KeyInfo::new("a", off(30)));
        update.with_key_update(KeyUpdate::delete("a", off(40)));
        assert_eq!(update.bucket_offset(), None);
    }

    #[test]
    fn test_latest_key_update_wins() {
        let mut update = BucketUpdate::new(TableBucket::absent(KeyHash::new(1)));
        update.with_key_update(KeyUpdate::upsert("a", off(20)));
        update.with_key_update(KeyUpdate::delete("a", off(10)));
        assert_eq!(update.key_update_count(), 1);
        assert_eq!(update.bucket_offset(), Some(off(20)));

        update.with_key_update(KeyUpdate::delete("a", off(30)));
        assert_eq!(update.bucket_offset(), None);
    }

    #[test]
    fn test_existing_keys_sorted_by_offset() {
        let mut update = BucketUpdate::new(bucket());
        update
            .with_existing_key(KeyInfo::new("z", off(5)))
            .with_existing_key(KeyInfo::new("a", off(30)))
            .with_existing_key(KeyInfo::new("m", off(12)));
        let offsets: Vec<u64> = update
            .existing_keys_by_offset()
            .iter()
            .map(|k| k.offset().get())
            .collect();
        assert_eq!(offsets, vec![5, 12, 30]);
    }

    #[test]
    fn test_table_key_debug() {
        assert_eq!(format!("{:?}", TableKey::from("k1")), "TableKey(\"k1\")");
        assert_eq!(format!("{:?}", TableKey::new(vec![0xff])), "TableKey([ff])");
    }
}
