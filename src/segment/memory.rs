//! In-memory table segment
//!
//! This module provides a segment that keeps its entry log and attributes in
//! memory. Attribute batches are validated and applied under a single lock,
//! which gives the all-or-nothing behavior the index relies on. Useful for
//! testing and for embedding the index without a real segment store.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::attribute::{AttributeId, AttributeKey, AttributeMutation, MutationKind};
use crate::index::{KeyUpdate, TableKey};
use crate::offset::{decode_optional, Offset};
use crate::segment::{EntryLog, StoreFuture, SyncSegmentAttributes};
use crate::status::{ApplyError, StoreError};

/// Serialized size of an entry header in the log
pub const ENTRY_HEADER_LEN: u64 = 16;

#[derive(Debug, Clone)]
struct LogEntry {
    key: TableKey,
    removal: bool,
}

#[derive(Default)]
struct SegmentState {
    entries: BTreeMap<Offset, LogEntry>,
    length: u64,
    attributes: HashMap<AttributeId, i64>,
    sealed: bool,
    fail_next_read: Option<StoreError>,
    fail_next_update: Option<StoreError>,
}

/// In-memory table segment
pub struct MemorySegment {
    id: u64,
    state: Mutex<SegmentState>,
    applied_batches: AtomicU64,
    attribute_reads: AtomicU64,
}

impl MemorySegment {
    /// Create an empty segment
    pub fn new(id: u64) -> Self {
        Self {
            id,
            state: Mutex::new(SegmentState::default()),
            applied_batches: AtomicU64::new(0),
            attribute_reads: AtomicU64::new(0),
        }
    }

    /// Segment identifier
    pub fn segment_id(&self) -> u64 {
        self.id
    }

    /// Append an insert/update entry for `key` and return its offset
    pub fn append(&self, key: impl Into<TableKey>) -> Result<Offset, StoreError> {
        self.append_entry(key.into(), false)
    }

    /// Append a removal entry for `key` and return its offset
    pub fn append_removal(&self, key: impl Into<TableKey>) -> Result<Offset, StoreError> {
        self.append_entry(key.into(), true)
    }

    fn append_entry(&self, key: TableKey, removal: bool) -> Result<Offset, StoreError> {
        let mut state = self.state.lock();
        if state.sealed {
            return Err(StoreError::SegmentSealed(self.id));
        }
        // Both the entry start and the new length must stay addressable.
        let offset = Offset::new(state.length).ok_or(StoreError::SegmentFull(self.id))?;
        let length = state
            .length
            .checked_add(ENTRY_HEADER_LEN + key.len() as u64)
            .filter(|end| Offset::new(*end).is_some())
            .ok_or(StoreError::SegmentFull(self.id))?;
        state.length = length;
        state.entries.insert(offset, LogEntry { key, removal });
        Ok(offset)
    }

    #[cfg(test)]
    fn set_length(&self, length: u64) {
        self.state.lock().length = length;
    }

    /// Current length of the entry log
    pub fn length(&self) -> Offset {
        Offset::from_u64_saturating(self.state.lock().length)
    }

    /// Key updates for every entry starting in `range`, in log order
    pub fn read_key_updates(&self, range: Range<Offset>) -> Vec<KeyUpdate> {
        let state = self.state.lock();
        state
            .entries
            .range(range)
            .map(|(offset, entry)| KeyUpdate::new(entry.key.clone(), *offset, entry.removal))
            .collect()
    }

    /// Physical value of an attribute, if it was ever set
    pub fn attribute(&self, key: AttributeKey) -> Option<i64> {
        self.state.lock().attributes.get(&key.to_id()).copied()
    }

    /// Decoded value of an attribute; absent and sentinel values are `None`
    pub fn attribute_offset(&self, key: AttributeKey) -> Option<Offset> {
        self.attribute(key).and_then(decode_optional)
    }

    /// Number of attributes physically present (including sentinels)
    pub fn attribute_count(&self) -> usize {
        self.state.lock().attributes.len()
    }

    /// Snapshot of all attributes that hold a valid offset
    pub fn live_attributes(&self) -> BTreeMap<AttributeKey, Offset> {
        let state = self.state.lock();
        state
            .attributes
            .iter()
            .filter_map(|(id, value)| {
                let key = AttributeKey::from_id(*id)?;
                decode_optional(*value).map(|offset| (key, offset))
            })
            .collect()
    }

    /// Number of attribute batches applied successfully
    pub fn applied_batches(&self) -> u64 {
        self.applied_batches.load(Ordering::Acquire)
    }

    /// Number of attribute read calls served
    pub fn attribute_reads(&self) -> u64 {
        self.attribute_reads.load(Ordering::Acquire)
    }

    /// Reject any further appends and attribute updates
    pub fn seal(&self) {
        self.state.lock().sealed = true;
    }

    /// Fail the next attribute read with `err`
    pub fn fail_next_read(&self, err: StoreError) {
        self.state.lock().fail_next_read = Some(err);
    }

    /// Fail the next attribute update with `err`
    pub fn fail_next_update(&self, err: StoreError) {
        self.state.lock().fail_next_update = Some(err);
    }
}

impl SyncSegmentAttributes for MemorySegment {
    fn segment_id(&self) -> u64 {
        MemorySegment::segment_id(self)
    }

    fn get_attributes_sync(
        &self,
        keys: &[AttributeKey],
    ) -> Result<HashMap<AttributeKey, i64>, StoreError> {
        let mut state = self.state.lock();
        if let Some(err) = state.fail_next_read.take() {
            return Err(err);
        }
        self.attribute_reads.fetch_add(1, Ordering::AcqRel);

        Ok(keys
            .iter()
            .filter_map(|key| state.attributes.get(&key.to_id()).map(|v| (*key, *v)))
            .collect())
    }

    fn update_attributes_sync(&self, mutations: &[AttributeMutation]) -> Result<(), ApplyError> {
        let mut state = self.state.lock();
        if let Some(err) = state.fail_next_update.take() {
            return Err(err.into());
        }
        if state.sealed {
            return Err(StoreError::SegmentSealed(self.id).into());
        }

        // Stage the whole batch first; nothing is written unless every
        // mutation passes.
        let mut staged: HashMap<AttributeId, i64> = HashMap::with_capacity(mutations.len());
        for mutation in mutations {
            let id = mutation.key.to_id();
            let current = staged
                .get(&id)
                .or_else(|| state.attributes.get(&id))
                .copied();

            match mutation.kind {
                MutationKind::SetIfAbsent => {
                    // The sentinel counts as no value.
                    if current.and_then(decode_optional).is_some() {
                        continue;
                    }
                }
                MutationKind::Replace => {}
                MutationKind::ReplaceIfEquals { expected } => {
                    let actual = current.and_then(decode_optional);
                    if actual != expected {
                        return Err(ApplyError::Conflict {
                            key: mutation.key,
                            expected,
                            actual,
                        });
                    }
                }
            }
            staged.insert(id, mutation.physical_value());
        }

        state.attributes.extend(staged);
        self.applied_batches.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

impl EntryLog for MemorySegment {
    fn read_key(&self, offset: Offset) -> StoreFuture<'_, Option<TableKey>> {
        let key = {
            let state = self.state.lock();
            state
                .entries
                .get(&offset)
                .filter(|entry| !entry.removal)
                .map(|entry| entry.key.clone())
        };
        Box::pin(async move { Ok(key) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::KeyHash;
    use crate::offset::NULL_ATTRIBUTE_VALUE;

    fn off(v: u64) -> Offset {
        Offset::new(v).unwrap()
    }

    #[test]
    fn test_append_advances_offsets() {
        let segment = MemorySegment::new(1);
        let a = segment.append("abc").unwrap();
        let b = segment.append_removal("abc").unwrap();
        assert_eq!(a, Offset::ZERO);
        assert_eq!(b, off(ENTRY_HEADER_LEN + 3));
        assert_eq!(segment.length(), off(2 * (ENTRY_HEADER_LEN + 3)));

        let updates = segment.read_key_updates(Offset::ZERO..segment.length());
        assert_eq!(updates.len(), 2);
        assert!(!updates[0].is_deleted());
        assert!(updates[1].is_deleted());
    }

    #[test]
    fn test_set_if_absent_is_noop_when_set() {
        let segment = MemorySegment::new(1);
        let key = AttributeKey::TableIndexOffset;
        segment
            .update_attributes_sync(&[AttributeMutation::set_if_absent(key, Some(off(0)))])
            .unwrap();
        segment
            .update_attributes_sync(&[AttributeMutation::replace(key, Some(off(50)))])
            .unwrap();
        segment
            .update_attributes_sync(&[AttributeMutation::set_if_absent(key, Some(off(0)))])
            .unwrap();
        assert_eq!(segment.attribute(key), Some(50));
    }

    #[test]
    fn test_set_if_absent_overwrites_sentinel() {
        let segment = MemorySegment::new(1);
        let key = AttributeKey::TableIndexOffset;
        segment
            .update_attributes_sync(&[AttributeMutation::replace(key, None)])
            .unwrap();
        assert_eq!(segment.attribute(key), Some(NULL_ATTRIBUTE_VALUE));

        segment
            .update_attributes_sync(&[AttributeMutation::set_if_absent(key, Some(off(0)))])
            .unwrap();
        assert_eq!(segment.attribute_offset(key), Some(Offset::ZERO));
    }

    #[test]
    fn test_append_stops_at_max_offset() {
        let segment = MemorySegment::new(4);
        segment.set_length(Offset::MAX.get() - ENTRY_HEADER_LEN - 1);
        let last = segment.append("k").unwrap();
        assert_eq!(segment.length(), Offset::MAX);

        let err = segment.append("k").unwrap_err();
        assert!(matches!(err, StoreError::SegmentFull(4)));
        // The entry at the last valid offset is untouched.
        assert_eq!(segment.read_key_updates(last..Offset::MAX).len(), 1);

        segment.set_length(Offset::MAX.get() - 2);
        assert!(matches!(
            segment.append_removal("long key"),
            Err(StoreError::SegmentFull(4))
        ));
    }

    #[test]
    fn test_segment_id_matches_trait() {
        let segment = MemorySegment::new(42);
        assert_eq!(segment.segment_id(), 42);
        assert_eq!(SyncSegmentAttributes::segment_id(&segment), 42);
        assert_eq!(crate::segment::SegmentAttributes::segment_id(&segment), 42);
    }

    #[test]
    fn test_sealed_segment_rejects_appends() {
        let segment = MemorySegment::new(2);
        segment.seal();
        assert!(matches!(
            segment.append("k"),
            Err(StoreError::SegmentSealed(2))
        ));
    }

    #[test]
    fn test_conflict_rejects_whole_batch() {
        let segment = MemorySegment::new(1);
        let bucket = AttributeKey::Bucket(KeyHash::new(9));
        let batch = [
            AttributeMutation::replace(bucket, Some(off(10))),
            AttributeMutation::replace_if_equals(
                AttributeKey::TableIndexOffset,
                Some(off(20)),
                Some(off(5)),
            ),
        ];

        let err = segment.update_attributes_sync(&batch).unwrap_err();
        assert!(matches!(
            err,
            ApplyError::Conflict {
                key: AttributeKey::TableIndexOffset,
                expected: Some(_),
                actual: None,
            }
        ));
        assert_eq!(segment.attribute(bucket), None);
        assert_eq!(segment.applied_batches(), 0);
    }

    #[test]
    fn test_replace_with_none_keeps_sentinel() {
        let segment = MemorySegment::new(1);
        let bucket = AttributeKey::Bucket(KeyHash::new(3));
        segment
            .update_attributes_sync(&[AttributeMutation::replace(bucket, Some(off(8)))])
            .unwrap();
        segment
            .update_attributes_sync(&[AttributeMutation::replace(bucket, None)])
            .unwrap();
        assert_eq!(segment.attribute(bucket), Some(NULL_ATTRIBUTE_VALUE));
        assert_eq!(segment.attribute_offset(bucket), None);
        assert_eq!(segment.attribute_count(), 1);
        assert!(segment.live_attributes().is_empty());
    }

    #[test]
    fn test_sealed_and_injected_failures() {
        let segment = MemorySegment::new(7);
        segment.fail_next_read(StoreError::Unavailable("read".into()));
        assert!(segment.get_attributes_sync(&[]).is_err());
        assert!(segment.get_attributes_sync(&[]).is_ok());

        segment.seal();
        let err = segment
            .update_attributes_sync(&[AttributeMutation::replace(
                AttributeKey::TableIndexOffset,
                None,
            )])
            .unwrap_err();
        assert!(matches!(err, ApplyError::Store(StoreError::SegmentSealed(7))));
    }

    #[tokio::test]
    async fn test_read_key_skips_removals() {
        let segment = MemorySegment::new(1);
        let a = segment.append("a").unwrap();
        let b = segment.append_removal("a").unwrap();
        assert_eq!(segment.read_key(a).await.unwrap(), Some(TableKey::from("a")));
        assert_eq!(segment.read_key(b).await.unwrap(), None);
        assert_eq!(segment.read_key(off(1)).await.unwrap(), None);
    }
}
