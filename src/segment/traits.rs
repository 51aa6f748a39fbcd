//! Segment store traits for the table index
//!
//! The index never talks to storage directly. It consumes three capabilities:
//! a bucket locator, a segment attribute store (which is also the mutation
//! applier) and, for the reader, an entry log that resolves offsets to keys.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use crate::attribute::{AttributeKey, AttributeMutation};
use crate::index::{KeyHash, TableBucket, TableKey};
use crate::offset::Offset;
use crate::status::{ApplyError, StoreError};

/// Boxed future returned by store reads
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Boxed future returned by attribute batch application
pub type ApplyFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ApplyError>> + Send + 'a>>;

/// Resolves bucket hashes to their current bucket state
pub trait BucketLocator: Send + Sync {
    /// Locate the buckets for `hashes`.
    ///
    /// The result must contain an entry for every requested hash; buckets
    /// that do not exist are returned with no segment offset.
    fn locate_buckets<'a>(
        &'a self,
        hashes: &'a [KeyHash],
    ) -> StoreFuture<'a, HashMap<KeyHash, TableBucket>>;
}

/// Async access to a segment's extended attributes
pub trait SegmentAttributes: Send + Sync {
    /// Identifier of the segment, used for logging
    fn segment_id(&self) -> u64;

    /// Read the physical values of `keys`.
    ///
    /// Attributes that were never set are omitted from the result. Attributes
    /// holding `NULL_ATTRIBUTE_VALUE` are returned as such.
    fn get_attributes<'a>(
        &'a self,
        keys: &'a [AttributeKey],
    ) -> StoreFuture<'a, HashMap<AttributeKey, i64>>;

    /// Apply `mutations` as a single atomic batch.
    ///
    /// Either every mutation is applied or none is.
    fn update_attributes<'a>(&'a self, mutations: &'a [AttributeMutation]) -> ApplyFuture<'a>;
}

/// Resolves entry offsets to the key stored at that offset
pub trait EntryLog: Send + Sync {
    /// Read the key of the entry at `offset`.
    ///
    /// Returns `None` if no live (non-removal) entry starts at `offset`.
    fn read_key(&self, offset: Offset) -> StoreFuture<'_, Option<TableKey>>;
}

/// Synchronous segment attribute store (for simpler implementations)
pub trait SyncSegmentAttributes: Send + Sync + 'static {
    /// Identifier of the segment
    fn segment_id(&self) -> u64;

    /// Read attributes synchronously
    fn get_attributes_sync(
        &self,
        keys: &[AttributeKey],
    ) -> Result<HashMap<AttributeKey, i64>, StoreError>;

    /// Apply a batch synchronously, all or nothing
    fn update_attributes_sync(&self, mutations: &[AttributeMutation]) -> Result<(), ApplyError>;
}

/// Implement async trait for sync stores
impl<T: SyncSegmentAttributes> SegmentAttributes for T {
    fn segment_id(&self) -> u64 {
        SyncSegmentAttributes::segment_id(self)
    }

    fn get_attributes<'a>(
        &'a self,
        keys: &'a [AttributeKey],
    ) -> StoreFuture<'a, HashMap<AttributeKey, i64>> {
        let result = self.get_attributes_sync(keys);
        Box::pin(async move { result })
    }

    fn update_attributes<'a>(&'a self, mutations: &'a [AttributeMutation]) -> ApplyFuture<'a> {
        let result = self.update_attributes_sync(mutations);
        Box::pin(async move { result })
    }
}
