//! Index writer for table segments
//!
//! Translates batches of key updates into the attribute mutations that keep a
//! segment's hash index consistent:
//!
//! - each bucket head attribute points at the most recent surviving key with
//!   that hash (or holds the "absent" sentinel once the bucket is empty),
//! - backpointers link the surviving keys of a bucket from newest to oldest,
//! - the table index offset advances from the first to the last indexed
//!   offset through a compare-and-swap.
//!
//! Mutation generation is pure and synchronous. The only suspension points
//! are the bucket locator call made while grouping and the final batch
//! submission.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::attribute::{AttributeKey, AttributeMutation};
use crate::constants::DEFAULT_OFFLOAD_THRESHOLD;
use crate::index::{
    BucketUpdate, DefaultKeyHasher, HashAlgorithm, KeyHash, KeyHasher, KeyUpdate, TableBucket,
};
use crate::offset::Offset;
use crate::segment::{BucketLocator, SegmentAttributes};
use crate::status::{IndexError, StoreError};

/// Configuration for the index writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterConfig {
    /// Batches with at least this many key updates are hashed and grouped on
    /// the blocking thread pool
    pub offload_threshold: usize,
    /// Hash algorithm for the default key hasher
    pub hash_algorithm: HashAlgorithm,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            offload_threshold: DEFAULT_OFFLOAD_THRESHOLD,
            hash_algorithm: HashAlgorithm::default(),
        }
    }
}

/// Generates and applies index mutations for a table segment
pub struct IndexWriter<H: KeyHasher = DefaultKeyHasher> {
    hasher: Arc<H>,
    config: WriterConfig,
}

impl IndexWriter<DefaultKeyHasher> {
    /// Create a writer using the configured default hasher
    pub fn new(config: WriterConfig) -> Self {
        let hasher = DefaultKeyHasher::new(config.hash_algorithm);
        Self::with_hasher(hasher, config)
    }

    /// Attribute mutations that initialize a newly created table segment.
    ///
    /// Sets the table index offset to 0 unless it is already set.
    pub fn generate_initial_table_attributes() -> Vec<AttributeMutation> {
        vec![AttributeMutation::set_if_absent(
            AttributeKey::TableIndexOffset,
            Some(Offset::ZERO),
        )]
    }
}

impl Default for IndexWriter<DefaultKeyHasher> {
    fn default() -> Self {
        Self::new(WriterConfig::default())
    }
}

impl<H: KeyHasher> IndexWriter<H> {
    /// Create a writer with a custom key hasher
    pub fn with_hasher(hasher: H, config: WriterConfig) -> Self {
        Self {
            hasher: Arc::new(hasher),
            config,
        }
    }

    /// Key hasher used for grouping
    pub fn hasher(&self) -> &H {
        &self.hasher
    }

    /// Writer configuration
    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Group key updates by the bucket they map to.
    ///
    /// The locator is called once with every distinct hash. Keys that share a
    /// hash land in the same `BucketUpdate`. The returned updates carry no
    /// existing keys; callers attach those with
    /// [`BucketUpdate::with_existing_key`] or
    /// [`IndexReader::collect_existing_keys`](crate::index::IndexReader::collect_existing_keys).
    pub async fn group_by_bucket<L>(
        &self,
        key_updates: Vec<KeyUpdate>,
        locator: &L,
    ) -> Result<Vec<BucketUpdate>, IndexError>
    where
        L: BucketLocator + ?Sized,
    {
        if key_updates.is_empty() {
            return Ok(Vec::new());
        }

        let update_count = key_updates.len();
        let mut updates_by_hash = self.hash_updates(key_updates).await?;
        let hashes: Vec<KeyHash> = updates_by_hash.keys().copied().collect();
        if tracing::enabled!(tracing::Level::TRACE) {
            tracing::trace!(
                update_count,
                hash_count = hashes.len(),
                "grouping key updates by bucket"
            );
        }

        let buckets = locator.locate_buckets(&hashes).await?;

        let mut result: BTreeMap<TableBucket, BucketUpdate> = BTreeMap::new();
        for (hash, bucket) in buckets {
            let Some(updates) = updates_by_hash.remove(&hash) else {
                continue;
            };
            let bucket_update = result
                .entry(bucket)
                .or_insert_with(|| BucketUpdate::new(bucket));
            for update in updates {
                bucket_update.with_key_update(update);
            }
        }

        if let Some(hash) = updates_by_hash.keys().next() {
            return Err(IndexError::contract(format!(
                "bucket locator returned no bucket for hash {hash}"
            )));
        }

        Ok(result.into_values().collect())
    }

    async fn hash_updates(
        &self,
        key_updates: Vec<KeyUpdate>,
    ) -> Result<BTreeMap<KeyHash, Vec<KeyUpdate>>, IndexError> {
        let offload = key_updates.len() >= self.config.offload_threshold
            && tokio::runtime::Handle::try_current().is_ok();
        if !offload {
            return Ok(hash_by_key(self.hasher.as_ref(), key_updates));
        }

        if tracing::enabled!(tracing::Level::TRACE) {
            tracing::trace!(
                update_count = key_updates.len(),
                "offloading key hashing to blocking pool"
            );
        }
        let hasher = Arc::clone(&self.hasher);
        match tokio::task::spawn_blocking(move || hash_by_key(hasher.as_ref(), key_updates)).await
        {
            Ok(grouped) => Ok(grouped),
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => Err(StoreError::Unavailable("key hashing task was cancelled".into()).into()),
        }
    }

    /// Generate every attribute mutation needed to index `bucket_updates`.
    ///
    /// Returns an empty list when nothing changed. Fails without producing
    /// any mutation if the input violates the caller contract.
    pub fn generate_attribute_updates(
        &self,
        bucket_updates: &[BucketUpdate],
        first_indexed_offset: Offset,
        last_indexed_offset: Offset,
    ) -> Result<Vec<AttributeMutation>, IndexError> {
        if first_indexed_offset > last_indexed_offset {
            return Err(IndexError::contract(format!(
                "last indexed offset {last_indexed_offset} precedes first indexed offset {first_indexed_offset}"
            )));
        }

        let mut updates = Vec::new();
        for bucket_update in bucket_updates {
            generate_bucket_attribute_updates(bucket_update, &mut updates)?;
        }

        if last_indexed_offset > first_indexed_offset {
            updates.push(generate_table_attribute_update(
                first_indexed_offset,
                last_indexed_offset,
            )?);
        }

        Ok(updates)
    }

    /// Generate and apply the mutations for `bucket_updates` onto `segment`.
    ///
    /// The batch is conditioned on the segment's table index offset still
    /// being `first_indexed_offset`, and advances it to
    /// `last_indexed_offset`. Returns the number of mutations applied; no
    /// store call is made when there is nothing to apply.
    ///
    /// A moved checkpoint fails with [`IndexError::CheckpointConflict`]. That
    /// case is retryable, but only after rebuilding every bucket update from
    /// fresh index state.
    pub async fn update_buckets<S>(
        &self,
        bucket_updates: &[BucketUpdate],
        segment: &S,
        first_indexed_offset: Offset,
        last_indexed_offset: Offset,
    ) -> Result<usize, IndexError>
    where
        S: SegmentAttributes + ?Sized,
    {
        let updates =
            self.generate_attribute_updates(bucket_updates, first_indexed_offset, last_indexed_offset)?;
        let segment_id = segment.segment_id();

        if updates.is_empty() {
            if tracing::enabled!(tracing::Level::DEBUG) {
                tracing::debug!(
                    segment_id,
                    first_indexed_offset = %first_indexed_offset,
                    last_indexed_offset = %last_indexed_offset,
                    "index writer: no changes"
                );
            }
            return Ok(0);
        }

        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(
                segment_id,
                first_indexed_offset = %first_indexed_offset,
                last_indexed_offset = %last_indexed_offset,
                update_count = updates.len(),
                "index writer: applying attribute updates"
            );
        }

        match segment.update_attributes(&updates).await {
            Ok(()) => Ok(updates.len()),
            Err(err) => {
                let err = IndexError::from(err);
                if err.is_checkpoint_conflict() && tracing::enabled!(tracing::Level::WARN) {
                    tracing::warn!(
                        segment_id,
                        first_indexed_offset = %first_indexed_offset,
                        error = %err,
                        "index writer: table index offset moved, bucket updates are stale"
                    );
                }
                Err(err)
            }
        }
    }
}

fn hash_by_key<H: KeyHasher + ?Sized>(
    hasher: &H,
    key_updates: Vec<KeyUpdate>,
) -> BTreeMap<KeyHash, Vec<KeyUpdate>> {
    let mut grouped: BTreeMap<KeyHash, Vec<KeyUpdate>> = BTreeMap::new();
    for update in key_updates {
        grouped
            .entry(hasher.hash(update.key().as_bytes()))
            .or_default()
            .push(update);
    }
    grouped
}

/// Backpointer and bucket head mutations for one bucket.
fn generate_bucket_attribute_updates(
    bucket_update: &BucketUpdate,
    updates: &mut Vec<AttributeMutation>,
) -> Result<(), IndexError> {
    if !bucket_update.has_updates() {
        return Ok(());
    }

    // An existing bucket points at an entry, so it must come with at least
    // one existing key; a bucket that does not exist must have none.
    let bucket = bucket_update.bucket();
    if bucket.exists() == (bucket_update.existing_key_count() == 0) {
        return Err(IndexError::contract(format!(
            "bucket {} (exists={}) has {} existing keys",
            bucket.hash(),
            bucket.exists(),
            bucket_update.existing_key_count()
        )));
    }

    generate_backpointer_updates(bucket_update, updates);
    updates.push(generate_bucket_update(bucket, bucket_update.bucket_offset()));
    Ok(())
}

/// Point the bucket head at `bucket_offset`, or at the sentinel if empty.
///
/// The attribute is never physically removed.
fn generate_bucket_update(bucket: &TableBucket, bucket_offset: Option<Offset>) -> AttributeMutation {
    AttributeMutation::replace(AttributeKey::Bucket(bucket.hash()), bucket_offset)
}

fn generate_table_attribute_update(
    current_offset: Offset,
    new_offset: Offset,
) -> Result<AttributeMutation, IndexError> {
    if current_offset > new_offset {
        return Err(IndexError::contract(format!(
            "new table index offset {new_offset} is smaller than current offset {current_offset}"
        )));
    }
    Ok(AttributeMutation::replace_if_equals(
        AttributeKey::TableIndexOffset,
        Some(new_offset),
        Some(current_offset),
    ))
}

/// State of the walk over a bucket's keys in ascending offset order.
#[derive(Debug, Clone, Copy)]
struct ChainWalk {
    /// Offset of the last surviving key seen
    previous_offset: Option<Offset>,
    /// Whether the key right before the current one was replaced
    previous_replaced: bool,
    first: bool,
}

impl ChainWalk {
    const fn start() -> Self {
        Self {
            previous_offset: None,
            previous_replaced: false,
            first: true,
        }
    }

    fn existing(
        mut self,
        offset: Offset,
        replaced: bool,
        updates: &mut Vec<AttributeMutation>,
    ) -> Self {
        if replaced {
            // The oldest key has no backpointer to remove.
            if !self.first {
                updates.push(backpointer_removal(offset));
            }
            self.previous_replaced = true;
        } else {
            if self.previous_replaced {
                updates.push(backpointer_update(offset, self.previous_offset));
                self.previous_replaced = false;
            }
            self.previous_offset = Some(offset);
        }
        self.first = false;
        self
    }

    fn new_key(mut self, offset: Offset, updates: &mut Vec<AttributeMutation>) -> Self {
        if self.previous_offset.is_some() {
            updates.push(backpointer_update(offset, self.previous_offset));
        }
        self.previous_offset = Some(offset);
        self
    }
}

/// Unlink replaced keys and link new keys behind the surviving ones.
///
/// When an existing key is replaced, the next surviving key is repointed to
/// the surviving key before it and the replaced key's own backpointer is
/// removed. Links between untouched existing keys are left alone. New keys
/// are chained in offset order, the oldest pointing at the newest survivor.
fn generate_backpointer_updates(bucket_update: &BucketUpdate, updates: &mut Vec<AttributeMutation>) {
    let walk = bucket_update
        .existing_keys_by_offset()
        .into_iter()
        .fold(ChainWalk::start(), |walk, info| {
            walk.existing(info.offset(), bucket_update.is_key_updated(info.key()), updates)
        });

    bucket_update
        .surviving_updates_by_offset()
        .into_iter()
        .fold(walk, |walk, update| walk.new_key(update.offset(), updates));
}

fn backpointer_update(from: Offset, to: Option<Offset>) -> AttributeMutation {
    AttributeMutation::replace(AttributeKey::Backpointer(from), to)
}

fn backpointer_removal(from: Offset) -> AttributeMutation {
    AttributeMutation::replace(AttributeKey::Backpointer(from), None)
}
