//! oxitable - Hash index maintenance for append-only table segments
//!
//! A table segment is an append-only log of key/value entries. Its index lives
//! in the segment's attribute store:
//! - **Buckets**: one attribute per key hash, pointing at the newest entry
//! - **Backpointers**: one attribute per entry offset, linking to the next
//!   older entry with the same hash
//! - **Checkpoint**: the offset up to which the log has been indexed
//!
//! This crate implements the write path that turns a batch of key updates
//! into attribute mutations and applies them atomically, plus a reader that
//! walks the resulting chains.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use oxitable::prelude::*;
//!
//! let segment = MemorySegment::new(1);
//! let writer = IndexWriter::default();
//! segment.update_attributes(&IndexWriter::generate_initial_table_attributes()).await?;
//!
//! let first = IndexReader::new(&segment).get_last_indexed_offset().await?;
//! segment.append("key")?;
//! let last = segment.length();
//!
//! let reader = IndexReader::new(&segment);
//! let updates = writer
//!     .group_by_bucket(segment.read_key_updates(first..last), &reader)
//!     .await?;
//! writer.update_buckets(&updates, &segment, first, last).await?;
//! ```

#![warn(missing_docs)]

pub mod attribute;
pub mod config;
pub mod index;
pub mod offset;
pub mod segment;
pub mod status;

// Re-exports for convenience
pub use attribute::{AttributeKey, AttributeMutation, MutationKind};
pub use offset::{Offset, NULL_ATTRIBUTE_VALUE};
pub use status::{ApplyError, IndexError, Status, StoreError};

/// Constants used throughout the library
pub mod constants {
    /// Default batch size from which key hashing moves to the blocking pool
    pub const DEFAULT_OFFLOAD_THRESHOLD: usize = 1024;
}

/// Prelude module for common imports
pub mod prelude {
    pub use crate::attribute::{AttributeKey, AttributeMutation, MutationKind};
    pub use crate::config::OxitableConfig;
    pub use crate::index::{
        BucketUpdate, IndexReader, IndexWriter, KeyHash, KeyHasher, KeyUpdate, TableBucket,
        TableKey, WriterConfig,
    };
    pub use crate::offset::Offset;
    pub use crate::segment::{
        BucketLocator, EntryLog, MemorySegment, SegmentAttributes, SyncSegmentAttributes,
    };
    pub use crate::status::{IndexError, Status};
}
