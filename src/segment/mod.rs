//! Segment store interfaces
//!
//! This module defines the store capabilities the table index consumes, and
//! an in-memory table segment implementing all of them.

mod memory;
mod traits;

pub use memory::{MemorySegment, ENTRY_HEADER_LEN};
pub use traits::{
    ApplyFuture, BucketLocator, EntryLog, SegmentAttributes, StoreFuture, SyncSegmentAttributes,
};
