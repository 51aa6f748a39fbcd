//! Hash index for table segments
//!
//! This module provides the bucket model, the key hasher and the index
//! writer/reader pair that keep a segment's bucket and backpointer attributes
//! consistent with its entry log.

mod bucket;
mod hasher;
mod reader;
mod writer;

use std::fmt;

pub use bucket::{BucketUpdate, KeyInfo, KeyUpdate, TableBucket, TableKey};
pub use hasher::{DefaultKeyHasher, HashAlgorithm, KeyHasher};
pub use reader::IndexReader;
pub use writer::{IndexWriter, WriterConfig};

/// Key hash used to identify a table bucket
///
/// The most significant bit is always clear. Attribute ids with that bit set
/// are reserved for core attributes and backpointers.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct KeyHash {
    hash: u128,
}

impl KeyHash {
    /// Number of usable hash bits
    pub const HASH_BITS: u32 = 127;

    /// Mask applied to every raw hash value
    pub const MASK: u128 = (1u128 << Self::HASH_BITS) - 1;

    /// Create a new key hash, clearing the reserved bit
    #[inline]
    pub const fn new(hash: u128) -> Self {
        Self {
            hash: hash & Self::MASK,
        }
    }

    /// Get the full hash value
    #[inline]
    pub const fn hash(&self) -> u128 {
        self.hash
    }

    /// Upper 64 bits of the hash
    #[inline]
    pub const fn high(&self) -> u64 {
        (self.hash >> 64) as u64
    }

    /// Lower 64 bits of the hash
    #[inline]
    pub const fn low(&self) -> u64 {
        self.hash as u64
    }
}

impl From<u128> for KeyHash {
    #[inline]
    fn from(hash: u128) -> Self {
        Self::new(hash)
    }
}

impl fmt::Debug for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyHash({:032x})", self.hash)
    }
}

impl fmt::Display for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.hash)
    }
}
