//! Segment attributes touched by the table index
//!
//! The index lives entirely in a segment's extended attributes. Three kinds
//! of attributes exist:
//!
//! - the core `TableIndexOffset` attribute (the checkpoint),
//! - one bucket head attribute per `KeyHash`,
//! - one backpointer attribute per indexed entry offset.
//!
//! At the storage boundary each `AttributeKey` becomes a 128-bit
//! `AttributeId` and each `Option<Offset>` becomes an `i64`. Both encodings
//! round-trip exactly.

use std::fmt;

use crate::index::KeyHash;
use crate::offset::{encode_optional, Offset};

/// Physical 128-bit attribute identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttributeId(pub u128);

impl AttributeId {
    /// Bit marking the reserved (non-bucket) namespace
    pub const RESERVED_BIT: u128 = 1 << 127;

    /// Namespace of core attributes (upper 64 bits)
    pub const CORE_PREFIX: u64 = 1 << 63;

    /// Namespace of backpointer attributes (upper 64 bits)
    pub const BACKPOINTER_PREFIX: u64 = (1 << 63) | 1;

    /// Core attribute number of the table index offset
    pub const TABLE_INDEX_OFFSET: u64 = 0;

    /// Upper 64 bits
    #[inline]
    pub const fn high(&self) -> u64 {
        (self.0 >> 64) as u64
    }

    /// Lower 64 bits
    #[inline]
    pub const fn low(&self) -> u64 {
        self.0 as u64
    }

    #[inline]
    const fn from_parts(high: u64, low: u64) -> Self {
        Self(((high as u128) << 64) | low as u128)
    }
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}-{:016x}", self.high(), self.low())
    }
}

/// Logical attribute key
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttributeKey {
    /// Offset up to which the segment has been indexed
    TableIndexOffset,
    /// Head pointer of the bucket for a hash
    Bucket(KeyHash),
    /// Link from an entry offset to the next older entry of the same bucket
    Backpointer(Offset),
}

impl AttributeKey {
    /// Encode as a physical attribute id
    pub const fn to_id(&self) -> AttributeId {
        match self {
            AttributeKey::TableIndexOffset => {
                AttributeId::from_parts(AttributeId::CORE_PREFIX, AttributeId::TABLE_INDEX_OFFSET)
            }
            AttributeKey::Bucket(hash) => AttributeId(hash.hash()),
            AttributeKey::Backpointer(offset) => {
                AttributeId::from_parts(AttributeId::BACKPOINTER_PREFIX, offset.get())
            }
        }
    }

    /// Decode a physical attribute id.
    ///
    /// Returns `None` for ids in the reserved namespace that this index does
    /// not own.
    pub fn from_id(id: AttributeId) -> Option<Self> {
        if id.0 & AttributeId::RESERVED_BIT == 0 {
            return Some(AttributeKey::Bucket(KeyHash::new(id.0)));
        }
        match (id.high(), id.low()) {
            (AttributeId::CORE_PREFIX, AttributeId::TABLE_INDEX_OFFSET) => {
                Some(AttributeKey::TableIndexOffset)
            }
            (AttributeId::BACKPOINTER_PREFIX, low) => Offset::new(low).map(AttributeKey::Backpointer),
            _ => None,
        }
    }

    /// Check if this is the checkpoint attribute
    #[inline]
    pub const fn is_table_index_offset(&self) -> bool {
        matches!(self, AttributeKey::TableIndexOffset)
    }
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeKey::TableIndexOffset => write!(f, "TableIndexOffset"),
            AttributeKey::Bucket(hash) => write!(f, "Bucket[{}]", hash),
            AttributeKey::Backpointer(offset) => write!(f, "Backpointer[{}]", offset),
        }
    }
}

/// How an attribute mutation is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    /// Set the value only if the attribute has none; otherwise a no-op
    SetIfAbsent,
    /// Unconditionally replace the value
    Replace,
    /// Replace the value only if the current value equals `expected`
    ReplaceIfEquals {
        /// Value the attribute must currently hold
        expected: Option<Offset>,
    },
}

/// A single conditional or unconditional attribute write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeMutation {
    /// Attribute to write
    pub key: AttributeKey,
    /// Application semantics
    pub kind: MutationKind,
    /// New value; `None` writes the "absent" sentinel
    pub value: Option<Offset>,
}

impl AttributeMutation {
    /// Set-if-absent mutation
    pub const fn set_if_absent(key: AttributeKey, value: Option<Offset>) -> Self {
        Self {
            key,
            kind: MutationKind::SetIfAbsent,
            value,
        }
    }

    /// Unconditional replace
    pub const fn replace(key: AttributeKey, value: Option<Offset>) -> Self {
        Self {
            key,
            kind: MutationKind::Replace,
            value,
        }
    }

    /// Compare-and-swap
    pub const fn replace_if_equals(
        key: AttributeKey,
        value: Option<Offset>,
        expected: Option<Offset>,
    ) -> Self {
        Self {
            key,
            kind: MutationKind::ReplaceIfEquals { expected },
            value,
        }
    }

    /// Physical value written by this mutation
    #[inline]
    pub const fn physical_value(&self) -> i64 {
        encode_optional(self.value)
    }

    /// Physical expected value, for conditional mutations
    #[inline]
    pub const fn physical_expected(&self) -> Option<i64> {
        match self.kind {
            MutationKind::ReplaceIfEquals { expected } => Some(encode_optional(expected)),
            _ => None,
        }
    }

    /// Check if this mutation writes the "absent" sentinel
    #[inline]
    pub const fn is_removal(&self) -> bool {
        self.value.is_none()
    }
}

impl fmt::Display for AttributeMutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self.value {
            Some(offset) => offset.to_string(),
            None => "null".to_string(),
        };
        match self.kind {
            MutationKind::SetIfAbsent => write!(f, "{} ?= {}", self.key, value),
            MutationKind::Replace => write!(f, "{} := {}", self.key, value),
            MutationKind::ReplaceIfEquals { expected } => match expected {
                Some(expected) => write!(f, "{} := {} if {}", self.key, value, expected),
                None => write!(f, "{} := {} if null", self.key, value),
            },
        }
    }
}
