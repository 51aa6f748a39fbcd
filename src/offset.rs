//! Offset types for table segments
//!
//! This module provides the `Offset` type used to identify the position of a
//! table entry inside an append-only segment log, and the sentinel encoding
//! used when an optional offset is written to segment attributes.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Sub};

/// Physical attribute value meaning "no value".
///
/// Never produced by encoding a valid `Offset`, so it is safe to use as the
/// marker for absent bucket heads, removed backpointers and the like.
pub const NULL_ATTRIBUTE_VALUE: i64 = i64::MIN;

/// A position in a table segment's append-only log.
///
/// Offsets are unique per mutation record and grow as the log grows.
/// Valid offsets are in `0..=i64::MAX`, which keeps every offset representable
/// as a physical attribute value.
#[repr(transparent)]
#[derive(Clone, Copy, Default, Hash)]
pub struct Offset(u64);

impl Offset {
    /// The first offset of a segment
    pub const ZERO: Self = Self(0);

    /// Largest valid offset
    pub const MAX: Self = Self(i64::MAX as u64);

    /// Create a new offset.
    ///
    /// Returns `None` if the value cannot be encoded as an attribute value.
    #[inline]
    pub const fn new(value: u64) -> Option<Self> {
        if value > Self::MAX.0 {
            None
        } else {
            Some(Self(value))
        }
    }

    /// Create an offset from a value already known to be in range.
    ///
    /// Values above `Offset::MAX` are clamped.
    #[inline]
    pub const fn from_u64_saturating(value: u64) -> Self {
        if value > Self::MAX.0 {
            Self::MAX
        } else {
            Self(value)
        }
    }

    /// Get the raw offset value
    #[inline]
    pub const fn get(&self) -> u64 {
        self.0
    }

    /// Encode this offset as a physical attribute value
    #[inline]
    pub const fn to_attribute_value(self) -> i64 {
        self.0 as i64
    }

    /// Decode a physical attribute value.
    ///
    /// The sentinel and any negative value decode to `None`.
    #[inline]
    pub const fn from_attribute_value(value: i64) -> Option<Self> {
        if value < 0 {
            None
        } else {
            Some(Self(value as u64))
        }
    }
}

/// Encode an optional offset, mapping `None` to `NULL_ATTRIBUTE_VALUE`
#[inline]
pub const fn encode_optional(offset: Option<Offset>) -> i64 {
    match offset {
        Some(offset) => offset.to_attribute_value(),
        None => NULL_ATTRIBUTE_VALUE,
    }
}

/// Decode a physical attribute value into an optional offset
#[inline]
pub const fn decode_optional(value: i64) -> Option<Offset> {
    Offset::from_attribute_value(value)
}

impl fmt::Debug for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Offset({})", self.0)
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialEq for Offset {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Offset {}

impl PartialOrd for Offset {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Offset {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl Add<u64> for Offset {
    type Output = Self;

    #[inline]
    fn add(self, delta: u64) -> Self::Output {
        debug_assert!(self.0.checked_add(delta).is_some_and(|v| v <= Self::MAX.0));
        Self(self.0 + delta)
    }
}

impl Sub for Offset {
    type Output = u64;

    #[inline]
    fn sub(self, other: Self) -> Self::Output {
        self.0 - other.0
    }
}

impl From<u32> for Offset {
    #[inline]
    fn from(value: u32) -> Self {
        Self(value as u64)
    }
}

impl From<Offset> for u64 {
    #[inline]
    fn from(offset: Offset) -> Self {
        offset.0
    }
}
