//! Status codes and errors for table index operations
//!
//! `Status` is the coarse, copyable code every failure maps to. The typed
//! errors carry the details: `StoreError` and `ApplyError` come from the
//! external segment store, `IndexError` is what index operations return.

use std::fmt;
use std::io;

use crate::attribute::AttributeKey;
use crate::offset::Offset;

/// Status code for table index operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Status {
    /// Operation completed successfully
    #[default]
    Ok = 0,
    /// I/O error in the segment store
    IoError = 1,
    /// Index data corruption detected
    Corruption = 2,
    /// Invalid argument provided (caller contract violation)
    InvalidArgument = 3,
    /// A conditional attribute update did not match
    Conflict = 4,
    /// Segment store temporarily unavailable
    Unavailable = 5,
    /// Segment no longer accepts writes
    Sealed = 6,
}

impl Status {
    /// Check if the status indicates success
    #[inline]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }

    /// Check if the status indicates an error
    #[inline]
    pub const fn is_error(&self) -> bool {
        !self.is_ok()
    }

    /// Check if the failed operation may be retried.
    ///
    /// A `Conflict` is only retryable after the caller recomputes all bucket
    /// updates from fresh index state.
    #[inline]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Status::Conflict | Status::Unavailable | Status::IoError)
    }

    /// Get the status as a string
    pub const fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "Ok",
            Status::IoError => "IoError",
            Status::Corruption => "Corruption",
            Status::InvalidArgument => "InvalidArgument",
            Status::Conflict => "Conflict",
            Status::Unavailable => "Unavailable",
            Status::Sealed => "Sealed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Transport-level failure reported by a segment store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// I/O error while talking to the store
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// Store cannot serve the request right now
    #[error("segment store unavailable: {0}")]
    Unavailable(String),
    /// Segment is sealed and rejects appends and attribute updates
    #[error("segment {0} is sealed")]
    SegmentSealed(u64),
    /// Segment has no addressable offsets left
    #[error("segment {0} is full")]
    SegmentFull(u64),
    /// Store returned a value the index cannot interpret
    #[error("invalid value {value} for attribute {key}")]
    InvalidAttributeValue {
        /// Attribute that held the value
        key: AttributeKey,
        /// Raw value
        value: i64,
    },
}

impl StoreError {
    /// Map to a status code
    pub fn status(&self) -> Status {
        match self {
            StoreError::Io(_) => Status::IoError,
            StoreError::Unavailable(_) => Status::Unavailable,
            StoreError::SegmentSealed(_) | StoreError::SegmentFull(_) => Status::Sealed,
            StoreError::InvalidAttributeValue { .. } => Status::Corruption,
        }
    }
}

/// Failure applying a batch of attribute mutations
///
/// Whatever the variant, none of the batch's mutations were applied.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    /// A replace-if-equals mutation found an unexpected current value
    #[error("bad attribute update for {key}: expected {expected:?}, found {actual:?}")]
    Conflict {
        /// Attribute that failed the comparison
        key: AttributeKey,
        /// Value the mutation expected
        expected: Option<Offset>,
        /// Value the attribute actually held
        actual: Option<Offset>,
    },
    /// Transport failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Error returned by index operations
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Caller supplied inconsistent input; never retryable
    #[error("contract violation: {0}")]
    ContractViolation(String),
    /// The checkpoint has moved since the caller observed it.
    ///
    /// The entire set of bucket updates must be rebuilt before retrying.
    #[error("table index offset conflict: expected {expected}, found {actual:?}")]
    CheckpointConflict {
        /// Offset the batch was computed against
        expected: Offset,
        /// Offset the segment currently holds
        actual: Option<Offset>,
    },
    /// Index attributes describe an impossible structure
    #[error("index corruption: {0}")]
    Corruption(String),
    /// Locator, reader or applier failure, propagated unchanged
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IndexError {
    /// Map to a status code
    pub fn status(&self) -> Status {
        match self {
            IndexError::ContractViolation(_) => Status::InvalidArgument,
            IndexError::CheckpointConflict { .. } => Status::Conflict,
            IndexError::Corruption(_) => Status::Corruption,
            IndexError::Store(err) => err.status(),
        }
    }

    /// Check if this is a checkpoint conflict
    #[inline]
    pub fn is_checkpoint_conflict(&self) -> bool {
        matches!(self, IndexError::CheckpointConflict { .. })
    }

    pub(crate) fn contract(message: impl Into<String>) -> Self {
        IndexError::ContractViolation(message.into())
    }
}

impl From<ApplyError> for IndexError {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::Conflict {
                key: AttributeKey::TableIndexOffset,
                expected,
                actual,
            } => IndexError::CheckpointConflict {
                expected: expected.unwrap_or(Offset::ZERO),
                actual,
            },
            ApplyError::Conflict {
                key,
                expected,
                actual,
            } => IndexError::ContractViolation(format!(
                "unexpected conditional update on {key}: expected {expected:?}, found {actual:?}"
            )),
            ApplyError::Store(err) => IndexError::Store(err),
        }
    }
}
