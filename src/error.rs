//! Error types for LiveRows.
//!
//! Range errors are returned to the caller and leave the structure untouched.
//! Broken invariants are reported by the `check_consistency`/`verify` oracles as
//! a [`ConsistencyError`]; the view engine turns those into a panic when checking
//! is enabled, since there is no way to recover a corrupted index.

use std::fmt;
use thiserror::Error;

/// Result type for dual index map operations
pub type DualIndexMapResult<T> = Result<T, DualIndexMapError>;

/// Result type for view engine operations
pub type ViewResult<T> = Result<T, ViewError>;

/// One of the two index spaces of an `OrderedDualIndexMap`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => write!(f, "left"),
            Side::Right => write!(f, "right"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DualIndexMapError {
    /// Index exceeds the current bounds of its side
    #[error("{side} index {index} out of range [0, {len}]")]
    OutOfRange { side: Side, index: usize, len: usize },

    /// The supplied left/right pair does not correspond
    #[error("left index {left:?} and right index {right:?} do not correspond")]
    NotCorresponding {
        left: Option<usize>,
        right: Option<usize>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViewError {
    #[error("record index {index} out of range [0, {len})")]
    RecordIndexOutOfRange { index: usize, len: usize },

    #[error("row index {index} out of range [0, {len})")]
    RowIndexOutOfRange { index: usize, len: usize },

    #[error("field index {index} out of range [0, {len})")]
    FieldIndexOutOfRange { index: usize, len: usize },
}

/// A cross reference that the consistency oracle found broken
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsistencyError {
    // ==================
    // Dual index map
    // ==================
    #[error("{side} arrays have different lengths ({refs} refs, {cross} cross refs)")]
    LengthMismatch { side: Side, refs: usize, cross: usize },

    #[error("{side} ref {value} at {index} is out of the ref space")]
    RefOutOfSpace { side: Side, index: usize, value: i32 },

    #[error("{side} refs are not strictly increasing at {index}")]
    RefOrder { side: Side, index: usize },

    #[error("{side} entry {index} is half paired")]
    HalfPaired { side: Side, index: usize },

    #[error("{side} entry {index} has no counterpart carrying its ref")]
    Unpaired { side: Side, index: usize },

    #[error("left has {left} paired entries but right has {right}")]
    PairCountMismatch { left: usize, right: usize },

    // ==================
    // Record/row binding
    // ==================
    #[error("row at position {position} has index {index}")]
    RowIndexMismatch { position: usize, index: usize },

    #[error("row {row} refers to record {record} which is out of range")]
    RowRecordOutOfRange { row: usize, record: usize },

    #[error("row {row} refers to record {record} but the record is bound to {bound:?}")]
    RecordBackReference {
        row: usize,
        record: usize,
        bound: Option<usize>,
    },

    #[error("{bound} records are bound but there are {rows} rows")]
    BoundCountMismatch { bound: usize, rows: usize },

    #[error("rows {row} and {next} are out of sort order")]
    Unsorted { row: usize, next: usize },

    // ==================
    // Recent changes
    // ==================
    #[error("queued change {id} refers to row {row} which does not hold it")]
    OrphanedChange { id: u64, row: usize },

    #[error("row {row} holds change {id} which is not queued")]
    UnqueuedChange { id: u64, row: usize },

    #[error("expiry queue is out of order at {position}")]
    QueueOrder { position: usize },

    #[error("expiry timer is not scheduled for the earliest expiry {expected:?} (scheduled {scheduled:?})")]
    TimerMismatch {
        expected: Option<u64>,
        scheduled: Option<u64>,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse view config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid view config: {0}")]
    Invalid(String),
}
