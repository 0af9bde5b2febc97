//! Error types for the construction kernel.
//!
//! Expected placement failures are values the builders retry on. Defects
//! (bad rotations, out-of-range access) abort the task.

use thiserror::Error;
use uuid::Uuid;

use crate::block::{BlockId, BlockKind};
use crate::geometry::{Coord, Vec3i, Vec3z};
use crate::structure::CellState;

/// Bounds-checked grid access failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AccessError {
    #[error("coordinate {coord} lies outside the {dims} grid")]
    OutOfRange { coord: Vec3i, dims: Vec3z },
}

/// `Structure::commit` refused an intent. Nothing was mutated.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommitError {
    /// Another block got there first.
    #[error("cell {coord} is already {state}")]
    Conflict { coord: Vec3i, state: CellState },

    #[error(transparent)]
    OutOfRange(#[from] AccessError),

    #[error("intent cannot be committed: {0}")]
    InvalidIntent(String),
}

impl CommitError {
    /// Conflicts are races between agents and can be retried; everything else
    /// means the intent itself is impossible.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CommitError::Conflict { .. })
    }
}

/// Recoverable reasons a placement intent was rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlacementFailure {
    #[error("site {site} is not relative to the virtual origin")]
    Frame { site: Coord },

    #[error("cell {site} already has block {block}")]
    Occupied { site: Vec3i, block: BlockId },

    #[error("cell {site} is already in the extent of block {block}")]
    InBlockExtent { site: Vec3i, block: BlockId },

    #[error("cell {site} has no spec")]
    NoSpec { site: Vec3i },

    #[error("footprint cell {at} lies outside the grid")]
    FootprintOutOfRange { at: Vec3i },

    #[error("footprint cell {at} is not empty")]
    FootprintOccupied { at: Vec3i },

    #[error("footprint cell {at} does not match its spec: {reason}")]
    FootprintMismatch { at: Vec3i, reason: String },
}

/// Placement requests that can never succeed; they point at a bug upstream.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlacementDefect {
    #[error("bad rotation {radians} rad for {block} block: must be a multiple of pi/2")]
    BadRotation { radians: f64, block: BlockKind },

    #[error(transparent)]
    OutOfRange(#[from] AccessError),
}

/// Why a builder task ended without placing its block.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TaskFailure {
    #[error("placement failed {attempts} times, last reason: {last_reason}")]
    RetriesExhausted { attempts: u32, last_reason: String },

    #[error("fatal placement defect: {0}")]
    Fatal(#[from] PlacementDefect),

    #[error("commit failed: {0}")]
    Commit(CommitError),

    #[error("directive targets structure {expected}, this is {actual}")]
    WrongStructure { expected: Uuid, actual: Uuid },

    #[error("task aborted")]
    Aborted,
}

impl TaskFailure {
    /// Stable short name for tallying failures.
    pub fn kind(&self) -> &'static str {
        match self {
            TaskFailure::RetriesExhausted { .. } => "retries_exhausted",
            TaskFailure::Fatal(_) => "fatal",
            TaskFailure::Commit(_) => "commit",
            TaskFailure::WrongStructure { .. } => "wrong_structure",
            TaskFailure::Aborted => "aborted",
        }
    }
}

/// Unusable configuration or target geometry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("virtual shell must be at least 1 cell thick, got {0}")]
    ShellTooThin(usize),

    #[error("structure dimensions must be non-zero, got {0}")]
    EmptyDims(Vec3z),

    #[error("unit dimension must be positive, got {0}")]
    BadUnitDim(f64),

    #[error("target cell {at} lies outside the structure")]
    TargetOutOfBounds { at: Vec3i },

    #[error("target cell {at} is covered by more than one block")]
    TargetOverlap { at: Vec3i },

    #[error("lane allocator needs at least one lane")]
    NoLanes,
}

