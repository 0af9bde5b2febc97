//! Per-cell build state and expected contents.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::block::{BlockId, BlockKind};
use crate::geometry::{Rotation, Vec3i};

/// Build state of one grid cell.
///
/// Cells only ever leave `Empty`; construction is monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellState {
    Empty,
    /// Anchor cell of the block.
    HasBlock(BlockId),
    /// Covered by a block anchored in another cell.
    BlockExtent(BlockId),
}

impl CellState {
    pub fn name(&self) -> &'static str {
        match self {
            CellState::Empty => "empty",
            CellState::HasBlock(_) => "has_block",
            CellState::BlockExtent(_) => "block_extent",
        }
    }
}

impl fmt::Display for CellState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellState::Empty => f.write_str("empty"),
            CellState::HasBlock(id) => write!(f, "has_block({})", id),
            CellState::BlockExtent(id) => write!(f, "block_extent({})", id),
        }
    }
}

/// One voxel of the structure grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    loc: Vec3i,
    state: CellState,
}

impl Cell {
    pub(crate) fn new(loc: Vec3i) -> Self {
        Self {
            loc,
            state: CellState::Empty,
        }
    }

    /// Location in the virtual frame.
    pub fn loc(&self) -> Vec3i {
        self.loc
    }

    pub fn state(&self) -> CellState {
        self.state
    }

    pub fn is_empty(&self) -> bool {
        self.state == CellState::Empty
    }

    pub fn state_has_block(&self) -> bool {
        matches!(self.state, CellState::HasBlock(_))
    }

    pub fn state_in_block_extent(&self) -> bool {
        matches!(self.state, CellState::BlockExtent(_))
    }

    /// The block occupying this cell, anchor or extent.
    pub fn block(&self) -> Option<BlockId> {
        match self.state {
            CellState::Empty => None,
            CellState::HasBlock(id) | CellState::BlockExtent(id) => Some(id),
        }
    }

    /// Leave `Empty`. Returns the current state if the cell was already built.
    pub(crate) fn transition(&mut self, next: CellState) -> Result<(), CellState> {
        if self.state != CellState::Empty || next == CellState::Empty {
            return Err(self.state);
        }
        self.state = next;
        Ok(())
    }
}

/// Whether a spec'd cell should hold a block's anchor or part of its extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecState {
    Anchor,
    Extent,
}

/// What the finished structure is expected to contain at one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellSpec {
    pub state: SpecState,
    pub kind: BlockKind,
    pub rotation: Rotation,
}

impl CellSpec {
    pub fn anchor(kind: BlockKind, rotation: Rotation) -> Self {
        Self {
            state: SpecState::Anchor,
            kind,
            rotation,
        }
    }

    pub fn extent(kind: BlockKind, rotation: Rotation) -> Self {
        Self {
            state: SpecState::Extent,
            kind,
            rotation,
        }
    }

    pub fn is_anchor(&self) -> bool {
        self.state == SpecState::Anchor
    }
}
