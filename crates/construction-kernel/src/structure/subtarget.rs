//! Subtargets: one lane's share of the structure.

use serde::Serialize;

use crate::lane::LaneId;

/// Width of a subtarget strip in cells: one ingress column and one egress column.
pub const SUBTARGET_WIDTH: usize = 2;

/// A strip of the structure served by one lane.
///
/// Holds grid indices of its spec'd cells; the cells themselves belong to
/// the structure.
#[derive(Debug, Clone)]
pub struct Subtarget {
    id: usize,
    name: String,
    lane: LaneId,
    /// Grid indices of spec'd cells in this strip, sorted
    cells: Vec<usize>,
    built: usize,
}

/// Per-subtarget progress for observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubtargetProgress {
    pub id: usize,
    pub name: String,
    pub lane: LaneId,
    pub built_cells: usize,
    pub total_cells: usize,
}

impl Subtarget {
    pub(crate) fn new(id: usize, mut cells: Vec<usize>) -> Self {
        cells.sort_unstable();
        Self {
            id,
            name: format!("subtarget{}", id),
            lane: LaneId(id),
            cells,
            built: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The lane whose corridor runs through this strip.
    pub fn lane(&self) -> LaneId {
        self.lane
    }

    pub fn cells(&self) -> &[usize] {
        &self.cells
    }

    pub fn contains(&self, index: usize) -> bool {
        self.cells.binary_search(&index).is_ok()
    }

    pub fn total_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn built_cells(&self) -> usize {
        self.built
    }

    pub fn is_complete(&self) -> bool {
        self.built >= self.cells.len()
    }

    pub(crate) fn record_built(&mut self, index: usize) {
        if self.contains(index) {
            self.built += 1;
        }
    }

    pub fn progress(&self) -> SubtargetProgress {
        SubtargetProgress {
            id: self.id,
            name: self.name.clone(),
            lane: self.lane,
            built_cells: self.built,
            total_cells: self.cells.len(),
        }
    }
}
