//! Block kinds and their footprints.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::{Rotation, Vec3i};

/// Unique identifier for a placed block.
pub type BlockId = Uuid;

/// The shapes of block the structure can be built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// 1x1x1.
    Cube,
    /// 2x1x1; the anchor is the low end of the slope.
    Ramp,
}

impl BlockKind {
    pub fn name(self) -> &'static str {
        match self {
            BlockKind::Cube => "cube",
            BlockKind::Ramp => "ramp",
        }
    }

    /// Whether the footprint changes with rotation.
    pub fn is_orientation_dependent(self) -> bool {
        matches!(self, BlockKind::Ramp)
    }

    /// Cells occupied by a block anchored at `anchor`, anchor first.
    ///
    /// Ramps extend along +X at 0°/180° and along +Y at 90°/270°.
    pub fn footprint(self, anchor: Vec3i, rotation: Rotation) -> Vec<Vec3i> {
        match self {
            BlockKind::Cube => vec![anchor],
            BlockKind::Ramp => {
                let step = if rotation.is_x_aligned() {
                    Vec3i::new(1, 0, 0)
                } else {
                    Vec3i::new(0, 1, 0)
                };
                vec![anchor, anchor + step]
            }
        }
    }

    /// Cells covered beyond the anchor.
    pub fn extent(self, anchor: Vec3i, rotation: Rotation) -> Vec<Vec3i> {
        self.footprint(anchor, rotation).into_iter().skip(1).collect()
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A block that has been committed to the structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedBlock {
    pub id: BlockId,
    pub kind: BlockKind,
    pub rotation: Rotation,
    /// Anchor cell, virtual frame.
    pub anchor: Vec3i,
    /// Extent cells, virtual frame.
    pub extent: Vec<Vec3i>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_has_no_extent() {
        let anchor = Vec3i::new(2, 3, 0);
        for rot in Rotation::ALL {
            assert_eq!(BlockKind::Cube.footprint(anchor, rot), vec![anchor]);
            assert!(BlockKind::Cube.extent(anchor, rot).is_empty());
        }
    }

    #[test]
    fn test_ramp_footprint_follows_rotation_axis() {
        let anchor = Vec3i::new(2, 3, 0);
        assert_eq!(
            BlockKind::Ramp.extent(anchor, Rotation::Zero),
            vec![Vec3i::new(3, 3, 0)]
        );
        assert_eq!(
            BlockKind::Ramp.extent(anchor, Rotation::Half),
            vec![Vec3i::new(3, 3, 0)]
        );
        assert_eq!(
            BlockKind::Ramp.extent(anchor, Rotation::Quarter),
            vec![Vec3i::new(2, 4, 0)]
        );
    }
}
