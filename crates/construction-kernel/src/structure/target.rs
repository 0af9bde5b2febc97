//! Target geometry: the blocks the finished structure should contain.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::block::BlockKind;
use crate::error::ConfigError;
use crate::geometry::{Rotation, Vec3i, Vec3z};

use super::cell::CellSpec;

/// One block of the target, anchored in the real frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetBlock {
    pub anchor: Vec3i,
    pub kind: BlockKind,
    pub rotation: Rotation,
}

/// The full set of blocks to build.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructureTarget {
    pub blocks: Vec<TargetBlock>,
}

impl StructureTarget {
    pub fn new(blocks: Vec<TargetBlock>) -> Self {
        Self { blocks }
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read target {}", path.display()))?;
        serde_json::from_str(&json).context("Invalid structure target")
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Expand blocks into per-cell specs keyed by real coordinate.
    ///
    /// Every footprint cell must lie within `dims` and belong to exactly one block.
    pub fn cell_specs(&self, dims: Vec3z) -> Result<BTreeMap<Vec3i, CellSpec>, ConfigError> {
        let bounds = dims.to_signed();
        let in_bounds = |c: Vec3i| {
            (0..bounds.x).contains(&c.x)
                && (0..bounds.y).contains(&c.y)
                && (0..bounds.z).contains(&c.z)
        };

        let mut specs = BTreeMap::new();
        for block in &self.blocks {
            for (i, cell) in block
                .kind
                .footprint(block.anchor, block.rotation)
                .into_iter()
                .enumerate()
            {
                if !in_bounds(cell) {
                    return Err(ConfigError::TargetOutOfBounds { at: cell });
                }
                let spec = if i == 0 {
                    CellSpec::anchor(block.kind, block.rotation)
                } else {
                    CellSpec::extent(block.kind, block.rotation)
                };
                if specs.insert(cell, spec).is_some() {
                    return Err(ConfigError::TargetOverlap { at: cell });
                }
            }
        }
        Ok(specs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::cell::SpecState;

    #[test]
    fn test_ramp_expands_to_anchor_and_extent() {
        let target = StructureTarget::new(vec![TargetBlock {
            anchor: Vec3i::new(0, 0, 0),
            kind: BlockKind::Ramp,
            rotation: Rotation::Zero,
        }]);
        let specs = target.cell_specs(Vec3z::new(2, 1, 1)).unwrap();

        assert_eq!(specs.len(), 2);
        assert_eq!(specs[&Vec3i::new(0, 0, 0)].state, SpecState::Anchor);
        assert_eq!(specs[&Vec3i::new(1, 0, 0)].state, SpecState::Extent);
    }

    #[test]
    fn test_rejects_out_of_bounds_extent() {
        let target = StructureTarget::new(vec![TargetBlock {
            anchor: Vec3i::new(1, 0, 0),
            kind: BlockKind::Ramp,
            rotation: Rotation::Zero,
        }]);
        assert_eq!(
            target.cell_specs(Vec3z::new(2, 1, 1)),
            Err(ConfigError::TargetOutOfBounds {
                at: Vec3i::new(2, 0, 0)
            })
        );
    }

    #[test]
    fn test_rejects_overlap() {
        let target = StructureTarget::new(vec![
            TargetBlock {
                anchor: Vec3i::new(0, 0, 0),
                kind: BlockKind::Ramp,
                rotation: Rotation::Zero,
            },
            TargetBlock {
                anchor: Vec3i::new(1, 0, 0),
                kind: BlockKind::Cube,
                rotation: Rotation::Zero,
            },
        ]);
        assert_eq!(
            target.cell_specs(Vec3z::new(3, 1, 1)),
            Err(ConfigError::TargetOverlap {
                at: Vec3i::new(1, 0, 0)
            })
        );
    }
}
