//! The structure model: the authoritative record of what has been built.
//!
//! The grid is addressed in the virtual frame, which pads the real structure
//! with an empty shell in X and Y. Cell specs are keyed by real coordinate.
//! `commit` is the only mutator and is all-or-nothing per intent.

mod cell;
mod static_builder;
mod subtarget;
mod target;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::block::{BlockId, BlockKind, PlacedBlock};
use crate::config::StructureConfig;
use crate::error::{AccessError, CommitError, ConfigError};
use crate::geometry::{Coord, Frame, Rotation, Vec3d, Vec3i, Vec3z};
use crate::validate::PlacementIntent;

pub use cell::{Cell, CellSpec, CellState, SpecState};
pub use static_builder::StaticBuilder;
pub use subtarget::{SUBTARGET_WIDTH, Subtarget, SubtargetProgress};
pub use target::{StructureTarget, TargetBlock};

/// Unique identifier for a structure.
pub type StructureId = Uuid;

/// Structure state shared between all builders.
///
/// Builders validate under a read lock and commit under a write lock, so
/// `commit` re-checks occupancy itself.
pub type SharedStructure = Arc<RwLock<Structure>>;

/// Read access to a shared structure.
///
/// Commits are all-or-nothing, so a poisoned lock still guards a consistent grid.
pub fn read_structure(structure: &SharedStructure) -> RwLockReadGuard<'_, Structure> {
    structure.read().unwrap_or_else(PoisonError::into_inner)
}

/// Write access to a shared structure.
pub fn write_structure(structure: &SharedStructure) -> RwLockWriteGuard<'_, Structure> {
    structure.write().unwrap_or_else(PoisonError::into_inner)
}

/// Build progress for observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub structure_id: StructureId,
    pub built_cells: usize,
    pub total_cells: usize,
    pub blocks_placed: usize,
    pub subtargets: Vec<SubtargetProgress>,
}

impl ProgressSnapshot {
    /// Fraction of buildable cells built (1.0 for an empty target).
    pub fn fraction(&self) -> f64 {
        if self.total_cells == 0 {
            1.0
        } else {
            self.built_cells as f64 / self.total_cells as f64
        }
    }
}

/// A 3D block structure under construction.
#[derive(Debug, Clone)]
pub struct Structure {
    id: StructureId,
    /// Real (buildable) dimensions
    rdims: Vec3z,
    /// Padded grid dimensions
    vdims: Vec3z,
    shell: usize,
    unit_dim: f64,
    /// World position of the center of virtual cell (0, 0, 0)
    origin: Vec3d,
    cells: Vec<Cell>,
    /// Expected contents, real frame
    specs: BTreeMap<Vec3i, CellSpec>,
    blocks: HashMap<BlockId, PlacedBlock>,
    placement_order: Vec<BlockId>,
    subtargets: Vec<Subtarget>,
    built_cells: usize,
}

impl Structure {
    /// Create an empty structure that should end up matching `target`.
    pub fn new(config: &StructureConfig, target: &StructureTarget) -> Result<Self, ConfigError> {
        config.validate()?;
        let specs = target.cell_specs(config.dims)?;
        let vdims = config.virtual_dims();

        let mut cells = Vec::with_capacity(vdims.volume());
        for z in 0..vdims.z {
            for y in 0..vdims.y {
                for x in 0..vdims.x {
                    cells.push(Cell::new(Vec3i::new(x as i64, y as i64, z as i64)));
                }
            }
        }

        let mut structure = Self {
            id: Uuid::new_v4(),
            rdims: config.dims,
            vdims,
            shell: config.shell,
            unit_dim: config.unit_dim,
            origin: config.origin,
            cells,
            specs,
            blocks: HashMap::new(),
            placement_order: Vec::new(),
            subtargets: Vec::new(),
            built_cells: 0,
        };

        let mut strips = vec![Vec::new(); config.dims.x.div_ceil(SUBTARGET_WIDTH)];
        for real in structure.specs.keys() {
            let index = structure
                .index_of(structure.real_to_virtual(*real))
                .map_err(|_| ConfigError::TargetOutOfBounds { at: *real })?;
            strips[real.x as usize / SUBTARGET_WIDTH].push(index);
        }
        structure.subtargets = strips
            .into_iter()
            .enumerate()
            .map(|(id, cells)| Subtarget::new(id, cells))
            .collect();

        debug!(
            structure_id = %structure.id,
            dims = %structure.rdims,
            shell = structure.shell,
            specs = structure.specs.len(),
            subtargets = structure.subtargets.len(),
            "Structure created"
        );

        Ok(structure)
    }

    /// Replace the generated identifier (block ids derive from it).
    pub fn with_id(mut self, id: StructureId) -> Self {
        self.id = id;
        self
    }

    pub fn id(&self) -> StructureId {
        self.id
    }

    pub fn real_dims(&self) -> Vec3z {
        self.rdims
    }

    pub fn virtual_dims(&self) -> Vec3z {
        self.vdims
    }

    pub fn shell(&self) -> usize {
        self.shell
    }

    pub fn unit_dim(&self) -> f64 {
        self.unit_dim
    }

    fn shell_offset(&self) -> Vec3i {
        let s = self.shell as i64;
        Vec3i::new(s, s, 0)
    }

    fn real_to_virtual(&self, real: Vec3i) -> Vec3i {
        real + self.shell_offset()
    }

    /// Express a coordinate relative to the real origin.
    pub fn to_real(&self, coord: Coord) -> Coord {
        match coord.frame {
            Frame::Real => coord,
            Frame::Virtual => Coord {
                offset: coord.offset - self.shell_offset(),
                frame: Frame::Real,
            },
        }
    }

    /// Express a coordinate relative to the virtual origin.
    pub fn to_virtual(&self, coord: Coord) -> Coord {
        match coord.frame {
            Frame::Virtual => coord,
            Frame::Real => Coord {
                offset: self.real_to_virtual(coord.offset),
                frame: Frame::Virtual,
            },
        }
    }

    /// Flat grid index of a virtual coordinate.
    pub fn index_of(&self, vcoord: Vec3i) -> Result<usize, AccessError> {
        let d = self.vdims;
        let inside = |v: i64, bound: usize| v >= 0 && (v as usize) < bound;
        if !(inside(vcoord.x, d.x) && inside(vcoord.y, d.y) && inside(vcoord.z, d.z)) {
            return Err(AccessError::OutOfRange {
                coord: vcoord,
                dims: d,
            });
        }
        Ok((vcoord.z as usize * d.y + vcoord.y as usize) * d.x + vcoord.x as usize)
    }

    /// Bounds-checked access to a cell by virtual coordinate.
    pub fn access(&self, vcoord: Vec3i) -> Result<&Cell, AccessError> {
        let index = self.index_of(vcoord)?;
        Ok(&self.cells[index])
    }

    /// Expected contents at a real coordinate, if the cell is buildable.
    pub fn cell_spec(&self, rcoord: Vec3i) -> Option<&CellSpec> {
        self.specs.get(&rcoord)
    }

    /// Anchor specs in deterministic order, as real coordinates.
    pub fn anchor_specs(&self) -> impl Iterator<Item = (Coord, &CellSpec)> {
        self.specs
            .iter()
            .filter(|(_, spec)| spec.is_anchor())
            .map(|(real, spec)| (Coord::real_at(real.x, real.y, real.z), spec))
    }

    /// Whether the cell at `coord` (either frame) is still empty.
    pub fn is_empty_at(&self, coord: Coord) -> bool {
        self.access(self.to_virtual(coord).offset)
            .is_ok_and(|cell| cell.is_empty())
    }

    /// Commit an intent the validator already accepted.
    ///
    /// Marks the anchor `HasBlock` and the extent `BlockExtent`, or fails
    /// without touching any cell if one of them is no longer empty.
    pub fn commit(&mut self, intent: &PlacementIntent) -> Result<PlacedBlock, CommitError> {
        if intent.site.frame != Frame::Virtual {
            return Err(CommitError::InvalidIntent(format!(
                "site {} is not relative to the virtual origin",
                intent.site
            )));
        }
        let rotation = Rotation::from_radians(intent.z_rot).ok_or_else(|| {
            CommitError::InvalidIntent(format!("rotation {} rad is not a right angle", intent.z_rot))
        })?;

        let footprint = intent.block.footprint(intent.site.offset, rotation);
        let mut indices = Vec::with_capacity(footprint.len());
        for &coord in &footprint {
            let index = self.index_of(coord)?;
            let cell = &self.cells[index];
            if !cell.is_empty() {
                return Err(CommitError::Conflict {
                    coord,
                    state: cell.state(),
                });
            }
            indices.push(index);
        }

        let anchor = intent.site.offset;
        let id = Uuid::new_v5(&self.id, format!("block:{}", anchor).as_bytes());
        for (i, &index) in indices.iter().enumerate() {
            let next = if i == 0 {
                CellState::HasBlock(id)
            } else {
                CellState::BlockExtent(id)
            };
            let transitioned = self.cells[index].transition(next);
            debug_assert!(transitioned.is_ok(), "footprint cells were checked empty");
        }

        for (&coord, &index) in footprint.iter().zip(&indices) {
            let real = coord - self.shell_offset();
            if self.specs.contains_key(&real) {
                self.built_cells += 1;
                if let Some(st) = self.subtargets.get_mut(real.x as usize / SUBTARGET_WIDTH) {
                    st.record_built(index);
                }
            }
        }

        let block = PlacedBlock {
            id,
            kind: intent.block,
            rotation,
            anchor,
            extent: footprint[1..].to_vec(),
        };
        self.blocks.insert(id, block.clone());
        self.placement_order.push(id);

        info!(
            block = %id,
            kind = %intent.block,
            site = %intent.site,
            rotation = %rotation,
            built = self.built_cells,
            total = self.specs.len(),
            "Block committed"
        );

        Ok(block)
    }

    pub fn block(&self, id: &BlockId) -> Option<&PlacedBlock> {
        self.blocks.get(id)
    }

    /// Placed blocks in commit order.
    pub fn blocks(&self) -> impl Iterator<Item = &PlacedBlock> {
        self.placement_order.iter().filter_map(|id| self.blocks.get(id))
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn subtargets(&self) -> &[Subtarget] {
        &self.subtargets
    }

    pub fn built_cells(&self) -> usize {
        self.built_cells
    }

    pub fn total_cells(&self) -> usize {
        self.specs.len()
    }

    pub fn is_complete(&self) -> bool {
        self.built_cells >= self.specs.len()
    }

    pub fn progress(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            structure_id: self.id,
            built_cells: self.built_cells,
            total_cells: self.specs.len(),
            blocks_placed: self.blocks.len(),
            subtargets: self.subtargets.iter().map(Subtarget::progress).collect(),
        }
    }

    /// World position of the center of a virtual cell.
    pub fn cell_center(&self, vcoord: Vec3i) -> Vec3d {
        self.origin
            + Vec3d::new(vcoord.x as f64, vcoord.y as f64, vcoord.z as f64) * self.unit_dim
    }

    /// Virtual cell containing a world position.
    pub fn world_to_virtual(&self, pos: Vec3d) -> Vec3i {
        let rel = (pos - self.origin) * (1.0 / self.unit_dim);
        Vec3i::new(
            rel.x.round() as i64,
            rel.y.round() as i64,
            rel.z.round() as i64,
        )
    }

    /// Whether a world position lies over the real structure's XY footprint.
    pub fn contains_world(&self, pos: Vec3d) -> bool {
        let rel = (pos - self.origin) * (1.0 / self.unit_dim);
        let lo = self.shell as f64 - 0.5;
        rel.x >= lo
            && rel.x < lo + self.rdims.x as f64
            && rel.y >= lo
            && rel.y < lo + self.rdims.y as f64
    }
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Structure {} {} ({}/{} cells built)",
            self.id,
            self.rdims,
            self.built_cells,
            self.specs.len()
        )?;
        for z in 0..self.rdims.z as i64 {
            writeln!(f, "  Layer {}:", z)?;
            for y in (0..self.rdims.y as i64).rev() {
                write!(f, "    ")?;
                for x in 0..self.rdims.x as i64 {
                    let real = Vec3i::new(x, y, z);
                    let built = self
                        .access(self.real_to_virtual(real))
                        .is_ok_and(|cell| !cell.is_empty());
                    let glyph = match self.specs.get(&real).map(|spec| (spec.state, spec.kind)) {
                        None => '.',
                        Some((SpecState::Anchor, BlockKind::Cube)) if built => 'C',
                        Some((SpecState::Anchor, BlockKind::Cube)) => 'c',
                        Some((SpecState::Anchor, BlockKind::Ramp)) if built => 'R',
                        Some((SpecState::Anchor, BlockKind::Ramp)) => 'r',
                        Some((SpecState::Extent, _)) if built => '=',
                        Some((SpecState::Extent, _)) => '-',
                    };
                    write!(f, "{}", glyph)?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(x: usize, y: usize, z: usize) -> StructureConfig {
        StructureConfig {
            dims: Vec3z::new(x, y, z),
            shell: 1,
            unit_dim: 1.0,
            origin: Vec3d::default(),
        }
    }

    fn cube(x: i64, y: i64) -> TargetBlock {
        TargetBlock {
            anchor: Vec3i::new(x, y, 0),
            kind: BlockKind::Cube,
            rotation: Rotation::Zero,
        }
    }

    fn intent_at(structure: &Structure, real: Coord, block: BlockKind, z_rot: f64) -> PlacementIntent {
        PlacementIntent {
            block,
            site: structure.to_virtual(real),
            z_rot,
        }
    }

    #[test]
    fn test_frames_round_trip_through_shell() {
        let structure = Structure::new(&config(4, 4, 1), &StructureTarget::default()).unwrap();
        let real = Coord::real_at(0, 0, 0);
        let virt = structure.to_virtual(real);

        assert_eq!(virt, Coord::virtual_at(1, 1, 0));
        assert_eq!(structure.to_real(virt), real);
        assert_eq!(structure.virtual_dims(), Vec3z::new(6, 6, 1));
    }

    #[test]
    fn test_access_out_of_range() {
        let structure = Structure::new(&config(4, 4, 1), &StructureTarget::default()).unwrap();
        assert!(structure.access(Vec3i::new(5, 5, 0)).is_ok());
        assert_eq!(
            structure.access(Vec3i::new(6, 0, 0)),
            Err(AccessError::OutOfRange {
                coord: Vec3i::new(6, 0, 0),
                dims: Vec3z::new(6, 6, 1)
            })
        );
        assert!(structure.access(Vec3i::new(-1, 0, 0)).is_err());
    }

    #[test]
    fn test_commit_marks_footprint_and_progress() {
        let target = StructureTarget::new(vec![
            cube(3, 0),
            TargetBlock {
                anchor: Vec3i::new(0, 0, 0),
                kind: BlockKind::Ramp,
                rotation: Rotation::Zero,
            },
        ]);
        let mut structure = Structure::new(&config(4, 2, 1), &target).unwrap();
        assert_eq!(structure.total_cells(), 3);

        let intent = intent_at(&structure, Coord::real_at(0, 0, 0), BlockKind::Ramp, 0.0);
        let id = structure.commit(&intent).unwrap().id;

        let anchor = structure.access(Vec3i::new(1, 1, 0)).unwrap();
        let extent = structure.access(Vec3i::new(2, 1, 0)).unwrap();
        assert_eq!(anchor.state(), CellState::HasBlock(id));
        assert_eq!(extent.state(), CellState::BlockExtent(id));

        let progress = structure.progress();
        assert_eq!(progress.built_cells, 2);
        assert_eq!(progress.blocks_placed, 1);
        assert_eq!(progress.subtargets[0].built_cells, 2);
        assert_eq!(progress.subtargets[1].built_cells, 0);
        assert!(!structure.is_complete());
    }

    #[test]
    fn test_second_commit_conflicts_without_mutation() {
        let mut structure =
            Structure::new(&config(10, 10, 1), &StructureTarget::new(vec![cube(5, 5)])).unwrap();
        let intent = intent_at(&structure, Coord::real_at(5, 5, 0), BlockKind::Cube, 0.0);

        let first = structure.commit(&intent).unwrap().id;
        let second = structure.commit(&intent);

        assert!(matches!(
            second,
            Err(CommitError::Conflict { state: CellState::HasBlock(id), .. }) if id == first
        ));
        assert_eq!(structure.block_count(), 1);
        assert_eq!(structure.built_cells(), 1);
        assert!(structure.is_complete());
    }

    #[test]
    fn test_conflict_on_extent_leaves_anchor_empty() {
        let target = StructureTarget::new(vec![cube(1, 0)]);
        let mut structure = Structure::new(&config(3, 1, 1), &target).unwrap();
        let cube_intent = intent_at(&structure, Coord::real_at(1, 0, 0), BlockKind::Cube, 0.0);
        structure.commit(&cube_intent).unwrap();

        // A ramp anchored at x=0 would cover the cube's cell
        let ramp = intent_at(&structure, Coord::real_at(0, 0, 0), BlockKind::Ramp, 0.0);
        assert!(matches!(
            structure.commit(&ramp),
            Err(CommitError::Conflict { .. })
        ));
        assert!(structure.is_empty_at(Coord::real_at(0, 0, 0)));
    }

    #[test]
    fn test_commit_rejects_real_frame() {
        let mut structure =
            Structure::new(&config(4, 4, 1), &StructureTarget::new(vec![cube(0, 0)])).unwrap();
        let intent = PlacementIntent {
            block: BlockKind::Cube,
            site: Coord::real_at(0, 0, 0),
            z_rot: 0.0,
        };
        assert!(matches!(
            structure.commit(&intent),
            Err(CommitError::InvalidIntent(_))
        ));
        assert_eq!(structure.block_count(), 0);
    }

    #[test]
    fn test_world_footprint() {
        let structure = Structure::new(&config(4, 4, 1), &StructureTarget::default()).unwrap();
        let inside = structure.cell_center(Vec3i::new(1, 1, 0));
        let shell = structure.cell_center(Vec3i::new(1, 0, 0));

        assert!(structure.contains_world(inside));
        assert!(!structure.contains_world(shell));
        assert_eq!(structure.world_to_virtual(inside), Vec3i::new(1, 1, 0));
    }

    #[test]
    fn test_block_ids_are_stable_per_structure() {
        let id = Uuid::new_v4();
        let target = StructureTarget::new(vec![cube(0, 0)]);
        let mut a = Structure::new(&config(2, 2, 1), &target).unwrap().with_id(id);
        let mut b = Structure::new(&config(2, 2, 1), &target).unwrap().with_id(id);
        let intent = intent_at(&a, Coord::real_at(0, 0, 0), BlockKind::Cube, 0.0);

        assert_eq!(a.commit(&intent).unwrap().id, b.commit(&intent).unwrap().id);
    }
}
