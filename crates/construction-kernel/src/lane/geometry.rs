//! Lane corridors derived from the structure's subtargets.

use serde::Serialize;

use crate::geometry::{Vec3d, Vec3i};
use crate::structure::Structure;

use super::LaneId;

/// One lane's corridor. Fixed once the target is known.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaneGeometry {
    pub id: LaneId,
    /// Subtarget this lane serves
    pub subtarget: usize,
    /// Ingress column, virtual frame, from the shell entry inward
    pub ingress: Vec<Vec3i>,
    /// Egress column, virtual frame, from the far side back to the shell exit
    pub egress: Vec<Vec3i>,
    pub ingress_entry: Vec3d,
    pub ingress_end: Vec3d,
    pub egress_start: Vec3d,
    pub egress_exit: Vec3d,
}

impl LaneGeometry {
    /// One lane per subtarget.
    ///
    /// Lane `i` enters along real column `2i` and leaves along `2i + 1`
    /// (the same column if the strip is one cell wide). Entries and exits sit
    /// on the outer row of the shell.
    pub fn for_structure(structure: &Structure) -> Vec<Self> {
        let shell = structure.shell() as i64;
        let rdims = structure.real_dims().to_signed();
        let far_y = shell + rdims.y - 1;

        structure
            .subtargets()
            .iter()
            .map(|st| {
                let base = 2 * st.id() as i64;
                let x_in = shell + base;
                let x_out = shell + (base + 1).min(rdims.x - 1);

                let ingress: Vec<Vec3i> = (0..=far_y).map(|y| Vec3i::new(x_in, y, 0)).collect();
                let egress: Vec<Vec3i> = (0..=far_y)
                    .rev()
                    .map(|y| Vec3i::new(x_out, y, 0))
                    .collect();

                Self {
                    id: st.lane(),
                    subtarget: st.id(),
                    ingress_entry: structure.cell_center(Vec3i::new(x_in, 0, 0)),
                    ingress_end: structure.cell_center(Vec3i::new(x_in, far_y, 0)),
                    egress_start: structure.cell_center(Vec3i::new(x_out, far_y, 0)),
                    egress_exit: structure.cell_center(Vec3i::new(x_out, 0, 0)),
                    ingress,
                    egress,
                }
            })
            .collect()
    }
}
