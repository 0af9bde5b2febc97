//! Capabilities the builder machines consume from the host.
//!
//! Steering and sensing are opaque: the machines only see whether the robot
//! got where it was going and what site it can currently see.

use serde::{Deserialize, Serialize};

use crate::block::BlockKind;
use crate::geometry::{Coord, Vec3d};
use crate::structure::StructureId;

/// Result of one locomotion step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveStatus {
    Arrived,
    /// Another robot is in the way.
    Blocked,
    InProgress,
}

pub trait Locomotion {
    /// Take one step toward `target`.
    fn drive_toward(&mut self, target: Vec3d) -> DriveStatus;

    fn current_position(&self) -> Vec3d;
}

pub trait Perception {
    /// The closest construction site in view, if any.
    fn nearest_relevant_site(&self) -> Option<Coord>;
}

/// Everything a builder machine needs from its robot.
pub trait Robot: Locomotion + Perception {}

impl<T: Locomotion + Perception + ?Sized> Robot for T {}

/// Instruction from upstream to place one block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BuildDirective {
    pub structure_id: StructureId,
    /// Anchor site; either frame
    pub target_site: Coord,
    pub block: BlockKind,
    /// Rotation about Z in radians
    pub z_rot: f64,
}
