//! Scripted robot and fixtures for machine tests.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use crate::block::BlockKind;
use crate::config::StructureConfig;
use crate::geometry::{Coord, Rotation, Vec3d, Vec3i, Vec3z};
use crate::lane::{LaneAllocator, LaneGeometry, LanePolicyKind};
use crate::structure::{SharedStructure, Structure, StructureTarget, TargetBlock};

use super::capability::{DriveStatus, Locomotion, Perception};

/// Replays a script of drive results, then arrives every time.
pub struct ScriptedRobot {
    pub script: VecDeque<DriveStatus>,
    pub position: Vec3d,
    pub site: Option<Coord>,
    pub drives: usize,
}

impl ScriptedRobot {
    pub fn new(script: impl IntoIterator<Item = DriveStatus>) -> Self {
        Self {
            script: script.into_iter().collect(),
            position: Vec3d::default(),
            site: Some(Coord::real_at(0, 0, 0)),
            drives: 0,
        }
    }
}

impl Locomotion for ScriptedRobot {
    fn drive_toward(&mut self, target: Vec3d) -> DriveStatus {
        self.drives += 1;
        let status = self.script.pop_front().unwrap_or(DriveStatus::Arrived);
        if status == DriveStatus::Arrived {
            self.position = target;
        }
        status
    }

    fn current_position(&self) -> Vec3d {
        self.position
    }
}

impl Perception for ScriptedRobot {
    fn nearest_relevant_site(&self) -> Option<Coord> {
        self.site
    }
}

/// A 4x4x1 structure with cubes along real row y = 1, and its lanes.
pub fn site() -> (SharedStructure, LaneAllocator) {
    let blocks = (0..4)
        .map(|x| TargetBlock {
            anchor: Vec3i::new(x, 1, 0),
            kind: BlockKind::Cube,
            rotation: Rotation::Zero,
        })
        .collect();
    let config = StructureConfig {
        dims: Vec3z::new(4, 4, 1),
        ..StructureConfig::default()
    };
    let structure = Structure::new(&config, &StructureTarget::new(blocks)).unwrap();
    let lanes = LaneAllocator::new(
        LaneGeometry::for_structure(&structure),
        LanePolicyKind::RoundRobin.build(),
    )
    .unwrap();
    (Arc::new(RwLock::new(structure)), lanes)
}
