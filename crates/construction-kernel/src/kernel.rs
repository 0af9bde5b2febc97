//! The construction site: one structure, its lanes, and builder factories.
//!
//! ## Usage
//!
//! ```ignore
//! use construction_kernel::{ConstructionConfig, ConstructionSite, StructureTarget};
//!
//! let site = ConstructionSite::new(ConstructionConfig::default(), &target)?;
//! let mut placement = site.placement_fsm(agent, directive);
//!
//! let mut ctx = site.context(&mut rng);
//! while !placement.tick(&mut ctx, &mut robot).is_finished() {
//!     // step the world
//! }
//! ```

use std::sync::{Arc, RwLock};

use rand::RngCore;
use tracing::info;

use crate::config::ConstructionConfig;
use crate::error::{ConfigError, PlacementDefect};
use crate::fsm::{BuildContext, BuildDirective, EgressFsm, PlacementFsm};
use crate::lane::{AgentId, LaneAllocator, LaneGeometry, LaneSnapshot};
use crate::structure::{
    ProgressSnapshot, SharedStructure, StaticBuilder, Structure, StructureTarget, read_structure,
    write_structure,
};

/// Shared state for everyone building one structure.
#[derive(Debug, Clone)]
pub struct ConstructionSite {
    config: ConstructionConfig,
    structure: SharedStructure,
    lanes: Arc<LaneAllocator>,
    static_builder: StaticBuilder,
}

impl ConstructionSite {
    pub fn new(config: ConstructionConfig, target: &StructureTarget) -> Result<Self, ConfigError> {
        config.validate()?;
        let structure = Structure::new(&config.structure, target)?;
        let lanes = LaneAllocator::new(
            LaneGeometry::for_structure(&structure),
            config.lane_alloc.policy.build(),
        )?;

        info!(
            structure_id = %structure.id(),
            dims = %structure.real_dims(),
            cells = structure.total_cells(),
            lanes = lanes.lanes().len(),
            policy = lanes.policy_name(),
            "Construction site ready"
        );

        Ok(Self {
            static_builder: StaticBuilder::new(&config.static_build),
            config,
            structure: Arc::new(RwLock::new(structure)),
            lanes: Arc::new(lanes),
        })
    }

    pub fn config(&self) -> &ConstructionConfig {
        &self.config
    }

    pub fn structure(&self) -> &SharedStructure {
        &self.structure
    }

    pub fn lanes(&self) -> &Arc<LaneAllocator> {
        &self.lanes
    }

    /// Borrow everything a machine needs for one tick.
    pub fn context<'a>(&'a self, rng: &'a mut dyn RngCore) -> BuildContext<'a> {
        BuildContext {
            structure: &self.structure,
            lanes: &self.lanes,
            rng,
        }
    }

    pub fn placement_fsm(&self, agent: AgentId, directive: BuildDirective) -> PlacementFsm {
        PlacementFsm::new(agent, directive, self.config.builder.retry_budget)
            .with_wait_limit(self.config.builder.max_wait_ticks)
    }

    pub fn egress_fsm(&self, agent: AgentId) -> EgressFsm {
        EgressFsm::new(agent).with_wait_limit(self.config.builder.max_wait_ticks)
    }

    /// Run the static builder for this tick.
    pub fn static_build(&self, tick: u64) -> Result<usize, PlacementDefect> {
        if !self.static_builder.is_enabled() {
            return Ok(0);
        }
        self.static_builder
            .update(&mut write_structure(&self.structure), tick)
    }

    pub fn progress(&self) -> ProgressSnapshot {
        read_structure(&self.structure).progress()
    }

    pub fn is_complete(&self) -> bool {
        read_structure(&self.structure).is_complete()
    }

    pub fn lane_snapshot(&self) -> Vec<LaneSnapshot> {
        self.lanes.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockKind;
    use crate::fsm::mock::ScriptedRobot;
    use crate::fsm::{TaskStatus, Taskable};
    use crate::geometry::{Coord, Rotation, Vec3i, Vec3z};
    use crate::structure::TargetBlock;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use uuid::Uuid;

    fn target() -> StructureTarget {
        StructureTarget::new(vec![
            TargetBlock {
                anchor: Vec3i::new(0, 0, 0),
                kind: BlockKind::Ramp,
                rotation: Rotation::Zero,
            },
            TargetBlock {
                anchor: Vec3i::new(3, 2, 0),
                kind: BlockKind::Cube,
                rotation: Rotation::Zero,
            },
        ])
    }

    #[test]
    fn test_site_wires_lanes_to_subtargets() {
        let mut config = ConstructionConfig::default();
        config.structure.dims = Vec3z::new(4, 3, 1);
        let site = ConstructionSite::new(config, &target()).unwrap();

        assert_eq!(site.lane_snapshot().len(), 2);
        let progress = site.progress();
        assert_eq!(progress.total_cells, 3);
        assert_eq!(progress.subtargets.len(), 2);
        assert_eq!(progress.subtargets[0].total_cells, 2);
    }

    #[test]
    fn test_placement_then_egress() {
        let mut config = ConstructionConfig::default();
        config.structure.dims = Vec3z::new(4, 3, 1);
        let site = ConstructionSite::new(config, &target()).unwrap();
        let agent = Uuid::new_v4();
        let directive = BuildDirective {
            structure_id: site.progress().structure_id,
            target_site: Coord::real_at(3, 2, 0),
            block: BlockKind::Cube,
            z_rot: 0.0,
        };
        let mut placement = site.placement_fsm(agent, directive);
        let mut egress = site.egress_fsm(agent);
        let mut robot = ScriptedRobot::new([]);
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let mut ctx = site.context(&mut rng);

        for _ in 0..20 {
            if placement.tick(&mut ctx, &mut robot).is_finished() {
                break;
            }
        }
        assert_eq!(placement.status(), TaskStatus::Succeeded);

        for _ in 0..20 {
            if egress.tick(&mut ctx, &mut robot).is_finished() {
                break;
            }
        }
        assert_eq!(egress.status(), TaskStatus::Succeeded);
        assert_eq!(site.progress().built_cells, 1);
        assert!(site.lanes().claim_of(agent).is_none());
    }

    #[test]
    fn test_static_build_completes_target() {
        let mut config = ConstructionConfig::default();
        config.structure.dims = Vec3z::new(4, 3, 1);
        config.static_build.interval = 1;
        config.static_build.count = 5;
        let site = ConstructionSite::new(config, &target()).unwrap();

        assert_eq!(site.static_build(1).unwrap(), 2);
        assert!(site.is_complete());
    }
}
