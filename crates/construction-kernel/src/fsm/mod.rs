//! Builder state machines.
//!
//! Each agent runs a [`PlacementFsm`] to get its block onto the structure and
//! then an [`EgressFsm`] to leave it. Both are ticked once per step by an
//! external scheduler and run exactly one state handler per tick. They share
//! the wait-for-robot sub-state through [`HandlesBlockedByRobot`] and report
//! their progress through [`Taskable`].

pub mod alignment;
pub mod capability;
mod egress;
#[cfg(test)]
pub(crate) mod mock;
mod placement;
pub mod traffic;

use rand::RngCore;
use serde::Serialize;

use crate::error::TaskFailure;
use crate::lane::{LaneAllocator, LaneId};
use crate::structure::SharedStructure;

pub use capability::{BuildDirective, DriveStatus, Locomotion, Perception, Robot};
pub use egress::{EgressFsm, EgressState};
pub use placement::{PlacementFsm, PlacementLeg, PlacementState};
pub use traffic::{HandlesBlockedByRobot, RobotWait, WaitOutcome};

/// Shared state a machine needs for one tick.
pub struct BuildContext<'a> {
    pub structure: &'a SharedStructure,
    pub lanes: &'a LaneAllocator,
    pub rng: &'a mut dyn RngCore,
}

/// What the agent is currently trying to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AcqGoal {
    LaneEntry,
    PlacementSite,
    StructureExit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatus {
    Running,
    Succeeded,
    Failed(TaskFailure),
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, TaskStatus::Running)
    }
}

/// Observable task state common to both machines.
pub trait Taskable {
    fn state_name(&self) -> &'static str;

    /// Lane currently held, if any.
    fn lane(&self) -> Option<LaneId>;

    /// `None` once the task is over.
    fn acq_goal(&self) -> Option<AcqGoal>;

    fn status(&self) -> TaskStatus;

    fn task_running(&self) -> bool {
        !self.task_finished()
    }

    fn task_finished(&self) -> bool {
        self.status().is_finished()
    }
}
