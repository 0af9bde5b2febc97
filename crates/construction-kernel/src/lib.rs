//! Construction Kernel: cooperative block assembly by many agents
//!
//! This crate implements the shared core that lets autonomous agents build a
//! fixed 3D block structure one block at a time. A single structure model
//! guards every mutation behind a placement validator, agents reach the
//! structure through lanes handed out by an interference-aware allocator,
//! and per-agent state machines sequence lane acquisition, placement and
//! egress while waiting out traffic from other agents.

pub mod block;
pub mod config;
pub mod error;
pub mod fsm;
pub mod geometry;
pub mod kernel;
pub mod lane;
pub mod structure;
pub mod validate;

pub use block::{BlockId, BlockKind, PlacedBlock};
pub use config::ConstructionConfig;
pub use error::{AccessError, CommitError, ConfigError, PlacementDefect, PlacementFailure, TaskFailure};
pub use fsm::{
    AcqGoal, BuildContext, BuildDirective, DriveStatus, EgressFsm, Locomotion, Perception,
    PlacementFsm, Robot, TaskStatus, Taskable,
};
pub use geometry::{Coord, Frame, Rotation, Vec3d, Vec3i, Vec3z};
pub use kernel::ConstructionSite;
pub use lane::{AgentId, LaneAllocator, LaneId, LanePolicyKind, LaneSnapshot};
pub use structure::{
    ProgressSnapshot, SharedStructure, Structure, StructureId, StructureTarget, TargetBlock,
};
pub use validate::{PlacementIntent, Verdict, validate_placement};
