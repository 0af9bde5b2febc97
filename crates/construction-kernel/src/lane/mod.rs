//! Lanes: disjoint corridors agents use to reach and leave the structure.
//!
//! Each subtarget strip has one lane. An ingress column runs from the shell
//! into the strip and an egress column runs back out beside it. Agents claim
//! a lane from the [`LaneAllocator`], and report interference while they are
//! blocked by other agents in it.

mod allocator;
mod geometry;
mod history;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use allocator::{
    InterferencePolicy, LaneAllocator, LanePolicy, LanePolicyKind, RoundRobinPolicy,
};
pub use geometry::LaneGeometry;
pub use history::{LaneCounters, LaneHistory};

/// Identifier of an agent using the lanes.
pub type AgentId = Uuid;

/// Index of a lane; equal to the id of the subtarget it serves.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LaneId(pub usize);

impl fmt::Display for LaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lane{}", self.0)
    }
}

/// Read-only view of one lane's counters and occupancy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaneSnapshot {
    pub lane: LaneId,
    pub interference: u64,
    pub allocations: u64,
    pub occupants: usize,
}
