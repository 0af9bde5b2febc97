//! The wait-for-robot sub-state shared by the builder machines.
//!
//! A machine enters the wait when locomotion reports `Blocked` and keeps
//! re-driving toward the same target until it no longer is. Every blocked
//! tick, including the first, is reported to the allocator as one unit of
//! interference on the machine's lane. A machine with a wait limit stops
//! waiting after that many blocked ticks and decides for itself what to do
//! next, so a wait can never last forever.

use tracing::debug;

use crate::geometry::Vec3d;
use crate::lane::{AgentId, LaneAllocator, LaneId};

use super::capability::{DriveStatus, Locomotion};

/// An in-progress wait.
#[derive(Debug, Clone, PartialEq)]
pub struct RobotWait<S> {
    /// State to return to once the way is clear
    pub resume: S,
    pub lane: LaneId,
    pub target: Vec3d,
    /// Blocked ticks so far
    pub ticks: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome<S> {
    Blocked,
    Resumed { resume: S, status: DriveStatus },
    /// Blocked for the machine's whole wait limit; the wait is over.
    GaveUp { resume: S, lane: LaneId, ticks: u64 },
    NotWaiting,
}

pub trait HandlesBlockedByRobot {
    type Resume: std::fmt::Debug;

    fn agent(&self) -> AgentId;

    fn wait_slot(&mut self) -> &mut Option<RobotWait<Self::Resume>>;

    /// Blocked ticks after which the wait is abandoned; 0 never gives up.
    fn wait_limit(&self) -> u64 {
        0
    }

    /// Start waiting; counts the tick that found the way blocked.
    fn begin_robot_wait(
        &mut self,
        lanes: &LaneAllocator,
        lane: LaneId,
        resume: Self::Resume,
        target: Vec3d,
    ) {
        lanes.report_interference(lane);
        debug!(agent = %self.agent(), lane = %lane, resume = ?resume, "Blocked by robot");
        *self.wait_slot() = Some(RobotWait {
            resume,
            lane,
            target,
            ticks: 1,
        });
    }

    /// One tick of waiting.
    fn wait_for_robot<L: Locomotion + ?Sized>(
        &mut self,
        lanes: &LaneAllocator,
        loco: &mut L,
    ) -> WaitOutcome<Self::Resume> {
        let agent = self.agent();
        let Some(mut wait) = self.wait_slot().take() else {
            return WaitOutcome::NotWaiting;
        };

        match loco.drive_toward(wait.target) {
            DriveStatus::Blocked => {
                wait.ticks += 1;
                lanes.report_interference(wait.lane);
                let limit = self.wait_limit();
                if limit > 0 && wait.ticks >= limit {
                    debug!(agent = %agent, lane = %wait.lane, ticks = wait.ticks, "Gave up waiting");
                    return WaitOutcome::GaveUp {
                        resume: wait.resume,
                        lane: wait.lane,
                        ticks: wait.ticks,
                    };
                }
                *self.wait_slot() = Some(wait);
                WaitOutcome::Blocked
            }
            status => {
                debug!(agent = %agent, lane = %wait.lane, ticks = wait.ticks, "Way clear");
                WaitOutcome::Resumed {
                    resume: wait.resume,
                    status,
                }
            }
        }
    }

    fn is_waiting(&mut self) -> bool {
        self.wait_slot().is_some()
    }
}
