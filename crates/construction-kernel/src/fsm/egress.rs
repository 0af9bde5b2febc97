//! Egress machine: leave the structure along a lane once the block is down.
//!
//! The egress lane is claimed afresh and may differ from the one used to
//! come in. The task finishes as soon as the robot is outside the
//! structure's footprint. A finished machine is not reused.

use tracing::{debug, info};

use crate::geometry::Vec3d;
use crate::lane::{AgentId, LaneAllocator, LaneId};
use crate::structure::read_structure;

use super::alignment::LaneAlignment;
use super::capability::{DriveStatus, Robot};
use super::traffic::{HandlesBlockedByRobot, RobotWait, WaitOutcome};
use super::{AcqGoal, BuildContext, TaskStatus, Taskable};

type Handler = fn(&mut EgressFsm, &mut BuildContext<'_>, &mut dyn Robot) -> EgressState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EgressState {
    Start,
    AcquireEgressLane,
    StructureEgress,
    WaitForRobot,
    Finished,
    Aborted,
}

impl EgressState {
    pub fn name(self) -> &'static str {
        match self {
            EgressState::Start => "start",
            EgressState::AcquireEgressLane => "acquire_egress_lane",
            EgressState::StructureEgress => "structure_egress",
            EgressState::WaitForRobot => "wait_for_robot",
            EgressState::Finished => "finished",
            EgressState::Aborted => "aborted",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, EgressState::Finished | EgressState::Aborted)
    }

    fn handler(self) -> Handler {
        match self {
            EgressState::Start => EgressFsm::on_start,
            EgressState::AcquireEgressLane => EgressFsm::on_acquire_egress_lane,
            EgressState::StructureEgress => EgressFsm::on_structure_egress,
            EgressState::WaitForRobot => EgressFsm::on_wait_for_robot,
            EgressState::Finished | EgressState::Aborted => EgressFsm::on_terminal,
        }
    }
}

/// Per-agent egress task.
#[derive(Debug)]
pub struct EgressFsm {
    agent: AgentId,
    state: EgressState,
    lane: Option<LaneId>,
    alignment: Option<Vec3d>,
    exit: Option<Vec3d>,
    traffic: Option<RobotWait<EgressState>>,
    max_wait_ticks: u64,
}

impl EgressFsm {
    pub fn new(agent: AgentId) -> Self {
        Self {
            agent,
            state: EgressState::Start,
            lane: None,
            alignment: None,
            exit: None,
            traffic: None,
            max_wait_ticks: 0,
        }
    }

    /// Claim a fresh egress lane after `ticks` blocked ticks. 0 waits forever.
    pub fn with_wait_limit(mut self, ticks: u64) -> Self {
        self.max_wait_ticks = ticks;
        self
    }

    pub fn agent_id(&self) -> AgentId {
        self.agent
    }

    pub fn state(&self) -> EgressState {
        self.state
    }

    pub fn tick(&mut self, ctx: &mut BuildContext<'_>, robot: &mut dyn Robot) -> TaskStatus {
        let handler = self.state.handler();
        let next = handler(self, ctx, robot);
        if next != self.state {
            debug!(
                agent = %self.agent,
                from = self.state.name(),
                to = next.name(),
                "Egress transition"
            );
            self.state = next;
        }
        self.status()
    }

    pub fn abort(&mut self, lanes: &LaneAllocator) {
        if self.state.is_terminal() {
            return;
        }
        lanes.release(self.agent);
        self.lane = None;
        self.traffic = None;
        info!(agent = %self.agent, from = self.state.name(), "Egress aborted");
        self.state = EgressState::Aborted;
    }

    fn finish(&mut self, lanes: &LaneAllocator) -> EgressState {
        lanes.release(self.agent);
        self.lane = None;
        debug!(agent = %self.agent, "Left structure");
        EgressState::Finished
    }

    fn on_start(&mut self, _ctx: &mut BuildContext<'_>, _robot: &mut dyn Robot) -> EgressState {
        EgressState::AcquireEgressLane
    }

    fn on_acquire_egress_lane(&mut self, ctx: &mut BuildContext<'_>, robot: &mut dyn Robot) -> EgressState {
        let (lane, target) = match (self.lane, self.alignment) {
            (Some(lane), Some(target)) => (lane, target),
            _ => {
                let lane = ctx.lanes.claim(self.agent, &mut *ctx.rng);
                let pos = robot.current_position();
                let geometry = ctx.lanes.lane(lane);
                let target = geometry
                    .map(|g| LaneAlignment::egress(g, pos))
                    .unwrap_or(pos);
                self.exit = geometry.map(|g| g.egress_exit);
                self.lane = Some(lane);
                self.alignment = Some(target);
                (lane, target)
            }
        };

        match robot.drive_toward(target) {
            DriveStatus::Arrived => EgressState::StructureEgress,
            DriveStatus::Blocked => {
                self.begin_robot_wait(ctx.lanes, lane, EgressState::AcquireEgressLane, target);
                EgressState::WaitForRobot
            }
            DriveStatus::InProgress => EgressState::AcquireEgressLane,
        }
    }

    fn on_structure_egress(&mut self, ctx: &mut BuildContext<'_>, robot: &mut dyn Robot) -> EgressState {
        let outside = |pos| !read_structure(ctx.structure).contains_world(pos);
        if outside(robot.current_position()) {
            return self.finish(ctx.lanes);
        }
        let (Some(lane), Some(exit)) = (self.lane, self.exit) else {
            return EgressState::AcquireEgressLane;
        };

        match robot.drive_toward(exit) {
            DriveStatus::Arrived if outside(robot.current_position()) => self.finish(ctx.lanes),
            DriveStatus::Arrived | DriveStatus::InProgress => EgressState::StructureEgress,
            DriveStatus::Blocked => {
                self.begin_robot_wait(ctx.lanes, lane, EgressState::StructureEgress, exit);
                EgressState::WaitForRobot
            }
        }
    }

    fn on_wait_for_robot(&mut self, ctx: &mut BuildContext<'_>, robot: &mut dyn Robot) -> EgressState {
        match self.wait_for_robot(ctx.lanes, robot) {
            WaitOutcome::Blocked => EgressState::WaitForRobot,
            WaitOutcome::Resumed { resume, .. } => resume,
            WaitOutcome::GaveUp { lane, ticks, .. } => {
                debug!(agent = %self.agent, lane = %lane, ticks = ticks, "Abandoning blocked egress lane");
                ctx.lanes.release(self.agent);
                self.lane = None;
                self.alignment = None;
                self.exit = None;
                EgressState::AcquireEgressLane
            }
            WaitOutcome::NotWaiting => EgressState::AcquireEgressLane,
        }
    }

    fn on_terminal(&mut self, _ctx: &mut BuildContext<'_>, _robot: &mut dyn Robot) -> EgressState {
        self.state
    }
}

impl HandlesBlockedByRobot for EgressFsm {
    type Resume = EgressState;

    fn agent(&self) -> AgentId {
        self.agent
    }

    fn wait_slot(&mut self) -> &mut Option<RobotWait<EgressState>> {
        &mut self.traffic
    }

    fn wait_limit(&self) -> u64 {
        self.max_wait_ticks
    }
}

impl Taskable for EgressFsm {
    fn state_name(&self) -> &'static str {
        self.state.name()
    }

    fn lane(&self) -> Option<LaneId> {
        self.lane
    }

    fn acq_goal(&self) -> Option<AcqGoal> {
        (!self.state.is_terminal()).then_some(AcqGoal::StructureExit)
    }

    fn status(&self) -> TaskStatus {
        match self.state {
            EgressState::Finished => TaskStatus::Succeeded,
            EgressState::Aborted => TaskStatus::Failed(crate::error::TaskFailure::Aborted),
            _ => TaskStatus::Running,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::mock::{ScriptedRobot, site};
    use crate::geometry::Vec3i;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use uuid::Uuid;

    /// A robot parked on a cell in the middle of the structure.
    fn robot_inside(structure: &crate::structure::SharedStructure, script: Vec<DriveStatus>) -> ScriptedRobot {
        let mut robot = ScriptedRobot::new(script);
        robot.position = read_structure(structure).cell_center(Vec3i::new(2, 3, 0));
        robot
    }

    #[test]
    fn test_leaves_structure_and_releases_lane() {
        let (structure, lanes) = site();
        let agent = Uuid::new_v4();
        let mut fsm = EgressFsm::new(agent);
        let mut robot = robot_inside(&structure, vec![DriveStatus::InProgress]);
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let mut ctx = BuildContext {
            structure: &structure,
            lanes: &lanes,
            rng: &mut rng,
        };

        let mut status = TaskStatus::Running;
        for _ in 0..10 {
            status = fsm.tick(&mut ctx, &mut robot);
            if status.is_finished() {
                break;
            }
        }

        assert_eq!(status, TaskStatus::Succeeded);
        assert!(!read_structure(&structure).contains_world(robot.position));
        assert_eq!(lanes.claim_of(agent), None);
        assert_eq!(fsm.acq_goal(), None);
    }

    #[test]
    fn test_blocked_egress_counts_each_tick() {
        let (structure, lanes) = site();
        let mut fsm = EgressFsm::new(Uuid::new_v4());
        let mut robot = robot_inside(
            &structure,
            vec![
                DriveStatus::Arrived,
                DriveStatus::Blocked,
                DriveStatus::Blocked,
            ],
        );
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let mut ctx = BuildContext {
            structure: &structure,
            lanes: &lanes,
            rng: &mut rng,
        };

        let mut states = Vec::new();
        for _ in 0..8 {
            fsm.tick(&mut ctx, &mut robot);
            states.push(fsm.state());
        }

        assert!(states.contains(&EgressState::WaitForRobot));
        assert_eq!(fsm.state(), EgressState::Finished);
        assert_eq!(lanes.history().total_interference(), 2);
    }

    #[test]
    fn test_wait_limit_reclaims_egress_lane() {
        let (structure, lanes) = site();
        let agent = Uuid::new_v4();
        let mut fsm = EgressFsm::new(agent).with_wait_limit(2);
        let mut robot = robot_inside(&structure, vec![DriveStatus::Blocked, DriveStatus::Blocked]);
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let mut ctx = BuildContext {
            structure: &structure,
            lanes: &lanes,
            rng: &mut rng,
        };

        fsm.tick(&mut ctx, &mut robot);
        fsm.tick(&mut ctx, &mut robot);
        assert_eq!(fsm.state(), EgressState::WaitForRobot);

        fsm.tick(&mut ctx, &mut robot);
        assert_eq!(fsm.state(), EgressState::AcquireEgressLane);
        assert_eq!(fsm.lane(), None);
        assert_eq!(lanes.claim_of(agent), None);

        for _ in 0..8 {
            fsm.tick(&mut ctx, &mut robot);
        }
        assert_eq!(fsm.state(), EgressState::Finished);
        assert_eq!(lanes.history().total_interference(), 2);
    }

    #[test]
    fn test_finished_is_terminal() {
        let (structure, lanes) = site();
        let mut fsm = EgressFsm::new(Uuid::new_v4());
        // Already outside
        let mut robot = ScriptedRobot::new([]);
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let mut ctx = BuildContext {
            structure: &structure,
            lanes: &lanes,
            rng: &mut rng,
        };

        for _ in 0..5 {
            fsm.tick(&mut ctx, &mut robot);
        }
        assert_eq!(fsm.state(), EgressState::Finished);
        let drives = robot.drives;

        fsm.tick(&mut ctx, &mut robot);
        assert_eq!(fsm.state(), EgressState::Finished);
        assert_eq!(robot.drives, drives);
        assert!(fsm.task_finished());
    }

    #[test]
    fn test_abort_mid_egress() {
        let (structure, lanes) = site();
        let agent = Uuid::new_v4();
        let mut fsm = EgressFsm::new(agent);
        let mut robot = robot_inside(&structure, vec![DriveStatus::InProgress; 4]);
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let mut ctx = BuildContext {
            structure: &structure,
            lanes: &lanes,
            rng: &mut rng,
        };

        fsm.tick(&mut ctx, &mut robot);
        fsm.tick(&mut ctx, &mut robot);
        assert_eq!(fsm.lane(), lanes.claim_of(agent));

        fsm.abort(&lanes);
        assert_eq!(lanes.claim_of(agent), None);
        assert!(matches!(fsm.status(), TaskStatus::Failed(_)));
    }
}
