//! Placement machine: acquire a lane, approach the site, place the block.
//!
//! ```text
//! Start -> AcquireSite -> [WaitForRobot]* -> ApproachSite -> [WaitForRobot]* -> Place
//!              ^                                                               |
//!              +----------------------- Retry <--------------------------------+
//!                                         |                                    |
//!                                       Failed                              Success
//! ```
//!
//! Recoverable rejections go through `Retry`, which releases the lane and
//! starts over until the retry budget runs out. Placement defects fail the
//! task straight away. `abort` can end the task from any state.

use std::collections::VecDeque;

use tracing::{debug, error, info, warn};

use crate::block::PlacedBlock;
use crate::error::TaskFailure;
use crate::geometry::{Vec3d, Vec3i};
use crate::lane::{AgentId, LaneAllocator, LaneId};
use crate::structure::{read_structure, write_structure};
use crate::validate::{PlacementIntent, Verdict, validate_placement};

use super::alignment::LaneAlignment;
use super::capability::{BuildDirective, DriveStatus, Robot};
use super::traffic::{HandlesBlockedByRobot, RobotWait, WaitOutcome};
use super::{AcqGoal, BuildContext, TaskStatus, Taskable};

type Handler = fn(&mut PlacementFsm, &mut BuildContext<'_>, &mut dyn Robot) -> PlacementState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlacementState {
    Start,
    AcquireSite,
    WaitForRobot,
    ApproachSite,
    Place,
    Retry,
    Success,
    Failed,
    Aborted,
}

impl PlacementState {
    pub fn name(self) -> &'static str {
        match self {
            PlacementState::Start => "start",
            PlacementState::AcquireSite => "acquire_site",
            PlacementState::WaitForRobot => "wait_for_robot",
            PlacementState::ApproachSite => "approach_site",
            PlacementState::Place => "place",
            PlacementState::Retry => "retry",
            PlacementState::Success => "success",
            PlacementState::Failed => "failed",
            PlacementState::Aborted => "aborted",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PlacementState::Success | PlacementState::Failed | PlacementState::Aborted
        )
    }

    fn handler(self) -> Handler {
        match self {
            PlacementState::Start => PlacementFsm::on_start,
            PlacementState::AcquireSite => PlacementFsm::on_acquire_site,
            PlacementState::WaitForRobot => PlacementFsm::on_wait_for_robot,
            PlacementState::ApproachSite => PlacementFsm::on_approach_site,
            PlacementState::Place => PlacementFsm::on_place,
            PlacementState::Retry => PlacementFsm::on_retry,
            PlacementState::Success | PlacementState::Failed | PlacementState::Aborted => {
                PlacementFsm::on_terminal
            }
        }
    }
}

/// The legs of the trip that can be interrupted by traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementLeg {
    AcquireSite,
    ApproachSite,
}

impl PlacementLeg {
    fn state(self) -> PlacementState {
        match self {
            PlacementLeg::AcquireSite => PlacementState::AcquireSite,
            PlacementLeg::ApproachSite => PlacementState::ApproachSite,
        }
    }
}

/// Per-agent placement task.
#[derive(Debug)]
pub struct PlacementFsm {
    agent: AgentId,
    directive: BuildDirective,
    state: PlacementState,
    lane: Option<LaneId>,
    /// Point where the robot joins its lane
    alignment: Option<Vec3d>,
    /// Remaining waypoints from the lane to the site
    approach: VecDeque<Vec3d>,
    traffic: Option<RobotWait<PlacementLeg>>,
    max_wait_ticks: u64,
    retry_budget: u32,
    attempts: u32,
    last_failure: Option<String>,
    failure: Option<TaskFailure>,
    placed: Option<PlacedBlock>,
    unenforced: bool,
}

impl PlacementFsm {
    pub fn new(agent: AgentId, directive: BuildDirective, retry_budget: u32) -> Self {
        Self {
            agent,
            directive,
            state: PlacementState::Start,
            lane: None,
            alignment: None,
            approach: VecDeque::new(),
            traffic: None,
            max_wait_ticks: 0,
            retry_budget,
            attempts: 0,
            last_failure: None,
            failure: None,
            placed: None,
            unenforced: false,
        }
    }

    /// Give up on a blocked lane after `ticks` blocked ticks, counting one
    /// failed attempt. 0 waits forever.
    pub fn with_wait_limit(mut self, ticks: u64) -> Self {
        self.max_wait_ticks = ticks;
        self
    }

    pub fn agent_id(&self) -> AgentId {
        self.agent
    }

    pub fn directive(&self) -> &BuildDirective {
        &self.directive
    }

    pub fn state(&self) -> PlacementState {
        self.state
    }

    /// Failed attempts so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn placed_block(&self) -> Option<&PlacedBlock> {
        self.placed.as_ref()
    }

    /// Whether the block went in without its shape check being enforced.
    pub fn accepted_unenforced(&self) -> bool {
        self.unenforced
    }

    /// Run the current state's handler once.
    pub fn tick(&mut self, ctx: &mut BuildContext<'_>, robot: &mut dyn Robot) -> TaskStatus {
        let handler = self.state.handler();
        let next = handler(self, ctx, robot);
        if next != self.state {
            debug!(
                agent = %self.agent,
                from = self.state.name(),
                to = next.name(),
                "Placement transition"
            );
            self.state = next;
        }
        self.status()
    }

    /// Cancel the task. Releases the lane; has no effect on the structure.
    pub fn abort(&mut self, lanes: &LaneAllocator) {
        if self.state.is_terminal() {
            return;
        }
        lanes.release(self.agent);
        self.lane = None;
        self.traffic = None;
        info!(agent = %self.agent, from = self.state.name(), "Placement aborted");
        self.state = PlacementState::Aborted;
    }

    fn release_lane(&mut self, lanes: &LaneAllocator) {
        lanes.release(self.agent);
        self.lane = None;
        self.alignment = None;
        self.approach.clear();
        self.traffic = None;
    }

    fn fail(&mut self, lanes: &LaneAllocator, failure: TaskFailure) -> PlacementState {
        self.release_lane(lanes);
        warn!(agent = %self.agent, error = %failure, "Placement task failed");
        self.failure = Some(failure);
        PlacementState::Failed
    }

    fn on_start(&mut self, ctx: &mut BuildContext<'_>, _robot: &mut dyn Robot) -> PlacementState {
        let actual = read_structure(ctx.structure).id();
        if actual != self.directive.structure_id {
            let expected = self.directive.structure_id;
            return self.fail(ctx.lanes, TaskFailure::WrongStructure { expected, actual });
        }
        PlacementState::AcquireSite
    }

    fn on_acquire_site(&mut self, ctx: &mut BuildContext<'_>, robot: &mut dyn Robot) -> PlacementState {
        if robot.nearest_relevant_site().is_none() {
            return PlacementState::AcquireSite;
        }

        let (lane, target) = match (self.lane, self.alignment) {
            (Some(lane), Some(target)) => (lane, target),
            _ => {
                let lane = ctx.lanes.claim(self.agent, &mut *ctx.rng);
                let pos = robot.current_position();
                let target = ctx
                    .lanes
                    .lane(lane)
                    .map(|geometry| LaneAlignment::ingress(geometry, pos))
                    .unwrap_or(pos);
                self.lane = Some(lane);
                self.alignment = Some(target);
                (lane, target)
            }
        };

        match robot.drive_toward(target) {
            DriveStatus::Arrived => {
                self.approach = self.approach_path(ctx, lane);
                PlacementState::ApproachSite
            }
            DriveStatus::Blocked => {
                self.begin_robot_wait(ctx.lanes, lane, PlacementLeg::AcquireSite, target);
                PlacementState::WaitForRobot
            }
            DriveStatus::InProgress => PlacementState::AcquireSite,
        }
    }

    /// Up the lane to the site's row, then across to the site.
    fn approach_path(&self, ctx: &BuildContext<'_>, lane: LaneId) -> VecDeque<Vec3d> {
        let structure = read_structure(ctx.structure);
        let site = structure.to_virtual(self.directive.target_site).offset;
        let mut path = VecDeque::with_capacity(2);
        if let Some(column) = ctx.lanes.lane(lane).and_then(|g| g.ingress.first()) {
            path.push_back(structure.cell_center(Vec3i::new(column.x, site.y, site.z)));
        }
        path.push_back(structure.cell_center(site));
        path
    }

    fn on_wait_for_robot(&mut self, ctx: &mut BuildContext<'_>, robot: &mut dyn Robot) -> PlacementState {
        match self.wait_for_robot(ctx.lanes, robot) {
            WaitOutcome::Blocked => PlacementState::WaitForRobot,
            WaitOutcome::Resumed { resume, .. } => resume.state(),
            WaitOutcome::GaveUp { lane, ticks, .. } => {
                debug!(agent = %self.agent, lane = %lane, ticks = ticks, "Abandoning blocked lane");
                self.last_failure = Some(format!("blocked on {} for {} ticks", lane, ticks));
                PlacementState::Retry
            }
            WaitOutcome::NotWaiting => PlacementState::AcquireSite,
        }
    }

    fn on_approach_site(&mut self, ctx: &mut BuildContext<'_>, robot: &mut dyn Robot) -> PlacementState {
        let Some(lane) = self.lane else {
            return PlacementState::AcquireSite;
        };
        let Some(&target) = self.approach.front() else {
            return PlacementState::Place;
        };

        match robot.drive_toward(target) {
            DriveStatus::Arrived => {
                self.approach.pop_front();
                if self.approach.is_empty() {
                    PlacementState::Place
                } else {
                    PlacementState::ApproachSite
                }
            }
            DriveStatus::Blocked => {
                self.begin_robot_wait(ctx.lanes, lane, PlacementLeg::ApproachSite, target);
                PlacementState::WaitForRobot
            }
            DriveStatus::InProgress => PlacementState::ApproachSite,
        }
    }

    fn on_place(&mut self, ctx: &mut BuildContext<'_>, _robot: &mut dyn Robot) -> PlacementState {
        let (intent, verdict) = {
            let structure = read_structure(ctx.structure);
            let intent = PlacementIntent {
                block: self.directive.block,
                site: structure.to_virtual(self.directive.target_site),
                z_rot: self.directive.z_rot,
            };
            (intent, validate_placement(&structure, &intent))
        };

        let verdict = match verdict {
            Ok(verdict) => verdict,
            Err(defect) => {
                error!(agent = %self.agent, site = %intent.site, error = %defect, "Placement defect");
                return self.fail(ctx.lanes, TaskFailure::Fatal(defect));
            }
        };

        match &verdict {
            Verdict::Invalid(failure) => {
                warn!(agent = %self.agent, site = %intent.site, reason = %failure, "Placement rejected");
                self.last_failure = Some(failure.to_string());
                return PlacementState::Retry;
            }
            Verdict::NotYetEnforced { reason } => {
                warn!(agent = %self.agent, site = %intent.site, reason = %reason, "Placement accepted unchecked");
                self.unenforced = true;
            }
            Verdict::Valid => {}
        }

        let committed = write_structure(ctx.structure).commit(&intent);
        match committed {
            Ok(block) => {
                info!(
                    agent = %self.agent,
                    block = %block.id,
                    site = %intent.site,
                    attempts = self.attempts,
                    "Block placed"
                );
                self.placed = Some(block);
                self.release_lane(ctx.lanes);
                PlacementState::Success
            }
            Err(e) if e.is_retryable() => {
                debug!(agent = %self.agent, site = %intent.site, error = %e, "Lost commit race");
                self.last_failure = Some(e.to_string());
                PlacementState::Retry
            }
            Err(e) => self.fail(ctx.lanes, TaskFailure::Commit(e)),
        }
    }

    fn on_retry(&mut self, ctx: &mut BuildContext<'_>, _robot: &mut dyn Robot) -> PlacementState {
        self.attempts += 1;
        self.release_lane(ctx.lanes);

        if self.attempts > self.retry_budget {
            let last_reason = self.last_failure.take().unwrap_or_default();
            return self.fail(
                ctx.lanes,
                TaskFailure::RetriesExhausted {
                    attempts: self.attempts,
                    last_reason,
                },
            );
        }
        debug!(agent = %self.agent, attempt = self.attempts, budget = self.retry_budget, "Retrying placement");
        PlacementState::AcquireSite
    }

    fn on_terminal(&mut self, _ctx: &mut BuildContext<'_>, _robot: &mut dyn Robot) -> PlacementState {
        self.state
    }
}

impl HandlesBlockedByRobot for PlacementFsm {
    type Resume = PlacementLeg;

    fn agent(&self) -> AgentId {
        self.agent
    }

    fn wait_slot(&mut self) -> &mut Option<RobotWait<PlacementLeg>> {
        &mut self.traffic
    }

    fn wait_limit(&self) -> u64 {
        self.max_wait_ticks
    }
}

impl Taskable for PlacementFsm {
    fn state_name(&self) -> &'static str {
        self.state.name()
    }

    fn lane(&self) -> Option<LaneId> {
        self.lane
    }

    fn acq_goal(&self) -> Option<AcqGoal> {
        let state = match (&self.traffic, self.state) {
            (Some(wait), PlacementState::WaitForRobot) => wait.resume.state(),
            (_, state) => state,
        };
        match state {
            PlacementState::Start | PlacementState::AcquireSite | PlacementState::Retry => {
                Some(AcqGoal::LaneEntry)
            }
            PlacementState::WaitForRobot | PlacementState::ApproachSite | PlacementState::Place => {
                Some(AcqGoal::PlacementSite)
            }
            PlacementState::Success | PlacementState::Failed | PlacementState::Aborted => None,
        }
    }

    fn status(&self) -> TaskStatus {
        match self.state {
            PlacementState::Success => TaskStatus::Succeeded,
            PlacementState::Failed => {
                TaskStatus::Failed(self.failure.clone().unwrap_or(TaskFailure::Aborted))
            }
            PlacementState::Aborted => TaskStatus::Failed(TaskFailure::Aborted),
            _ => TaskStatus::Running,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockKind;
    use crate::error::PlacementDefect;
    use crate::fsm::mock::{ScriptedRobot, site};
    use crate::geometry::Coord;
    use crate::structure::SharedStructure;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::f64::consts::FRAC_PI_4;
    use uuid::Uuid;

    fn directive(structure: &SharedStructure, x: i64, z_rot: f64) -> BuildDirective {
        BuildDirective {
            structure_id: read_structure(structure).id(),
            target_site: Coord::real_at(x, 1, 0),
            block: BlockKind::Cube,
            z_rot,
        }
    }

    fn run(
        fsm: &mut PlacementFsm,
        structure: &SharedStructure,
        lanes: &LaneAllocator,
        robot: &mut ScriptedRobot,
        max_ticks: usize,
    ) -> TaskStatus {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut ctx = BuildContext {
            structure,
            lanes,
            rng: &mut rng,
        };
        for _ in 0..max_ticks {
            let status = fsm.tick(&mut ctx, robot);
            if status.is_finished() {
                return status;
            }
        }
        fsm.status()
    }

    #[test]
    fn test_places_block_and_releases_lane() {
        let (structure, lanes) = site();
        let agent = Uuid::new_v4();
        let mut fsm = PlacementFsm::new(agent, directive(&structure, 1, 0.0), 3);
        let mut robot = ScriptedRobot::new([]);

        let status = run(&mut fsm, &structure, &lanes, &mut robot, 20);

        assert_eq!(status, TaskStatus::Succeeded);
        assert_eq!(fsm.state(), PlacementState::Success);
        assert!(fsm.placed_block().is_some());
        assert_eq!(lanes.claim_of(agent), None);
        assert_eq!(fsm.acq_goal(), None);

        let s = read_structure(&structure);
        assert!(!s.is_empty_at(Coord::real_at(1, 1, 0)));
        assert_eq!(s.built_cells(), 1);
    }

    #[test]
    fn test_blocked_robot_waits_and_counts_interference() {
        let (structure, lanes) = site();
        let mut fsm = PlacementFsm::new(Uuid::new_v4(), directive(&structure, 0, 0.0), 3);
        let mut robot = ScriptedRobot::new([
            DriveStatus::InProgress,
            DriveStatus::Blocked,
            DriveStatus::Blocked,
            DriveStatus::Blocked,
        ]);

        let status = run(&mut fsm, &structure, &lanes, &mut robot, 30);

        assert_eq!(status, TaskStatus::Succeeded);
        assert_eq!(lanes.history().total_interference(), 3);
    }

    #[test]
    fn test_wait_limit_gives_up_lane_and_counts_attempt() {
        let (structure, lanes) = site();
        let agent = Uuid::new_v4();
        let mut fsm =
            PlacementFsm::new(agent, directive(&structure, 0, 0.0), 3).with_wait_limit(3);
        let mut robot = ScriptedRobot::new([DriveStatus::InProgress, DriveStatus::Blocked]);
        robot.script.extend([DriveStatus::Blocked; 2]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut ctx = BuildContext {
            structure: &structure,
            lanes: &lanes,
            rng: &mut rng,
        };

        for _ in 0..4 {
            fsm.tick(&mut ctx, &mut robot);
        }
        assert_eq!(fsm.state(), PlacementState::WaitForRobot);

        // Third blocked tick reaches the limit
        fsm.tick(&mut ctx, &mut robot);
        assert_eq!(fsm.state(), PlacementState::Retry);
        assert!(!fsm.is_waiting());

        fsm.tick(&mut ctx, &mut robot);
        assert_eq!(fsm.state(), PlacementState::AcquireSite);
        assert_eq!(fsm.attempts(), 1);
        assert_eq!(lanes.claim_of(agent), None);

        let status = run(&mut fsm, &structure, &lanes, &mut robot, 20);
        assert_eq!(status, TaskStatus::Succeeded);
        assert_eq!(lanes.history().total_interference(), 3);
    }

    #[test]
    fn test_endless_block_exhausts_retries() {
        let (structure, lanes) = site();
        let agent = Uuid::new_v4();
        let mut fsm =
            PlacementFsm::new(agent, directive(&structure, 0, 0.0), 1).with_wait_limit(2);
        let mut robot = ScriptedRobot::new([DriveStatus::Blocked; 50]);

        let status = run(&mut fsm, &structure, &lanes, &mut robot, 50);

        match status {
            TaskStatus::Failed(TaskFailure::RetriesExhausted { attempts, last_reason }) => {
                assert_eq!(attempts, 2);
                assert!(last_reason.contains("blocked"));
            }
            other => panic!("expected RetriesExhausted, got {:?}", other),
        }
        assert_eq!(lanes.claim_of(agent), None);
    }

    #[test]
    fn test_without_wait_limit_waits_forever() {
        let (structure, lanes) = site();
        let mut fsm = PlacementFsm::new(Uuid::new_v4(), directive(&structure, 0, 0.0), 1);
        let mut robot = ScriptedRobot::new([DriveStatus::Blocked; 50]);

        let status = run(&mut fsm, &structure, &lanes, &mut robot, 40);

        assert_eq!(status, TaskStatus::Running);
        assert_eq!(fsm.state(), PlacementState::WaitForRobot);
        assert_eq!(fsm.attempts(), 0);
    }

    #[test]
    fn test_wait_resumes_interrupted_leg() {
        let (structure, lanes) = site();
        let mut fsm = PlacementFsm::new(Uuid::new_v4(), directive(&structure, 0, 0.0), 3);
        // Arrive at the lane, then get blocked on the way to the site
        let mut robot = ScriptedRobot::new([DriveStatus::Arrived, DriveStatus::Blocked]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut ctx = BuildContext {
            structure: &structure,
            lanes: &lanes,
            rng: &mut rng,
        };

        fsm.tick(&mut ctx, &mut robot);
        fsm.tick(&mut ctx, &mut robot);
        assert_eq!(fsm.state(), PlacementState::ApproachSite);

        fsm.tick(&mut ctx, &mut robot);
        assert_eq!(fsm.state(), PlacementState::WaitForRobot);
        assert_eq!(fsm.acq_goal(), Some(AcqGoal::PlacementSite));
        assert!(fsm.lane().is_some());

        fsm.tick(&mut ctx, &mut robot);
        assert_eq!(fsm.state(), PlacementState::ApproachSite);
    }

    #[test]
    fn test_occupied_site_exhausts_retries() {
        let (structure, lanes) = site();
        let agent = Uuid::new_v4();
        let d = directive(&structure, 2, 0.0);
        {
            let mut s = write_structure(&structure);
            let intent = PlacementIntent {
                block: d.block,
                site: s.to_virtual(d.target_site),
                z_rot: 0.0,
            };
            s.commit(&intent).unwrap();
        }
        let mut fsm = PlacementFsm::new(agent, d, 2);
        let mut robot = ScriptedRobot::new([]);

        let status = run(&mut fsm, &structure, &lanes, &mut robot, 100);

        assert!(matches!(
            status,
            TaskStatus::Failed(TaskFailure::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(lanes.claim_of(agent), None);
    }

    #[test]
    fn test_bad_rotation_fails_without_retry() {
        let (structure, lanes) = site();
        let mut fsm = PlacementFsm::new(Uuid::new_v4(), directive(&structure, 1, FRAC_PI_4), 3);
        let mut robot = ScriptedRobot::new([]);

        let status = run(&mut fsm, &structure, &lanes, &mut robot, 20);

        assert!(matches!(
            status,
            TaskStatus::Failed(TaskFailure::Fatal(PlacementDefect::BadRotation { .. }))
        ));
        assert_eq!(fsm.attempts(), 0);
        assert_eq!(read_structure(&structure).built_cells(), 0);
    }

    #[test]
    fn test_abort_releases_lane() {
        let (structure, lanes) = site();
        let agent = Uuid::new_v4();
        let mut fsm = PlacementFsm::new(agent, directive(&structure, 1, 0.0), 3);
        let mut robot = ScriptedRobot::new([DriveStatus::InProgress; 5]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let mut ctx = BuildContext {
            structure: &structure,
            lanes: &lanes,
            rng: &mut rng,
        };

        fsm.tick(&mut ctx, &mut robot);
        fsm.tick(&mut ctx, &mut robot);
        assert!(lanes.claim_of(agent).is_some());

        fsm.abort(&lanes);
        assert_eq!(lanes.claim_of(agent), None);
        assert_eq!(fsm.tick(&mut ctx, &mut robot), TaskStatus::Failed(TaskFailure::Aborted));
        assert_eq!(fsm.state(), PlacementState::Aborted);
    }

    #[test]
    fn test_waits_for_perception_before_claiming() {
        let (structure, lanes) = site();
        let agent = Uuid::new_v4();
        let mut fsm = PlacementFsm::new(agent, directive(&structure, 1, 0.0), 3);
        let mut robot = ScriptedRobot::new([]);
        robot.site = None;

        let status = run(&mut fsm, &structure, &lanes, &mut robot, 10);

        assert_eq!(status, TaskStatus::Running);
        assert_eq!(fsm.state(), PlacementState::AcquireSite);
        assert_eq!(lanes.claim_of(agent), None);
        assert_eq!(robot.drives, 0);
    }

    #[test]
    fn test_directive_for_other_structure_fails() {
        let (structure, lanes) = site();
        let mut d = directive(&structure, 1, 0.0);
        d.structure_id = Uuid::new_v4();
        let mut fsm = PlacementFsm::new(Uuid::new_v4(), d, 3);
        let mut robot = ScriptedRobot::new([]);

        let status = run(&mut fsm, &structure, &lanes, &mut robot, 5);

        assert!(matches!(
            status,
            TaskStatus::Failed(TaskFailure::WrongStructure { .. })
        ));
    }
}
