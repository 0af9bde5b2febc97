//! A minimal simulated world for builder robots.
//!
//! Robots move in straight lines at constant speed. A robot is blocked when
//! its next step would bring it within clearance of another active robot
//! ahead of it. A robot gives way to one ahead unless that robot is facing it
//! or is itself stuck, in which case the lower index has right of way. A
//! blocked robot still turns toward where it wants to go, so two robots that
//! start nose to nose from a standstill sort themselves out on the next tick.
//! Idle robots are parked in a nest below the structure and never block
//! anyone.

use construction_kernel::fsm::{DriveStatus, Locomotion, Perception};
use construction_kernel::geometry::{Coord, Vec3d, Vec3i};
use construction_kernel::lane::AgentId;
use construction_kernel::structure::Structure;

/// World tuning, in cell units.
#[derive(Debug, Clone)]
pub struct WorldConfig {
    /// Distance covered per tick
    pub speed: f64,
    /// Minimum spacing between robots
    pub clearance: f64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            speed: 0.5,
            clearance: 0.75,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RobotBody {
    pub id: AgentId,
    pub position: Vec3d,
    /// Direction the robot last tried to move in
    pub heading: Vec3d,
    /// Whether the last step was refused
    pub blocked: bool,
    pub active: bool,
    /// Site the robot is currently looking at
    pub site: Option<Coord>,
    nest: Vec3d,
}

#[derive(Debug, Clone)]
pub struct GridWorld {
    speed: f64,
    clearance: f64,
    bodies: Vec<RobotBody>,
}

impl GridWorld {
    /// One parked robot per agent, nests spread along the rows below the shell.
    pub fn new(config: &WorldConfig, structure: &Structure, agents: &[AgentId]) -> Self {
        let unit = structure.unit_dim();
        let row = structure.virtual_dims().x.max(1);
        let bodies = agents
            .iter()
            .enumerate()
            .map(|(i, &id)| {
                let nest = structure.cell_center(Vec3i::new(
                    (i % row) as i64,
                    -1 - (i / row) as i64,
                    0,
                ));
                RobotBody {
                    id,
                    position: nest,
                    heading: Vec3d::default(),
                    blocked: false,
                    active: false,
                    site: None,
                    nest,
                }
            })
            .collect();
        Self {
            speed: config.speed * unit,
            clearance: config.clearance * unit,
            bodies,
        }
    }

    pub fn body(&self, index: usize) -> &RobotBody {
        &self.bodies[index]
    }

    /// Wake a robot in its nest and point it at a site.
    pub fn activate(&mut self, index: usize, site: Coord) {
        let body = &mut self.bodies[index];
        body.position = body.nest;
        body.heading = Vec3d::default();
        body.blocked = false;
        body.active = true;
        body.site = Some(site);
    }

    /// Send a robot back to its nest.
    pub fn park(&mut self, index: usize) {
        let body = &mut self.bodies[index];
        body.position = body.nest;
        body.blocked = false;
        body.active = false;
        body.site = None;
    }

    /// Locomotion and perception for one robot.
    pub fn robot(&mut self, index: usize) -> RobotView<'_> {
        RobotView { world: self, index }
    }

    fn step(&mut self, index: usize, target: Vec3d) -> DriveStatus {
        let me = &self.bodies[index];
        let to_target = target - me.position;
        let dist = to_target.length();
        if dist <= f64::EPSILON {
            return DriveStatus::Arrived;
        }

        let dir = to_target.normalized();
        let arriving = dist <= self.speed;
        let next = if arriving {
            target
        } else {
            me.position + dir * self.speed
        };

        let blocked = self.bodies.iter().enumerate().any(|(j, other)| {
            if j == index || !other.active {
                return false;
            }
            if (other.position - me.position).dot(dir) <= 0.0 {
                return false;
            }
            if other.position.distance(next) >= self.clearance {
                return false;
            }
            let head_on = other.heading.dot(me.position - other.position) > 0.0;
            !(index < j && (head_on || other.blocked))
        });

        let body = &mut self.bodies[index];
        body.heading = dir;
        body.blocked = blocked;
        if blocked {
            return DriveStatus::Blocked;
        }
        body.position = next;
        if arriving {
            DriveStatus::Arrived
        } else {
            DriveStatus::InProgress
        }
    }
}

/// Borrowed handle giving a state machine control of one robot.
pub struct RobotView<'a> {
    world: &'a mut GridWorld,
    index: usize,
}

impl Locomotion for RobotView<'_> {
    fn drive_toward(&mut self, target: Vec3d) -> DriveStatus {
        self.world.step(self.index, target)
    }

    fn current_position(&self) -> Vec3d {
        self.world.bodies[self.index].position
    }
}

impl Perception for RobotView<'_> {
    fn nearest_relevant_site(&self) -> Option<Coord> {
        self.world.bodies[self.index].site
    }
}
