//! Lane allocation policies and the allocator that applies them.

use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ConfigError;

use super::history::LaneHistory;
use super::{AgentId, LaneGeometry, LaneId, LaneSnapshot};

/// Strategy for choosing a lane.
///
/// Policies only read history; counters are updated by the allocator when
/// agents report interference.
pub trait LanePolicy: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Index into `lanes` of the chosen lane. `lanes` is never empty.
    fn select(&self, lanes: &[LaneId], history: &LaneHistory, rng: &mut dyn RngCore) -> usize;
}

/// Cycles through lanes in order, ignoring history.
#[derive(Debug, Default)]
pub struct RoundRobinPolicy {
    next: AtomicUsize,
}

impl LanePolicy for RoundRobinPolicy {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn select(&self, lanes: &[LaneId], _history: &LaneHistory, _rng: &mut dyn RngCore) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed) % lanes.len()
    }
}

/// Picks the lane with the least recorded interference.
///
/// Ties are broken uniformly at random. With no usable history every lane
/// is equally likely.
#[derive(Debug, Default)]
pub struct InterferencePolicy;

impl LanePolicy for InterferencePolicy {
    fn name(&self) -> &'static str {
        "interference"
    }

    fn select(&self, lanes: &[LaneId], history: &LaneHistory, rng: &mut dyn RngCore) -> usize {
        let Some(counts) = history.interference_counts(lanes) else {
            return rng.random_range(0..lanes.len());
        };
        let Some(&min) = counts.iter().min() else {
            return rng.random_range(0..lanes.len());
        };

        let tied: Vec<usize> = counts
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == min)
            .map(|(i, _)| i)
            .collect();
        tied[rng.random_range(0..tied.len())]
    }
}

/// Configuration key for a lane policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanePolicyKind {
    RoundRobin,
    #[default]
    Interference,
}

impl LanePolicyKind {
    pub const ALL: [LanePolicyKind; 2] = [LanePolicyKind::RoundRobin, LanePolicyKind::Interference];

    pub fn key(self) -> &'static str {
        match self {
            LanePolicyKind::RoundRobin => "round_robin",
            LanePolicyKind::Interference => "interference",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.key() == key)
    }

    pub fn build(self) -> Box<dyn LanePolicy> {
        match self {
            LanePolicyKind::RoundRobin => Box::new(RoundRobinPolicy::default()),
            LanePolicyKind::Interference => Box::new(InterferencePolicy),
        }
    }
}

impl std::fmt::Display for LanePolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Hands out lanes to agents and keeps their interference history.
///
/// Safe to share between agents ticking in parallel.
#[derive(Debug)]
pub struct LaneAllocator {
    lanes: Vec<LaneGeometry>,
    ids: Vec<LaneId>,
    history: LaneHistory,
    policy: Box<dyn LanePolicy>,
    /// Active claims: agent -> lane it is using
    claims: DashMap<AgentId, LaneId>,
}

impl LaneAllocator {
    pub fn new(lanes: Vec<LaneGeometry>, policy: Box<dyn LanePolicy>) -> Result<Self, ConfigError> {
        if lanes.is_empty() {
            return Err(ConfigError::NoLanes);
        }
        let ids: Vec<LaneId> = lanes.iter().map(|l| l.id).collect();
        Ok(Self {
            history: LaneHistory::with_lanes(ids.iter().copied()),
            ids,
            lanes,
            policy,
            claims: DashMap::new(),
        })
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    pub fn lanes(&self) -> &[LaneGeometry] {
        &self.lanes
    }

    pub fn lane(&self, id: LaneId) -> Option<&LaneGeometry> {
        self.lanes.iter().find(|l| l.id == id)
    }

    pub fn history(&self) -> &LaneHistory {
        &self.history
    }

    /// Select a lane for `agent`, replacing any lane it already holds.
    pub fn claim(&self, agent: AgentId, rng: &mut dyn RngCore) -> LaneId {
        let previous = self.claims.remove(&agent).map(|(_, lane)| lane);
        let lane = self.ids[self.policy.select(&self.ids, &self.history, rng)];
        self.claims.insert(agent, lane);
        self.history.record_allocation(lane);

        info!(
            agent = %agent,
            lane = %lane,
            previous = ?previous,
            policy = self.policy.name(),
            "Lane claimed"
        );
        lane
    }

    /// Drop the agent's claim. Returns the lane it held, if any.
    pub fn release(&self, agent: AgentId) -> Option<LaneId> {
        let released = self.claims.remove(&agent).map(|(_, lane)| lane);
        if let Some(lane) = released {
            debug!(agent = %agent, lane = %lane, "Lane released");
        }
        released
    }

    pub fn claim_of(&self, agent: AgentId) -> Option<LaneId> {
        self.claims.get(&agent).map(|lane| *lane)
    }

    /// Count one tick of an agent being blocked in `lane`.
    pub fn report_interference(&self, lane: LaneId) {
        self.history.record_interference(lane);
    }

    pub fn occupants(&self, lane: LaneId) -> usize {
        self.claims.iter().filter(|c| *c.value() == lane).count()
    }

    pub fn snapshot(&self) -> Vec<LaneSnapshot> {
        self.ids
            .iter()
            .map(|&lane| {
                let counters = self.history.counters(lane);
                LaneSnapshot {
                    lane,
                    interference: counters.interference,
                    allocations: counters.allocations,
                    occupants: self.occupants(lane),
                }
            })
            .collect()
    }
}
