//! Experiment runner for cooperative construction.
//!
//! Orchestrates the experiment lifecycle:
//! 1. Generate a target structure
//! 2. Set up the construction site and the grid world
//! 3. Tick every agent until the structure is finished or max ticks
//! 4. Collect metrics and snapshots

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::future::join_all;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use construction_kernel::fsm::HandlesBlockedByRobot;
use construction_kernel::geometry::Coord;
use construction_kernel::structure::read_structure;
use construction_kernel::{
    AgentId, BuildDirective, ConstructionConfig, ConstructionSite, EgressFsm, LanePolicyKind,
    PlacementFsm, TaskStatus,
};

use crate::collectors::CollectorRegistry;
use crate::generator::Difficulty;
use crate::results::{ExperimentConfig, ExperimentResult, TickMetrics};
use crate::world::{GridWorld, WorldConfig};

/// Configuration for the experiment runner.
#[derive(Debug, Clone)]
pub struct ExperimentRunnerConfig {
    /// Maximum ticks before giving up
    pub max_ticks: usize,
    /// Target size and density
    pub difficulty: Difficulty,
    /// Kernel settings; structure dims are taken from the generated target
    pub construction: ConstructionConfig,
    pub world: WorldConfig,
    /// Collector keys snapshotted at the end of each run
    pub collectors: Vec<String>,
}

impl Default for ExperimentRunnerConfig {
    fn default() -> Self {
        Self {
            max_ticks: 500,
            difficulty: Difficulty::Small,
            construction: ConstructionConfig::default(),
            world: WorldConfig::default(),
            collectors: vec![
                "structure::progress".to_string(),
                "structure::subtargets".to_string(),
                "lane_alloc".to_string(),
            ],
        }
    }
}

/// One run in a batch.
#[derive(Debug, Clone, Copy)]
pub struct TrialSpec {
    pub policy: LanePolicyKind,
    pub agent_count: usize,
    pub trial: usize,
    pub seed: Option<u64>,
}

/// What an agent is doing.
#[derive(Debug, Default)]
enum AgentTask {
    #[default]
    Idle,
    Placing(PlacementFsm),
    Egressing(EgressFsm),
}

#[derive(Debug)]
struct Agent {
    id: AgentId,
    task: AgentTask,
}

/// Running totals for one experiment.
#[derive(Debug, Default)]
struct RunTally {
    failures: usize,
    unenforced: usize,
    reasons: HashMap<String, usize>,
}

impl RunTally {
    fn record_failure(&mut self, reason: &str) {
        self.failures += 1;
        *self.reasons.entry(reason.to_string()).or_default() += 1;
    }
}

/// Runs construction experiments.
pub struct ExperimentRunner {
    config: ExperimentRunnerConfig,
    collectors: CollectorRegistry,
}

impl ExperimentRunner {
    pub fn new(config: ExperimentRunnerConfig) -> Self {
        Self {
            config,
            collectors: CollectorRegistry::new(),
        }
    }

    /// Use a custom collector registry.
    pub fn with_collectors(mut self, collectors: CollectorRegistry) -> Self {
        self.collectors = collectors;
        self
    }

    pub fn config(&self) -> &ExperimentRunnerConfig {
        &self.config
    }

    /// Run a single experiment to completion or max ticks.
    pub fn run(
        &self,
        policy: LanePolicyKind,
        agent_count: usize,
        trial: usize,
        seed: Option<u64>,
    ) -> Result<ExperimentResult> {
        let started_at = Utc::now();
        // Unknown keys fail before any work is done
        self.collectors.resolve(&self.config.collectors)?;

        let mut gen_config = self.config.difficulty.config();
        gen_config.seed = seed;
        let dims = gen_config.dims;
        let target = crate::generator::StructureGenerator::new(gen_config).generate()?;

        let mut construction = self.config.construction.clone();
        construction.structure.dims = dims;
        construction.lane_alloc.policy = policy;
        let site = ConstructionSite::new(construction, &target)
            .context("Failed to set up construction site")?;

        let mut rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_rng(&mut rand::rng()),
        };

        let structure_id = site.progress().structure_id;
        let mut agents: Vec<Agent> = (0..agent_count)
            .map(|i| Agent {
                id: Uuid::new_v5(&structure_id, format!("agent:{i}").as_bytes()),
                task: AgentTask::Idle,
            })
            .collect();
        let ids: Vec<AgentId> = agents.iter().map(|a| a.id).collect();
        let mut world = {
            let structure = read_structure(site.structure());
            GridWorld::new(&self.config.world, &structure, &ids)
        };

        let total_cells = site.progress().total_cells;
        info!(
            policy = %policy,
            agents = agent_count,
            dims = %dims,
            cells = total_cells,
            trial = trial,
            "Starting experiment"
        );

        let mut tally = RunTally::default();
        let mut assigned: HashSet<Coord> = HashSet::new();
        let mut tick_metrics = Vec::new();
        let mut completed = false;
        let mut ticks = 0;

        for tick in 1..=self.config.max_ticks {
            let tick_start = Instant::now();
            ticks = tick;

            let seeded = site.static_build(tick as u64)?;
            if seeded > 0 {
                debug!(tick = tick, blocks = seeded, "Static build");
            }

            let mut waiting = 0;
            for (index, agent) in agents.iter_mut().enumerate() {
                let task = std::mem::take(&mut agent.task);
                agent.task = match task {
                    AgentTask::Idle => match next_directive(&site, &assigned) {
                        Some(directive) => {
                            assigned.insert(directive.target_site);
                            world.activate(index, directive.target_site);
                            AgentTask::Placing(site.placement_fsm(agent.id, directive))
                        }
                        None => AgentTask::Idle,
                    },
                    AgentTask::Placing(mut fsm) => {
                        let mut ctx = site.context(&mut rng);
                        let status = fsm.tick(&mut ctx, &mut world.robot(index));
                        if fsm.is_waiting() {
                            waiting += 1;
                        }
                        match status {
                            TaskStatus::Running => AgentTask::Placing(fsm),
                            TaskStatus::Succeeded => {
                                if fsm.accepted_unenforced() {
                                    tally.unenforced += 1;
                                }
                                assigned.remove(&fsm.directive().target_site);
                                AgentTask::Egressing(site.egress_fsm(agent.id))
                            }
                            TaskStatus::Failed(failure) => {
                                debug!(agent = %agent.id, tick = tick, reason = failure.kind(), "Placement task ended in failure");
                                tally.record_failure(failure.kind());
                                assigned.remove(&fsm.directive().target_site);
                                AgentTask::Egressing(site.egress_fsm(agent.id))
                            }
                        }
                    }
                    AgentTask::Egressing(mut fsm) => {
                        let mut ctx = site.context(&mut rng);
                        let status = fsm.tick(&mut ctx, &mut world.robot(index));
                        if fsm.is_waiting() {
                            waiting += 1;
                        }
                        match status {
                            TaskStatus::Running => AgentTask::Egressing(fsm),
                            TaskStatus::Succeeded => {
                                world.park(index);
                                AgentTask::Idle
                            }
                            TaskStatus::Failed(failure) => {
                                warn!(agent = %agent.id, tick = tick, error = %failure, "Egress failed");
                                world.park(index);
                                AgentTask::Idle
                            }
                        }
                    }
                };
            }

            let progress = site.progress();
            let active = agents
                .iter()
                .filter(|a| !matches!(a.task, AgentTask::Idle))
                .count();
            tick_metrics.push(TickMetrics {
                tick,
                built_cells: progress.built_cells,
                blocks_placed: progress.blocks_placed,
                active_agents: active,
                waiting_agents: waiting,
                interference: site.lanes().history().total_interference(),
                failures: tally.failures,
                duration_us: tick_start.elapsed().as_micros() as u64,
            });

            if site.is_complete() && active == 0 {
                info!(tick = tick, "Structure complete");
                completed = true;
                break;
            }
        }

        if !completed {
            info!(tick = ticks, "Max ticks reached");
        }

        for agent in &mut agents {
            match &mut agent.task {
                AgentTask::Placing(fsm) => fsm.abort(site.lanes()),
                AgentTask::Egressing(fsm) => fsm.abort(site.lanes()),
                AgentTask::Idle => {}
            }
        }

        let progress = site.progress();
        let lane_interference = site
            .lane_snapshot()
            .iter()
            .map(|lane| lane.interference)
            .collect();
        let snapshots = self.collectors.collect(&self.config.collectors, &site)?;

        info!(
            policy = %policy,
            agents = agent_count,
            ticks = ticks,
            completed = completed,
            built = progress.built_cells,
            total = progress.total_cells,
            failures = tally.failures,
            "Experiment finished"
        );

        Ok(ExperimentResult {
            config: ExperimentConfig {
                policy: policy.key().to_string(),
                agent_count,
                dims,
                target_cells: total_cells,
                trial,
                seed,
            },
            started_at,
            ended_at: Utc::now(),
            total_ticks: ticks,
            completed,
            built_cells: progress.built_cells,
            total_cells: progress.total_cells,
            blocks_placed: progress.blocks_placed,
            placement_failures: tally.failures,
            unenforced_placements: tally.unenforced,
            total_interference: site.lanes().history().total_interference(),
            lane_interference,
            failure_reasons: tally.reasons,
            snapshots,
            tick_metrics,
        })
    }
}

/// First empty anchor no other agent is working on.
fn next_directive(site: &ConstructionSite, assigned: &HashSet<Coord>) -> Option<BuildDirective> {
    let structure = read_structure(site.structure());
    structure
        .anchor_specs()
        .find(|(site_coord, _)| !assigned.contains(site_coord) && structure.is_empty_at(*site_coord))
        .map(|(target_site, spec)| BuildDirective {
            structure_id: structure.id(),
            target_site,
            block: spec.kind,
            z_rot: spec.rotation.radians(),
        })
}

/// Run a batch of trials concurrently on the blocking pool.
///
/// Results come back in the order the trials were given.
pub async fn run_trials(
    runner: Arc<ExperimentRunner>,
    trials: Vec<TrialSpec>,
) -> Result<Vec<ExperimentResult>> {
    let handles: Vec<_> = trials
        .into_iter()
        .map(|spec| {
            let runner = Arc::clone(&runner);
            tokio::task::spawn_blocking(move || {
                runner.run(spec.policy, spec.agent_count, spec.trial, spec.seed)
            })
        })
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for joined in join_all(handles).await {
        results.push(joined.context("Trial panicked")??);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(max_ticks: usize) -> ExperimentRunner {
        ExperimentRunner::new(ExperimentRunnerConfig {
            max_ticks,
            difficulty: Difficulty::Custom {
                x: 4,
                y: 4,
                z: 1,
                density: 0.5,
            },
            ..Default::default()
        })
    }

    #[test]
    fn test_single_agent_completes() {
        let result = runner(400)
            .run(LanePolicyKind::RoundRobin, 1, 0, Some(3))
            .unwrap();

        assert!(result.completed);
        assert_eq!(result.built_cells, result.total_cells);
        assert_eq!(result.total_interference, 0);
        assert_eq!(result.placement_failures, 0);
        assert_eq!(result.tick_metrics.len(), result.total_ticks);
        assert!(result.snapshots.contains_key("lane_alloc"));
    }

    #[test]
    fn test_progress_is_monotonic() {
        let result = runner(1500)
            .run(LanePolicyKind::Interference, 3, 0, Some(11))
            .unwrap();

        let built: Vec<usize> = result.tick_metrics.iter().map(|m| m.built_cells).collect();
        assert!(built.windows(2).all(|w| w[0] <= w[1]));
        assert!(result.completed);
        assert_eq!(result.built_cells, result.total_cells);
        assert_eq!(
            result.lane_interference.iter().sum::<u64>(),
            result.total_interference
        );
    }

    #[test]
    fn test_many_agents_finish_the_structure() {
        let runner = ExperimentRunner::new(ExperimentRunnerConfig {
            max_ticks: 3000,
            ..Default::default()
        });
        for policy in LanePolicyKind::ALL {
            for seed in 0..3 {
                let result = runner.run(policy, 4, 0, Some(seed)).unwrap();
                assert!(
                    result.completed,
                    "{} seed {} stalled at {}/{} cells",
                    policy, seed, result.built_cells, result.total_cells
                );
                assert_eq!(result.tick_metrics.last().map(|m| m.active_agents), Some(0));
            }
        }
    }

    #[test]
    fn test_max_ticks_stops_run() {
        let result = runner(2)
            .run(LanePolicyKind::RoundRobin, 2, 0, Some(1))
            .unwrap();
        assert!(!result.completed);
        assert_eq!(result.total_ticks, 2);
    }

    #[test]
    fn test_unknown_collector_fails_early() {
        let runner = ExperimentRunner::new(ExperimentRunnerConfig {
            collectors: vec!["nope".to_string()],
            ..Default::default()
        });
        assert!(runner.run(LanePolicyKind::RoundRobin, 1, 0, Some(1)).is_err());
    }
}
