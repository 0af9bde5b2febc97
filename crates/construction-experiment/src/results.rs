//! Results collection and output for construction experiments.
//!
//! Captures metrics like:
//! - Ticks to completion
//! - Cells built per tick
//! - Interference per lane
//! - Placement failures by reason

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use construction_kernel::geometry::Vec3z;

/// Results from a single experiment run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentResult {
    /// Experiment configuration
    pub config: ExperimentConfig,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Total ticks executed
    pub total_ticks: usize,
    /// Whether the structure was finished
    pub completed: bool,
    pub built_cells: usize,
    pub total_cells: usize,
    pub blocks_placed: usize,
    /// Placement tasks that ended in failure
    pub placement_failures: usize,
    /// Placements accepted without full rule enforcement
    pub unenforced_placements: usize,
    /// Blocked ticks summed over all lanes
    pub total_interference: u64,
    /// Interference per lane, by lane index
    pub lane_interference: Vec<u64>,
    /// Failure count by reason
    pub failure_reasons: HashMap<String, usize>,
    /// End-of-run snapshots from the enabled collectors
    #[serde(default)]
    pub snapshots: BTreeMap<String, Value>,
    /// Per-tick metrics
    pub tick_metrics: Vec<TickMetrics>,
}

/// Configuration for an experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Lane policy key
    pub policy: String,
    /// Number of agents
    pub agent_count: usize,
    /// Real structure dimensions
    pub dims: Vec3z,
    /// Cells the target covers
    pub target_cells: usize,
    /// Trial number (for repeated experiments)
    pub trial: usize,
    /// Random seed (if reproducible)
    pub seed: Option<u64>,
}

/// Metrics for a single tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickMetrics {
    pub tick: usize,
    pub built_cells: usize,
    pub blocks_placed: usize,
    /// Agents with a placement or egress task
    pub active_agents: usize,
    /// Agents waiting on another robot
    pub waiting_agents: usize,
    /// Cumulative interference
    pub interference: u64,
    /// Cumulative failed placement tasks
    pub failures: usize,
    pub duration_us: u64,
}

impl ExperimentResult {
    pub fn completion(&self) -> f64 {
        if self.total_cells == 0 {
            1.0
        } else {
            self.built_cells as f64 / self.total_cells as f64
        }
    }
}

/// Aggregate results from a grid experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridResults {
    /// All individual results
    pub results: Vec<ExperimentResult>,
    /// Summary statistics by configuration
    pub summary: HashMap<String, ConfigSummary>,
}

/// Summary statistics for a configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub config_key: String,
    pub trials: usize,
    pub completion_rate: f64,
    /// Standard error of completion rate: sqrt(p(1-p)/n)
    pub completion_rate_se: f64,
    /// 95% confidence interval for completion rate: (lower, upper)
    pub completion_rate_ci: (f64, f64),
    pub avg_ticks: f64,
    /// Standard error of avg_ticks
    pub avg_ticks_se: f64,
    pub avg_interference: f64,
    pub avg_failures: f64,
    pub min_ticks: usize,
    pub max_ticks: usize,
}

impl GridResults {
    pub fn new() -> Self {
        Self {
            results: Vec::new(),
            summary: HashMap::new(),
        }
    }

    pub fn add(&mut self, result: ExperimentResult) {
        self.results.push(result);
    }

    /// Configuration key a result is summarized under.
    pub fn config_key(config: &ExperimentConfig) -> String {
        format!("{}:agents={}", config.policy, config.agent_count)
    }

    /// Compute summary statistics.
    pub fn compute_summary(&mut self) {
        let mut by_config: HashMap<String, Vec<&ExperimentResult>> = HashMap::new();
        for result in &self.results {
            by_config
                .entry(Self::config_key(&result.config))
                .or_default()
                .push(result);
        }

        self.summary.clear();
        for (key, results) in by_config {
            let trials = results.len();
            let n = trials as f64;
            let completed = results.iter().filter(|r| r.completed).count();
            let completion_rate = completed as f64 / n;

            // SE for a proportion
            let completion_rate_se = if trials > 1 {
                (completion_rate * (1.0 - completion_rate) / n).sqrt()
            } else {
                0.0
            };

            // 95% CI clamped to [0, 1]
            let z = 1.96;
            let completion_rate_ci = (
                (completion_rate - z * completion_rate_se).max(0.0),
                (completion_rate + z * completion_rate_se).min(1.0),
            );

            let ticks: Vec<f64> = results.iter().map(|r| r.total_ticks as f64).collect();
            let avg_ticks = ticks.iter().sum::<f64>() / n;
            let avg_ticks_se = if trials > 1 {
                let variance =
                    ticks.iter().map(|t| (t - avg_ticks).powi(2)).sum::<f64>() / (n - 1.0);
                variance.sqrt() / n.sqrt()
            } else {
                0.0
            };

            let min_ticks = results.iter().map(|r| r.total_ticks).min().unwrap_or(0);
            let max_ticks = results.iter().map(|r| r.total_ticks).max().unwrap_or(0);
            let avg_interference =
                results.iter().map(|r| r.total_interference as f64).sum::<f64>() / n;
            let avg_failures =
                results.iter().map(|r| r.placement_failures as f64).sum::<f64>() / n;

            self.summary.insert(
                key.clone(),
                ConfigSummary {
                    config_key: key,
                    trials,
                    completion_rate,
                    completion_rate_se,
                    completion_rate_ci,
                    avg_ticks,
                    avg_ticks_se,
                    avg_interference,
                    avg_failures,
                    min_ticks,
                    max_ticks,
                },
            );
        }
    }

    /// Save results to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write results to {}", path.display()))?;
        Ok(())
    }

    /// Load results from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read results from {}", path.display()))?;
        let results = serde_json::from_str(&json)?;
        Ok(results)
    }
}

impl Default for GridResults {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a duration in milliseconds for display.
pub fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{:.1}m", ms as f64 / 60_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(policy: &str, trial: usize, completed: bool) -> ExperimentResult {
        ExperimentResult {
            config: ExperimentConfig {
                policy: policy.to_string(),
                agent_count: 4,
                dims: Vec3z::new(6, 6, 1),
                target_cells: 18,
                trial,
                seed: Some(trial as u64),
            },
            started_at: Utc::now(),
            ended_at: Utc::now(),
            total_ticks: 100 + trial * 10,
            completed,
            built_cells: if completed { 18 } else { 12 },
            total_cells: 18,
            blocks_placed: 15,
            placement_failures: trial,
            unenforced_placements: 0,
            total_interference: 6,
            lane_interference: vec![2, 2, 2],
            failure_reasons: HashMap::new(),
            snapshots: BTreeMap::new(),
            tick_metrics: vec![],
        }
    }

    #[test]
    fn test_grid_results_summary() {
        let mut results = GridResults::new();
        for trial in 0..3 {
            results.add(result("interference", trial, trial < 2));
        }
        results.add(result("round_robin", 0, true));
        results.compute_summary();

        let summary = results.summary.get("interference:agents=4").unwrap();
        assert_eq!(summary.trials, 3);
        assert!((summary.completion_rate - 0.666).abs() < 0.01);
        assert!(summary.completion_rate_se > 0.0);
        assert!(summary.completion_rate_ci.0 <= summary.completion_rate);
        assert!(summary.completion_rate_ci.1 >= summary.completion_rate);
        assert_eq!(summary.min_ticks, 100);
        assert_eq!(summary.max_ticks, 120);
        assert!((summary.avg_failures - 1.0).abs() < 1e-9);

        let single = results.summary.get("round_robin:agents=4").unwrap();
        assert_eq!(single.trials, 1);
        assert_eq!(single.completion_rate_se, 0.0);
    }

    #[test]
    fn test_completion_fraction() {
        assert!((result("interference", 0, false).completion() - 12.0 / 18.0).abs() < 1e-9);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(250), "250ms");
        assert_eq!(format_duration(1500), "1.5s");
        assert_eq!(format_duration(90_000), "1.5m");
    }
}
