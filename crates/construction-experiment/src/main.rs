//! Cooperative Construction Experiment CLI.
//!
//! Commands:
//! - single: Run a single experiment
//! - grid: Run full grid experiment (policies × agent counts × trials)
//! - generate: Generate and display a target structure

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use construction_experiment::experiment::{
    ExperimentRunner, ExperimentRunnerConfig, TrialSpec, run_trials,
};
use construction_experiment::generator::{Difficulty, StructureGenerator};
use construction_experiment::results::{GridResults, format_duration};
use construction_kernel::structure::Structure;
use construction_kernel::{ConstructionConfig, LanePolicyKind};

/// Generate a timestamped output path from the given path.
/// e.g., "results.json" -> "results-20260108-010530.json"
fn timestamped_path(path: &Path) -> PathBuf {
    let timestamp = Local::now().format("%Y%m%d-%H%M%S");
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("results");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("json");
    let parent = path.parent().unwrap_or(Path::new("."));
    parent.join(format!("{}-{}.{}", stem, timestamp, ext))
}

#[derive(Parser)]
#[command(name = "construction-experiment")]
#[command(version)]
#[command(about = "Multi-agent cooperative construction experiments")]
struct Cli {
    /// Kernel configuration (JSON); defaults are used when omitted
    #[arg(long, env = "CONSTRUCTION_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single experiment
    Single {
        /// Lane policy to use
        #[arg(long, default_value = "interference")]
        policy: String,

        /// Number of agents
        #[arg(long, default_value = "4")]
        agents: usize,

        /// Target size: small, medium or large
        #[arg(long, default_value = "small")]
        difficulty: String,

        /// Maximum ticks
        #[arg(long, default_value = "500")]
        max_ticks: usize,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Run grid experiment
    Grid {
        /// Number of trials per configuration
        #[arg(long, default_value = "5")]
        trials: usize,

        /// Target size: small, medium or large
        #[arg(long, default_value = "small")]
        difficulty: String,

        /// Maximum ticks
        #[arg(long, default_value = "500")]
        max_ticks: usize,

        /// Output file for results
        #[arg(long, default_value = "results.json")]
        output: PathBuf,

        /// Agent counts to test (comma-separated)
        #[arg(long, default_value = "1,2,4,8", value_delimiter = ',')]
        agents: Vec<usize>,

        /// Policies to test (comma-separated). Default: all
        /// Valid: round_robin, interference
        #[arg(long, value_delimiter = ',')]
        policies: Option<Vec<String>>,
    },

    /// Generate and display a target structure
    Generate {
        /// Target size: small, medium or large
        #[arg(long, default_value = "small")]
        difficulty: String,

        /// Override the preset density
        #[arg(long)]
        density: Option<f64>,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,

        /// Write the target as JSON
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn parse_policy(s: &str) -> Result<LanePolicyKind> {
    match LanePolicyKind::from_key(&s.to_lowercase().replace('-', "_")) {
        Some(kind) => Ok(kind),
        None => bail!("Unknown policy: {}. Valid: round_robin, interference", s),
    }
}

fn parse_difficulty(s: &str) -> Result<Difficulty> {
    match s.to_lowercase().as_str() {
        "small" => Ok(Difficulty::Small),
        "medium" => Ok(Difficulty::Medium),
        "large" => Ok(Difficulty::Large),
        _ => bail!("Unknown difficulty: {}. Valid: small, medium, large", s),
    }
}

fn load_construction_config(path: Option<&Path>) -> Result<ConstructionConfig> {
    match path {
        Some(path) => ConstructionConfig::from_json_file(path),
        None => Ok(ConstructionConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let construction = load_construction_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Single {
            policy,
            agents,
            difficulty,
            max_ticks,
            seed,
        } => {
            let policy = parse_policy(&policy)?;
            let config = ExperimentRunnerConfig {
                max_ticks,
                difficulty: parse_difficulty(&difficulty)?,
                construction,
                ..Default::default()
            };

            let runner = Arc::new(ExperimentRunner::new(config));
            let spec = TrialSpec {
                policy,
                agent_count: agents,
                trial: 0,
                seed,
            };
            let result = tokio::task::spawn_blocking(move || {
                runner.run(spec.policy, spec.agent_count, spec.trial, spec.seed)
            })
            .await
            .context("Experiment panicked")??;

            let elapsed = (result.ended_at - result.started_at).num_milliseconds().max(0) as u64;
            println!("\n=== Experiment Result ===");
            println!("Policy: {}", result.config.policy);
            println!("Agents: {}", result.config.agent_count);
            println!(
                "Structure: {} with {} target cells",
                result.config.dims, result.config.target_cells
            );
            println!("Completed: {}", result.completed);
            println!("Ticks: {}", result.total_ticks);
            println!("Built: {}/{} cells", result.built_cells, result.total_cells);
            println!("Blocks placed: {}", result.blocks_placed);
            println!("Wall time: {}", format_duration(elapsed));

            println!("\nInterference:");
            println!("  Total: {}", result.total_interference);
            for (lane, count) in result.lane_interference.iter().enumerate() {
                println!("  lane{}: {}", lane, count);
            }

            if result.placement_failures > 0 || result.unenforced_placements > 0 {
                println!("\nPlacements:");
                println!("  Failed tasks: {}", result.placement_failures);
                for (reason, count) in &result.failure_reasons {
                    println!("    {}: {}", reason, count);
                }
                println!("  Accepted unenforced: {}", result.unenforced_placements);
            }

            println!("\nPer-Tick Metrics (every 10th):");
            println!(
                "  {:>5} {:>6} {:>6} {:>6} {:>7} {:>8}",
                "Tick", "Built", "Blocks", "Active", "Waiting", "Interf"
            );
            for tm in result
                .tick_metrics
                .iter()
                .filter(|tm| tm.tick % 10 == 0 || tm.tick == result.total_ticks)
            {
                println!(
                    "  {:>5} {:>6} {:>6} {:>6} {:>7} {:>8}",
                    tm.tick,
                    tm.built_cells,
                    tm.blocks_placed,
                    tm.active_agents,
                    tm.waiting_agents,
                    tm.interference
                );
            }
        }

        Commands::Grid {
            trials,
            difficulty,
            max_ticks,
            output,
            agents,
            policies: policy_filter,
        } => {
            let policies: Vec<LanePolicyKind> = match policy_filter {
                Some(names) => names
                    .iter()
                    .map(|s| parse_policy(s))
                    .collect::<Result<_>>()?,
                None => LanePolicyKind::ALL.to_vec(),
            };

            let config = ExperimentRunnerConfig {
                max_ticks,
                difficulty: parse_difficulty(&difficulty)?,
                construction,
                ..Default::default()
            };
            let runner = Arc::new(ExperimentRunner::new(config));

            let mut specs = Vec::new();
            for &policy in &policies {
                for &agent_count in &agents {
                    for trial in 0..trials {
                        specs.push(TrialSpec {
                            policy,
                            agent_count,
                            trial,
                            seed: Some(trial as u64),
                        });
                    }
                }
            }

            info!(
                trials = trials,
                runs = specs.len(),
                difficulty = %difficulty,
                "Starting grid experiment"
            );

            let mut results = GridResults::new();
            for result in run_trials(runner, specs).await? {
                results.add(result);
            }

            results.compute_summary();
            let output_path = timestamped_path(&output);
            results.save(&output_path)?;

            println!("\n=== Grid Experiment Complete ===");
            println!("Results saved to: {}", output_path.display());
            println!("\nSummary:");
            let mut keys: Vec<_> = results.summary.keys().collect();
            keys.sort();
            for key in keys {
                let summary = &results.summary[key];
                println!(
                    "  {}: completion_rate={:.1}%, avg_ticks={:.1}±{:.1}, avg_interference={:.1}",
                    key,
                    summary.completion_rate * 100.0,
                    summary.avg_ticks,
                    summary.avg_ticks_se,
                    summary.avg_interference
                );
            }
        }

        Commands::Generate {
            difficulty,
            density,
            seed,
            output,
        } => {
            let mut gen_config = parse_difficulty(&difficulty)?.config();
            if let Some(density) = density {
                gen_config.density = density;
            }
            gen_config.seed = seed;
            let dims = gen_config.dims;
            let target = StructureGenerator::new(gen_config).generate()?;

            let mut structure_config = construction.structure.clone();
            structure_config.dims = dims;
            let structure = Structure::new(&structure_config, &target)?;

            println!("Target {} ({} blocks, {} cells):", dims, target.blocks.len(), structure.total_cells());
            println!("{}", structure);

            if let Some(path) = output {
                target.save(&path)?;
                println!("Saved to {}", path.display());
            }
        }
    }

    Ok(())
}
