//! Cooperative Construction Experiments
//!
//! Drives the construction kernel with simulated robots in a simple grid
//! world and measures how lane policies cope with growing agent counts.
//!
//! ## Lane Policies
//!
//! - **Round robin**: lanes handed out in turn, ignoring history
//! - **Interference**: each agent gets the lane with the least recorded
//!   blocking so far, ties broken at random

pub mod collectors;
pub mod experiment;
pub mod generator;
pub mod results;
pub mod world;

pub use collectors::{Collector, CollectorRegistry};
pub use experiment::{ExperimentRunner, ExperimentRunnerConfig, TrialSpec, run_trials};
pub use generator::{Difficulty, GeneratorConfig, StructureGenerator};
pub use results::{ExperimentResult, GridResults};
pub use world::{GridWorld, WorldConfig};
