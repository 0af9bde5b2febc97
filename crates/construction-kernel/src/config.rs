//! Configuration types for the construction kernel.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::geometry::{Vec3d, Vec3z};
use crate::lane::LanePolicyKind;

/// Top-level kernel configuration.
///
/// Defines the structure's placement in the world, how lanes are handed out,
/// and how hard builders try before giving up. Loaded from JSON at runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstructionConfig {
    /// Structure geometry
    pub structure: StructureConfig,

    /// Lane allocation
    pub lane_alloc: LaneAllocConfig,

    /// Builder state machine tuning
    pub builder: BuilderConfig,

    /// Automatic placement for seeding partially built structures
    pub static_build: StaticBuildConfig,
}

/// Geometry of the structure's bounding box.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StructureConfig {
    /// Real (buildable) dimensions in cells
    pub dims: Vec3z,

    /// Empty padding around the real box in X and Y; lane entries live here
    pub shell: usize,

    /// Edge length of one cell in world units
    pub unit_dim: f64,

    /// World position of the center of virtual cell (0, 0, 0)
    pub origin: Vec3d,
}

/// Lane allocation configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneAllocConfig {
    /// Policy used to pick a lane for each agent
    pub policy: LanePolicyKind,
}

/// Builder state machine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuilderConfig {
    /// Failed placement attempts tolerated before the task is reported failed
    pub retry_budget: u32,

    /// Consecutive blocked ticks before a builder gives up on its lane
    /// (0 waits forever). A placement counts this as a failed attempt.
    pub max_wait_ticks: u64,
}

/// Static builder configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticBuildConfig {
    /// Ticks between static placements (0 disables)
    pub interval: u64,

    /// Blocks placed each time the interval elapses
    pub count: usize,
}

impl Default for StructureConfig {
    fn default() -> Self {
        Self {
            dims: Vec3z::new(6, 6, 1),
            shell: 1,
            unit_dim: 1.0,
            origin: Vec3d::default(),
        }
    }
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            retry_budget: 3,
            max_wait_ticks: 20,
        }
    }
}

impl StructureConfig {
    /// Dimensions of the padded grid.
    pub fn virtual_dims(&self) -> Vec3z {
        Vec3z::new(
            self.dims.x + 2 * self.shell,
            self.dims.y + 2 * self.shell,
            self.dims.z,
        )
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dims.volume() == 0 {
            return Err(ConfigError::EmptyDims(self.dims));
        }
        if self.shell == 0 {
            return Err(ConfigError::ShellTooThin(self.shell));
        }
        if !(self.unit_dim.is_finite() && self.unit_dim > 0.0) {
            return Err(ConfigError::BadUnitDim(self.unit_dim));
        }
        Ok(())
    }
}

impl ConstructionConfig {
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json).context("Invalid construction config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.structure.validate()
    }
}
