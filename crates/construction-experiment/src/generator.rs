//! Target structure generator with controlled size and density.
//!
//! Covers a random subset of the real box with non-overlapping cubes and
//! ramps. Density is the fraction of cells the target should cover.

use anyhow::{Result, bail};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use construction_kernel::block::BlockKind;
use construction_kernel::geometry::{Rotation, Vec3i, Vec3z};
use construction_kernel::structure::{StructureTarget, TargetBlock};

/// Configuration for target generation.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Real structure dimensions
    pub dims: Vec3z,
    /// Fraction of cells to cover, in (0, 1]
    pub density: f64,
    /// Probability a block is a ramp when one fits
    pub ramp_ratio: f64,
    /// Random seed for reproducibility (None for random)
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            dims: Vec3z::new(6, 6, 1),
            density: 0.5,
            ramp_ratio: 0.2,
            seed: None,
        }
    }
}

/// Random target generator.
pub struct StructureGenerator {
    config: GeneratorConfig,
}

impl StructureGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    pub fn generate(&self) -> Result<StructureTarget> {
        let dims = self.config.dims;
        if dims.volume() == 0 {
            bail!("Cannot generate a target for empty dimensions {}", dims);
        }
        if !(self.config.density > 0.0 && self.config.density <= 1.0) {
            bail!("Density must be in (0, 1], got {}", self.config.density);
        }
        if !(0.0..=1.0).contains(&self.config.ramp_ratio) {
            bail!("Ramp ratio must be in [0, 1], got {}", self.config.ramp_ratio);
        }

        let mut rng = match self.config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_rng(&mut rand::rng()),
        };

        let bounds = dims.to_signed();
        let mut cells: Vec<Vec3i> = (0..bounds.z)
            .flat_map(|z| (0..bounds.y).flat_map(move |y| (0..bounds.x).map(move |x| Vec3i::new(x, y, z))))
            .collect();
        cells.shuffle(&mut rng);

        let wanted = ((dims.volume() as f64) * self.config.density).ceil() as usize;
        let in_bounds = |c: Vec3i| c.x < bounds.x && c.y < bounds.y;
        let mut covered = std::collections::HashSet::new();
        let mut blocks = Vec::new();

        for anchor in cells {
            if covered.len() >= wanted {
                break;
            }
            if covered.contains(&anchor) {
                continue;
            }

            let mut block = TargetBlock {
                anchor,
                kind: BlockKind::Cube,
                rotation: Rotation::Zero,
            };
            if rng.random_bool(self.config.ramp_ratio) {
                let rotation = *Rotation::ALL.choose(&mut rng).unwrap_or(&Rotation::Zero);
                let footprint = BlockKind::Ramp.footprint(anchor, rotation);
                if footprint.iter().all(|c| in_bounds(*c) && !covered.contains(c)) {
                    block.kind = BlockKind::Ramp;
                    block.rotation = rotation;
                }
            }

            covered.extend(block.kind.footprint(block.anchor, block.rotation));
            blocks.push(block);
        }

        Ok(StructureTarget::new(blocks))
    }
}

/// Size presets for experiments.
#[derive(Debug, Clone, Copy)]
pub enum Difficulty {
    /// 6x6x1, half covered
    Small,
    /// 10x10x1, 60% covered
    Medium,
    /// 16x16x2, 70% covered
    Large,
    Custom { x: usize, y: usize, z: usize, density: f64 },
}

impl Difficulty {
    pub fn config(self) -> GeneratorConfig {
        let (dims, density) = match self {
            Difficulty::Small => (Vec3z::new(6, 6, 1), 0.5),
            Difficulty::Medium => (Vec3z::new(10, 10, 1), 0.6),
            Difficulty::Large => (Vec3z::new(16, 16, 2), 0.7),
            Difficulty::Custom { x, y, z, density } => (Vec3z::new(x, y, z), density),
        };
        GeneratorConfig {
            dims,
            density,
            ..GeneratorConfig::default()
        }
    }

    pub fn generator(self) -> StructureGenerator {
        StructureGenerator::new(self.config())
    }
}
