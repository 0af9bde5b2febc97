//! Static builder: places blocks on a fixed schedule without an agent.
//!
//! Used to seed partially built structures. Goes through the same
//! validate-then-commit path as the builder machines.

use tracing::{debug, warn};

use crate::config::StaticBuildConfig;
use crate::error::PlacementDefect;
use crate::validate::{PlacementIntent, validate_placement};

use super::Structure;

#[derive(Debug, Clone)]
pub struct StaticBuilder {
    interval: u64,
    count: usize,
}

impl StaticBuilder {
    pub fn new(config: &StaticBuildConfig) -> Self {
        Self {
            interval: config.interval,
            count: config.count,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.interval > 0 && self.count > 0
    }

    /// Place up to `count` unbuilt anchors, in spec order, when `tick` lands
    /// on the interval. Returns the number of blocks placed.
    pub fn update(&self, structure: &mut Structure, tick: u64) -> Result<usize, PlacementDefect> {
        if !self.is_enabled() || tick == 0 || tick % self.interval != 0 {
            return Ok(0);
        }

        let candidates: Vec<PlacementIntent> = structure
            .anchor_specs()
            .filter(|(site, _)| structure.is_empty_at(*site))
            .map(|(site, spec)| PlacementIntent {
                block: spec.kind,
                site: structure.to_virtual(site),
                z_rot: spec.rotation.radians(),
            })
            .collect();

        let mut placed = 0;
        for intent in candidates {
            if placed == self.count {
                break;
            }
            let verdict = validate_placement(structure, &intent)?;
            if !verdict.is_accepted() {
                debug!(site = %intent.site, reason = %verdict.reason(), "Static placement skipped");
                continue;
            }
            match structure.commit(&intent) {
                Ok(_) => placed += 1,
                Err(e) => warn!(site = %intent.site, error = %e, "Static placement rejected"),
            }
        }

        debug!(tick, placed, "Static build step");
        Ok(placed)
    }
}
