//! Snapshot collectors keyed by name.
//!
//! A run enables a list of keys; each resolves to a function that turns the
//! construction site into a JSON snapshot at the end of the run.

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use serde_json::{Value, json};

use construction_kernel::ConstructionSite;

/// Produces one snapshot from the site.
pub type Collector = fn(&ConstructionSite) -> Value;

fn structure_progress(site: &ConstructionSite) -> Value {
    let progress = site.progress();
    json!({
        "structure_id": progress.structure_id,
        "built_cells": progress.built_cells,
        "total_cells": progress.total_cells,
        "blocks_placed": progress.blocks_placed,
        "fraction": progress.fraction(),
    })
}

fn structure_subtargets(site: &ConstructionSite) -> Value {
    serde_json::to_value(site.progress().subtargets).unwrap_or_default()
}

fn lane_alloc(site: &ConstructionSite) -> Value {
    json!({
        "policy": site.lanes().policy_name(),
        "total_interference": site.lanes().history().total_interference(),
        "lanes": site.lane_snapshot(),
    })
}

#[derive(Debug, Clone)]
pub struct CollectorRegistry {
    factories: BTreeMap<&'static str, Collector>,
}

impl CollectorRegistry {
    /// Registry with the built-in collectors.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register("structure::progress", structure_progress);
        registry.register("structure::subtargets", structure_subtargets);
        registry.register("lane_alloc", lane_alloc);
        registry
    }

    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Add or replace a collector.
    pub fn register(&mut self, key: &'static str, collector: Collector) {
        self.factories.insert(key, collector);
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }

    pub fn get(&self, key: &str) -> Option<Collector> {
        self.factories.get(key).copied()
    }

    /// Look up every enabled key, failing on the first unknown one.
    pub fn resolve(&self, keys: &[String]) -> Result<Vec<(&'static str, Collector)>> {
        keys.iter()
            .map(|key| match self.factories.get_key_value(key.as_str()) {
                Some((name, collector)) => Ok((*name, *collector)),
                None => bail!(
                    "Unknown collector: {}. Valid: {}",
                    key,
                    self.keys().collect::<Vec<_>>().join(", ")
                ),
            })
            .collect()
    }

    /// Run the enabled collectors against the site.
    pub fn collect(&self, keys: &[String], site: &ConstructionSite) -> Result<BTreeMap<String, Value>> {
        Ok(self
            .resolve(keys)?
            .into_iter()
            .map(|(name, collector)| (name.to_string(), collector(site)))
            .collect())
    }
}

impl Default for CollectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
