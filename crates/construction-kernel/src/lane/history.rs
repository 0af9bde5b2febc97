//! Per-lane interference history.

use dashmap::DashMap;

use super::LaneId;

/// Counters kept for one lane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaneCounters {
    /// Ticks an agent in this lane spent blocked by another agent
    pub interference: u64,
    /// Times the lane was handed out
    pub allocations: u64,
}

/// Interference history for all lanes.
///
/// Updates lock only the lane's own shard entry, so agents ticking in
/// parallel can report without coordinating.
#[derive(Debug, Default)]
pub struct LaneHistory {
    counters: DashMap<LaneId, LaneCounters>,
}

impl LaneHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// History with zeroed counters for each lane.
    pub fn with_lanes(lanes: impl IntoIterator<Item = LaneId>) -> Self {
        let counters = DashMap::new();
        for lane in lanes {
            counters.insert(lane, LaneCounters::default());
        }
        Self { counters }
    }

    pub fn record_interference(&self, lane: LaneId) {
        self.counters.entry(lane).or_default().interference += 1;
    }

    pub fn record_allocation(&self, lane: LaneId) {
        self.counters.entry(lane).or_default().allocations += 1;
    }

    pub fn counters(&self, lane: LaneId) -> LaneCounters {
        self.counters
            .get(&lane)
            .map(|c| *c)
            .unwrap_or_default()
    }

    pub fn interference(&self, lane: LaneId) -> u64 {
        self.counters(lane).interference
    }

    /// Interference counts for `lanes`, in order.
    ///
    /// `None` if any lane has never been seen, in which case there is
    /// nothing meaningful to rank.
    pub fn interference_counts(&self, lanes: &[LaneId]) -> Option<Vec<u64>> {
        lanes
            .iter()
            .map(|lane| self.counters.get(lane).map(|c| c.interference))
            .collect()
    }

    pub fn total_interference(&self) -> u64 {
        self.counters.iter().map(|c| c.interference).sum()
    }
}
