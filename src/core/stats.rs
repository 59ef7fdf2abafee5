use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::models::{Match, MatchStatus, MatchType};
use crate::services::store::MatchStore;

/// Aggregate counters over the current match set
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchStats {
    pub total: usize,
    pub by_status: BTreeMap<MatchStatus, usize>,
    pub by_type: BTreeMap<MatchType, usize>,
    pub avg_score: f64,
}

impl Default for MatchStats {
    fn default() -> Self {
        Self {
            total: 0,
            by_status: MatchStatus::ALL.iter().map(|s| (*s, 0)).collect(),
            by_type: MatchType::ALL.iter().map(|t| (*t, 0)).collect(),
            avg_score: 0.0,
        }
    }
}

/// Derives [`MatchStats`] from the store; holds no state of its own
#[derive(Clone)]
pub struct StatsAggregator {
    store: Arc<MatchStore>,
}

impl StatsAggregator {
    pub fn new(store: Arc<MatchStore>) -> Self {
        Self { store }
    }

    pub fn stats(&self) -> MatchStats {
        Self::compute(&self.store.snapshot())
    }

    /// Single pass over `matches`. Every status and type is present, zero when unused.
    pub fn compute(matches: &[Match]) -> MatchStats {
        let mut stats = MatchStats::default();
        let mut score_sum: u64 = 0;

        for m in matches {
            stats.total += 1;
            score_sum += u64::from(m.match_score);
            *stats.by_status.entry(m.status).or_insert(0) += 1;
            *stats.by_type.entry(m.match_type()).or_insert(0) += 1;
        }

        if stats.total > 0 {
            stats.avg_score = score_sum as f64 / stats.total as f64;
        }

        stats
    }
}
