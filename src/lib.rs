//! Immo Match - matching engine for a real-estate backoffice
//!
//! Scores client demands against the property inventory and against other
//! clients' offers, keeps the resulting matches with their lifecycle status,
//! and re-runs the pass periodically.

pub mod config;
pub mod core;
pub mod models;
pub mod routes;
pub mod services;

// Re-export commonly used types
pub use crate::core::{AutoMatchScheduler, MatchScorer, MatchStats, MatchingEngine, StatsAggregator};
pub use crate::models::{Demand, Match, MatchStatus, MatchType, Property, RunSummary, ScoringWeights};
pub use crate::services::{MatchStore, SnapshotRepository};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let scorer = MatchScorer::new(ScoringWeights::default());
        assert_eq!(scorer.weights().location, 0.30);
        assert!(MatchStore::default().is_empty());
    }
}
