use std::sync::Arc;

use crate::core::clock::{Clock, SystemClock};
use crate::core::scoring::MatchScorer;
use crate::models::{Demand, Listing, MatchTarget, Property, RunSummary, SearchCriteria};
use crate::services::repository::{DemandRepository, PropertyRepository};
use crate::services::store::{MatchStore, StoreError};

/// Default minimum score a pair needs to become a match
pub const DEFAULT_MIN_SCORE: u8 = 40;

/// Orchestrates one matching pass
///
/// # Pipeline Stages
/// 1. Select search demands (all active, or the ones a scoped demand touches)
/// 2. Build the candidate pool: properties plus active owner demands
/// 3. Score every (demand, candidate) pair
/// 4. Upsert pairs clearing `min_score`; refresh existing matches that no longer do
pub struct MatchingEngine {
    scorer: MatchScorer,
    min_score: u8,
    demands: Arc<dyn DemandRepository>,
    properties: Arc<dyn PropertyRepository>,
    store: Arc<MatchStore>,
    clock: Arc<dyn Clock>,
}

/// A scoring-side demand paired with one candidate
struct Pair<'a> {
    demand_id: &'a str,
    criteria: &'a SearchCriteria,
    target: MatchTarget,
    listing: Listing<'a>,
}

enum PairResult {
    Created,
    Updated,
    BelowGate,
}

impl MatchingEngine {
    pub fn new(
        scorer: MatchScorer,
        demands: Arc<dyn DemandRepository>,
        properties: Arc<dyn PropertyRepository>,
        store: Arc<MatchStore>,
    ) -> Self {
        Self {
            scorer,
            min_score: DEFAULT_MIN_SCORE,
            demands,
            properties,
            store,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_min_score(mut self, min_score: u8) -> Self {
        self.min_score = min_score.min(100);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<MatchStore> {
        &self.store
    }

    pub fn demands(&self) -> &Arc<dyn DemandRepository> {
        &self.demands
    }

    pub fn properties(&self) -> &Arc<dyn PropertyRepository> {
        &self.properties
    }

    /// Run one pass, optionally scoped to a single demand
    ///
    /// A scoped search demand is scored against the whole pool; a scoped owner
    /// demand is scored by every active search demand. An unknown or inactive
    /// scope yields an empty summary.
    pub fn run(&self, demand_id: Option<&str>) -> RunSummary {
        let started_at = self.clock.now();
        let mut summary = RunSummary {
            started_at: Some(started_at),
            ..Default::default()
        };

        let active = self.demands.active();
        let properties = self.properties.all();

        // A scoped owner demand is only paired with search demands, never with properties
        let (seekers, owners, include_properties): (Vec<&Demand>, Vec<&Demand>, bool) = match demand_id {
            None => {
                let (seekers, owners): (Vec<&Demand>, Vec<&Demand>) =
                    active.iter().partition(|d| d.is_search());
                (seekers, owners, true)
            }
            Some(id) => match active.iter().find(|d| d.id == id) {
                Some(scoped) if scoped.is_search() => (
                    vec![scoped],
                    active.iter().filter(|d| !d.is_search()).collect(),
                    true,
                ),
                Some(scoped) => (active.iter().filter(|d| d.is_search()).collect(), vec![scoped], false),
                None => {
                    tracing::warn!("Matching run scoped to unknown or inactive demand {}", id);
                    summary.finished_at = Some(self.clock.now());
                    return summary;
                }
            },
        };
        let pool: &[Property] = if include_properties { &properties } else { &[] };

        for seeker in &seekers {
            let Some(criteria) = seeker.criteria() else { continue };
            summary.demands_processed += 1;

            let property_pairs = pool.iter().map(|p| Pair {
                demand_id: &seeker.id,
                criteria,
                target: MatchTarget::Property(p.id.clone()),
                listing: p.listing(),
            });

            let demand_pairs = owners
                .iter()
                .filter(|owner| owner.id != seeker.id)
                .filter_map(|owner| {
                    owner.listing().map(|listing| Pair {
                        demand_id: &seeker.id,
                        criteria,
                        target: MatchTarget::Demand(owner.id.clone()),
                        listing,
                    })
                });

            for pair in property_pairs.chain(demand_pairs) {
                summary.pairs_evaluated += 1;
                match self.evaluate(pair) {
                    Ok(PairResult::Created) => summary.new_matches += 1,
                    Ok(PairResult::Updated) => summary.updated_matches += 1,
                    Ok(PairResult::BelowGate) => {}
                    Err((target, e)) => {
                        summary.skipped_pairs += 1;
                        tracing::warn!(
                            "Skipping pair {} -> {}: {}",
                            seeker.id,
                            target.entity_id(),
                            e
                        );
                    }
                }
            }
        }

        summary.finished_at = Some(self.clock.now());

        tracing::info!(
            "Matching run complete: {} demands, {} pairs, {} new, {} updated, {} skipped",
            summary.demands_processed,
            summary.pairs_evaluated,
            summary.new_matches,
            summary.updated_matches,
            summary.skipped_pairs
        );

        summary
    }

    fn evaluate(&self, pair: Pair<'_>) -> Result<PairResult, (MatchTarget, StoreError)> {
        let outcome = self.scorer.score(pair.criteria, &pair.listing);

        // The gate decides creation only; an existing match always gets the fresh score
        if outcome.score == 0 || outcome.score < self.min_score {
            return match self
                .store
                .refresh(pair.demand_id, &pair.target, outcome.score, outcome.reasons)
            {
                Ok(Some(_)) => Ok(PairResult::Updated),
                Ok(None) => Ok(PairResult::BelowGate),
                Err(e) => Err((pair.target, e)),
            };
        }

        match self
            .store
            .upsert(pair.demand_id, pair.target.clone(), outcome.score, outcome.reasons)
        {
            Ok(upserted) if upserted.created => Ok(PairResult::Created),
            Ok(_) => Ok(PairResult::Updated),
            Err(e) => Err((pair.target, e)),
        }
    }
}
