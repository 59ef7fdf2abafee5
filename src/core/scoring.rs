use crate::core::filters::{contains_label, count_fit, passes_transaction_gate, range_fit, same_label};
use crate::models::{Listing, ScoringWeights, SearchCriteria};

/// Default near-miss band, as a fraction of the violated range bound
pub const DEFAULT_NEAR_MISS_TOLERANCE: f64 = 0.10;

/// Score and ordered reasons for one (criteria, candidate) pair
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScoreOutcome {
    pub score: u8,
    pub reasons: Vec<String>,
}

/// One evaluated criterion: its fit in [0, 1] and the label shown when it contributes
struct Criterion {
    weight: f64,
    fit: f64,
    reason: String,
}

/// Pure scorer for demand criteria against a candidate listing
///
/// Scoring formula:
/// score = 100 * Σ(weight_i * fit_i) / Σ(weight_i)
/// over the criteria both sides specify. Criteria missing on either side are
/// skipped entirely, so they neither reward nor penalize the pair.
#[derive(Debug, Clone, Copy)]
pub struct MatchScorer {
    weights: ScoringWeights,
    near_miss_tolerance: f64,
}

impl MatchScorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self {
            weights,
            near_miss_tolerance: DEFAULT_NEAR_MISS_TOLERANCE,
        }
    }

    pub fn with_near_miss_tolerance(mut self, tolerance: f64) -> Self {
        self.near_miss_tolerance = if tolerance.is_finite() { tolerance.max(0.0) } else { 0.0 };
        self
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    /// Score a pair. Deterministic: no clock, no randomness.
    pub fn score(&self, criteria: &SearchCriteria, candidate: &Listing<'_>) -> ScoreOutcome {
        if !passes_transaction_gate(criteria, candidate) {
            return ScoreOutcome::default();
        }

        let evaluated: Vec<Criterion> = [
            self.location(criteria, candidate),
            self.budget(criteria, candidate),
            self.property_type(criteria, candidate),
            self.bedrooms(criteria, candidate),
            self.surface(criteria, candidate),
            self.amenities(criteria, candidate),
        ]
        .into_iter()
        .flatten()
        .collect();

        let total_weight: f64 = evaluated.iter().map(|c| c.weight).sum();
        if total_weight <= 0.0 {
            return ScoreOutcome::default();
        }

        let mut contributions: Vec<(f64, String)> = evaluated
            .into_iter()
            .map(|c| (c.weight * c.fit.clamp(0.0, 1.0), c.reason))
            .collect();

        let earned: f64 = contributions.iter().map(|(value, _)| value).sum();
        let score = to_score(earned / total_weight * 100.0);

        // Strongest justification first; stable sort keeps criterion order on ties
        contributions.retain(|(value, _)| *value > 0.0);
        contributions.sort_by(|a, b| b.0.total_cmp(&a.0));

        ScoreOutcome {
            score,
            reasons: contributions.into_iter().map(|(_, reason)| reason).collect(),
        }
    }

    fn location(&self, criteria: &SearchCriteria, candidate: &Listing<'_>) -> Option<Criterion> {
        if criteria.cities.is_empty() && criteria.neighborhoods.is_empty() {
            return None;
        }
        let city = candidate.city?;

        let city_ok = criteria.cities.is_empty() || contains_label(&criteria.cities, city);
        let neighborhood_ok = candidate
            .neighborhood
            .map_or(false, |n| contains_label(&criteria.neighborhoods, n));

        let (fit, reason) = if city_ok && neighborhood_ok {
            (1.0, format!("Neighborhood: {}", candidate.neighborhood.unwrap_or(city)))
        } else if city_ok && criteria.neighborhoods.is_empty() {
            (1.0, format!("City: {}", city))
        } else if city_ok && !criteria.cities.is_empty() {
            // Right city, other neighborhood
            (0.6, format!("City: {}", city))
        } else {
            (0.0, String::new())
        };

        Some(self.criterion(self.weights.location, fit, reason))
    }

    fn budget(&self, criteria: &SearchCriteria, candidate: &Listing<'_>) -> Option<Criterion> {
        let price = candidate.price?;
        let fit = range_fit(price, criteria.budget_min, criteria.budget_max, self.near_miss_tolerance)?;
        let reason = if fit >= 1.0 { "Budget match" } else { "Near budget" };
        Some(self.criterion(self.weights.budget, fit, reason.to_string()))
    }

    fn property_type(&self, criteria: &SearchCriteria, candidate: &Listing<'_>) -> Option<Criterion> {
        if criteria.property_types.is_empty() {
            return None;
        }
        let kind = candidate.property_type?;
        let fit = if contains_label(&criteria.property_types, kind) { 1.0 } else { 0.0 };
        Some(self.criterion(self.weights.property_type, fit, format!("Type: {}", kind)))
    }

    fn bedrooms(&self, criteria: &SearchCriteria, candidate: &Listing<'_>) -> Option<Criterion> {
        let beds = candidate.bedrooms?;
        let fit = count_fit(beds, criteria.bedrooms_min, criteria.bedrooms_max)?;
        let reason = if fit >= 1.0 {
            format!("Bedrooms: {}", beds)
        } else {
            format!("Bedrooms close: {}", beds)
        };
        Some(self.criterion(self.weights.bedrooms, fit, reason))
    }

    fn surface(&self, criteria: &SearchCriteria, candidate: &Listing<'_>) -> Option<Criterion> {
        let area = candidate.surface?;
        let fit = range_fit(
            u64::from(area),
            criteria.surface_min.map(u64::from),
            criteria.surface_max.map(u64::from),
            self.near_miss_tolerance,
        )?;
        let reason = if fit >= 1.0 {
            format!("Surface: {} m²", area)
        } else {
            format!("Surface close: {} m²", area)
        };
        Some(self.criterion(self.weights.surface, fit, reason))
    }

    fn amenities(&self, criteria: &SearchCriteria, candidate: &Listing<'_>) -> Option<Criterion> {
        if criteria.amenities.is_empty() || candidate.amenities.is_empty() {
            return None;
        }

        let mut wanted: Vec<&String> = Vec::with_capacity(criteria.amenities.len());
        for amenity in &criteria.amenities {
            if !wanted.iter().any(|seen| same_label(seen, amenity)) {
                wanted.push(amenity);
            }
        }

        let shared: Vec<&str> = wanted
            .iter()
            .filter(|amenity| contains_label(candidate.amenities, amenity))
            .map(|amenity| amenity.as_str())
            .collect();

        let fit = shared.len() as f64 / wanted.len() as f64;
        let reason = format!("Amenities {}/{}: {}", shared.len(), wanted.len(), shared.join(", "));
        Some(self.criterion(self.weights.amenities, fit, reason))
    }

    fn criterion(&self, weight: f64, fit: f64, reason: String) -> Criterion {
        // NaN and negative weights disable the criterion
        let weight = if weight.is_finite() { weight.max(0.0) } else { 0.0 };
        Criterion { weight, fit, reason }
    }
}

impl Default for MatchScorer {
    fn default() -> Self {
        Self::new(ScoringWeights::default())
    }
}

#[inline]
fn to_score(raw: f64) -> u8 {
    if raw.is_nan() {
        return 0;
    }
    raw.round().clamp(0.0, 100.0) as u8
}
