use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Buy or rent side of a listing or demand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    #[serde(rename = "SALE", alias = "sale", alias = "buy", alias = "BUY")]
    Sale,
    #[serde(rename = "RENT", alias = "rent")]
    Rent,
}

/// A listed unit from the external property inventory
///
/// `0` in `price`, `beds` and `area` means the listing did not publish the value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type", default)]
    pub property_type: String,
    pub category: TransactionType,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub city: String,
    #[serde(rename = "priceNumeric", default)]
    pub price: u64,
    #[serde(default)]
    pub beds: u32,
    #[serde(default)]
    pub baths: u32,
    #[serde(rename = "areaNumeric", default)]
    pub area: u32,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub url: String,
}

impl Property {
    /// Neighborhood parsed from `location` ("Maarif, Casablanca" -> "Maarif")
    pub fn neighborhood(&self) -> Option<&str> {
        let first = self.location.split(',').next()?.trim();
        if first.is_empty() || first.eq_ignore_ascii_case(self.city.trim()) {
            None
        } else {
            Some(first)
        }
    }

    /// Candidate view used by the scorer
    pub fn listing(&self) -> Listing<'_> {
        Listing {
            transaction: self.category,
            property_type: non_empty(&self.property_type),
            city: non_empty(&self.city),
            neighborhood: self.neighborhood(),
            price: known(self.price),
            bedrooms: known(self.beds),
            surface: known(self.area),
            amenities: &self.features,
        }
    }
}

/// A request record owned by the CRM layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Demand {
    pub id: String,
    #[serde(rename = "fullName", default)]
    pub full_name: String,
    #[serde(rename = "isActive", default = "default_true")]
    pub is_active: bool,
    #[serde(flatten)]
    pub kind: DemandKind,
    #[serde(rename = "createdAt", default)]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool { true }

/// What the demand asks for
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DemandKind {
    /// Buyer or renter looking for a unit
    Search { criteria: SearchCriteria },
    /// Owner selling a unit
    Sale { offer: OfferedProperty },
    /// Owner handing a unit over for rental management
    RentalManagement { offer: OfferedProperty },
}

impl Demand {
    /// Search criteria, for demands on the scoring side
    pub fn criteria(&self) -> Option<&SearchCriteria> {
        match &self.kind {
            DemandKind::Search { criteria } => Some(criteria),
            DemandKind::Sale { .. } | DemandKind::RentalManagement { .. } => None,
        }
    }

    /// Candidate view of an owner demand; `None` for search demands
    pub fn listing(&self) -> Option<Listing<'_>> {
        match &self.kind {
            DemandKind::Search { .. } => None,
            DemandKind::Sale { offer } => Some(offer.listing(TransactionType::Sale)),
            DemandKind::RentalManagement { offer } => Some(offer.listing(TransactionType::Rent)),
        }
    }

    pub fn is_search(&self) -> bool {
        matches!(self.kind, DemandKind::Search { .. })
    }
}

/// Criteria of a `search` demand. Absent fields are don't-care.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCriteria {
    #[serde(default)]
    pub transaction: Option<TransactionType>,
    #[serde(default)]
    pub cities: Vec<String>,
    #[serde(default)]
    pub neighborhoods: Vec<String>,
    #[serde(default)]
    pub property_types: Vec<String>,
    #[serde(default)]
    pub budget_min: Option<u64>,
    #[serde(default)]
    pub budget_max: Option<u64>,
    #[serde(default)]
    pub bedrooms_min: Option<u32>,
    #[serde(default)]
    pub bedrooms_max: Option<u32>,
    #[serde(default)]
    pub surface_min: Option<u32>,
    #[serde(default)]
    pub surface_max: Option<u32>,
    #[serde(default)]
    pub amenities: Vec<String>,
}

/// Unit offered by a `sale` or `rental_management` demand
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferedProperty {
    #[serde(default)]
    pub property_type: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub neighborhood: Option<String>,
    #[serde(default)]
    pub price: Option<u64>,
    #[serde(default)]
    pub surface: Option<u32>,
    #[serde(default)]
    pub bedrooms: Option<u32>,
    #[serde(default)]
    pub amenities: Vec<String>,
}

impl OfferedProperty {
    pub fn listing(&self, transaction: TransactionType) -> Listing<'_> {
        Listing {
            transaction,
            property_type: self.property_type.as_deref().and_then(non_empty),
            city: self.city.as_deref().and_then(non_empty),
            neighborhood: self.neighborhood.as_deref().and_then(non_empty),
            price: self.price.and_then(known),
            bedrooms: self.bedrooms,
            surface: self.surface.and_then(known),
            amenities: &self.amenities,
        }
    }
}

/// Borrowed, normalized view of anything a search demand can be scored against
#[derive(Debug, Clone, Copy)]
pub struct Listing<'a> {
    pub transaction: TransactionType,
    pub property_type: Option<&'a str>,
    pub city: Option<&'a str>,
    pub neighborhood: Option<&'a str>,
    pub price: Option<u64>,
    pub bedrooms: Option<u32>,
    pub surface: Option<u32>,
    pub amenities: &'a [String],
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn known<T: Default + PartialEq>(value: T) -> Option<T> {
    (value != T::default()).then_some(value)
}

/// Match lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Pending,
    Notified,
    Contacted,
    Successful,
    Rejected,
}

impl MatchStatus {
    pub const ALL: [MatchStatus; 5] = [
        MatchStatus::Pending,
        MatchStatus::Notified,
        MatchStatus::Contacted,
        MatchStatus::Successful,
        MatchStatus::Rejected,
    ];

    /// Edges of the lifecycle graph. Re-requesting the current status is allowed.
    pub fn can_transition_to(self, next: MatchStatus) -> bool {
        use MatchStatus::*;
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Pending, Notified)
                | (Pending, Contacted)
                | (Notified, Contacted)
                | (Notified, Successful)
                | (Notified, Rejected)
                | (Contacted, Successful)
                | (Contacted, Rejected)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, MatchStatus::Successful | MatchStatus::Rejected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MatchStatus::Pending => "pending",
            MatchStatus::Notified => "notified",
            MatchStatus::Contacted => "contacted",
            MatchStatus::Successful => "successful",
            MatchStatus::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of counterpart a match points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    DemandToProperty,
    DemandToDemand,
}

impl MatchType {
    pub const ALL: [MatchType; 2] = [MatchType::DemandToProperty, MatchType::DemandToDemand];

    pub fn as_str(self) -> &'static str {
        match self {
            MatchType::DemandToProperty => "demand_to_property",
            MatchType::DemandToDemand => "demand_to_demand",
        }
    }
}

/// Counterpart of a match. The variant fixes `matchType`, so the id can never
/// disagree with the kind of entity it names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "matchType", content = "matchedEntityId")]
pub enum MatchTarget {
    #[serde(rename = "demand_to_property")]
    Property(String),
    #[serde(rename = "demand_to_demand")]
    Demand(String),
}

impl MatchTarget {
    pub fn match_type(&self) -> MatchType {
        match self {
            MatchTarget::Property(_) => MatchType::DemandToProperty,
            MatchTarget::Demand(_) => MatchType::DemandToDemand,
        }
    }

    pub fn entity_id(&self) -> &str {
        match self {
            MatchTarget::Property(id) | MatchTarget::Demand(id) => id,
        }
    }
}

/// A persisted, scored pairing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: String,
    #[serde(rename = "demandId")]
    pub demand_id: String,
    #[serde(flatten)]
    pub target: MatchTarget,
    #[serde(rename = "matchScore")]
    pub match_score: u8,
    #[serde(rename = "matchReasons")]
    pub match_reasons: Vec<String>,
    pub status: MatchStatus,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl Match {
    pub fn match_type(&self) -> MatchType {
        self.target.match_type()
    }

    pub fn matched_entity_id(&self) -> &str {
        self.target.entity_id()
    }
}

/// Counterpart record joined onto a match for display
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "record", rename_all = "lowercase")]
pub enum Counterpart {
    Property(Property),
    Demand(Demand),
}

/// Match joined with its demand and counterpart snapshots
///
/// Either side is `None` when it has since left the snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct EnrichedMatch {
    #[serde(flatten)]
    pub record: Match,
    pub demand: Option<Demand>,
    pub counterpart: Option<Counterpart>,
}

/// Optional list filters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct MatchFilter {
    #[serde(default)]
    pub status: Option<MatchStatus>,
    #[serde(rename = "matchType", default)]
    pub match_type: Option<MatchType>,
}

impl MatchFilter {
    pub fn accepts(&self, m: &Match) -> bool {
        self.status.map_or(true, |status| m.status == status)
            && self.match_type.map_or(true, |kind| m.match_type() == kind)
    }
}

/// Scoring weights. Each criterion contributes at most its weight; the total
/// is renormalized over the criteria actually evaluated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringWeights {
    pub location: f64,
    pub budget: f64,
    pub property_type: f64,
    pub bedrooms: f64,
    pub surface: f64,
    pub amenities: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            location: 0.30,
            budget: 0.30,
            property_type: 0.15,
            bedrooms: 0.10,
            surface: 0.05,
            amenities: 0.10,
        }
    }
}

/// Outcome of one engine run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub demands_processed: usize,
    pub pairs_evaluated: usize,
    pub new_matches: usize,
    pub updated_matches: usize,
    pub skipped_pairs: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn property(location: &str, city: &str) -> Property {
        Property {
            id: "p1".to_string(),
            title: String::new(),
            property_type: "Appartement".to_string(),
            category: TransactionType::Sale,
            location: location.to_string(),
            city: city.to_string(),
            price: 0,
            beds: 3,
            baths: 2,
            area: 0,
            features: vec![],
            url: String::new(),
        }
    }

    #[test]
    fn test_neighborhood_from_location() {
        assert_eq!(property("Maarif, Casablanca", "Casablanca").neighborhood(), Some("Maarif"));
        assert_eq!(property("Casablanca", "Casablanca").neighborhood(), None);
        assert_eq!(property("", "Casablanca").neighborhood(), None);
    }

    #[test]
    fn test_listing_treats_zero_as_unknown() {
        let p = property("Maarif, Casablanca", "Casablanca");
        let listing = p.listing();
        assert_eq!(listing.price, None);
        assert_eq!(listing.surface, None);
        assert_eq!(listing.bedrooms, Some(3));
    }

    #[test]
    fn test_lifecycle_graph() {
        use MatchStatus::*;
        assert!(Pending.can_transition_to(Notified));
        assert!(Pending.can_transition_to(Contacted));
        assert!(!Pending.can_transition_to(Successful));
        assert!(Notified.can_transition_to(Rejected));
        assert!(Contacted.can_transition_to(Successful));
        assert!(!Contacted.can_transition_to(Pending));
        for next in MatchStatus::ALL {
            assert_eq!(Successful.can_transition_to(next), next == Successful);
            assert_eq!(Rejected.can_transition_to(next), next == Rejected);
        }
    }

    #[test]
    fn test_match_wire_format() {
        let m = Match {
            id: "m1".to_string(),
            demand_id: "d1".to_string(),
            target: MatchTarget::Demand("d2".to_string()),
            match_score: 72,
            match_reasons: vec!["City: Rabat".to_string()],
            status: MatchStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["matchType"], "demand_to_demand");
        assert_eq!(json["matchedEntityId"], "d2");
        assert_eq!(json["status"], "pending");

        let back: Match = serde_json::from_value(json).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn test_demand_kinds_deserialize() {
        let search: Demand = serde_json::from_str(
            r#"{"id":"d1","type":"search","criteria":{"transaction":"SALE","cities":["Rabat"]}}"#,
        )
        .unwrap();
        assert!(search.is_search());
        assert!(search.is_active);
        assert_eq!(search.criteria().unwrap().transaction, Some(TransactionType::Sale));

        let rental: Demand = serde_json::from_str(
            r#"{"id":"d2","type":"rental_management","offer":{"city":"Rabat","price":8000}}"#,
        )
        .unwrap();
        let listing = rental.listing().unwrap();
        assert_eq!(listing.transaction, TransactionType::Rent);
        assert_eq!(listing.price, Some(8000));
    }
}
