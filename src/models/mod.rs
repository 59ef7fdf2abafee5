// Model exports
pub mod domain;
pub mod requests;
pub mod responses;

pub use domain::{
    Counterpart, Demand, DemandKind, EnrichedMatch, Listing, Match, MatchFilter, MatchStatus,
    MatchTarget, MatchType, OfferedProperty, Property, RunSummary, ScoringWeights, SearchCriteria,
    TransactionType,
};
pub use requests::{BulkDeleteRequest, RunMatchingRequest, SetIntervalRequest, UpdateStatusRequest};
pub use responses::{
    AutoMatchOutcome, BulkDeleteResponse, DeleteResponse, ErrorResponse, HealthResponse,
    LastRunResponse, SchedulerStatusResponse,
};
