// Core algorithm exports
pub mod clock;
pub mod filters;
pub mod matcher;
pub mod scheduler;
pub mod scoring;
pub mod stats;

pub use clock::{Clock, FixedClock, SystemClock};
pub use filters::{normalize_label, passes_transaction_gate};
pub use matcher::{MatchingEngine, DEFAULT_MIN_SCORE};
pub use scheduler::{AutoMatchScheduler, SchedulerError, SubscriberError, Subscription};
pub use scoring::{MatchScorer, ScoreOutcome};
pub use stats::{MatchStats, StatsAggregator};
