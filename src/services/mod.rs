// Service exports
pub mod repository;
pub mod store;

pub use repository::{DemandRepository, PropertyRepository, RepositoryError, SnapshotRepository};
pub use store::{match_id, MatchStore, StoreError, Upserted};
