use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::models::{Demand, Property};

/// Errors that can occur when loading a snapshot file
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("I/O error reading {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid snapshot document {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Snapshot {path} has no '{collection}' array")]
    MissingCollection { path: PathBuf, collection: &'static str },

    #[error("Repository has no source file to reload from")]
    NoSource,
}

/// Read access to demands owned by the CRM layer
pub trait DemandRepository: Send + Sync {
    /// Active demands only
    fn active(&self) -> Vec<Demand>;
    fn get(&self, id: &str) -> Option<Demand>;
}

/// Read access to the property inventory snapshot
pub trait PropertyRepository: Send + Sync {
    fn all(&self) -> Arc<Vec<Property>>;
    fn get(&self, id: &str) -> Option<Property>;
}

/// A record type that can live in a JSON snapshot file
pub trait SnapshotRecord: DeserializeOwned + Clone + Send + Sync {
    /// Key of the array inside a wrapped document, e.g. `{"properties": [...]}`
    const COLLECTION: &'static str;

    fn record_id(&self) -> &str;
}

impl SnapshotRecord for Property {
    const COLLECTION: &'static str = "properties";

    fn record_id(&self) -> &str {
        &self.id
    }
}

impl SnapshotRecord for Demand {
    const COLLECTION: &'static str = "demands";

    fn record_id(&self) -> &str {
        &self.id
    }
}

/// In-memory snapshot of records, optionally backed by a JSON file
///
/// Readers get a cheap `Arc` clone of the current snapshot; a reload swaps the
/// whole vector so a running match pass never sees a half-loaded inventory.
pub struct SnapshotRepository<T> {
    records: RwLock<Arc<Vec<T>>>,
    source: Option<PathBuf>,
}

impl<T: SnapshotRecord> SnapshotRepository<T> {
    pub fn from_records(records: Vec<T>) -> Self {
        Self {
            records: RwLock::new(Arc::new(records)),
            source: None,
        }
    }

    /// Load from a JSON file. Malformed records are skipped with a warning.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, RepositoryError> {
        let path = path.as_ref().to_path_buf();
        let records = load_records::<T>(&path)?;
        Ok(Self {
            records: RwLock::new(Arc::new(records)),
            source: Some(path),
        })
    }

    /// Like [`from_file`](Self::from_file), but starts empty when the file cannot
    /// be loaded. The path is kept so a later [`reload`](Self::reload) picks it up.
    pub fn from_file_or_empty<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let records = load_records::<T>(&path).unwrap_or_else(|e| {
            tracing::warn!("Starting with no {}: {}", T::COLLECTION, e);
            Vec::new()
        });
        Self {
            records: RwLock::new(Arc::new(records)),
            source: Some(path),
        }
    }

    /// Re-read the backing file; on failure the previous snapshot is kept
    pub fn reload(&self) -> Result<usize, RepositoryError> {
        let path = self.source.as_ref().ok_or(RepositoryError::NoSource)?;
        let records = load_records::<T>(path)?;
        let count = records.len();
        self.replace(records);
        Ok(count)
    }

    pub fn replace(&self, records: Vec<T>) {
        *self.records.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(records);
    }

    pub fn snapshot(&self) -> Arc<Vec<T>> {
        Arc::clone(&self.records.read().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn find(&self, id: &str) -> Option<T> {
        self.snapshot().iter().find(|r| r.record_id() == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

impl<T: SnapshotRecord> Default for SnapshotRepository<T> {
    fn default() -> Self {
        Self::from_records(Vec::new())
    }
}

impl DemandRepository for SnapshotRepository<Demand> {
    fn active(&self) -> Vec<Demand> {
        self.snapshot().iter().filter(|d| d.is_active).cloned().collect()
    }

    fn get(&self, id: &str) -> Option<Demand> {
        self.find(id)
    }
}

impl PropertyRepository for SnapshotRepository<Property> {
    fn all(&self) -> Arc<Vec<Property>> {
        self.snapshot()
    }

    fn get(&self, id: &str) -> Option<Property> {
        self.find(id)
    }
}

fn load_records<T: SnapshotRecord>(path: &Path) -> Result<Vec<T>, RepositoryError> {
    let bytes = std::fs::read(path).map_err(|source| RepositoryError::IoError {
        path: path.to_path_buf(),
        source,
    })?;
    let document: Value = serde_json::from_slice(&bytes).map_err(|source| RepositoryError::ParseError {
        path: path.to_path_buf(),
        source,
    })?;

    let (records, skipped) = parse_records::<T>(document).ok_or_else(|| RepositoryError::MissingCollection {
        path: path.to_path_buf(),
        collection: T::COLLECTION,
    })?;

    if skipped > 0 {
        tracing::warn!(
            "Skipped {} malformed {} in {}",
            skipped,
            T::COLLECTION,
            path.display()
        );
    }
    tracing::info!("Loaded {} {} from {}", records.len(), T::COLLECTION, path.display());

    Ok(records)
}

/// Parse a bare array or a `{ "<collection>": [...] }` document record by record
///
/// Returns the parsed records and the number skipped; `None` when the document
/// holds no array at all.
pub fn parse_records<T: SnapshotRecord>(document: Value) -> Option<(Vec<T>, usize)> {
    let items = match document {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove(T::COLLECTION) {
            Some(Value::Array(items)) => items,
            _ => return None,
        },
        _ => return None,
    };

    let total = items.len();
    let records: Vec<T> = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<T>(item) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::debug!("Dropping malformed {} record: {}", T::COLLECTION, e);
                None
            }
        })
        .collect();
    let skipped = total - records.len();

    Some((records, skipped))
}
