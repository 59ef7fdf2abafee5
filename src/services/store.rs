use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use uuid::Uuid;

use crate::core::clock::{Clock, SystemClock};
use crate::models::{Counterpart, EnrichedMatch, Match, MatchFilter, MatchStatus, MatchTarget};
use crate::services::repository::{DemandRepository, PropertyRepository};

/// Errors that can occur with match store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("match {id}: transition {from} -> {to} is not allowed")]
    InvalidTransition {
        id: String,
        from: MatchStatus,
        to: MatchStatus,
    },

    #[error("match score {0} is outside 0..=100")]
    ScoreOutOfRange(u8),

    #[error("match identity has an empty demand or entity id")]
    InvalidKey,

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Result of an upsert
#[derive(Debug, Clone)]
pub struct Upserted {
    pub record: Match,
    pub created: bool,
}

/// Deterministic match id for a (demand, type, entity) identity
pub fn match_id(demand_id: &str, target: &MatchTarget) -> String {
    let key = format!("{}|{}|{}", demand_id, target.match_type().as_str(), target.entity_id());
    Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}

/// Owner of the match set
///
/// Ids derive from the identity tuple, so the id map doubles as the uniqueness
/// index. Every operation runs under a single lock acquisition: `upsert` only
/// touches score and reasons, `update_status` only touches status, and neither
/// can overwrite the other's fields.
pub struct MatchStore {
    clock: Arc<dyn Clock>,
    matches: RwLock<HashMap<String, Match>>,
    // Serializes snapshot writers, they share one temp file
    save_lock: Mutex<()>,
}

impl MatchStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            matches: RwLock::new(HashMap::new()),
            save_lock: Mutex::new(()),
        }
    }

    /// Load a store from a JSON snapshot; a missing file yields an empty store
    pub fn load<P: AsRef<Path>>(path: P, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("No match snapshot at {}, starting empty", path.display());
            return Ok(Self::new(clock));
        }

        let bytes = std::fs::read(path)?;
        let records: Vec<Match> = serde_json::from_slice(&bytes)?;
        let total = records.len();

        let mut matches: HashMap<String, Match> = HashMap::with_capacity(total);
        for mut record in records {
            if record.match_score > 100 || record.demand_id.is_empty() || record.matched_entity_id().is_empty() {
                tracing::warn!("Dropping invalid match {} from {}", record.id, path.display());
                continue;
            }
            // Ids always derive from the identity tuple
            let id = match_id(&record.demand_id, &record.target);
            if record.id != id {
                tracing::debug!("Rewriting match id {} to {}", record.id, id);
                record.id = id.clone();
            }
            match matches.entry(id) {
                Entry::Occupied(mut existing) => {
                    // Keep the most recently touched copy of a duplicated identity
                    if record.updated_at > existing.get().updated_at {
                        existing.insert(record);
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(record);
                }
            }
        }

        if matches.len() != total {
            tracing::warn!(
                "Loaded {} of {} matches from {}",
                matches.len(),
                total,
                path.display()
            );
        }

        Ok(Self {
            clock,
            matches: RwLock::new(matches),
            save_lock: Mutex::new(()),
        })
    }

    /// Write the current match set to a JSON snapshot (write-then-rename)
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), StoreError> {
        let path = path.as_ref();
        let _writer = self.save_lock.lock().unwrap_or_else(|e| e.into_inner());
        let json = serde_json::to_vec_pretty(&self.snapshot())?;

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;

        tracing::debug!("Saved match snapshot to {}", path.display());
        Ok(())
    }

    /// Create the match with status `pending`, or refresh score and reasons of
    /// the existing one. Status and `created_at` are never touched here.
    pub fn upsert(
        &self,
        demand_id: &str,
        target: MatchTarget,
        score: u8,
        reasons: Vec<String>,
    ) -> Result<Upserted, StoreError> {
        if score > 100 {
            return Err(StoreError::ScoreOutOfRange(score));
        }
        if demand_id.is_empty() || target.entity_id().is_empty() {
            return Err(StoreError::InvalidKey);
        }

        let id = match_id(demand_id, &target);
        let now = self.clock.now();
        let mut matches = self.write();

        match matches.entry(id) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                existing.match_score = score;
                existing.match_reasons = reasons;
                existing.updated_at = now;
                Ok(Upserted {
                    record: existing.clone(),
                    created: false,
                })
            }
            Entry::Vacant(entry) => {
                let record = Match {
                    id: entry.key().clone(),
                    demand_id: demand_id.to_string(),
                    target,
                    match_score: score,
                    match_reasons: reasons,
                    status: MatchStatus::Pending,
                    created_at: now,
                    updated_at: now,
                };
                entry.insert(record.clone());
                Ok(Upserted {
                    record,
                    created: true,
                })
            }
        }
    }

    /// Refresh score and reasons of an existing match, never creating one
    ///
    /// `Ok(None)` when no match has this identity. Status is left as is.
    pub fn refresh(
        &self,
        demand_id: &str,
        target: &MatchTarget,
        score: u8,
        reasons: Vec<String>,
    ) -> Result<Option<Match>, StoreError> {
        if score > 100 {
            return Err(StoreError::ScoreOutOfRange(score));
        }

        let id = match_id(demand_id, target);
        let now = self.clock.now();
        let mut matches = self.write();

        Ok(matches.get_mut(&id).map(|existing| {
            existing.match_score = score;
            existing.match_reasons = reasons;
            existing.updated_at = now;
            existing.clone()
        }))
    }

    pub fn get(&self, id: &str) -> Option<Match> {
        self.read().get(id).cloned()
    }

    /// Matches passing `filter`, best score first
    pub fn list(&self, filter: &MatchFilter) -> Vec<Match> {
        let mut listed: Vec<Match> = self
            .read()
            .values()
            .filter(|m| filter.accepts(m))
            .cloned()
            .collect();
        sort_for_display(&mut listed);
        listed
    }

    /// Matches owned by `demand_id`, plus demand-to-demand matches pointing at it
    pub fn list_for_demand(&self, demand_id: &str) -> Vec<Match> {
        let mut listed: Vec<Match> = self
            .read()
            .values()
            .filter(|m| {
                m.demand_id == demand_id
                    || matches!(&m.target, MatchTarget::Demand(other) if other == demand_id)
            })
            .cloned()
            .collect();
        sort_for_display(&mut listed);
        listed
    }

    /// Filtered matches joined with their demand and counterpart snapshots
    pub fn list_enriched(
        &self,
        filter: &MatchFilter,
        demands: &dyn DemandRepository,
        properties: &dyn PropertyRepository,
    ) -> Vec<EnrichedMatch> {
        self.list(filter)
            .into_iter()
            .map(|record| {
                let demand = demands.get(&record.demand_id);
                let counterpart = match &record.target {
                    MatchTarget::Property(id) => properties.get(id).map(Counterpart::Property),
                    MatchTarget::Demand(id) => demands.get(id).map(Counterpart::Demand),
                };
                EnrichedMatch {
                    record,
                    demand,
                    counterpart,
                }
            })
            .collect()
    }

    /// Move a match along the lifecycle graph
    ///
    /// `Ok(None)` for an unknown id; an illegal edge leaves the status unchanged.
    pub fn update_status(&self, id: &str, status: MatchStatus) -> Result<Option<Match>, StoreError> {
        let now = self.clock.now();
        let mut matches = self.write();

        let Some(record) = matches.get_mut(id) else {
            return Ok(None);
        };

        if !record.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id: id.to_string(),
                from: record.status,
                to: status,
            });
        }

        if record.status != status {
            record.status = status;
            record.updated_at = now;
        }
        Ok(Some(record.clone()))
    }

    pub fn delete(&self, id: &str) -> bool {
        self.write().remove(id).is_some()
    }

    /// Remove every listed id that exists; returns how many were removed
    pub fn bulk_delete(&self, ids: &[String]) -> usize {
        let unique: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut matches = self.write();
        unique.into_iter().filter(|id| matches.remove(*id).is_some()).count()
    }

    pub fn snapshot(&self) -> Vec<Match> {
        self.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // A panic while holding the lock cannot leave a half-written Match behind
    // (every mutation is a single assignment), so poisoning is recovered.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Match>> {
        self.matches.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Match>> {
        self.matches.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MatchStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

fn sort_for_display(matches: &mut [Match]) {
    matches.sort_by(|a, b| {
        b.match_score
            .cmp(&a.match_score)
            .then_with(|| a.created_at.cmp(&b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}
