//! # Run Repository
//!
//! Owns the canonical run collection and every read/write of persisted state.
//!
//! ## Persistence
//! Runs are stored as one JSON array under [`RUNS_KEY`]; goals and unlocked
//! achievement ids live under their own keys and are loaded/saved independently.
//!
//! Every run mutation persists before returning. When the payload would not fit
//! the quota, runs older than `degrade_after_days` are resampled to every Nth
//! point (N from `degrade_strides`, one stride per retry) until the write
//! succeeds. Summary metrics are never touched. If the last stride still does
//! not fit, [`RepositoryError::StorageExhausted`] is returned and the in-memory
//! collection is kept as is.

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

use crate::config::PersistenceConfig;
use crate::error::{RepositoryError, StoreError};
use crate::geo_utils::sample_every_nth;
use crate::goals::Goal;
use crate::storage::KeyValueStore;
use crate::{RunIdentity, RunRecord};

pub const RUNS_KEY: &str = "runs";
pub const GOALS_KEY: &str = "goals";
pub const UNLOCKED_KEY: &str = "achievements_unlocked";

/// What a successful persist had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PersistOutcome {
    /// Serialized size of the run collection that was written
    pub payload_bytes: usize,
    /// Coarsest stride applied during this persist, if any
    pub degraded_stride: Option<u32>,
    /// Number of runs resampled during this persist
    pub degraded_runs: usize,
}

/// Deduplicating run collection backed by a [`KeyValueStore`].
pub struct RunRepository<S: KeyValueStore> {
    store: S,
    runs: Vec<RunRecord>,
    config: PersistenceConfig,
    clock: fn() -> DateTime<Utc>,
}

impl<S: KeyValueStore> RunRepository<S> {
    /// Load the run collection from `store`. A missing key is an empty collection.
    pub fn open(store: S, config: PersistenceConfig) -> Result<Self, RepositoryError> {
        let mut runs: Vec<RunRecord> = load_key(&store, RUNS_KEY)?.unwrap_or_default();
        sort_newest_first(&mut runs);
        info!("[RunRepository] Loaded {} runs", runs.len());
        Ok(Self { store, runs, config, clock: Utc::now })
    }

    /// Replace the clock used to decide which runs are old enough to degrade.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// All runs, newest first.
    pub fn list_all(&self) -> &[RunRecord] {
        &self.runs
    }

    pub fn get(&self, identity: &RunIdentity) -> Option<&RunRecord> {
        self.runs.iter().find(|r| &r.identity() == identity)
    }

    pub fn contains(&self, identity: &RunIdentity) -> bool {
        self.get(identity).is_some()
    }

    /// Remote ids already present, for skipping stream fetches.
    pub fn remote_ids(&self) -> HashSet<u64> {
        self.runs.iter().filter_map(|r| r.remote_id).collect()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Insert runs whose identity is not already present, then persist.
    ///
    /// Duplicates (against existing runs or within the batch) are dropped
    /// silently. Returns the number actually inserted.
    pub fn insert_batch(&mut self, incoming: Vec<RunRecord>) -> Result<usize, RepositoryError> {
        let offered = incoming.len();
        let mut seen: HashSet<RunIdentity> = self.runs.iter().map(RunRecord::identity).collect();
        let fresh: Vec<RunRecord> = incoming.into_iter().filter(|r| seen.insert(r.identity())).collect();
        let inserted = fresh.len();

        if inserted == 0 {
            debug!("[RunRepository] All {} offered runs already present", offered);
            return Ok(0);
        }

        self.runs.extend(fresh);
        sort_newest_first(&mut self.runs);
        info!("[RunRepository] Inserted {} of {} runs ({} duplicates)", inserted, offered, offered - inserted);

        self.persist()?;
        Ok(inserted)
    }

    /// Apply the user-editable fields (tags, notes) of `record` to the stored run.
    pub fn update(&mut self, record: &RunRecord) -> Result<(), RepositoryError> {
        let identity = record.identity();
        let existing = self
            .runs
            .iter_mut()
            .find(|r| r.identity() == identity)
            .ok_or(RepositoryError::NotFound(identity))?;

        existing.tags = record.tags.clone();
        existing.notes = record.notes.clone();
        self.persist()?;
        Ok(())
    }

    /// Delete the run with `identity`. Returns false if it was not present.
    pub fn delete(&mut self, identity: &RunIdentity) -> Result<bool, RepositoryError> {
        let before = self.runs.len();
        self.runs.retain(|r| &r.identity() != identity);
        if self.runs.len() == before {
            return Ok(false);
        }
        info!("[RunRepository] Deleted {}", identity);
        self.persist()?;
        Ok(true)
    }

    /// Remove every run.
    pub fn clear(&mut self) -> Result<(), RepositoryError> {
        self.runs.clear();
        self.persist()?;
        Ok(())
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Write the run collection, degrading old runs as needed to fit the quota.
    pub fn persist(&mut self) -> Result<PersistOutcome, RepositoryError> {
        let quota = self.config.quota_bytes.or_else(|| self.store.quota_bytes());
        let mut strides = self.config.degrade_strides.clone().into_iter();
        let mut outcome = PersistOutcome::default();
        let mut payload = serde_json::to_string(&self.runs)?;

        if let Some(quota) = quota {
            let projected = payload.len() + RUNS_KEY.len() + self.store.used_bytes_excluding(RUNS_KEY);
            let threshold = quota as f64 * self.config.safety_ratio;
            if projected as f64 > threshold {
                if let Some(stride) = strides.next() {
                    warn!(
                        "[RunRepository] Projected {} bytes exceeds {:.0} byte threshold, degrading old runs",
                        projected, threshold
                    );
                    outcome.degraded_runs += self.degrade(stride);
                    outcome.degraded_stride = Some(stride);
                    payload = serde_json::to_string(&self.runs)?;
                }
            }
        }

        loop {
            match self.write_runs(&payload, quota) {
                Ok(()) => {
                    outcome.payload_bytes = payload.len();
                    debug!("[RunRepository] Persisted {} runs ({} bytes)", self.runs.len(), payload.len());
                    return Ok(outcome);
                }
                Err(StoreError::QuotaExceeded { requested, available }) => match strides.next() {
                    Some(stride) => {
                        warn!(
                            "[RunRepository] Quota exceeded ({} requested, {} available), retrying at stride {}",
                            requested, available, stride
                        );
                        outcome.degraded_runs += self.degrade(stride);
                        outcome.degraded_stride = Some(stride);
                        payload = serde_json::to_string(&self.runs)?;
                    }
                    None => {
                        warn!("[RunRepository] Storage exhausted: {} bytes do not fit", payload.len());
                        return Err(RepositoryError::StorageExhausted {
                            payload_bytes: payload.len(),
                            quota_bytes: quota.unwrap_or(available),
                        });
                    }
                },
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn write_runs(&mut self, payload: &str, quota: Option<usize>) -> Result<(), StoreError> {
        // A configured quota may be tighter than the store's own
        if let Some(quota) = self.config.quota_bytes.and(quota) {
            let others = self.store.used_bytes_excluding(RUNS_KEY);
            let requested = payload.len() + RUNS_KEY.len();
            if others + requested > quota {
                return Err(StoreError::QuotaExceeded { requested, available: quota.saturating_sub(others) });
            }
        }
        self.store.write(RUNS_KEY, payload)
    }

    /// Resample every run older than the cutoff to `target_stride`. Returns the number changed.
    ///
    /// Resampling is relative to each run's current stride, so runs already at
    /// or beyond `target_stride` are left alone.
    fn degrade(&mut self, target_stride: u32) -> usize {
        let cutoff = (self.clock)() - Duration::days(self.config.degrade_after_days);
        let mut degraded = 0;
        let mut points_before = 0;
        let mut points_after = 0;

        for run in self.runs.iter_mut() {
            let current = run.point_stride.max(1);
            if run.start_time >= cutoff || current >= target_stride {
                continue;
            }

            let relative = (target_stride / current).max(1);
            points_before += run.point_count();
            for track in run.tracks.iter_mut() {
                track.points = sample_every_nth(&track.points, relative as usize);
            }
            points_after += run.point_count();
            run.point_stride = current * relative;
            degraded += 1;
        }

        warn!(
            "[RunRepository] Degraded {} runs to stride {}: {} -> {} points",
            degraded, target_stride, points_before, points_after
        );
        degraded
    }

    // ========================================================================
    // Goals and achievements
    // ========================================================================

    pub fn load_goals(&self) -> Result<Vec<Goal>, RepositoryError> {
        Ok(load_key(&self.store, GOALS_KEY)?.unwrap_or_default())
    }

    pub fn save_goals(&mut self, goals: &[Goal]) -> Result<(), RepositoryError> {
        save_key(&mut self.store, GOALS_KEY, &goals)
    }

    pub fn load_unlocked(&self) -> Result<BTreeSet<String>, RepositoryError> {
        Ok(load_key(&self.store, UNLOCKED_KEY)?.unwrap_or_default())
    }

    pub fn save_unlocked(&mut self, unlocked: &BTreeSet<String>) -> Result<(), RepositoryError> {
        save_key(&mut self.store, UNLOCKED_KEY, unlocked)
    }
}

fn load_key<S: KeyValueStore, T: DeserializeOwned>(store: &S, key: &'static str) -> Result<Option<T>, RepositoryError> {
    match store.read(key)? {
        None => Ok(None),
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| RepositoryError::Corrupt { key, source }),
    }
}

fn save_key<S: KeyValueStore, T: Serialize + ?Sized>(store: &mut S, key: &str, value: &T) -> Result<(), RepositoryError> {
    let raw = serde_json::to_string(value)?;
    store.write(key, &raw)?;
    Ok(())
}

fn sort_newest_first(runs: &mut [RunRecord]) {
    runs.sort_by(|a, b| b.start_time.cmp(&a.start_time));
}
