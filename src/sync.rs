//! Remote activity sync.
//!
//! Lists the athlete's activities, keeps the runs not already in the log, and
//! converts them one at a time: fetch streams, normalize (or fall back to a
//! coarse record), insert. Each activity is inserted as its own unit, so a
//! cancelled or rate-limited sync never leaves a half-converted run behind and
//! a later sync resumes where this one stopped.

use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

use crate::config::{SyncConfig, UnitSystem};
use crate::error::{FetchError, Result};
use crate::http::RemoteClient;
use crate::run_log::RunLog;
use crate::storage::KeyValueStore;
use crate::streams::{coarse_run, run_or_fallback, RemoteActivitySummary};
use crate::RunRecord;

/// Progress published while a sync runs, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Listing finished: `runs` of `listed` activities still need converting
    Listed { listed: usize, runs: usize, already_synced: usize },
    /// About to fetch streams for activity `index` (1-based) of `total`
    Fetching { activity_id: u64, index: usize, total: usize },
    /// Activity stored; `coarse` when it has no GPS points
    Converted { activity_id: u64, coarse: bool, inserted: bool },
    /// Got a 429; the request is retried after `retry_in`
    RateLimited { attempt: u32, retry_in: Duration },
    Finished(SyncSummary),
}

/// Why a sync stopped before converting every activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    /// The API kept answering 429; run the sync again later
    RateLimited,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncSummary {
    /// Activities returned by the listing, of any type
    pub listed: usize,
    /// Running activities among them
    pub runs: usize,
    pub inserted: usize,
    /// Runs already present before the sync
    pub skipped: usize,
    /// Runs stored without GPS points because their streams were unusable
    pub fallbacks: usize,
    /// Runs whose stream fetch failed outright (stored coarse as well)
    pub failed: usize,
    pub stopped: Option<StopReason>,
    pub goals_completed: Vec<String>,
    pub achievements_unlocked: Vec<&'static str>,
}

/// Shared flag checked between activities.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct SyncDriver {
    client: RemoteClient,
    running_types: Vec<String>,
    events: Option<UnboundedSender<SyncEvent>>,
    cancel: CancelFlag,
}

impl SyncDriver {
    pub fn new(client: RemoteClient, config: &SyncConfig) -> Self {
        Self {
            client,
            running_types: config.running_types.clone(),
            events: None,
            cancel: CancelFlag::new(),
        }
    }

    /// Publish progress to `events`. Rate-limit events from the client go to the same channel.
    pub fn with_events(mut self, events: UnboundedSender<SyncEvent>) -> Self {
        self.client = self.client.with_events(events.clone());
        self.events = Some(events);
        self
    }

    /// Handle that cancels this driver's syncs.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(events) = &self.events {
            // A dropped receiver only means nobody is watching
            let _ = events.send(event);
        }
    }

    /// Sync every running activity not yet in `log`.
    ///
    /// Listing failures other than rate limiting are returned as errors.
    /// Per-activity failures degrade to coarse records and never abort the batch.
    pub async fn run<S: KeyValueStore>(&self, log: &mut RunLog<S>) -> Result<SyncSummary> {
        let mut summary = SyncSummary::default();

        let activities = match self.client.list_all_activities().await {
            Ok(activities) => activities,
            Err(FetchError::RateLimited { .. }) => {
                warn!("[RemoteSync] Rate limited while listing; stopping");
                summary.stopped = Some(StopReason::RateLimited);
                return Ok(self.finish(summary));
            }
            Err(e) => return Err(e.into()),
        };

        summary.listed = activities.len();
        let synced = log.repository().remote_ids();
        let runs: Vec<RemoteActivitySummary> =
            activities.into_iter().filter(|a| a.is_run(&self.running_types)).collect();
        summary.runs = runs.len();

        let pending: Vec<&RemoteActivitySummary> = runs.iter().filter(|a| !synced.contains(&a.id)).collect();
        summary.skipped = runs.len() - pending.len();

        info!(
            "[RemoteSync] Listed {} activities: {} runs, {} already synced",
            summary.listed, summary.runs, summary.skipped
        );
        self.emit(SyncEvent::Listed { listed: summary.listed, runs: pending.len(), already_synced: summary.skipped });

        let units = log.config().units;
        let total = pending.len();
        for (i, activity) in pending.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!("[RemoteSync] Cancelled after {} of {} activities", i, total);
                summary.stopped = Some(StopReason::Cancelled);
                break;
            }

            self.emit(SyncEvent::Fetching { activity_id: activity.id, index: i + 1, total });
            let (run, coarse) = match self.convert(activity, units, &mut summary).await {
                Some(converted) => converted,
                None => {
                    summary.stopped = Some(StopReason::RateLimited);
                    break;
                }
            };

            let change = log.import_runs(vec![run])?;
            summary.inserted += change.inserted;
            summary.goals_completed.extend(change.goals_completed);
            summary.achievements_unlocked.extend(change.achievements_unlocked);
            self.emit(SyncEvent::Converted { activity_id: activity.id, coarse, inserted: change.inserted > 0 });
        }

        info!(
            "[RemoteSync] Done: {} inserted, {} fallbacks, {} failed, stopped={:?}",
            summary.inserted, summary.fallbacks, summary.failed, summary.stopped
        );
        Ok(self.finish(summary))
    }

    /// Fetch and normalize one activity. `None` means the API is rate limiting us.
    async fn convert(
        &self,
        activity: &RemoteActivitySummary,
        units: UnitSystem,
        summary: &mut SyncSummary,
    ) -> Option<(RunRecord, bool)> {
        match self.client.fetch_streams(activity.id).await {
            Ok(payload) => {
                let conversion = run_or_fallback(activity, &payload, units);
                let coarse = conversion.is_coarse();
                if coarse {
                    summary.fallbacks += 1;
                }
                Some((conversion.into_run(), coarse))
            }
            Err(e) if e.is_rate_limit() => {
                warn!("[RemoteSync] Activity {}: {}; stopping", activity.id, e);
                None
            }
            Err(e) => {
                warn!("[RemoteSync] Activity {}: {}; using summary only", activity.id, e);
                summary.failed += 1;
                Some((coarse_run(activity, units), true))
            }
        }
    }

    fn finish(&self, summary: SyncSummary) -> SyncSummary {
        self.emit(SyncEvent::Finished(summary.clone()));
        summary
    }
}
