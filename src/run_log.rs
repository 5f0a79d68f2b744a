//! # Run Log
//!
//! The engine facade. Owns the repository together with goals, unlocked
//! achievements and the story count, and keeps them consistent: every run
//! mutation recomputes goal progress, evaluates achievements and persists both
//! before returning.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use log::{info, warn};
use std::collections::BTreeSet;

use crate::achievements::{evaluate_achievements, AchievementStats};
use crate::aggregation::{self, PeriodKind, PeriodStats};
use crate::config::EngineConfig;
use crate::error::{Error, RepositoryError, Result, TrackParseError};
use crate::goals::{self, Goal, GoalMetric};
use crate::heatmap::{generate_heatmap, HeatmapConfig, HeatmapRange, HeatmapResult};
use crate::import::{parse_track_files, TrackFile};
use crate::repository::RunRepository;
use crate::storage::KeyValueStore;
use crate::{RunIdentity, RunRecord};

/// What a mutation changed beyond the mutation itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSummary {
    /// Runs actually inserted (duplicates excluded)
    pub inserted: usize,
    pub removed: usize,
    /// Ids of goals completed by this change
    pub goals_completed: Vec<String>,
    /// Achievement ids unlocked by this change
    pub achievements_unlocked: Vec<&'static str>,
}

/// Result of importing uploaded files.
#[derive(Debug, Default)]
pub struct FileImport {
    pub summary: ChangeSummary,
    pub failed: Vec<(String, TrackParseError)>,
}

pub struct RunLog<S: KeyValueStore> {
    repo: RunRepository<S>,
    goals: Vec<Goal>,
    unlocked: BTreeSet<String>,
    story_count: usize,
    config: EngineConfig,
    clock: fn() -> DateTime<Utc>,
}

impl<S: KeyValueStore> RunLog<S> {
    /// Open the log, loading runs, goals and unlocked achievements from `store`.
    pub fn open(store: S, config: EngineConfig) -> Result<Self> {
        let repo = RunRepository::open(store, config.persistence.clone())?;
        let goals = repo.load_goals()?;
        let unlocked = repo.load_unlocked()?;
        info!(
            "[RunLog] Opened with {} runs, {} goals, {} achievements",
            repo.len(),
            goals.len(),
            unlocked.len()
        );
        Ok(Self { repo, goals, unlocked, story_count: 0, config, clock: Utc::now })
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.repo = self.repo.with_clock(clock);
        self.clock = clock;
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn runs(&self) -> &[RunRecord] {
        self.repo.list_all()
    }

    pub fn repository(&self) -> &RunRepository<S> {
        &self.repo
    }

    pub fn goals(&self) -> &[Goal] {
        &self.goals
    }

    pub fn goal(&self, id: &str) -> Option<&Goal> {
        self.goals.iter().find(|g| g.id == id)
    }

    pub fn unlocked(&self) -> &BTreeSet<String> {
        &self.unlocked
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn offset(&self) -> FixedOffset {
        self.config.calendar_offset()
    }

    /// Today's date at the configured offset.
    pub fn today(&self) -> NaiveDate {
        aggregation::calendar_date((self.clock)(), self.offset())
    }

    // ========================================================================
    // Run mutations
    // ========================================================================

    /// Insert runs and refresh goals and achievements.
    ///
    /// If persisting fails (e.g. `StorageExhausted`) the runs stay in memory
    /// and goals and achievements are still recomputed before the error is returned.
    pub fn import_runs(&mut self, runs: Vec<RunRecord>) -> Result<ChangeSummary> {
        let before = self.repo.len();
        let stored = self.repo.insert_batch(runs);
        let inserted = self.repo.len() - before;
        if inserted == 0 {
            stored?;
            return Ok(ChangeSummary::default());
        }
        let mut summary = self.refresh_after(stored.map(|_| ()))?;
        summary.inserted = inserted;
        Ok(summary)
    }

    /// Parse and insert uploaded files. Files that fail to parse are reported, not fatal.
    pub fn import_files(&mut self, files: &[TrackFile]) -> Result<FileImport> {
        let report = parse_track_files(files, self.config.units);
        let summary = self.import_runs(report.records)?;
        Ok(FileImport { summary, failed: report.failed })
    }

    /// Apply edited tags and notes.
    pub fn update_run(&mut self, record: &RunRecord) -> Result<()> {
        self.repo.update(record)?;
        Ok(())
    }

    pub fn delete_run(&mut self, identity: &RunIdentity) -> Result<ChangeSummary> {
        let before = self.repo.len();
        let stored = self.repo.delete(identity);
        if self.repo.len() == before {
            stored?;
            return Ok(ChangeSummary::default());
        }
        let mut summary = self.refresh_after(stored.map(|_| ()))?;
        summary.removed = 1;
        Ok(summary)
    }

    // ========================================================================
    // Goals and stories
    // ========================================================================

    /// Create a goal and evaluate it immediately. Returns its id.
    pub fn add_goal(
        &mut self,
        metric: GoalMetric,
        target: f64,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<(String, ChangeSummary)> {
        let goal = Goal::new(metric, target, period_start, period_end);
        let id = goal.id.clone();
        self.goals.push(goal);
        let summary = self.refresh()?;
        Ok((id, summary))
    }

    pub fn complete_goal(&mut self, id: &str) -> Result<ChangeSummary> {
        let now = (self.clock)();
        let goal = self
            .goals
            .iter_mut()
            .find(|g| g.id == id)
            .ok_or_else(|| Error::GoalNotFound(id.to_string()))?;

        let newly = goal.mark_completed(now);
        let mut summary = self.refresh()?;
        if newly {
            summary.goals_completed.insert(0, id.to_string());
        }
        Ok(summary)
    }

    pub fn remove_goal(&mut self, id: &str) -> Result<bool> {
        let before = self.goals.len();
        self.goals.retain(|g| g.id != id);
        if self.goals.len() == before {
            return Ok(false);
        }
        self.repo.save_goals(&self.goals)?;
        Ok(true)
    }

    /// Stories live outside the engine; only their count feeds achievements.
    pub fn set_story_count(&mut self, count: usize) -> Result<ChangeSummary> {
        self.story_count = count;
        self.refresh()
    }

    fn refresh(&mut self) -> Result<ChangeSummary> {
        let summary = self.recompute();
        self.save_state(!summary.achievements_unlocked.is_empty())?;
        Ok(summary)
    }

    /// Refresh after a run mutation whose persistence produced `stored`.
    /// In-memory state is brought up to date even when `stored` failed.
    fn refresh_after(&mut self, stored: std::result::Result<(), RepositoryError>) -> Result<ChangeSummary> {
        let summary = self.recompute();
        let unlocked_changed = !summary.achievements_unlocked.is_empty();
        if let Err(e) = stored {
            if let Err(save) = self.save_state(unlocked_changed) {
                warn!("[RunLog] Could not save goals after failed run write: {}", save);
            }
            return Err(e.into());
        }
        self.save_state(unlocked_changed)?;
        Ok(summary)
    }

    /// Recompute goal progress and unlock achievements in memory.
    fn recompute(&mut self) -> ChangeSummary {
        let now = (self.clock)();
        let offset = self.offset();
        let runs = self.repo.list_all();

        let goals_completed = goals::refresh_goals(&mut self.goals, runs, self.config.units, offset, now);
        let stats = AchievementStats::collect(runs, &self.goals, self.story_count, offset);
        let achievements_unlocked = evaluate_achievements(&self.unlocked, &stats);

        if !achievements_unlocked.is_empty() {
            self.unlocked.extend(achievements_unlocked.iter().map(|id| id.to_string()));
            info!("[RunLog] Unlocked {:?}", achievements_unlocked);
        }
        if !goals_completed.is_empty() {
            info!("[RunLog] Completed {} goal(s)", goals_completed.len());
        }

        ChangeSummary { goals_completed, achievements_unlocked, ..ChangeSummary::default() }
    }

    fn save_state(&mut self, unlocked_changed: bool) -> Result<()> {
        self.repo.save_goals(&self.goals)?;
        if unlocked_changed {
            self.repo.save_unlocked(&self.unlocked)?;
        }
        Ok(())
    }

    // ========================================================================
    // Aggregates
    // ========================================================================

    pub fn weekly_stats(&self) -> Vec<PeriodStats<'_>> {
        aggregation::weekly_stats(self.runs(), self.offset(), self.config.units)
    }

    pub fn monthly_stats(&self) -> Vec<PeriodStats<'_>> {
        aggregation::monthly_stats(self.runs(), self.offset(), self.config.units)
    }

    /// The last `count` weeks or months up to today, including empty ones.
    pub fn recent_periods(&self, kind: PeriodKind, count: usize) -> Vec<PeriodStats<'_>> {
        aggregation::recent_periods(self.runs(), kind, count, self.today(), self.offset(), self.config.units)
    }

    pub fn custom_period(&self, start: NaiveDate, end: NaiveDate) -> PeriodStats<'_> {
        aggregation::custom_period(self.runs(), start, end, self.offset(), self.config.units)
    }

    pub fn heatmap(&self, range: HeatmapRange) -> HeatmapResult<'_> {
        let config = HeatmapConfig {
            range,
            units: self.config.units,
            utc_offset_minutes: self.config.utc_offset_minutes,
        };
        generate_heatmap(self.runs(), self.today(), &config)
    }

    pub fn longest_streak(&self) -> u32 {
        let offset = self.offset();
        goals::longest_streak(self.runs().iter().map(|r| aggregation::calendar_date(r.start_time, offset)))
    }

    pub fn current_streak(&self) -> u32 {
        goals::current_streak(self.runs(), self.today(), self.offset())
    }
}
