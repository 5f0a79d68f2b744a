//! # Goal Progress
//!
//! Goals track one metric over a `[period_start, period_end)` window.
//! Progress is recomputed from the run set after every mutation and stored
//! clamped to the target; completion is decided on the unclamped value and,
//! once set, is never reverted.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::aggregation::calendar_date;
use crate::config::UnitSystem;
use crate::RunRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalMetric {
    /// Distance in the configured unit
    Distance,
    /// Moving time in minutes
    Time,
    RunCount,
    /// Longest run of consecutive calendar days
    Streak,
    /// Climb in the configured elevation unit
    Elevation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub metric: GoalMetric,
    pub target: f64,
    /// Clamped to `target`
    pub progress: f64,
    pub period_start: DateTime<Utc>,
    /// Exclusive
    pub period_end: DateTime<Utc>,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Goal {
    pub fn new(metric: GoalMetric, target: f64, period_start: DateTime<Utc>, period_end: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            metric,
            target,
            progress: 0.0,
            period_start,
            period_end,
            completed: false,
            completed_at: None,
        }
    }

    /// Store a freshly computed progress value. Returns true if this completed the goal.
    pub fn apply_progress(&mut self, raw: f64, now: DateTime<Utc>) -> bool {
        self.progress = raw.clamp(0.0, self.target.max(0.0));
        if !self.completed && raw >= self.target {
            self.completed = true;
            self.completed_at = Some(now);
            return true;
        }
        false
    }

    /// Mark the goal complete by hand. Returns false if it already was.
    pub fn mark_completed(&mut self, now: DateTime<Utc>) -> bool {
        if self.completed {
            return false;
        }
        self.completed = true;
        self.completed_at = Some(now);
        true
    }

    pub fn percent_complete(&self) -> f64 {
        if self.target <= 0.0 {
            return 100.0;
        }
        (self.progress / self.target * 100.0).min(100.0)
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.period_start <= ts && ts < self.period_end
    }
}

/// Raw (unclamped) progress for `metric` over runs starting in `[start, end)`.
pub fn evaluate_progress(
    metric: GoalMetric,
    runs: &[RunRecord],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    units: UnitSystem,
    offset: FixedOffset,
) -> f64 {
    let in_window = runs.iter().filter(|r| start <= r.start_time && r.start_time < end);

    match metric {
        GoalMetric::Distance => units.to_distance_units(in_window.map(|r| r.total_distance_meters).sum()),
        GoalMetric::Time => in_window.map(|r| r.total_duration_seconds).sum::<f64>() / 60.0,
        GoalMetric::RunCount => in_window.count() as f64,
        GoalMetric::Elevation => units.to_elevation_units(in_window.map(|r| r.elevation_gain_meters).sum()),
        GoalMetric::Streak => longest_streak(in_window.map(|r| calendar_date(r.start_time, offset))) as f64,
    }
}

/// Recompute every goal. Returns the ids of goals completed by this refresh.
pub fn refresh_goals(
    goals: &mut [Goal],
    runs: &[RunRecord],
    units: UnitSystem,
    offset: FixedOffset,
    now: DateTime<Utc>,
) -> Vec<String> {
    goals
        .iter_mut()
        .filter_map(|goal| {
            let raw = evaluate_progress(goal.metric, runs, goal.period_start, goal.period_end, units, offset);
            goal.apply_progress(raw, now).then(|| goal.id.clone())
        })
        .collect()
}

// ============================================================================
// Streaks
// ============================================================================

/// Longest run of consecutive calendar days. Duplicate dates count once; no dates is 0.
pub fn longest_streak(dates: impl IntoIterator<Item = NaiveDate>) -> u32 {
    let days: BTreeSet<NaiveDate> = dates.into_iter().collect();
    let mut longest = 0;
    let mut current = 0;
    let mut previous: Option<NaiveDate> = None;

    for day in days {
        current = match previous {
            Some(prev) if day - prev == Duration::days(1) => current + 1,
            _ => 1,
        };
        longest = longest.max(current);
        previous = Some(day);
    }

    longest
}

/// Consecutive days with a run ending today, or yesterday if today has none yet.
pub fn current_streak(runs: &[RunRecord], today: NaiveDate, offset: FixedOffset) -> u32 {
    let days: BTreeSet<NaiveDate> = runs.iter().map(|r| calendar_date(r.start_time, offset)).collect();

    let mut day = if days.contains(&today) {
        today
    } else {
        match today.pred_opt() {
            Some(yesterday) if days.contains(&yesterday) => yesterday,
            _ => return 0,
        }
    };

    let mut streak = 0;
    while days.contains(&day) {
        streak += 1;
        match day.pred_opt() {
            Some(prev) => day = prev,
            None => break,
        }
    }
    streak
}
